//! PCRD-opt layer formation (§4.I): given each code-block's per-pass
//! rate/distortion trace, pick truncation points that maximize reconstructed
//! quality for a given byte budget, and repeat for as many quality layers as
//! the encoder was configured with.
//!
//! The classic post-compression rate-distortion optimization algorithm
//! (Taubman & Marcellin, *JPEG2000: Image Compression Fundamentals*, §8.4.3):
//! each block's candidate truncation points form a convex hull on the
//! `(rate, distortion)` plane, and a single Lagrangian slope `λ` shared by
//! every block in the tile selects one truncation point per block. Sweeping
//! `λ` down sweeps the total rate up monotonically, so the target byte
//! budget is found by bisection rather than a linear scan over passes.

use crate::error::{J2kError, Result};

/// One candidate truncation point for a code-block: stop emitting after
/// `pass` coding passes, costing `cumulative_bytes` bytes and leaving
/// `distortion` mean-squared error in the reconstructed block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncationPoint {
    pub pass: usize,
    pub cumulative_bytes: u32,
    pub distortion: f64,
}

/// A code-block's full rate-distortion trace, one entry per coding pass in
/// increasing pass order (and thus non-increasing distortion, non-decreasing
/// rate).
#[derive(Debug, Clone)]
pub struct BlockTrace {
    pub points: Vec<TruncationPoint>,
}

impl BlockTrace {
    pub fn new(points: Vec<TruncationPoint>) -> Self {
        Self { points }
    }

    /// Distortion reduction per extra byte spent, between consecutive
    /// truncation points, the marginal "slope" a hull point must beat to
    /// survive.
    fn slope(a: &TruncationPoint, b: &TruncationPoint) -> f64 {
        let dr = (b.cumulative_bytes as f64 - a.cumulative_bytes as f64).max(1e-9);
        let dd = (a.distortion - b.distortion).max(0.0);
        dd / dr
    }

    /// Filters `points` down to its upper convex hull in the (rate,
    /// -distortion) plane: points whose slope from the previous hull point
    /// is no better than the running slope are dominated and dropped. The
    /// zero-byte / full-distortion point is always kept as the hull's start.
    pub fn convex_hull(&self) -> Vec<TruncationPoint> {
        let mut hull: Vec<TruncationPoint> = Vec::new();
        for &p in &self.points {
            while hull.len() >= 2 {
                let a = hull[hull.len() - 2];
                let b = hull[hull.len() - 1];
                if Self::slope(&a, &b) <= Self::slope(&b, &p) {
                    hull.pop();
                } else {
                    break;
                }
            }
            hull.push(p);
        }
        hull
    }
}

/// Selects, for one code-block's convex hull, the truncation point
/// maximizing `-distortion - lambda * rate`, equivalently the last hull
/// point whose incremental slope against its predecessor is still `>= lambda`.
fn select_for_lambda(hull: &[TruncationPoint], lambda: f64) -> TruncationPoint {
    let mut chosen = hull[0];
    for window in hull.windows(2) {
        let (a, b) = (window[0], window[1]);
        if BlockTrace::slope(&a, &b) >= lambda {
            chosen = b;
        } else {
            break;
        }
    }
    chosen
}

fn total_bytes(hulls: &[Vec<TruncationPoint>], lambda: f64) -> (u32, Vec<TruncationPoint>) {
    let mut total = 0u32;
    let mut picks = Vec::with_capacity(hulls.len());
    for hull in hulls {
        let pick = select_for_lambda(hull, lambda);
        total += pick.cumulative_bytes;
        picks.push(pick);
    }
    (total, picks)
}

/// Finds the largest total byte count `<= budget` achievable by a single
/// shared `λ`, via bisection over `λ` (monotonic: smaller `λ` admits more
/// bytes). Returns one truncation point per block.
pub fn optimize_for_budget(traces: &[BlockTrace], budget_bytes: u32) -> Vec<TruncationPoint> {
    let hulls: Vec<Vec<TruncationPoint>> = traces.iter().map(BlockTrace::convex_hull).collect();
    if hulls.is_empty() {
        return Vec::new();
    }

    let mut lo = 0.0f64;
    let mut hi = 1.0f64;
    let (all_bytes, _) = total_bytes(&hulls, 0.0);
    if all_bytes as u64 <= budget_bytes as u64 {
        return total_bytes(&hulls, 0.0).1;
    }

    // Grow hi until its selection fits the budget, then bisect for the
    // tightest lambda still fitting.
    let mut best = total_bytes(&hulls, lo).1;
    for _ in 0..64 {
        let (bytes, picks) = total_bytes(&hulls, hi);
        if bytes as u64 <= budget_bytes as u64 {
            best = picks;
            break;
        }
        hi *= 2.0;
    }

    for _ in 0..48 {
        let mid = (lo + hi) / 2.0;
        let (bytes, picks) = total_bytes(&hulls, mid);
        if bytes as u64 <= budget_bytes as u64 {
            hi = mid;
            best = picks;
        } else {
            lo = mid;
        }
    }
    best
}

/// Runs [`optimize_for_budget`] at `layer_budgets.len()` decreasing byte
/// budgets, one per quality layer, enforcing that each block's truncation
/// never shrinks from the previous (coarser) layer: a layer strictly
/// refines the one before it.
pub fn form_layers(traces: &[BlockTrace], layer_budgets: &[u32]) -> Result<Vec<Vec<TruncationPoint>>> {
    if layer_budgets.is_empty() {
        return Err(J2kError::InvalidConfiguration("at least one layer budget is required".into()));
    }
    for pair in layer_budgets.windows(2) {
        if pair[1] < pair[0] {
            return Err(J2kError::InvalidConfiguration("layer budgets must be non-decreasing".into()));
        }
    }

    let mut layers = Vec::with_capacity(layer_budgets.len());
    let mut floor: Vec<usize> = vec![0; traces.len()];

    for &budget in layer_budgets {
        let mut picks = optimize_for_budget(traces, budget);
        for (i, pick) in picks.iter_mut().enumerate() {
            if pick.pass < floor[i] {
                // A tighter budget chose fewer passes than an earlier, more
                // generous layer already committed to; snap back up so
                // layers strictly refine rather than regress.
                let trace = &traces[i];
                if let Some(p) = trace.points.iter().find(|p| p.pass == floor[i]) {
                    *pick = *p;
                }
            }
            floor[i] = pick.pass;
        }
        layers.push(picks);
    }
    Ok(layers)
}

/// The lossless truncation set: every block's final pass, all in one layer.
pub fn lossless_layer(traces: &[BlockTrace]) -> Vec<TruncationPoint> {
    traces
        .iter()
        .map(|t| *t.points.last().expect("a code-block trace always has at least one pass"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(points: &[(usize, u32, f64)]) -> BlockTrace {
        BlockTrace::new(
            points
                .iter()
                .map(|&(pass, cumulative_bytes, distortion)| TruncationPoint { pass, cumulative_bytes, distortion })
                .collect(),
        )
    }

    #[test]
    fn convex_hull_drops_dominated_points() {
        let t = trace(&[(0, 0, 100.0), (1, 10, 60.0), (2, 20, 55.0), (3, 30, 10.0)]);
        let hull = t.convex_hull();
        // Point 2 is dominated: its slope from point 1 (0.5/byte) is worse
        // than point 3's slope from point 1 (2.25/byte), so it never wins
        // under any lambda and should be dropped.
        assert!(hull.iter().all(|p| p.pass != 2));
        assert_eq!(hull.first().unwrap().pass, 0);
        assert_eq!(hull.last().unwrap().pass, 3);
    }

    #[test]
    fn optimize_for_budget_respects_the_cap() {
        let traces = vec![
            trace(&[(0, 0, 100.0), (1, 40, 20.0), (2, 80, 5.0)]),
            trace(&[(0, 0, 90.0), (1, 50, 15.0), (2, 90, 4.0)]),
        ];
        let picks = optimize_for_budget(&traces, 100);
        let total: u32 = picks.iter().map(|p| p.cumulative_bytes).sum();
        assert!(total <= 100);
    }

    #[test]
    fn generous_budget_reaches_full_passes() {
        let traces = vec![trace(&[(0, 0, 100.0), (1, 40, 20.0), (2, 80, 5.0)])];
        let picks = optimize_for_budget(&traces, 1_000_000);
        assert_eq!(picks[0].pass, 2);
    }

    #[test]
    fn layers_are_monotonically_non_shrinking() {
        let traces = vec![
            trace(&[(0, 0, 100.0), (1, 20, 40.0), (2, 60, 10.0), (3, 120, 2.0)]),
            trace(&[(0, 0, 90.0), (1, 25, 35.0), (2, 70, 8.0), (3, 130, 1.0)]),
        ];
        let layers = form_layers(&traces, &[60, 150, 1_000_000]).unwrap();
        for block in 0..traces.len() {
            let mut prev = 0;
            for layer in &layers {
                assert!(layer[block].pass >= prev);
                prev = layer[block].pass;
            }
        }
    }

    #[test]
    fn rejects_decreasing_layer_budgets() {
        let traces = vec![trace(&[(0, 0, 10.0), (1, 10, 1.0)])];
        assert!(form_layers(&traces, &[100, 50]).is_err());
    }

    #[test]
    fn lossless_layer_picks_final_pass_for_every_block() {
        let traces = vec![
            trace(&[(0, 0, 10.0), (1, 5, 0.0)]),
            trace(&[(0, 0, 8.0), (1, 4, 0.0), (2, 9, 0.0)]),
        ];
        let picks = lossless_layer(&traces);
        assert_eq!(picks[0].pass, 1);
        assert_eq!(picks[1].pass, 2);
    }
}
