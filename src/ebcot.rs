//! EBCOT Tier-1 bit-plane coding (§4.C): the three-pass (significance
//! propagation, magnitude refinement, cleanup) MQ-coded bitplane scan run
//! independently per code-block.
//!
//! Context assignment follows ISO Annex D: contexts 0-8 are zero-coding
//! (significance), 9-13 sign-coding, 14-16 magnitude-refinement, 17 the
//! cleanup pass's run-length context, 18 the uniform context used for the
//! run's position bits.

use crate::mq_coder::{Context, MqDecoder, MqEncoder};
use crate::quantization::SubbandKind;

const CTX_RUN: usize = 17;
const CTX_UNIFORM: usize = 18;
const NUM_CONTEXTS: usize = 19;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sign {
    Pos,
    Neg,
}

struct BlockState {
    width: usize,
    height: usize,
    sig: Vec<bool>,
    sign: Vec<Option<Sign>>,
    refined: Vec<bool>,
    visited: Vec<bool>,
}

impl BlockState {
    fn new(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            sig: vec![false; n],
            sign: vec![None; n],
            refined: vec![false; n],
            visited: vec![false; n],
        }
    }

    fn idx(&self, x: isize, y: isize) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    fn is_sig(&self, x: isize, y: isize) -> bool {
        self.idx(x, y).map(|i| self.sig[i]).unwrap_or(false)
    }

    fn sign_of(&self, x: isize, y: isize) -> Option<Sign> {
        self.idx(x, y).and_then(|i| self.sign[i])
    }

    /// (horizontal, vertical, diagonal) significant-neighbor counts, used by
    /// both the zero-coding context lookup and the run-length eligibility
    /// check.
    fn neighbor_counts(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let (x, y) = (x as isize, y as isize);
        let h = self.is_sig(x - 1, y) as u8 + self.is_sig(x + 1, y) as u8;
        let v = self.is_sig(x, y - 1) as u8 + self.is_sig(x, y + 1) as u8;
        let d = self.is_sig(x - 1, y - 1) as u8
            + self.is_sig(x + 1, y - 1) as u8
            + self.is_sig(x - 1, y + 1) as u8
            + self.is_sig(x + 1, y + 1) as u8;
        (h, v, d)
    }

    fn any_neighbor_significant(&self, x: usize, y: usize) -> bool {
        let (h, v, d) = self.neighbor_counts(x, y);
        h > 0 || v > 0 || d > 0
    }
}

/// Zero-coding context (ISO Table D.1), selected by subband orientation.
fn zc_context(kind: SubbandKind, h: u8, v: u8, d: u8) -> usize {
    match kind {
        SubbandKind::Ll | SubbandKind::Lh => match (h, v, d) {
            (2, _, _) => 8,
            (1, v, _) if v >= 1 => 7,
            (1, 0, d) if d >= 1 => 6,
            (1, 0, 0) => 5,
            (0, 2, _) => 4,
            (0, 1, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            _ => 0,
        },
        SubbandKind::Hl => match (v, h, d) {
            (2, _, _) => 8,
            (1, h, _) if h >= 1 => 7,
            (1, 0, d) if d >= 1 => 6,
            (1, 0, 0) => 5,
            (0, 2, _) => 4,
            (0, 1, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            _ => 0,
        },
        SubbandKind::Hh => {
            let hv = h + v;
            match (d, hv) {
                (d, _) if d >= 3 => 8,
                (2, hv) if hv >= 1 => 7,
                (2, _) => 6,
                (1, hv) if hv >= 2 => 5,
                (1, 1) => 4,
                (1, _) => 3,
                (_, hv) if hv >= 2 => 2,
                (_, 1) => 1,
                _ => 0,
            }
        }
    }
}

/// Sign context and predicted sign (ISO Table D.2): contexts 9-13, with the
/// actual coded bit XORed against the majority-neighbor-sign prediction.
fn sign_context(state: &BlockState, x: usize, y: usize) -> (usize, bool) {
    let contribution = |a: Option<Sign>, b: Option<Sign>| -> i32 {
        let val = |s: Option<Sign>| match s {
            Some(Sign::Pos) => 1,
            Some(Sign::Neg) => -1,
            None => 0,
        };
        (val(a) + val(b)).clamp(-1, 1)
    };
    let (x, y) = (x as isize, y as isize);
    let hc = contribution(state.sign_of(x - 1, y), state.sign_of(x + 1, y));
    let vc = contribution(state.sign_of(x, y - 1), state.sign_of(x, y + 1));

    match (hc, vc) {
        (1, 1) => (13, false),
        (1, 0) => (12, false),
        (1, -1) => (11, false),
        (0, 1) => (10, false),
        (0, 0) => (9, false),
        (0, -1) => (10, true),
        (-1, 1) => (11, true),
        (-1, 0) => (12, true),
        (-1, -1) => (13, true),
        _ => (9, false),
    }
}

/// Magnitude-refinement context (ISO Table D.3): contexts 14-16.
fn mr_context(state: &BlockState, x: usize, y: usize) -> usize {
    let idx = y * state.width + x;
    if state.refined[idx] {
        16
    } else if state.any_neighbor_significant(x, y) {
        15
    } else {
        14
    }
}

fn magnitude_bit(coeff: i32, plane: u8) -> u8 {
    ((coeff.unsigned_abs() >> plane) & 1) as u8
}

/// Number of bitplanes needed to represent the largest-magnitude coefficient;
/// the caller loops `(0..=kmax).rev()`.
pub fn max_bit_plane(coeffs: &[i32]) -> u8 {
    let max_mag = coeffs.iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);
    if max_mag == 0 {
        0
    } else {
        31 - max_mag.leading_zeros() as u8
    }
}

/// One coding pass's contribution to a code-block's rate-distortion trace:
/// the total bytes needed to include everything up to and including this
/// pass, and the estimated distortion remaining if truncated there.
#[derive(Clone, Copy, Debug)]
pub struct PassRecord {
    pub cumulative_bytes: u32,
    pub distortion: f64,
}

/// Encodes a code-block's coefficients and terminates every coding pass at a
/// byte boundary (ISO Annex D.4's per-pass termination), so rate control can
/// truncate the returned buffer after any pass, not just at the end. The
/// first (coarsest) bitplane only ever runs its cleanup pass: with no sample
/// significant yet, significance propagation and magnitude refinement would
/// both code nothing, so they are skipped rather than run as no-ops. That
/// gives exactly `3*(kmax+1) - 2` passes, matching the usual per-block count.
///
/// The returned buffer is self-delimiting: a one-byte pass count, that many
/// little-endian u32 segment lengths, then the concatenated MQ segments.
pub fn encode(coeffs: &[i32], width: usize, height: usize, kind: SubbandKind) -> (Vec<u8>, u8, Vec<PassRecord>) {
    let kmax = max_bit_plane(coeffs);
    let mut state = BlockState::new(width, height);
    let mut mq = MqEncoder::new(NUM_CONTEXTS);
    let mut segment_lengths: Vec<u32> = Vec::new();
    let mut passes: Vec<PassRecord> = Vec::new();
    let mut remaining = coeffs.iter().map(|&c| (c as f64).powi(2)).sum::<f64>().max(1e-6);
    let mut committed = 0u32;

    let mut commit = |mq: &mut MqEncoder, newly: u32, weight_sq: f64, segment_lengths: &mut Vec<u32>, passes: &mut Vec<PassRecord>, committed: &mut u32, remaining: &mut f64| {
        mq.terminate_segment();
        let now = mq.committed_len() as u32;
        segment_lengths.push(now - *committed);
        *committed = now;
        *remaining = (*remaining - newly as f64 * weight_sq).max(0.0);
        passes.push(PassRecord { cumulative_bytes: 0, distortion: *remaining });
    };

    for plane in (0..=kmax).rev() {
        state.visited.iter_mut().for_each(|v| *v = false);
        let weight_sq = ((1u64 << plane) as f64).powi(2);

        if plane != kmax {
            let newly = significance_pass_encode(&mut mq, &mut state, coeffs, width, height, plane, kind);
            commit(&mut mq, newly, weight_sq, &mut segment_lengths, &mut passes, &mut committed, &mut remaining);

            let newly = refinement_pass_encode(&mut mq, &mut state, coeffs, width, height, plane);
            commit(&mut mq, newly, weight_sq, &mut segment_lengths, &mut passes, &mut committed, &mut remaining);
        }

        let newly = cleanup_pass_encode(&mut mq, &mut state, coeffs, width, height, plane, kind);
        commit(&mut mq, newly, weight_sq, &mut segment_lengths, &mut passes, &mut committed, &mut remaining);
    }

    let body = mq.into_bytes();
    let header_len = 1 + 4 * segment_lengths.len();
    let mut data = Vec::with_capacity(header_len + body.len());
    data.push(segment_lengths.len() as u8);
    for &len in &segment_lengths {
        data.extend_from_slice(&len.to_le_bytes());
    }
    data.extend_from_slice(&body);

    let mut cumulative = header_len as u32;
    for (record, &len) in passes.iter_mut().zip(segment_lengths.iter()) {
        cumulative += len;
        record.cumulative_bytes = cumulative;
    }

    (data, kmax, passes)
}

/// Parses the self-delimiting header `encode` writes: a pass count followed
/// by that many little-endian u32 segment lengths. Stops early on a short
/// buffer instead of panicking, for a truncated code-block.
fn read_pass_lengths(data: &[u8]) -> (Vec<u32>, usize) {
    if data.is_empty() {
        return (Vec::new(), 0);
    }
    let total = data[0] as usize;
    let mut lengths = Vec::with_capacity(total);
    let mut pos = 1usize;
    for _ in 0..total {
        if pos + 4 > data.len() {
            break;
        }
        lengths.push(u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]));
        pos += 4;
    }
    (lengths, pos)
}

/// Decodes up to `num_passes` of the code-block's coding passes. `num_passes`
/// lets a caller reconstruct from a quality-layer-truncated prefix: only the
/// passes actually present in `data` are walked, each through its own
/// independently-terminated MQ segment, with the adapted context table
/// carried from one segment's decoder into the next's.
pub fn decode(data: &[u8], width: usize, height: usize, kmax: u8, kind: SubbandKind, num_passes: u32) -> Vec<i32> {
    let mut state = BlockState::new(width, height);
    let mut coeffs = vec![0i32; width * height];

    let (lengths, header_len) = read_pass_lengths(data);
    let body = if header_len <= data.len() { &data[header_len..] } else { &[][..] };
    let available = (num_passes as usize).min(lengths.len());

    let mut contexts = vec![Context::default(); NUM_CONTEXTS];
    let mut offset = 0usize;
    let mut done = 0usize;

    let mut next_segment = |contexts: Vec<Context>, offset: &mut usize, done: &mut usize| -> Option<MqDecoder> {
        if *done >= available {
            return None;
        }
        let len = lengths[*done] as usize;
        let start = (*offset).min(body.len());
        let end = (*offset + len).min(body.len());
        *offset += len;
        *done += 1;
        Some(MqDecoder::new_with_contexts(&body[start..end], contexts))
    };

    'planes: for plane in (0..=kmax).rev() {
        state.visited.iter_mut().for_each(|v| *v = false);

        if plane != kmax {
            let Some(mut mq) = next_segment(contexts, &mut offset, &mut done) else {
                break 'planes;
            };
            significance_pass_decode(&mut mq, &mut state, &mut coeffs, width, height, plane, kind);
            contexts = mq.into_contexts();

            let Some(mut mq) = next_segment(contexts, &mut offset, &mut done) else {
                break 'planes;
            };
            refinement_pass_decode(&mut mq, &mut state, &mut coeffs, width, height, plane);
            contexts = mq.into_contexts();
        }

        let Some(mut mq) = next_segment(contexts, &mut offset, &mut done) else {
            break 'planes;
        };
        cleanup_pass_decode(&mut mq, &mut state, &mut coeffs, width, height, plane, kind);
        contexts = mq.into_contexts();
    }
    coeffs
}

/// Stripe order: columns of up to 4 rows, scanned top-to-bottom then
/// left-to-right within the code-block (ISO §B.10.2 / Annex D.3).
fn for_each_stripe_column(width: usize, height: usize, mut f: impl FnMut(usize, usize, usize)) {
    let mut y0 = 0;
    while y0 < height {
        let stripe_h = 4.min(height - y0);
        for x in 0..width {
            f(x, y0, stripe_h);
        }
        y0 += 4;
    }
}

/// Returns the number of samples newly found significant this pass.
fn significance_pass_encode(
    mq: &mut MqEncoder,
    state: &mut BlockState,
    coeffs: &[i32],
    width: usize,
    height: usize,
    plane: u8,
    kind: SubbandKind,
) -> u32 {
    let mut newly_significant = 0u32;
    for_each_stripe_column(width, height, |x, y0, stripe_h| {
        for dy in 0..stripe_h {
            let y = y0 + dy;
            let idx = y * width + x;
            if state.sig[idx] || state.visited[idx] {
                continue;
            }
            let (h, v, d) = state.neighbor_counts(x, y);
            if h == 0 && v == 0 && d == 0 {
                continue;
            }
            let bit = magnitude_bit(coeffs[idx], plane);
            mq.encode(bit, zc_context(kind, h, v, d));
            state.visited[idx] = true;
            if bit == 1 {
                state.sig[idx] = true;
                newly_significant += 1;
                let positive = coeffs[idx] >= 0;
                let (ctx, predicted_neg) = sign_context(state, x, y);
                let actual_neg = !positive;
                mq.encode((actual_neg != predicted_neg) as u8, ctx);
                state.sign[idx] = Some(if positive { Sign::Pos } else { Sign::Neg });
            }
        }
    });
    newly_significant
}

fn significance_pass_decode(
    mq: &mut MqDecoder,
    state: &mut BlockState,
    coeffs: &mut [i32],
    width: usize,
    height: usize,
    plane: u8,
    kind: SubbandKind,
) {
    for_each_stripe_column(width, height, |x, y0, stripe_h| {
        for dy in 0..stripe_h {
            let y = y0 + dy;
            let idx = y * width + x;
            if state.sig[idx] || state.visited[idx] {
                continue;
            }
            let (h, v, d) = state.neighbor_counts(x, y);
            if h == 0 && v == 0 && d == 0 {
                continue;
            }
            let bit = mq.decode(zc_context(kind, h, v, d));
            state.visited[idx] = true;
            if bit == 1 {
                state.sig[idx] = true;
                let (ctx, predicted_neg) = sign_context(state, x, y);
                let flip = mq.decode(ctx) != 0;
                let negative = flip != predicted_neg;
                state.sign[idx] = Some(if negative { Sign::Neg } else { Sign::Pos });
                let magnitude = 1i32 << plane;
                coeffs[idx] = if negative { -magnitude } else { magnitude };
            }
        }
    });
}

/// Returns the number of samples refined this pass; every refined sample
/// narrows the magnitude estimate regardless of which bit comes out, so all
/// of them count toward the distortion reduction.
fn refinement_pass_encode(
    mq: &mut MqEncoder,
    state: &mut BlockState,
    coeffs: &[i32],
    width: usize,
    height: usize,
    plane: u8,
) -> u32 {
    let mut refined_count = 0u32;
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !state.sig[idx] || state.visited[idx] {
                continue;
            }
            state.visited[idx] = true;
            refined_count += 1;
            let ctx = mr_context(state, x, y);
            let bit = magnitude_bit(coeffs[idx], plane);
            mq.encode(bit, ctx);
            state.refined[idx] = true;
        }
    }
    refined_count
}

fn refinement_pass_decode(
    mq: &mut MqDecoder,
    state: &mut BlockState,
    coeffs: &mut [i32],
    width: usize,
    height: usize,
    plane: u8,
) {
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !state.sig[idx] || state.visited[idx] {
                continue;
            }
            state.visited[idx] = true;
            let ctx = mr_context(state, x, y);
            let bit = mq.decode(ctx);
            if bit == 1 {
                let delta = 1i32 << plane;
                coeffs[idx] += if state.sign[idx] == Some(Sign::Neg) { -delta } else { delta };
            }
            state.refined[idx] = true;
        }
    }
}

/// Column is eligible for the run-length shortcut only when none of its 4
/// samples have been visited yet and every sample has zero significant
/// neighbors (so its individual ZC context would be 0, ISO §D.4.4).
fn run_length_eligible(state: &BlockState, x: usize, y0: usize, stripe_h: usize) -> bool {
    stripe_h == 4
        && (0..4).all(|dy| {
            let y = y0 + dy;
            let idx = y * state.width + x;
            !state.sig[idx] && !state.visited[idx] && !state.any_neighbor_significant(x, y)
        })
}

/// Returns the number of samples newly found significant this pass.
fn cleanup_pass_encode(
    mq: &mut MqEncoder,
    state: &mut BlockState,
    coeffs: &[i32],
    width: usize,
    height: usize,
    plane: u8,
    kind: SubbandKind,
) -> u32 {
    let mut newly_significant = 0u32;
    for_each_stripe_column(width, height, |x, y0, stripe_h| {
        let (start_row, forced_row) = if run_length_eligible(state, x, y0, stripe_h) {
            let bits: Vec<u8> = (0..4).map(|dy| magnitude_bit(coeffs[(y0 + dy) * width + x], plane)).collect();
            if bits.iter().all(|&b| b == 0) {
                mq.encode(0, CTX_RUN);
                return;
            }
            mq.encode(1, CTX_RUN);
            let first = bits.iter().position(|&b| b == 1).unwrap() as u32;
            mq.write_uniform(CTX_UNIFORM, first, 2);
            (first as usize, Some(first as usize))
        } else {
            (0, None)
        };

        for dy in start_row..stripe_h {
            let y = y0 + dy;
            let idx = y * width + x;
            if state.sig[idx] || state.visited[idx] {
                continue;
            }
            let bit = if forced_row == Some(dy) {
                1
            } else {
                let (h, v, d) = state.neighbor_counts(x, y);
                let b = magnitude_bit(coeffs[idx], plane);
                mq.encode(b, zc_context(kind, h, v, d));
                b
            };
            if bit == 1 {
                state.sig[idx] = true;
                newly_significant += 1;
                let positive = coeffs[idx] >= 0;
                let (ctx, predicted_neg) = sign_context(state, x, y);
                let actual_neg = !positive;
                mq.encode((actual_neg != predicted_neg) as u8, ctx);
                state.sign[idx] = Some(if positive { Sign::Pos } else { Sign::Neg });
            }
        }
    });
    newly_significant
}

fn cleanup_pass_decode(
    mq: &mut MqDecoder,
    state: &mut BlockState,
    coeffs: &mut [i32],
    width: usize,
    height: usize,
    plane: u8,
    kind: SubbandKind,
) {
    for_each_stripe_column(width, height, |x, y0, stripe_h| {
        let (start_row, forced_row) = if run_length_eligible(state, x, y0, stripe_h) {
            let run = mq.decode(CTX_RUN);
            if run == 0 {
                return;
            }
            let first = mq.read_uniform(CTX_UNIFORM, 2) as usize;
            (first, Some(first))
        } else {
            (0, None)
        };

        for dy in start_row..stripe_h {
            let y = y0 + dy;
            let idx = y * width + x;
            if state.sig[idx] || state.visited[idx] {
                continue;
            }
            let bit = if forced_row == Some(dy) {
                1
            } else {
                let (h, v, d) = state.neighbor_counts(x, y);
                mq.decode(zc_context(kind, h, v, d))
            };
            if bit == 1 {
                state.sig[idx] = true;
                let (ctx, predicted_neg) = sign_context(state, x, y);
                let flip = mq.decode(ctx) != 0;
                let negative = flip != predicted_neg;
                state.sign[idx] = Some(if negative { Sign::Neg } else { Sign::Pos });
                let magnitude = 1i32 << plane;
                coeffs[idx] = if negative { -magnitude } else { magnitude };
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_ll() {
        let width = 8;
        let height = 8;
        let coeffs: Vec<i32> =
            vec![10, 0, -3, 0, 0, 5, 0, 0, 0, 0, 0, 0, -1, 0, 0, 0, 7, 0, 0, 2, 0, 0, 0, -9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let (encoded, kmax, passes) = encode(&coeffs, width, height, SubbandKind::Ll);
        let decoded = decode(&encoded, width, height, kmax, SubbandKind::Ll, passes.len() as u32);
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn encode_decode_round_trip_hh_sparse() {
        let width = 16;
        let height = 4;
        let mut coeffs = vec![0i32; width * height];
        coeffs[0] = 3;
        coeffs[5] = -1;
        coeffs[40] = 17;
        coeffs[63] = -255;
        let (encoded, kmax, passes) = encode(&coeffs, width, height, SubbandKind::Hh);
        let decoded = decode(&encoded, width, height, kmax, SubbandKind::Hh, passes.len() as u32);
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn all_zero_block_round_trips() {
        let coeffs = vec![0i32; 32];
        let (encoded, kmax, passes) = encode(&coeffs, 8, 4, SubbandKind::Hl);
        assert_eq!(kmax, 0);
        assert_eq!(passes.len(), 1);
        let decoded = decode(&encoded, 8, 4, kmax, SubbandKind::Hl, passes.len() as u32);
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn pass_count_matches_the_standard_formula() {
        let width = 8;
        let height = 8;
        let mut coeffs = vec![0i32; width * height];
        coeffs[0] = 100;
        coeffs[10] = -40;
        coeffs[30] = 7;
        let (_, kmax, passes) = encode(&coeffs, width, height, SubbandKind::Ll);
        assert_eq!(passes.len(), 3 * (kmax as usize + 1) - 2);
    }

    #[test]
    fn truncating_to_fewer_passes_still_decodes_and_loses_precision() {
        let width = 8;
        let height = 8;
        let mut coeffs = vec![0i32; width * height];
        coeffs[0] = 100;
        coeffs[10] = -40;
        coeffs[30] = 7;
        let (encoded, kmax, passes) = encode(&coeffs, width, height, SubbandKind::Ll);
        assert!(passes.len() > 1);

        let half = (passes.len() / 2) as u32;
        let partial = decode(&encoded, width, height, kmax, SubbandKind::Ll, half);
        let full = decode(&encoded, width, height, kmax, SubbandKind::Ll, passes.len() as u32);
        assert_eq!(full, coeffs);
        assert_ne!(partial, full);
    }

    #[test]
    fn max_bit_plane_matches_largest_magnitude() {
        assert_eq!(max_bit_plane(&[0, 1, -1]), 0);
        assert_eq!(max_bit_plane(&[0, 7, -3]), 2);
        assert_eq!(max_bit_plane(&[0]), 0);
    }
}
