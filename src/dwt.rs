//! Discrete Wavelet Transform: 5/3 reversible and 9/7 irreversible lifting
//! (§4.E), with a shared 2D row/column engine and multi-level wrapper.
//!
//! Both filters use whole-sample symmetric boundary extension (ISO Annex
//! F.3.3): a sample one past either edge is taken to equal its mirror
//! across that edge, so the lifting loops never need a separate boundary
//! pass.

fn mirror(i: isize, len: usize) -> usize {
    if i < 0 {
        (-i) as usize
    } else if i as usize >= len {
        2 * (len - 1) - i as usize
    } else {
        i as usize
    }
}

/// Reversible 5/3 filter, operating on `i32` samples.
pub struct Dwt53;

impl Dwt53 {
    /// In-place forward lifting over the whole `signal`; even indices end up
    /// holding low-pass coefficients, odd indices high-pass.
    fn lift_forward(x: &mut [i32]) {
        let len = x.len();
        if len < 2 {
            return;
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = x[mirror(i as isize + 1, len)];
            x[i] -= (left + right) >> 1;
        }
        for i in (0..len).step_by(2) {
            let left = x[mirror(i as isize - 1, len)];
            let right = x[mirror(i as isize + 1, len)];
            x[i] += (left + right + 2) >> 2;
        }
    }

    fn lift_inverse(x: &mut [i32]) {
        let len = x.len();
        if len < 2 {
            return;
        }
        for i in (0..len).step_by(2) {
            let left = x[mirror(i as isize - 1, len)];
            let right = x[mirror(i as isize + 1, len)];
            x[i] -= (left + right + 2) >> 2;
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = x[mirror(i as isize + 1, len)];
            x[i] += (left + right) >> 1;
        }
    }

    /// Splits a lifted buffer into deinterleaved low/high subbands.
    fn deinterleave(x: &[i32]) -> (Vec<i32>, Vec<i32>) {
        (x.iter().step_by(2).copied().collect(), x.iter().skip(1).step_by(2).copied().collect())
    }

    fn interleave(low: &[i32], high: &[i32], len: usize) -> Vec<i32> {
        let mut x = vec![0i32; len];
        for (i, v) in low.iter().enumerate() {
            x[2 * i] = *v;
        }
        for (i, v) in high.iter().enumerate() {
            x[2 * i + 1] = *v;
        }
        x
    }

    pub fn forward(signal: &[i32]) -> (Vec<i32>, Vec<i32>) {
        let mut x = signal.to_vec();
        Self::lift_forward(&mut x);
        Self::deinterleave(&x)
    }

    pub fn inverse(low: &[i32], high: &[i32], len: usize) -> Vec<i32> {
        let mut x = Self::interleave(low, high, len);
        Self::lift_inverse(&mut x);
        x
    }
}

/// Irreversible 9/7 filter, operating on `f64` samples.
pub struct Dwt97;

impl Dwt97 {
    const ALPHA: f64 = -1.586_134_342;
    const BETA: f64 = -0.052_980_118;
    const GAMMA: f64 = 0.882_911_075;
    const DELTA: f64 = 0.443_506_852;
    const K: f64 = 1.230_174_105;
    const INV_K: f64 = 1.0 / Self::K;

    fn lift_forward(x: &mut [f64]) {
        let len = x.len();
        if len < 2 {
            return;
        }
        let step = |x: &mut [f64], coeff: f64, parity: usize| {
            for i in (parity..len).step_by(2) {
                let left = x[mirror(i as isize - 1, len)];
                let right = x[mirror(i as isize + 1, len)];
                x[i] += coeff * (left + right);
            }
        };
        step(x, Self::ALPHA, 1);
        step(x, Self::BETA, 0);
        step(x, Self::GAMMA, 1);
        step(x, Self::DELTA, 0);
        for i in (0..len).step_by(2) {
            x[i] *= Self::INV_K;
        }
        for i in (1..len).step_by(2) {
            x[i] *= Self::K;
        }
    }

    fn lift_inverse(x: &mut [f64]) {
        let len = x.len();
        if len < 2 {
            return;
        }
        for i in (0..len).step_by(2) {
            x[i] *= Self::K;
        }
        for i in (1..len).step_by(2) {
            x[i] *= Self::INV_K;
        }
        let step = |x: &mut [f64], coeff: f64, parity: usize| {
            for i in (parity..len).step_by(2) {
                let left = x[mirror(i as isize - 1, len)];
                let right = x[mirror(i as isize + 1, len)];
                x[i] -= coeff * (left + right);
            }
        };
        step(x, Self::DELTA, 0);
        step(x, Self::GAMMA, 1);
        step(x, Self::BETA, 0);
        step(x, Self::ALPHA, 1);
    }

    fn deinterleave(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (x.iter().step_by(2).copied().collect(), x.iter().skip(1).step_by(2).copied().collect())
    }

    fn interleave(low: &[f64], high: &[f64], len: usize) -> Vec<f64> {
        let mut x = vec![0.0f64; len];
        for (i, v) in low.iter().enumerate() {
            x[2 * i] = *v;
        }
        for (i, v) in high.iter().enumerate() {
            x[2 * i + 1] = *v;
        }
        x
    }

    pub fn forward(signal: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut x = signal.to_vec();
        Self::lift_forward(&mut x);
        Self::deinterleave(&x)
    }

    pub fn inverse(low: &[f64], high: &[f64], len: usize) -> Vec<f64> {
        let mut x = Self::interleave(low, high, len);
        Self::lift_inverse(&mut x);
        x
    }
}

/// One level of 2D subband decomposition, deinterleaved LL/HL/LH/HH, each
/// stored row-major at its own (halved) dimensions.
pub struct Subbands<T> {
    pub ll: Vec<T>,
    pub hl: Vec<T>,
    pub lh: Vec<T>,
    pub hh: Vec<T>,
    pub ll_w: usize,
    pub ll_h: usize,
    pub hl_w: usize,
    pub lh_h: usize,
}

macro_rules! impl_2d {
    ($name:ident, $filter:ty, $t:ty, $zero:expr) => {
        pub fn $name(plane: &[$t], width: usize, height: usize) -> Subbands<$t> {
            // Rows first.
            let mut row_low = vec![$zero; width.div_ceil(2) * height];
            let mut row_high = vec![$zero; (width / 2) * height];
            let low_w = width.div_ceil(2);
            let high_w = width / 2;
            for y in 0..height {
                let row = &plane[y * width..(y + 1) * width];
                let (l, h) = <$filter>::forward(row);
                row_low[y * low_w..(y + 1) * low_w].copy_from_slice(&l);
                row_high[y * high_w..(y + 1) * high_w].copy_from_slice(&h);
            }
            // Then columns of each half.
            let ll_h = height.div_ceil(2);
            let hl_h = height / 2;
            let mut ll = vec![$zero; low_w * ll_h];
            let mut lh = vec![$zero; low_w * hl_h];
            for x in 0..low_w {
                let col: Vec<$t> = (0..height).map(|y| row_low[y * low_w + x]).collect();
                let (l, h) = <$filter>::forward(&col);
                for (y, v) in l.iter().enumerate() {
                    ll[y * low_w + x] = *v;
                }
                for (y, v) in h.iter().enumerate() {
                    lh[y * low_w + x] = *v;
                }
            }
            let mut hl = vec![$zero; high_w * ll_h];
            let mut hh = vec![$zero; high_w * hl_h];
            for x in 0..high_w {
                let col: Vec<$t> = (0..height).map(|y| row_high[y * high_w + x]).collect();
                let (l, h) = <$filter>::forward(&col);
                for (y, v) in l.iter().enumerate() {
                    hl[y * high_w + x] = *v;
                }
                for (y, v) in h.iter().enumerate() {
                    hh[y * high_w + x] = *v;
                }
            }
            Subbands { ll, hl, lh, hh, ll_w: low_w, ll_h, hl_w: high_w, lh_h: hl_h }
        }
    };
}

impl_2d!(forward_2d_53, Dwt53, i32, 0i32);
impl_2d!(forward_2d_97, Dwt97, f64, 0.0f64);

macro_rules! impl_inverse_2d {
    ($name:ident, $filter:ty, $t:ty, $zero:expr) => {
        pub fn $name(sb: &Subbands<$t>, width: usize, height: usize, out: &mut [$t]) {
            let low_w = sb.ll_w;
            let high_w = sb.hl_w;
            let ll_h = sb.ll_h;
            let hl_h = sb.lh_h;

            let mut row_low = vec![$zero; low_w * height];
            for x in 0..low_w {
                let l: Vec<$t> = (0..ll_h).map(|y| sb.ll[y * low_w + x]).collect();
                let h: Vec<$t> = (0..hl_h).map(|y| sb.lh[y * low_w + x]).collect();
                let col = <$filter>::inverse(&l, &h, height);
                for (y, v) in col.iter().enumerate() {
                    row_low[y * low_w + x] = *v;
                }
            }
            let mut row_high = vec![$zero; high_w * height];
            for x in 0..high_w {
                let l: Vec<$t> = (0..ll_h).map(|y| sb.hl[y * high_w + x]).collect();
                let h: Vec<$t> = (0..hl_h).map(|y| sb.hh[y * high_w + x]).collect();
                let col = <$filter>::inverse(&l, &h, height);
                for (y, v) in col.iter().enumerate() {
                    row_high[y * high_w + x] = *v;
                }
            }
            for y in 0..height {
                let l = &row_low[y * low_w..(y + 1) * low_w];
                let h = &row_high[y * high_w..(y + 1) * high_w];
                let row = <$filter>::inverse(l, h, width);
                out[y * width..(y + 1) * width].copy_from_slice(&row);
            }
        }
    };
}

impl_inverse_2d!(inverse_2d_53, Dwt53, i32, 0i32);
impl_inverse_2d!(inverse_2d_97, Dwt97, f64, 0.0f64);

/// One level's worth of subbands plus the LL dimensions it was computed
/// from, in coarsest-first order: the shape `codestream.rs` walks when
/// assembling resolution levels.
pub struct Level<T> {
    pub subbands: Subbands<T>,
    pub width: usize,
    pub height: usize,
}

/// Applies `levels` rounds of decomposition, recursing into the LL band
/// each time. Returns levels in coarsest-first order (index 0 is the last
/// LL produced), matching [`crate::geometry::subband_bounds`].
pub fn forward_multilevel_53(plane: &[i32], width: usize, height: usize, levels: u8) -> (Vec<Level<i32>>, Vec<i32>) {
    let mut out = Vec::with_capacity(levels as usize);
    let mut cur = plane.to_vec();
    let mut w = width;
    let mut h = height;
    for _ in 0..levels {
        let sb = forward_2d_53(&cur, w, h);
        let (next_w, next_h) = (sb.ll_w, sb.ll_h);
        let next = sb.ll.clone();
        out.push(Level { subbands: sb, width: w, height: h });
        cur = next;
        w = next_w;
        h = next_h;
    }
    out.reverse();
    (out, cur)
}

/// Inverts [`forward_multilevel_53`]'s output, given the final (coarsest) LL.
///
/// `levels` is coarsest-first (as returned by [`forward_multilevel_53`]), and
/// that is also the order reconstruction must walk: each step combines the
/// running LL with that level's detail bands to produce the next (larger)
/// LL, so the smallest combination has to happen first.
pub fn inverse_multilevel_53(levels: &[Level<i32>], final_ll: &[i32]) -> Vec<i32> {
    let mut ll = final_ll.to_vec();
    for level in levels.iter() {
        let sb = Subbands {
            ll,
            hl: level.subbands.hl.clone(),
            lh: level.subbands.lh.clone(),
            hh: level.subbands.hh.clone(),
            ll_w: level.subbands.ll_w,
            ll_h: level.subbands.ll_h,
            hl_w: level.subbands.hl_w,
            lh_h: level.subbands.lh_h,
        };
        let mut out = vec![0i32; level.width * level.height];
        inverse_2d_53(&sb, level.width, level.height, &mut out);
        ll = out;
    }
    ll
}

/// 9/7 analogue of [`forward_multilevel_53`].
pub fn forward_multilevel_97(plane: &[f64], width: usize, height: usize, levels: u8) -> (Vec<Level<f64>>, Vec<f64>) {
    let mut out = Vec::with_capacity(levels as usize);
    let mut cur = plane.to_vec();
    let mut w = width;
    let mut h = height;
    for _ in 0..levels {
        let sb = forward_2d_97(&cur, w, h);
        let (next_w, next_h) = (sb.ll_w, sb.ll_h);
        let next = sb.ll.clone();
        out.push(Level { subbands: sb, width: w, height: h });
        cur = next;
        w = next_w;
        h = next_h;
    }
    out.reverse();
    (out, cur)
}

/// Inverts [`forward_multilevel_97`]'s output. See [`inverse_multilevel_53`]
/// for why `levels` is walked coarsest-first rather than reversed.
pub fn inverse_multilevel_97(levels: &[Level<f64>], final_ll: &[f64]) -> Vec<f64> {
    let mut ll = final_ll.to_vec();
    for level in levels.iter() {
        let sb = Subbands {
            ll: ll.clone(),
            hl: level.subbands.hl.clone(),
            lh: level.subbands.lh.clone(),
            hh: level.subbands.hh.clone(),
            ll_w: level.subbands.ll_w,
            ll_h: level.subbands.ll_h,
            hl_w: level.subbands.hl_w,
            lh_h: level.subbands.lh_h,
        };
        let mut out = vec![0.0f64; level.width * level.height];
        inverse_2d_97(&sb, level.width, level.height, &mut out);
        ll = out;
    }
    ll
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwt53_1d_round_trip() {
        let signal = vec![10, 20, 30, 25, 15, 5, 0, 40];
        let (l, h) = Dwt53::forward(&signal);
        let recon = Dwt53::inverse(&l, &h, signal.len());
        assert_eq!(signal, recon);
    }

    #[test]
    fn dwt97_1d_round_trip_within_tolerance() {
        let signal: Vec<f64> = vec![10.0, 20.0, 30.0, 25.0, 15.0, 5.0, 0.0, 40.0, 12.0];
        let (l, h) = Dwt97::forward(&signal);
        let recon = Dwt97::inverse(&l, &h, signal.len());
        for (a, b) in signal.iter().zip(recon.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn dwt53_2d_round_trip() {
        let width = 8;
        let height = 6;
        let plane: Vec<i32> = (0..width * height).map(|i| (i as i32 * 7) % 53).collect();
        let sb = forward_2d_53(&plane, width, height);
        let mut recon = vec![0i32; width * height];
        inverse_2d_53(&sb, width, height, &mut recon);
        assert_eq!(plane, recon);
    }

    #[test]
    fn dwt97_2d_round_trip_within_tolerance() {
        let width = 10;
        let height = 4;
        let plane: Vec<f64> = (0..width * height).map(|i| (i as f64 * 3.3) % 91.0).collect();
        let sb = forward_2d_97(&plane, width, height);
        let mut recon = vec![0.0f64; width * height];
        inverse_2d_97(&sb, width, height, &mut recon);
        for (a, b) in plane.iter().zip(recon.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn odd_dimensions_round_trip() {
        let width = 7;
        let height = 5;
        let plane: Vec<i32> = (0..width * height).map(|i| i as i32).collect();
        let sb = forward_2d_53(&plane, width, height);
        let mut recon = vec![0i32; width * height];
        inverse_2d_53(&sb, width, height, &mut recon);
        assert_eq!(plane, recon);
    }

    #[test]
    fn multilevel_53_round_trip() {
        let width = 33;
        let height = 19;
        let plane: Vec<i32> = (0..width * height).map(|i| ((i as i32 * 17) % 211) - 100).collect();
        let (levels, final_ll) = forward_multilevel_53(&plane, width, height, 3);
        let recon = inverse_multilevel_53(&levels, &final_ll);
        assert_eq!(plane, recon);
    }

    #[test]
    fn multilevel_97_round_trip_within_tolerance() {
        let width = 20;
        let height = 24;
        let plane: Vec<f64> = (0..width * height).map(|i| ((i as f64 * 13.0) % 200.0) - 100.0).collect();
        let (levels, final_ll) = forward_multilevel_97(&plane, width, height, 4);
        let recon = inverse_multilevel_97(&levels, &final_ll);
        for (a, b) in plane.iter().zip(recon.iter()) {
            assert!((a - b).abs() < 1e-6, "expected {a}, got {b}");
        }
    }
}
