//! RCT and ICT color-space transforms (§4.G).
//!
//! Both transforms operate on three-component pixel planes in place; the
//! caller (see [`crate::codestream`]) is responsible for only invoking them
//! when the component count and configuration agree (the transform is a
//! Non-goal for any component count other than 3).

/// Reversible color transform (ISO Annex G.1): exact integer inverse, paired
/// with the 5/3 filter for mathematically lossless coding.
pub fn rct_forward(r: &[i32], g: &[i32], b: &[i32]) -> (Vec<i32>, Vec<i32>, Vec<i32>) {
    let n = r.len();
    let mut y = Vec::with_capacity(n);
    let mut cb = Vec::with_capacity(n);
    let mut cr = Vec::with_capacity(n);
    for i in 0..n {
        let (r, g, b) = (r[i], g[i], b[i]);
        y.push((r + 2 * g + b) >> 2);
        cb.push(b - g);
        cr.push(r - g);
    }
    (y, cb, cr)
}

pub fn rct_inverse(y: &[i32], cb: &[i32], cr: &[i32]) -> (Vec<i32>, Vec<i32>, Vec<i32>) {
    let n = y.len();
    let mut r = Vec::with_capacity(n);
    let mut g = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for i in 0..n {
        let (y, cb, cr) = (y[i], cb[i], cr[i]);
        let g_val = y - ((cb + cr) >> 2);
        r.push(cr + g_val);
        g.push(g_val);
        b.push(cb + g_val);
    }
    (r, g, b)
}

/// Irreversible color transform (ISO Annex G.2): the ITU-R BT.601 Y'CbCr
/// matrix, used with the 9/7 filter. Operates on floating-point samples;
/// the caller quantizes afterward.
pub fn ict_forward(r: &[f64], g: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = r.len();
    let mut y = Vec::with_capacity(n);
    let mut cb = Vec::with_capacity(n);
    let mut cr = Vec::with_capacity(n);
    for i in 0..n {
        let (r, g, b) = (r[i], g[i], b[i]);
        y.push(0.299 * r + 0.587 * g + 0.114 * b);
        cb.push(-0.168_736 * r - 0.331_264 * g + 0.5 * b);
        cr.push(0.5 * r - 0.418_688 * g - 0.081_312 * b);
    }
    (y, cb, cr)
}

pub fn ict_inverse(y: &[f64], cb: &[f64], cr: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = y.len();
    let mut r = Vec::with_capacity(n);
    let mut g = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for i in 0..n {
        let (y, cb, cr) = (y[i], cb[i], cr[i]);
        r.push(y + 1.402 * cr);
        g.push(y - 0.344_136 * cb - 0.714_136 * cr);
        b.push(y + 1.772 * cb);
    }
    (r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rct_round_trips_exactly() {
        let r: Vec<i32> = (0..256).collect();
        let g: Vec<i32> = (0..256).rev().collect();
        let b: Vec<i32> = (0..256).map(|v| (v * 37) % 256).collect();

        let (y, cb, cr) = rct_forward(&r, &g, &b);
        let (r2, g2, b2) = rct_inverse(&y, &cb, &cr);

        assert_eq!(r, r2);
        assert_eq!(g, g2);
        assert_eq!(b, b2);
    }

    #[test]
    fn ict_round_trips_within_tolerance() {
        let r = vec![10.0, 128.0, 255.0, 0.0];
        let g = vec![20.0, 64.0, 200.0, 0.0];
        let b = vec![30.0, 192.0, 100.0, 255.0];

        let (y, cb, cr) = ict_forward(&r, &g, &b);
        let (r2, g2, b2) = ict_inverse(&y, &cb, &cr);

        for i in 0..r.len() {
            assert!((r[i] - r2[i]).abs() < 1e-6);
            assert!((g[i] - g2[i]).abs() < 1e-6);
            assert!((b[i] - b2[i]).abs() < 1e-6);
        }
    }
}
