//! Scalar dead-zone quantization and per-subband step-size derivation (§4.F).
//!
//! The 9/7 (irreversible) path quantizes subband coefficients with a
//! dead-zone scalar quantizer parameterized by an exponent/mantissa pair,
//! the same encoding QCD/QCC carry on the wire (ISO Table A.28). The 5/3
//! (reversible) path never quantizes: its step size is implicitly 1 and
//! only the exponent (an implicit bit shift) is meaningful.

/// Dead-zone quantizer step size, encoded as ISO does on the wire: an
/// 11-bit mantissa and a 5-bit exponent, reconstructed as
/// `delta = 2^(R_b - exponent) * (1 + mantissa / 2^11)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSize {
    pub exponent: u8,
    pub mantissa: u16,
}

impl StepSize {
    pub fn to_delta(self, dynamic_range_bits: u8) -> f64 {
        let r = dynamic_range_bits as f64;
        let eps = self.exponent as f64;
        2f64.powf(r - eps) * (1.0 + self.mantissa as f64 / 2048.0)
    }

    /// Derives an (exponent, mantissa) pair whose reconstructed delta is as
    /// close as possible to `delta`, for a component with `dynamic_range_bits`
    /// bits of dynamic range.
    pub fn from_delta(delta: f64, dynamic_range_bits: u8) -> Self {
        if delta <= 0.0 || !delta.is_finite() {
            return StepSize { exponent: dynamic_range_bits, mantissa: 0 };
        }
        let r = dynamic_range_bits as f64;
        // delta = 2^(r - eps) * (1 + m/2048)  =>  eps = r - log2(delta / (1+m/2048))
        // Solve iteratively: pick eps so that 1 <= delta / 2^(r-eps) < 2, then derive m.
        let mut exponent = (r - delta.log2()).floor() as i32;
        exponent = exponent.clamp(0, 31);
        let ratio = delta / 2f64.powf(r - exponent as f64);
        let mantissa = (((ratio - 1.0) * 2048.0).round().clamp(0.0, 2047.0)) as u16;
        StepSize { exponent: exponent as u8, mantissa }
    }
}

/// Guard bits (ISO §4.F / Table A.27 `Sqcd` guard-bit field): extra MSBs
/// reserved above the nominal dynamic range to absorb DWT gain, so the
/// entropy coder never has to represent an overflowed magnitude.
pub const DEFAULT_GUARD_BITS: u8 = 2;

/// Per-subband resolution-dependent exponent offset (ISO Annex E.1, Table
/// E.1): subbands gain one bit of dynamic range per decomposition level
/// relative to the image's nominal range, split by subband orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubbandKind {
    Ll,
    Hl,
    Lh,
    Hh,
}

impl SubbandKind {
    /// Expected gain in bits contributed by this subband's analysis filters,
    /// relative to the base image range (ISO Table E.1 exponent offsets).
    pub fn nominal_gain(self, level: u8) -> u8 {
        let base = match self {
            SubbandKind::Ll => 0,
            SubbandKind::Hl | SubbandKind::Lh => 1,
            SubbandKind::Hh => 2,
        };
        base + level
    }
}

/// Derives the per-subband step size for the irreversible path: a single
/// "base" step size (as signaled once for the finest subband) is scaled up
/// by each subband's nominal gain, matching how QCD's `SPqcd` table is
/// expanded into per-subband deltas at decode time.
pub fn derive_step_size(base_delta: f64, dynamic_range_bits: u8, kind: SubbandKind, level: u8) -> StepSize {
    let gain = kind.nominal_gain(level);
    let scaled = base_delta * 2f64.powi(-(gain as i32));
    StepSize::from_delta(scaled, dynamic_range_bits + DEFAULT_GUARD_BITS)
}

pub fn quantize_scalar(coeff: f64, step_size: f64) -> i32 {
    if step_size <= 0.0 {
        return coeff as i32;
    }
    let sign = if coeff >= 0.0 { 1 } else { -1 };
    (sign as f64 * (coeff.abs() / step_size).floor()) as i32
}

/// Reconstructs at the dead-zone bin's midpoint, per ISO §4.F's default
/// reconstruction rule.
pub fn dequantize_scalar(q: i32, step_size: f64) -> f64 {
    if q == 0 {
        return 0.0;
    }
    let sign = if q > 0 { 1.0 } else { -1.0 };
    (q.unsigned_abs() as f64 + 0.5) * step_size * sign
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_dequantize_within_one_step() {
        let val = 10.5;
        let step = 2.0;
        let q = quantize_scalar(val, step);
        assert_eq!(q, 5);
        let recon = dequantize_scalar(q, step);
        assert!((val - recon).abs() <= step);
    }

    #[test]
    fn step_size_round_trips_through_exponent_mantissa() {
        let delta = 0.015625;
        let bits = 10;
        let encoded = StepSize::from_delta(delta, bits);
        let back = encoded.to_delta(bits);
        assert!((delta - back).abs() / delta < 0.01);
    }

    #[test]
    fn finer_subbands_get_smaller_step_sizes() {
        let base = 0.05;
        let ll = derive_step_size(base, 8, SubbandKind::Ll, 0);
        let hh = derive_step_size(base, 8, SubbandKind::Hh, 3);
        assert!(hh.to_delta(10) < ll.to_delta(10));
    }

    #[test]
    fn zero_quantizes_to_zero() {
        assert_eq!(quantize_scalar(0.0, 1.0), 0);
        assert_eq!(dequantize_scalar(0, 1.0), 0.0);
    }
}
