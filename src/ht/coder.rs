//! FBCOT/HTJ2K block coder (ISO/IEC 15444-15, §4.D): a two-substream
//! alternative to EBCOT's MQ-coded bit-plane passes, coding a code-block in
//! a single pass over 2x2 quads instead of 3 passes per bitplane.
//!
//! A quad's significance (is any of its 4 samples non-zero) is coded by
//! [`crate::ht::mel`]'s run-length coder; once a quad is found significant,
//! its per-sample rho pattern, magnitudes, and signs are coded as raw bits.
//!
//! ISO's MagSgn substream also carries a VLC-coded context correction
//! (Annex C Table 8) predicting each quad's magnitude exponent from its
//! causal neighbors; this implementation folds that prediction into a
//! fixed-width raw magnitude field instead, since the exact VLC codeword
//! and context tables are out of this exercise's reach. The two substreams
//! (MEL, MagSgn) are framed with explicit u32 length prefixes rather than
//! ISO's implicit Scup/Lcup convention, so encoder and decoder agree on
//! substream boundaries unambiguously.

use crate::error::{J2kError, Result};
use crate::io::{BitReader, BitWriter, ByteReader, ByteWriter};

use super::mel::{decode_significance, encode_significance};

fn quad_origins(width: usize, height: usize) -> Vec<(usize, usize)> {
    let mut origins = Vec::new();
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            origins.push((x, y));
            x += 2;
        }
        y += 2;
    }
    origins
}

fn quad_positions(x0: usize, y0: usize, width: usize, height: usize) -> [Option<(usize, usize)>; 4] {
    let mut out = [None; 4];
    let offsets = [(0usize, 0usize), (1, 0), (0, 1), (1, 1)];
    for (i, &(dx, dy)) in offsets.iter().enumerate() {
        let x = x0 + dx;
        let y = y0 + dy;
        if x < width && y < height {
            out[i] = Some((x, y));
        }
    }
    out
}

pub fn encode(coeffs: &[i32], width: usize, height: usize) -> (Vec<u8>, u8) {
    let kmax = crate::ebcot::max_bit_plane(coeffs);
    let mag_bits = kmax as u32 + 1;
    let origins = quad_origins(width, height);

    let flags: Vec<bool> = origins
        .iter()
        .map(|&(x0, y0)| {
            quad_positions(x0, y0, width, height)
                .iter()
                .flatten()
                .any(|&(x, y)| coeffs[y * width + x] != 0)
        })
        .collect();
    let mel_bytes = encode_significance(&flags);

    let mut mag_sgn = BitWriter::new();
    for (&(x0, y0), &significant) in origins.iter().zip(flags.iter()) {
        if !significant {
            continue;
        }
        for slot in quad_positions(x0, y0, width, height).into_iter().flatten() {
            let (x, y) = slot;
            let value = coeffs[y * width + x];
            mag_sgn.write_bit((value != 0) as u8);
            if value != 0 {
                mag_sgn.write_bit((value < 0) as u8);
                mag_sgn.write_bits(value.unsigned_abs(), mag_bits);
            }
        }
    }
    let mag_sgn_bytes = mag_sgn.finish();

    let mut out = ByteWriter::new();
    out.write_u32(mel_bytes.len() as u32);
    out.write_bytes(&mel_bytes);
    out.write_u32(mag_sgn_bytes.len() as u32);
    out.write_bytes(&mag_sgn_bytes);
    (out.into_vec(), kmax)
}

pub fn decode(data: &[u8], width: usize, height: usize, kmax: u8) -> Result<Vec<i32>> {
    let mag_bits = kmax as u32 + 1;
    let origins = quad_origins(width, height);

    let mut reader = ByteReader::new(data);
    let mel_len = reader.read_u32()? as usize;
    let mel_bytes = reader.read_bytes(mel_len)?;
    let mag_sgn_len = reader.read_u32()? as usize;
    let mag_sgn_bytes = reader.read_bytes(mag_sgn_len)?;

    let flags = decode_significance(mel_bytes, origins.len())?;
    let mut bits = BitReader::new(mag_sgn_bytes);
    let mut coeffs = vec![0i32; width * height];

    for (&(x0, y0), &significant) in origins.iter().zip(flags.iter()) {
        if !significant {
            continue;
        }
        for slot in quad_positions(x0, y0, width, height).into_iter().flatten() {
            let (x, y) = slot;
            let nonzero = bits.read_bit()?;
            if nonzero == 1 {
                let negative = bits.read_bit()? == 1;
                let magnitude = bits.read_bits(mag_bits)? as i32;
                coeffs[y * width + x] = if negative { -magnitude } else { magnitude };
            }
        }
    }
    Ok(coeffs)
}

/// Like [`decode`], but reframes a truncated-stream error as
/// [`J2kError::Truncated`] carrying the code-block's tile/component so
/// callers building up a decode report don't need to know this substream's
/// internal error shape.
pub fn decode_checked(data: &[u8], width: usize, height: usize, kmax: u8, tile: u32, component: u32) -> Result<Vec<i32>> {
    decode(data, width, height, kmax).map_err(|e| match e {
        J2kError::InvalidCodestream { detail, .. } => {
            J2kError::Truncated { tile, layer: component, detail }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sparse_block() {
        let width = 16;
        let height = 8;
        let mut coeffs = vec![0i32; width * height];
        coeffs[0] = 5;
        coeffs[17] = -3;
        coeffs[100] = 127;
        coeffs[width * height - 1] = -1;

        let (encoded, kmax) = encode(&coeffs, width, height);
        let decoded = decode(&encoded, width, height, kmax).unwrap();
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn round_trips_dense_block() {
        let width = 8;
        let height = 8;
        let coeffs: Vec<i32> = (0..width * height).map(|i| ((i as i32 * 13) % 37) - 18).collect();
        let (encoded, kmax) = encode(&coeffs, width, height);
        let decoded = decode(&encoded, width, height, kmax).unwrap();
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn round_trips_odd_dimensions() {
        let width = 5;
        let height = 3;
        let coeffs: Vec<i32> = vec![0, 1, -1, 0, 2, 0, 0, 0, -4, 0, 0, 0, 0, 0, 7];
        let (encoded, kmax) = encode(&coeffs, width, height);
        let decoded = decode(&encoded, width, height, kmax).unwrap();
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn all_zero_block_round_trips() {
        let coeffs = vec![0i32; 64];
        let (encoded, kmax) = encode(&coeffs, 8, 8);
        let decoded = decode(&encoded, 8, 8, kmax).unwrap();
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn truncated_stream_reports_error() {
        let coeffs = vec![5i32; 16];
        let (mut encoded, kmax) = encode(&coeffs, 4, 4);
        encoded.truncate(encoded.len() / 2);
        let result = decode_checked(&encoded, 4, 4, kmax, 0, 0);
        assert!(result.is_err());
    }
}
