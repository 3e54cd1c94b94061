//! MEL (magnitude exponent logic) run-length coder, the significance
//! substream of the HTJ2K/FBCOT block coder (ISO/IEC 15444-15 Annex C).
//!
//! Encodes a sequence of per-quad significance flags as a sequence of
//! run-lengths of consecutive insignificant quads, using an adaptive
//! Golomb-style parameter `k` that climbs after a long run completes and
//! backs off after a significant quad, capped at 12. A completed run of
//! exactly `2^k` zeros costs a single bit; a run broken early by a
//! significant quad costs one bit plus `k` raw bits giving its exact
//! (shorter) length.
//!
//! Unlike [`crate::mq_coder`], this operates over the whole flag sequence
//! at once rather than call-by-call, since a "1" symbol's raw-bit suffix
//! only resolves once the decoder has the bit reader in hand.

use crate::error::Result;
use crate::io::{BitReader, BitWriter};

pub fn encode_significance(flags: &[bool]) -> Vec<u8> {
    let mut k: i32 = 0;
    let mut writer = BitWriter::new();
    let mut run: u32 = 0;
    for &significant in flags {
        if !significant {
            run += 1;
            if run == (1u32 << k) {
                writer.write_bit(0);
                run = 0;
                k = (k + 1).min(12);
            }
        } else {
            writer.write_bit(1);
            if k > 0 {
                writer.write_bits(run, k as u32);
            }
            run = 0;
            k = (k - 1).max(0);
        }
    }
    writer.finish()
}

pub fn decode_significance(data: &[u8], count: usize) -> Result<Vec<bool>> {
    let mut reader = BitReader::new(data);
    let mut k: i32 = 0;
    let mut out = Vec::with_capacity(count);
    let mut pending_run: u32 = 0;

    while out.len() < count {
        if pending_run > 0 {
            out.push(false);
            pending_run -= 1;
            continue;
        }
        let bit = reader.read_bit()?;
        if bit == 0 {
            pending_run = (1u32 << k) - 1;
            k = (k + 1).min(12);
            out.push(false);
        } else {
            let partial = if k > 0 { reader.read_bits(k as u32)? } else { 0 };
            for _ in 0..partial {
                if out.len() < count {
                    out.push(false);
                }
            }
            if out.len() < count {
                out.push(true);
            }
            k = (k - 1).max(0);
        }
    }
    out.truncate(count);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_runs_round_trip() {
        let flags = [false, false, false, false, true, false, false, true, true];
        let data = encode_significance(&flags);
        let decoded = decode_significance(&data, flags.len()).unwrap();
        assert_eq!(decoded, flags);
    }

    #[test]
    fn long_run_round_trips() {
        let flags = vec![false; 200];
        let data = encode_significance(&flags);
        let decoded = decode_significance(&data, flags.len()).unwrap();
        assert_eq!(decoded, flags);
    }

    #[test]
    fn all_significant_round_trips() {
        let flags = vec![true; 12];
        let data = encode_significance(&flags);
        let decoded = decode_significance(&data, flags.len()).unwrap();
        assert_eq!(decoded, flags);
    }

    #[test]
    fn empty_sequence_round_trips() {
        let flags: Vec<bool> = vec![];
        let data = encode_significance(&flags);
        let decoded = decode_significance(&data, 0).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn single_quad_each_way() {
        for &v in &[false, true] {
            let data = encode_significance(&[v]);
            let decoded = decode_significance(&data, 1).unwrap();
            assert_eq!(decoded, vec![v]);
        }
    }
}
