//! Packet header assembly and parsing (§4.J): per-precinct code-block
//! inclusion, zero-bitplane count, pass count, and contribution length,
//! coded with the tag trees from [`crate::tag_tree`] plus two small
//! variable-length integer codes.

use crate::error::{J2kError, Result};
use crate::io::{BitReader, BitWriter};
use crate::tag_tree::{TagTreeDecoder, TagTreeEncoder};

/// What a code-block contributes to one packet: how many (further) coding
/// passes and bytes this layer adds, plus the block's static per-precinct
/// properties (needed on first inclusion only).
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockContribution {
    pub grid_x: usize,
    pub grid_y: usize,
    pub zero_bitplanes: u8,
    /// Layer index at which this block first contributes any passes.
    pub first_layer: u32,
    pub passes_this_layer: u32,
    pub bytes_this_layer: u32,
}

/// A parsed packet-header entry for one included code-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBlockHeader {
    pub grid_x: usize,
    pub grid_y: usize,
    pub newly_included: bool,
    pub zero_bitplanes: u8,
    pub passes: u32,
    pub bytes: u32,
}

fn bits_for_length(lblock: u8, passes_this_layer: u32) -> u32 {
    let log2_passes = 31 - passes_this_layer.max(1).leading_zeros();
    lblock as u32 + log2_passes
}

fn write_pass_count(writer: &mut BitWriter, passes: u32) -> Result<()> {
    match passes {
        1 => writer.write_bit(0),
        2 => writer.write_bits(0b10, 2),
        3 => writer.write_bits(0b1100, 4),
        4 => writer.write_bits(0b1101, 4),
        5..=36 => {
            writer.write_bits(0b1110, 4);
            writer.write_bits(passes - 5, 5);
        }
        37..=164 => {
            writer.write_bits(0b1_1111_1111, 9);
            writer.write_bits(passes - 37, 7);
        }
        _ => {
            return Err(J2kError::UnsupportedFeature(format!(
                "pass count {passes} exceeds the 164-pass-per-packet limit"
            )))
        }
    }
    Ok(())
}

fn read_pass_count(reader: &mut BitReader) -> Result<u32> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    if reader.read_bit()? == 0 {
        return Ok(if reader.read_bit()? == 0 { 3 } else { 4 });
    }
    if reader.read_bit()? == 0 {
        let extra = reader.read_bits(5)?;
        return Ok(5 + extra);
    }
    for _ in 0..5 {
        if reader.read_bit()? != 1 {
            return Err(J2kError::invalid_codestream("packet-header", "malformed pass-count prefix"));
        }
    }
    let extra = reader.read_bits(7)?;
    Ok(37 + extra)
}

/// Writes one precinct's packet headers across all of a tile's layers,
/// keeping the tag trees and per-block `Lblock` state alive between calls.
pub struct PrecinctEncoder {
    grid_width: usize,
    grid_height: usize,
    inclusion: TagTreeEncoder,
    zero_bp: TagTreeEncoder,
    lblock: Vec<u8>,
    included_before: Vec<bool>,
}

impl PrecinctEncoder {
    /// `blocks` must list every code-block in the precinct in raster order
    /// with its final `first_layer`/`zero_bitplanes`, known once rate
    /// control has committed to a truncation plan for the whole tile.
    pub fn new(grid_width: usize, grid_height: usize, blocks: &[CodeBlockContribution]) -> Self {
        let first_layers: Vec<i32> = blocks.iter().map(|b| b.first_layer as i32).collect();
        let zero_bps: Vec<i32> = blocks.iter().map(|b| b.zero_bitplanes as i32).collect();
        Self {
            grid_width,
            grid_height,
            inclusion: TagTreeEncoder::new(grid_width, grid_height, &first_layers),
            zero_bp: TagTreeEncoder::new(grid_width, grid_height, &zero_bps),
            lblock: vec![3u8; blocks.len()],
            included_before: vec![false; blocks.len()],
        }
    }

    /// Encodes one packet's header for layer `layer`. `blocks` must be the
    /// same raster-order slice passed to [`PrecinctEncoder::new`], updated
    /// with this layer's `passes_this_layer`/`bytes_this_layer`.
    pub fn encode_packet(&mut self, writer: &mut BitWriter, layer: u32, blocks: &[CodeBlockContribution]) -> Result<()> {
        if blocks.len() != self.grid_width * self.grid_height {
            return Err(J2kError::InvalidInput("code-block contribution count does not match precinct grid".into()));
        }
        if !blocks.iter().any(|b| b.passes_this_layer > 0) {
            writer.write_bit(0);
            return Ok(());
        }
        writer.write_bit(1);

        for (i, b) in blocks.iter().enumerate() {
            if !self.included_before[i] {
                self.inclusion.encode(b.grid_x, b.grid_y, layer as i32 + 1, writer);
                if b.passes_this_layer > 0 {
                    self.included_before[i] = true;
                    self.zero_bp.encode(b.grid_x, b.grid_y, i32::MAX, writer);
                    self.write_block_header(writer, i, b)?;
                }
            } else if b.passes_this_layer > 0 {
                writer.write_bit(1);
                self.write_block_header(writer, i, b)?;
            } else {
                writer.write_bit(0);
            }
        }
        writer.align_to_byte();
        Ok(())
    }

    fn write_block_header(&mut self, writer: &mut BitWriter, i: usize, b: &CodeBlockContribution) -> Result<()> {
        write_pass_count(writer, b.passes_this_layer)?;
        let mut lblock = self.lblock[i];
        let mut bits = bits_for_length(lblock, b.passes_this_layer);
        while b.bytes_this_layer >= (1u32 << bits) {
            lblock += 1;
            writer.write_bit(1);
            bits = bits_for_length(lblock, b.passes_this_layer);
        }
        writer.write_bit(0);
        self.lblock[i] = lblock;
        writer.write_bits(b.bytes_this_layer, bits);
        Ok(())
    }
}

/// The decode-side mirror of [`PrecinctEncoder`]: state that persists across
/// a precinct's packets as layers are parsed one at a time.
pub struct PrecinctDecoder {
    grid_width: usize,
    grid_height: usize,
    inclusion: TagTreeDecoder,
    zero_bp: TagTreeDecoder,
    lblock: Vec<u8>,
    included_before: Vec<bool>,
    zero_bitplanes: Vec<Option<u8>>,
}

impl PrecinctDecoder {
    pub fn new(grid_width: usize, grid_height: usize) -> Self {
        let n = grid_width * grid_height;
        Self {
            grid_width,
            grid_height,
            inclusion: TagTreeDecoder::new(grid_width, grid_height),
            zero_bp: TagTreeDecoder::new(grid_width, grid_height),
            lblock: vec![3u8; n],
            included_before: vec![false; n],
            zero_bitplanes: vec![None; n],
        }
    }

    pub fn decode_packet(&mut self, reader: &mut BitReader, layer: u32) -> Result<Vec<DecodedBlockHeader>> {
        if reader.read_bit()? == 0 {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for gy in 0..self.grid_height {
            for gx in 0..self.grid_width {
                let i = gy * self.grid_width + gx;
                if !self.included_before[i] {
                    let resolved = self.inclusion.decode(gx, gy, layer as i32 + 1, reader)?;
                    if resolved.is_some() {
                        self.included_before[i] = true;
                        let zbp = self
                            .zero_bp
                            .decode(gx, gy, i32::MAX, reader)?
                            .ok_or_else(|| J2kError::invalid_codestream("packet-header", "zero-bitplane tag tree failed to resolve"))?;
                        self.zero_bitplanes[i] = Some(zbp as u8);
                        let (passes, bytes) = self.read_block_header(reader, i)?;
                        out.push(DecodedBlockHeader {
                            grid_x: gx,
                            grid_y: gy,
                            newly_included: true,
                            zero_bitplanes: zbp as u8,
                            passes,
                            bytes,
                        });
                    }
                } else if reader.read_bit()? == 1 {
                    let (passes, bytes) = self.read_block_header(reader, i)?;
                    out.push(DecodedBlockHeader {
                        grid_x: gx,
                        grid_y: gy,
                        newly_included: false,
                        zero_bitplanes: self.zero_bitplanes[i].expect("included block always has a known zero-bitplane count"),
                        passes,
                        bytes,
                    });
                }
            }
        }
        reader.align_to_byte();
        Ok(out)
    }

    fn read_block_header(&mut self, reader: &mut BitReader, i: usize) -> Result<(u32, u32)> {
        let passes = read_pass_count(reader)?;
        let mut lblock = self.lblock[i];
        while reader.read_bit()? == 1 {
            lblock += 1;
        }
        let bits = bits_for_length(lblock, passes);
        self.lblock[i] = lblock;
        let bytes = reader.read_bits(bits)?;
        Ok((passes, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(grid_x: usize, grid_y: usize, first_layer: u32, zero_bitplanes: u8) -> CodeBlockContribution {
        CodeBlockContribution {
            grid_x,
            grid_y,
            zero_bitplanes,
            first_layer,
            passes_this_layer: 0,
            bytes_this_layer: 0,
        }
    }

    #[test]
    fn empty_packet_round_trips() {
        let blocks = vec![block(0, 0, 0, 0), block(1, 0, 0, 0)];
        let mut enc = PrecinctEncoder::new(2, 1, &blocks);
        let mut writer = BitWriter::new();
        enc.encode_packet(&mut writer, 0, &blocks).unwrap();
        let data = writer.finish();

        let mut dec = PrecinctDecoder::new(2, 1);
        let mut reader = BitReader::new(&data);
        let headers = dec.decode_packet(&mut reader, 0).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn two_layer_precinct_round_trips() {
        let grid_w = 2;
        let grid_h = 2;
        let mut blocks = vec![block(0, 0, 0, 2), block(1, 0, 1, 0), block(0, 1, 0, 1), block(1, 1, 1, 3)];

        let mut enc = PrecinctEncoder::new(grid_w, grid_h, &blocks);
        let mut writer = BitWriter::new();

        blocks[0].passes_this_layer = 2;
        blocks[0].bytes_this_layer = 10;
        blocks[2].passes_this_layer = 1;
        blocks[2].bytes_this_layer = 3;
        enc.encode_packet(&mut writer, 0, &blocks).unwrap();

        blocks[0].passes_this_layer = 3;
        blocks[0].bytes_this_layer = 40;
        blocks[1].passes_this_layer = 5;
        blocks[1].bytes_this_layer = 90;
        blocks[2].passes_this_layer = 0;
        blocks[2].bytes_this_layer = 0;
        blocks[3].passes_this_layer = 2;
        blocks[3].bytes_this_layer = 7;
        enc.encode_packet(&mut writer, 1, &blocks).unwrap();

        let data = writer.finish();
        let mut dec = PrecinctDecoder::new(grid_w, grid_h);
        let mut reader = BitReader::new(&data);

        let layer0 = dec.decode_packet(&mut reader, 0).unwrap();
        assert_eq!(layer0.len(), 2);
        let b00 = layer0.iter().find(|h| h.grid_x == 0 && h.grid_y == 0).unwrap();
        assert!(b00.newly_included);
        assert_eq!(b00.zero_bitplanes, 2);
        assert_eq!(b00.passes, 2);
        assert_eq!(b00.bytes, 10);
        let b01 = layer0.iter().find(|h| h.grid_x == 0 && h.grid_y == 1).unwrap();
        assert_eq!(b01.zero_bitplanes, 1);
        assert_eq!(b01.bytes, 3);

        let layer1 = dec.decode_packet(&mut reader, 1).unwrap();
        assert_eq!(layer1.len(), 3);
        let b00 = layer1.iter().find(|h| h.grid_x == 0 && h.grid_y == 0).unwrap();
        assert!(!b00.newly_included);
        assert_eq!(b00.passes, 3);
        assert_eq!(b00.bytes, 40);
        let b10 = layer1.iter().find(|h| h.grid_x == 1 && h.grid_y == 0).unwrap();
        assert!(b10.newly_included);
        assert_eq!(b10.passes, 5);
        assert_eq!(b10.bytes, 90);
        assert!(layer1.iter().all(|h| !(h.grid_x == 0 && h.grid_y == 1)));
    }

    #[test]
    fn pass_count_boundaries_round_trip() {
        for &passes in &[1u32, 2, 3, 4, 5, 36, 37, 164] {
            let mut w = BitWriter::new();
            write_pass_count(&mut w, passes).unwrap();
            let data = w.finish();
            let mut r = BitReader::new(&data);
            assert_eq!(read_pass_count(&mut r).unwrap(), passes);
        }
    }

    #[test]
    fn pass_count_above_limit_is_rejected() {
        let mut w = BitWriter::new();
        assert!(write_pass_count(&mut w, 165).is_err());
    }

    #[test]
    fn lblock_grows_to_fit_large_lengths() {
        let blocks = vec![block(0, 0, 0, 0)];
        let mut enc = PrecinctEncoder::new(1, 1, &blocks);
        let mut writer = BitWriter::new();
        let mut b = blocks[0];
        b.passes_this_layer = 1;
        b.bytes_this_layer = 100_000;
        enc.encode_packet(&mut writer, 0, std::slice::from_ref(&b)).unwrap();
        let data = writer.finish();

        let mut dec = PrecinctDecoder::new(1, 1);
        let mut reader = BitReader::new(&data);
        let headers = dec.decode_packet(&mut reader, 0).unwrap();
        assert_eq!(headers[0].bytes, 100_000);
    }
}
