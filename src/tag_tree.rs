//! Tag trees (§4.J): the quadtree-of-minima structure packet headers use to
//! signal per-code-block inclusion and leading zero bit-planes in far fewer
//! bits than one value per leaf.
//!
//! Both queries reduce to the same primitive: "is this leaf's value known to
//! be at most `threshold`?", asked with a monotonically non-decreasing
//! threshold across a session, against shared ancestor state so a single
//! early answer ("every code-block in this subtree is included by layer 2")
//! costs one bit instead of one bit per leaf.

use crate::io::{BitReader, BitWriter};

#[derive(Debug, Clone, Copy)]
struct TagTreeLevel {
    width: usize,
    height: usize,
}

fn build_levels(width: usize, height: usize) -> Vec<TagTreeLevel> {
    let mut levels = Vec::new();
    let (mut w, mut h) = (width.max(1), height.max(1));
    loop {
        levels.push(TagTreeLevel { width: w, height: h });
        if w == 1 && h == 1 {
            break;
        }
        w = w.div_ceil(2).max(1);
        h = h.div_ceil(2).max(1);
    }
    levels
}

fn path(levels: &[TagTreeLevel], x: usize, y: usize) -> Vec<usize> {
    let mut idxs = Vec::with_capacity(levels.len());
    let (mut cx, mut cy) = (x, y);
    for level in levels {
        idxs.push(cy * level.width + cx);
        cx /= 2;
        cy /= 2;
    }
    idxs
}

/// Builds one quadtree node per (level, position), value = min of the up to
/// four children directly below it; leaves carry the caller-supplied values.
fn build_value_pyramid(levels: &[TagTreeLevel], leaf_values: &[i32]) -> Vec<Vec<i32>> {
    let mut values = Vec::with_capacity(levels.len());
    values.push(leaf_values.to_vec());
    for lvl in 1..levels.len() {
        let prev = &values[lvl - 1];
        let prev_level = levels[lvl - 1];
        let level = levels[lvl];
        let mut cur = vec![i32::MAX; level.width * level.height];
        for cy in 0..level.height {
            for cx in 0..level.width {
                let mut m = i32::MAX;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let py = cy * 2 + dy;
                        let px = cx * 2 + dx;
                        if py < prev_level.height && px < prev_level.width {
                            m = m.min(prev[py * prev_level.width + px]);
                        }
                    }
                }
                cur[cy * level.width + cx] = m;
            }
        }
        values.push(cur);
    }
    values
}

/// Encoder-side tag tree: the true leaf values are known up front, so
/// [`TagTreeEncoder::encode`] only ever writes the bits a decoder walking
/// the same query sequence would need to read.
pub struct TagTreeEncoder {
    levels: Vec<TagTreeLevel>,
    values: Vec<Vec<i32>>,
    low: Vec<Vec<i32>>,
}

impl TagTreeEncoder {
    pub fn new(width: usize, height: usize, leaf_values: &[i32]) -> Self {
        let levels = build_levels(width, height);
        let values = build_value_pyramid(&levels, leaf_values);
        let low = levels.iter().map(|l| vec![0i32; l.width * l.height]).collect();
        Self { levels, values, low }
    }

    pub fn reset(&mut self) {
        for level in &mut self.low {
            level.iter_mut().for_each(|v| *v = 0);
        }
    }

    /// Encodes whether leaf `(x, y)`'s value is `<= threshold`.
    pub fn encode(&mut self, x: usize, y: usize, threshold: i32, out: &mut BitWriter) {
        let idxs = path(&self.levels, x, y);
        for (lvl, &idx) in idxs.iter().enumerate().rev() {
            let value = self.values[lvl][idx];
            loop {
                let low = self.low[lvl][idx];
                if low >= threshold || low >= value {
                    break;
                }
                let next = low + 1;
                self.low[lvl][idx] = next;
                out.write_bit(if next >= value { 1 } else { 0 });
            }
            if self.low[lvl][idx] < value {
                break;
            }
        }
    }
}

/// Decoder-side tag tree: leaf values are discovered bit by bit, walking the
/// same pyramid geometry the encoder built from real data.
pub struct TagTreeDecoder {
    levels: Vec<TagTreeLevel>,
    low: Vec<Vec<i32>>,
    resolved: Vec<Vec<bool>>,
}

impl TagTreeDecoder {
    pub fn new(width: usize, height: usize) -> Self {
        let levels = build_levels(width, height);
        let low = levels.iter().map(|l| vec![0i32; l.width * l.height]).collect();
        let resolved = levels.iter().map(|l| vec![false; l.width * l.height]).collect();
        Self { levels, low, resolved }
    }

    pub fn reset(&mut self) {
        for level in &mut self.low {
            level.iter_mut().for_each(|v| *v = 0);
        }
        for level in &mut self.resolved {
            level.iter_mut().for_each(|v| *v = false);
        }
    }

    /// Returns `Some(value)` once the leaf's true value is pinned down (only
    /// possible once the walk reaches level 0), `None` if the value is only
    /// known to exceed `threshold` so far.
    pub fn decode(&mut self, x: usize, y: usize, threshold: i32, input: &mut BitReader) -> crate::error::Result<Option<i32>> {
        let idxs = path(&self.levels, x, y);
        for (lvl, &idx) in idxs.iter().enumerate().rev() {
            loop {
                if self.resolved[lvl][idx] {
                    break;
                }
                let low = self.low[lvl][idx];
                if low >= threshold {
                    break;
                }
                let bit = input.read_bit()?;
                self.low[lvl][idx] = low + 1;
                if bit == 1 {
                    self.resolved[lvl][idx] = true;
                }
            }
            if !self.resolved[lvl][idx] {
                return Ok(None);
            }
            if lvl == 0 {
                return Ok(Some(self.low[lvl][idx]));
            }
        }
        unreachable!("path always includes level 0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_round_trip() {
        let mut enc = TagTreeEncoder::new(1, 1, &[3]);
        let mut w = BitWriter::new();
        for t in 0..5 {
            enc.encode(0, 0, t, &mut w);
        }
        let data = w.finish();

        let mut dec = TagTreeDecoder::new(1, 1);
        let mut r = BitReader::new(&data);
        let mut found = None;
        for t in 0..5 {
            if let Some(v) = dec.decode(0, 0, t, &mut r).unwrap() {
                found = Some(v);
                break;
            }
        }
        assert_eq!(found, Some(3));
    }

    #[test]
    fn grid_round_trips_across_increasing_thresholds() {
        let w = 4;
        let h = 3;
        let leaves: Vec<i32> = vec![0, 2, 1, 3, 4, 0, 2, 1, 3, 1, 0, 2];
        let mut enc = TagTreeEncoder::new(w, h, &leaves);
        let mut writer = BitWriter::new();

        // Mimic packet-header usage: for each threshold, query every leaf in
        // raster order so shared-ancestor state advances identically on
        // both sides.
        let max_t = *leaves.iter().max().unwrap() + 1;
        for t in 0..max_t {
            for y in 0..h {
                for x in 0..w {
                    enc.encode(x, y, t, &mut writer);
                }
            }
        }
        let data = writer.finish();

        let mut dec = TagTreeDecoder::new(w, h);
        let mut reader = BitReader::new(&data);
        let mut discovered = vec![None; w * h];
        for t in 0..max_t {
            for y in 0..h {
                for x in 0..w {
                    if discovered[y * w + x].is_none() {
                        if let Some(v) = dec.decode(x, y, t, &mut reader).unwrap() {
                            discovered[y * w + x] = Some(v);
                        }
                    }
                }
            }
        }
        let discovered: Vec<i32> = discovered.into_iter().map(|v| v.unwrap()).collect();
        assert_eq!(discovered, leaves);
    }

    #[test]
    fn reset_allows_reuse_for_a_new_precinct() {
        let mut enc = TagTreeEncoder::new(2, 2, &[1, 1, 1, 1]);
        let mut w = BitWriter::new();
        enc.encode(0, 0, 1, &mut w);
        enc.reset();
        enc.encode(0, 0, 0, &mut w);
        let _ = w.finish();
    }
}
