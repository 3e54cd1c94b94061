//! The in-memory tile/component/resolution/subband/code-block tree that the
//! DWT, quantizer, and block coders operate over between the pixel domain
//! and the codestream.
//!
//! This reconciles the teacher's `J2kImage`/`J2kTile`/... hierarchy (which
//! carried raw marker fields and `f32` coefficient buffers) into a single
//! coherent tree driven by [`crate::geometry`] and [`crate::config`], with
//! marker payloads living in [`crate::marker`] instead of here.

use crate::config::{BlockCoder, ColorTransform, EncoderConfig, WaveletFilter};
use crate::geometry::{code_blocks, subband_bounds, ImageGeometry, SubbandBounds};
use crate::quantization::SubbandKind;

/// A decoded or pre-encode image: one plane per component, full resolution,
/// plus the geometry and transform choices that produced (or will produce)
/// its codestream.
#[derive(Debug, Clone)]
pub struct Image {
    pub geometry: ImageGeometry,
    pub bit_depth: u8,
    pub signed: bool,
    pub color_transform: ColorTransform,
    pub components: Vec<Vec<f64>>,
}

impl Image {
    pub fn new(geometry: ImageGeometry, bit_depth: u8, signed: bool, color_transform: ColorTransform, components: Vec<Vec<f64>>) -> Self {
        Self {
            geometry,
            bit_depth,
            signed,
            color_transform,
            components,
        }
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// The DC level shift applied to unsigned samples before the wavelet
    /// transform (§4.L step 3): centers an unsigned `bit_depth`-bit range on
    /// zero so the transform and quantizer see a signed dynamic range.
    pub fn dc_shift(&self) -> f64 {
        if self.signed {
            0.0
        } else {
            -((1u64 << (self.bit_depth - 1)) as f64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubbandOrientation {
    Ll,
    Hl,
    Lh,
    Hh,
}

impl From<SubbandOrientation> for SubbandKind {
    fn from(o: SubbandOrientation) -> Self {
        match o {
            SubbandOrientation::Ll => SubbandKind::Ll,
            SubbandOrientation::Hl => SubbandKind::Hl,
            SubbandOrientation::Lh => SubbandKind::Lh,
            SubbandOrientation::Hh => SubbandKind::Hh,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub bounds: SubbandBounds,
    pub compressed_data: Vec<u8>,
    pub zero_bitplanes: u8,
    /// Total number of coding passes present in `compressed_data`: the full
    /// count on the encode side, the running total accumulated layer by
    /// layer on the decode side.
    pub coding_passes: u8,
    /// Populated after quantization/encode (or before dequantize/decode):
    /// this block's coefficients in row-major order over `bounds`.
    pub coeffs: Vec<i32>,
    /// Index of the quality layer this block's first included pass is
    /// assigned to, set by rate control during encode. Unused until then
    /// (defaults to 0).
    pub first_layer: u32,
    /// Per-pass `(cumulative_bytes, distortion)` trace from the block coder,
    /// used to build this block's rate-distortion candidates during encode.
    /// Empty on the decode side.
    pub pass_trace: Vec<crate::ebcot::PassRecord>,
    /// Cumulative pass count included as of each quality layer, set by rate
    /// control during encode. Empty until then.
    pub layer_passes: Vec<u32>,
    /// Cumulative byte count included as of each quality layer, set by rate
    /// control during encode. Empty until then.
    pub layer_bytes: Vec<u32>,
}

impl CodeBlock {
    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }
}

#[derive(Debug, Clone)]
pub struct Subband {
    pub orientation: SubbandOrientation,
    pub bounds: SubbandBounds,
    pub step_size: f64,
    pub code_blocks: Vec<CodeBlock>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub level: u8,
    pub subbands: Vec<Subband>,
}

#[derive(Debug, Clone)]
pub struct TileComponent {
    pub component_index: u32,
    pub width: u32,
    pub height: u32,
    pub resolutions: Vec<Resolution>,
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub index: u32,
    pub components: Vec<TileComponent>,
}

/// Builds the empty tile-component tree (resolutions, subbands, code-block
/// bounds, step sizes) for one tile-component, ready to receive DWT output.
/// Geometry and quantization parameters are fully determined up front; only
/// `code_blocks[i].coeffs`/`compressed_data` are filled in later.
///
/// Resolution 0 holds only the final (coarsest) LL band; resolution `i+1`
/// holds the HL/LH/HH bands produced by undoing one more decomposition step,
/// finest (largest) last: `levels + 1` resolutions in total, matching ISO's
/// `NL + 1` resolution count rather than one resolution per decomposition
/// quad.
pub fn build_tile_component(component_index: u32, width: u32, height: u32, config: &EncoderConfig, base_step: f64) -> TileComponent {
    let levels = config.dwt_levels;
    let per_level_bounds = subband_bounds(0, 0, width, height, levels);
    let dynamic_range_bits = 16u8;

    let step_size_for = |orientation: SubbandOrientation, gain_level: u8| -> f64 {
        match config.filter {
            WaveletFilter::Reversible53 => 1.0,
            WaveletFilter::Irreversible97 => {
                let step = crate::quantization::derive_step_size(base_step, dynamic_range_bits, orientation.into(), gain_level);
                step.to_delta(dynamic_range_bits)
            }
        }
    };

    let build_subband = |orientation: SubbandOrientation, bounds: SubbandBounds, gain_level: u8| -> Option<Subband> {
        if bounds.is_empty() {
            return None;
        }
        let code_blocks_vec = code_blocks(bounds, config.code_block_width, config.code_block_height)
            .into_iter()
            .map(|cb_bounds| CodeBlock {
                bounds: cb_bounds,
                compressed_data: Vec::new(),
                zero_bitplanes: 0,
                coding_passes: 0,
                coeffs: Vec::new(),
                first_layer: 0,
                pass_trace: Vec::new(),
                layer_passes: Vec::new(),
                layer_bytes: Vec::new(),
            })
            .collect();
        Some(Subband {
            orientation,
            bounds,
            step_size: step_size_for(orientation, gain_level),
            code_blocks: code_blocks_vec,
        })
    };

    let mut resolutions = Vec::with_capacity(levels as usize + 1);
    if let Some(first_quad) = per_level_bounds.first() {
        let ll = build_subband(SubbandOrientation::Ll, first_quad[0], 0);
        resolutions.push(Resolution { level: 0, subbands: ll.into_iter().collect() });
    }
    for (i, quad) in per_level_bounds.iter().enumerate() {
        let gain_level = levels - i as u8;
        let subbands = [(SubbandOrientation::Hl, quad[1]), (SubbandOrientation::Lh, quad[2]), (SubbandOrientation::Hh, quad[3])]
            .into_iter()
            .filter_map(|(o, b)| build_subband(o, b, gain_level))
            .collect();
        resolutions.push(Resolution { level: (i + 1) as u8, subbands });
    }

    TileComponent {
        component_index,
        width,
        height,
        resolutions,
    }
}

pub fn block_coder_for(config: &EncoderConfig) -> BlockCoder {
    config.block_coder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;

    #[test]
    fn tile_component_tree_has_one_resolution_per_level_plus_ll() {
        let config = EncoderConfig::builder().dwt_levels(3).build().unwrap();
        let tc = build_tile_component(0, 64, 64, &config, 1.0);
        assert_eq!(tc.resolutions.len(), 4);
        assert_eq!(tc.resolutions[0].subbands.len(), 1);
        assert_eq!(tc.resolutions[0].subbands[0].orientation, SubbandOrientation::Ll);
    }

    #[test]
    fn reversible_filter_gets_unit_step_sizes() {
        let config = EncoderConfig::builder().filter(WaveletFilter::Reversible53).dwt_levels(2).build().unwrap();
        let tc = build_tile_component(0, 32, 32, &config, 1.0);
        for res in &tc.resolutions {
            for sb in &res.subbands {
                assert_eq!(sb.step_size, 1.0);
            }
        }
    }

    #[test]
    fn code_blocks_partition_every_subband_without_gaps() {
        let config = EncoderConfig::builder().dwt_levels(1).code_block_width(16).code_block_height(16).build().unwrap();
        let tc = build_tile_component(0, 40, 24, &config, 1.0);
        for res in &tc.resolutions {
            for sb in &res.subbands {
                let covered: u64 = sb.code_blocks.iter().map(|cb| cb.width() as u64 * cb.height() as u64).sum();
                assert_eq!(covered, sb.bounds.width() as u64 * sb.bounds.height() as u64);
            }
        }
    }

    #[test]
    fn dc_shift_centers_unsigned_samples() {
        let geometry = ImageGeometry::new(8, 8, 8, 8);
        let image = Image::new(geometry, 8, false, ColorTransform::None, vec![vec![0.0; 64]]);
        assert_eq!(image.dc_shift(), -128.0);
    }
}
