//! Encode/decode orchestration (§4.L): the pipeline that ties geometry,
//! color transform, DWT, quantization, block coding, rate control, and
//! markers together into [`encode`]/[`decode`].
//!
//! Packet granularity here is `(tile, layer, resolution, component)` with
//! one independently byte-aligned header group per subband, rather than
//! ISO's `(tile, layer, resolution, component, precinct)` with one shared
//! header per precinct spanning every subband at that resolution. Since
//! [`crate::geometry`] gives every subband exactly one precinct (the P axis
//! never has more than one value here), the two are equivalent in content;
//! this only changes how the header bits are grouped on the wire. A
//! consequence: since P is degenerate, RPCL/PCRL and PCRL/CPRL collapse to
//! the same component/resolution/layer permutation; see [`packet_order`].
//!
//! Rate control works from each code-block's real per-pass trace (every
//! EBCOT coding pass terminates at a byte boundary and reports its own
//! cumulative length and distortion estimate): [`crate::rate_control::form_layers`]
//! runs the convex-hull-and-bisection optimization over those candidates
//! directly, so truncation points can land mid-block rather than only at a
//! block's start or end. HT-coded blocks still fall back to a two-point
//! trace (`0` bytes / maximum distortion, full bytes / ~zero distortion)
//! since the HT block coder codes a block as a single unit. Zero-bitplane
//! counts are derived from a fixed nominal bit-plane budget
//! (`NOMINAL_BITPLANES`) instead of per-subband guard-bit arithmetic, since
//! this build's code-blocks don't track the ISO `Rb` dynamic-range-bits
//! value explicitly.

use log::warn;

use crate::color_transform::{ict_forward, ict_inverse, rct_forward, rct_inverse};
use crate::config::{BlockCoder, ColorTransform, DecoderConfig, EncoderConfig, ProgressionOrder, WaveletFilter};
use crate::dwt;
use crate::ebcot;
use crate::error::{J2kError, Result};
use crate::geometry::{ImageGeometry, SubbandBounds, TileBounds};
use crate::ht;
use crate::image::{build_tile_component, Image, SubbandOrientation, TileComponent};
use crate::io::{BitReader, BitWriter, ByteReader, ByteWriter};
use crate::marker::{self, code, Cap, Cod, CodingStyle, ComponentSiz, MarkerSegment, Qcd, QuantStepSize, Siz, Sot};
use crate::packet::{CodeBlockContribution, PrecinctDecoder, PrecinctEncoder};
use crate::quantization::{dequantize_scalar, quantize_scalar, StepSize, SubbandKind};
use crate::rate_control::{form_layers, BlockTrace, TruncationPoint};

/// Base quantizer step size handed to [`build_tile_component`] for the
/// irreversible path; per-subband steps are then scaled from this by each
/// subband's nominal gain. Not signaled anywhere: QCD carries a single
/// representative step for wire completeness, but the decoder re-derives
/// the real per-subband steps deterministically from COD/geometry rather
/// than trusting QCD's table, so both sides always agree.
const DEFAULT_BASE_STEP: f64 = 1.0;

/// Nominal magnitude bit-plane budget used to turn a block's `kmax` (from
/// the block coder) into a zero-bitplane count for the packet header, and
/// back. `i32` coefficients never need more than this many magnitude bits
/// for any image this crate can represent.
const NOMINAL_BITPLANES: u8 = 32;

fn kmax_to_zero_bitplanes(kmax: u8) -> u8 {
    NOMINAL_BITPLANES - 1 - kmax
}

fn zero_bitplanes_to_kmax(zero_bitplanes: u8) -> u8 {
    NOMINAL_BITPLANES - 1 - zero_bitplanes
}

fn validate_image(image: &Image) -> Result<()> {
    if image.num_components() == 0 {
        return Err(J2kError::InvalidInput("image has no components".into()));
    }
    let expected = image.geometry.width as usize * image.geometry.height as usize;
    for (i, plane) in image.components.iter().enumerate() {
        if plane.len() != expected {
            return Err(J2kError::InvalidInput(format!(
                "component {i} has {} samples, expected {expected} for a {}x{} image",
                plane.len(),
                image.geometry.width,
                image.geometry.height
            )));
        }
    }
    if image.bit_depth == 0 || image.bit_depth > 38 {
        return Err(J2kError::InvalidInput("bit depth must be in 1..=38".into()));
    }
    Ok(())
}

fn extract_plane(plane: &[f64], stride: u32, bounds: TileBounds) -> Vec<f64> {
    let w = bounds.width() as usize;
    let mut out = Vec::with_capacity(w * bounds.height() as usize);
    for y in bounds.y0..bounds.y1 {
        let start = (y * stride + bounds.x0) as usize;
        out.extend_from_slice(&plane[start..start + w]);
    }
    out
}

fn insert_plane(full: &mut [f64], stride: u32, bounds: TileBounds, tile_plane: &[f64]) {
    let w = bounds.width() as usize;
    for (row, y) in (bounds.y0..bounds.y1).enumerate() {
        let start = (y * stride + bounds.x0) as usize;
        full[start..start + w].copy_from_slice(&tile_plane[row * w..(row + 1) * w]);
    }
}

fn crop_i32(array: &[i32], array_w: usize, b: SubbandBounds) -> Vec<i32> {
    let w = b.width() as usize;
    let mut out = Vec::with_capacity(w * b.height() as usize);
    for y in b.y0..b.y1 {
        let start = y as usize * array_w + b.x0 as usize;
        out.extend_from_slice(&array[start..start + w]);
    }
    out
}

fn place_i32(array: &mut [i32], array_w: usize, b: SubbandBounds, data: &[i32]) {
    let w = b.width() as usize;
    for (row, y) in (b.y0..b.y1).enumerate() {
        let start = y as usize * array_w + b.x0 as usize;
        array[start..start + w].copy_from_slice(&data[row * w..(row + 1) * w]);
    }
}

/// A subband's code-block grid shape, replicated from [`crate::geometry::code_blocks`]'s
/// own raster-partition math so callers can address a block by `(grid_x, grid_y)`
/// without storing grid coordinates on [`crate::image::CodeBlock`] itself.
fn block_grid_dims(bounds: SubbandBounds, cb_width: u32, cb_height: u32) -> (usize, usize) {
    if bounds.is_empty() {
        return (0, 0);
    }
    let first_x = (bounds.x0 / cb_width) * cb_width;
    let first_y = (bounds.y0 / cb_height) * cb_height;
    let gw = (bounds.x1 - first_x).div_ceil(cb_width) as usize;
    let gh = (bounds.y1 - first_y).div_ceil(cb_height) as usize;
    (gw, gh)
}

fn decomposition_sizes(width: usize, height: usize, levels: u8) -> Vec<(usize, usize)> {
    let mut sizes = Vec::with_capacity(levels as usize);
    let (mut w, mut h) = (width, height);
    for _ in 0..levels {
        sizes.push((w, h));
        w = w.div_ceil(2);
        h = h.div_ceil(2);
    }
    sizes.reverse();
    sizes
}

fn progression_code(p: ProgressionOrder) -> u8 {
    match p {
        ProgressionOrder::Lrcp => 0,
        ProgressionOrder::Rlcp => 1,
        ProgressionOrder::Rpcl => 2,
        ProgressionOrder::Pcrl => 3,
        ProgressionOrder::Cprl => 4,
    }
}

fn progression_from_code(v: u8) -> Result<ProgressionOrder> {
    match v {
        0 => Ok(ProgressionOrder::Lrcp),
        1 => Ok(ProgressionOrder::Rlcp),
        2 => Ok(ProgressionOrder::Rpcl),
        3 => Ok(ProgressionOrder::Pcrl),
        4 => Ok(ProgressionOrder::Cprl),
        other => Err(J2kError::invalid_codestream("COD", format!("unknown progression order {other}"))),
    }
}

/// Packet visiting order as `(layer, resolution, component)` tuples. The
/// precinct axis ISO's five orders otherwise permute is fixed at size one
/// here (see the module docs), so RPCL/PCRL and PCRL/CPRL coincide; this is
/// an honest consequence of that simplification, not a bug.
fn packet_order(progression: ProgressionOrder, num_layers: u32, num_resolutions: usize, num_components: usize) -> Vec<(u32, usize, usize)> {
    let mut out = Vec::with_capacity(num_layers as usize * num_resolutions * num_components);
    match progression {
        ProgressionOrder::Lrcp => {
            for l in 0..num_layers {
                for r in 0..num_resolutions {
                    for c in 0..num_components {
                        out.push((l, r, c));
                    }
                }
            }
        }
        ProgressionOrder::Rlcp => {
            for r in 0..num_resolutions {
                for l in 0..num_layers {
                    for c in 0..num_components {
                        out.push((l, r, c));
                    }
                }
            }
        }
        ProgressionOrder::Rpcl | ProgressionOrder::Pcrl | ProgressionOrder::Cprl => {
            for r in 0..num_resolutions {
                for c in 0..num_components {
                    for l in 0..num_layers {
                        out.push((l, r, c));
                    }
                }
            }
        }
    }
    out
}

fn encode_block(coeffs: &[i32], width: usize, height: usize, kind: SubbandKind, coder: BlockCoder) -> (Vec<u8>, u8, Vec<ebcot::PassRecord>) {
    match coder {
        BlockCoder::Ebcot => ebcot::encode(coeffs, width, height, kind),
        BlockCoder::Ht => {
            let (data, kmax) = ht::encode(coeffs, width, height);
            let len = data.len() as u32;
            (data, kmax, vec![ebcot::PassRecord { cumulative_bytes: len, distortion: 0.0 }])
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_block(data: &[u8], width: usize, height: usize, kmax: u8, kind: SubbandKind, coder: BlockCoder, tile: u32, component: u32, num_passes: u32) -> Result<Vec<i32>> {
    match coder {
        BlockCoder::Ebcot => Ok(ebcot::decode(data, width, height, kmax, kind, num_passes)),
        BlockCoder::Ht => ht::decode_checked(data, width, height, kmax, tile, component),
    }
}

/// Encodes `image` into a complete codestream per `config`.
pub fn encode(image: &Image, config: &EncoderConfig) -> Result<Vec<u8>> {
    config.cancellation.check()?;
    validate_image(image)?;

    let geometry = image.geometry;
    if geometry.tile_width == 0 || geometry.tile_height == 0 {
        return Err(J2kError::InvalidInput("image geometry must have a nonzero tile size".into()));
    }
    let num_components = image.num_components();
    let use_mct = num_components == 3 && image.color_transform != ColorTransform::None;
    if use_mct && matches!(image.color_transform, ColorTransform::Reversible) && config.filter != WaveletFilter::Reversible53 {
        return Err(J2kError::InvalidConfiguration("the reversible color transform requires the 5/3 filter".into()));
    }

    let mut planes = image.components.clone();
    let shift = image.dc_shift();
    if shift != 0.0 {
        for plane in planes.iter_mut() {
            for v in plane.iter_mut() {
                *v += shift;
            }
        }
    }
    if use_mct {
        match image.color_transform {
            ColorTransform::Reversible => {
                let to_i32 = |p: &[f64]| -> Vec<i32> { p.iter().map(|&v| v.round() as i32).collect() };
                let (y, cb, cr) = rct_forward(&to_i32(&planes[0]), &to_i32(&planes[1]), &to_i32(&planes[2]));
                planes[0] = y.into_iter().map(|v| v as f64).collect();
                planes[1] = cb.into_iter().map(|v| v as f64).collect();
                planes[2] = cr.into_iter().map(|v| v as f64).collect();
            }
            ColorTransform::Irreversible => {
                let (y, cb, cr) = ict_forward(&planes[0], &planes[1], &planes[2]);
                planes[0] = y;
                planes[1] = cb;
                planes[2] = cr;
            }
            ColorTransform::None => unreachable!("use_mct implies a transform was selected"),
        }
    }

    let mut out = ByteWriter::new();
    out.write_u16(code::SOC);
    marker::write_siz(&mut out, &build_siz(image, &geometry))?;
    if config.block_coder == BlockCoder::Ht {
        marker::write_cap(&mut out, &Cap { pcap: 0, ht_enabled: true })?;
    }
    marker::write_cod(&mut out, &build_cod(config, use_mct))?;
    marker::write_qcd(&mut out, &build_qcd(config))?;

    for tile_index in 0..geometry.num_tiles() {
        encode_tile(&mut out, &planes, &geometry, tile_index, config)?;
        config.cancellation.check()?;
    }

    out.write_u16(code::EOC);
    Ok(out.into_vec())
}

fn build_siz(image: &Image, geometry: &ImageGeometry) -> Siz {
    Siz {
        rsiz: 0,
        width: geometry.width,
        height: geometry.height,
        x_offset: geometry.x_offset,
        y_offset: geometry.y_offset,
        tile_width: geometry.tile_width,
        tile_height: geometry.tile_height,
        tile_x_offset: 0,
        tile_y_offset: 0,
        components: (0..image.num_components())
            .map(|_| ComponentSiz {
                bit_depth: image.bit_depth,
                signed: image.signed,
                x_sub: 1,
                y_sub: 1,
            })
            .collect(),
    }
}

fn build_cod(config: &EncoderConfig, use_mct: bool) -> Cod {
    let cb_w_exp = (config.code_block_width.trailing_zeros() as u8).saturating_sub(2);
    let cb_h_exp = (config.code_block_height.trailing_zeros() as u8).saturating_sub(2);
    Cod {
        scod: 0,
        progression_order: progression_code(config.progression),
        num_layers: config.num_layers.min(u16::MAX as u32) as u16,
        mct: if use_mct { 1 } else { 0 },
        style: CodingStyle {
            decomposition_levels: config.dwt_levels,
            code_block_width_exp: cb_w_exp,
            code_block_height_exp: cb_h_exp,
            code_block_style: if config.block_coder == BlockCoder::Ht { 0x40 } else { 0 },
            filter: if config.filter == WaveletFilter::Reversible53 { 1 } else { 0 },
            precinct_sizes: None,
        },
    }
}

fn build_qcd(config: &EncoderConfig) -> Qcd {
    let expounded = config.filter == WaveletFilter::Irreversible97;
    let step = if expounded {
        StepSize::from_delta(DEFAULT_BASE_STEP, 16)
    } else {
        StepSize { exponent: 0, mantissa: 0 }
    };
    Qcd {
        sqcd: (crate::quantization::DEFAULT_GUARD_BITS << 5) | if expounded { 0x02 } else { 0x00 },
        steps: vec![QuantStepSize { exponent: step.exponent, mantissa: step.mantissa }],
    }
}

fn build_layer_budgets(config: &EncoderConfig, tile_w: u32, tile_h: u32) -> Vec<u32> {
    let n = config.num_layers as usize;
    match config.target_bpp {
        None => {
            let mut budgets = vec![0u32; n.saturating_sub(1)];
            budgets.push(u32::MAX);
            budgets
        }
        Some(bpp) => {
            let total = ((bpp * tile_w as f64 * tile_h as f64) / 8.0).round().max(1.0) as u64;
            (1..=n).map(|i| ((total * i as u64) / n as u64) as u32).collect()
        }
    }
}

/// Fills a tile-component's code-block coefficients from a post-color-transform
/// tile plane, then block-encodes every code-block, leaving `compressed_data`,
/// `zero_bitplanes`, and `coding_passes` populated.
fn populate_and_encode_component(tc: &mut TileComponent, tile_plane: &[f64], tile_w: usize, tile_h: usize, config: &EncoderConfig) -> Result<()> {
    let levels = config.dwt_levels;
    let ll_array: Vec<i32>;
    let mut detail_arrays: Vec<[Vec<i32>; 3]> = Vec::with_capacity(levels as usize);

    match config.filter {
        WaveletFilter::Reversible53 => {
            let plane_i32: Vec<i32> = tile_plane.iter().map(|&v| v.round() as i32).collect();
            let (level_list, final_ll) = dwt::forward_multilevel_53(&plane_i32, tile_w, tile_h, levels);
            ll_array = final_ll;
            for level in &level_list {
                detail_arrays.push([level.subbands.hl.clone(), level.subbands.lh.clone(), level.subbands.hh.clone()]);
            }
        }
        WaveletFilter::Irreversible97 => {
            let (level_list, final_ll) = dwt::forward_multilevel_97(tile_plane, tile_w, tile_h, levels);
            let ll_step = tc.resolutions[0]
                .subbands
                .iter()
                .find(|s| s.orientation == SubbandOrientation::Ll)
                .map(|s| s.step_size)
                .unwrap_or(1.0);
            ll_array = final_ll.iter().map(|&v| quantize_scalar(v, ll_step)).collect();
            for (i, level) in level_list.iter().enumerate() {
                let res = &tc.resolutions[i + 1];
                let step_for = |orientation: SubbandOrientation| -> f64 { res.subbands.iter().find(|s| s.orientation == orientation).map(|s| s.step_size).unwrap_or(1.0) };
                let hl = level.subbands.hl.iter().map(|&v| quantize_scalar(v, step_for(SubbandOrientation::Hl))).collect();
                let lh = level.subbands.lh.iter().map(|&v| quantize_scalar(v, step_for(SubbandOrientation::Lh))).collect();
                let hh = level.subbands.hh.iter().map(|&v| quantize_scalar(v, step_for(SubbandOrientation::Hh))).collect();
                detail_arrays.push([hl, lh, hh]);
            }
        }
    }

    if let Some(ll_sb) = tc.resolutions[0].subbands.iter_mut().find(|s| s.orientation == SubbandOrientation::Ll) {
        let array_w = ll_sb.bounds.width() as usize;
        for cb in ll_sb.code_blocks.iter_mut() {
            cb.coeffs = crop_i32(&ll_array, array_w, cb.bounds);
        }
    }

    for (i, trio) in detail_arrays.iter().enumerate() {
        let res = &mut tc.resolutions[i + 1];
        for sb in res.subbands.iter_mut() {
            let array = match sb.orientation {
                SubbandOrientation::Hl => &trio[0],
                SubbandOrientation::Lh => &trio[1],
                SubbandOrientation::Hh => &trio[2],
                SubbandOrientation::Ll => unreachable!("LL only appears in resolution 0"),
            };
            let array_w = sb.bounds.width() as usize;
            for cb in sb.code_blocks.iter_mut() {
                cb.coeffs = crop_i32(array, array_w, cb.bounds);
            }
        }
    }

    for res in tc.resolutions.iter_mut() {
        for sb in res.subbands.iter_mut() {
            let kind: SubbandKind = sb.orientation.into();
            for cb in sb.code_blocks.iter_mut() {
                let w = cb.width() as usize;
                let h = cb.height() as usize;
                let (data, kmax, passes) = encode_block(&cb.coeffs, w, h, kind, config.block_coder);
                cb.compressed_data = data;
                cb.zero_bitplanes = kmax_to_zero_bitplanes(kmax);
                cb.coding_passes = passes.len() as u8;
                cb.pass_trace = passes;
            }
        }
    }
    Ok(())
}

fn encode_tile(out: &mut ByteWriter, planes: &[Vec<f64>], geometry: &ImageGeometry, tile_index: u32, config: &EncoderConfig) -> Result<()> {
    let bounds = geometry.tile_bounds_by_index(tile_index);
    let tile_w = bounds.width();
    let tile_h = bounds.height();

    let mut tile_components: Vec<TileComponent> = Vec::with_capacity(planes.len());
    for (c, plane) in planes.iter().enumerate() {
        let tile_plane = extract_plane(plane, geometry.width, bounds);
        let mut tc = build_tile_component(c as u32, tile_w, tile_h, config, DEFAULT_BASE_STEP);
        populate_and_encode_component(&mut tc, &tile_plane, tile_w as usize, tile_h as usize, config)?;
        tile_components.push(tc);
    }

    let mut traces: Vec<BlockTrace> = Vec::new();
    for tc in &tile_components {
        for res in &tc.resolutions {
            for sb in &res.subbands {
                for cb in &sb.code_blocks {
                    let energy: f64 = cb.coeffs.iter().map(|&c| (c as f64).powi(2)).sum::<f64>().max(1e-6);
                    let mut points = vec![TruncationPoint { pass: 0, cumulative_bytes: 0, distortion: energy }];
                    if config.block_coder == BlockCoder::Ebcot {
                        for (i, record) in cb.pass_trace.iter().enumerate() {
                            points.push(TruncationPoint { pass: i + 1, cumulative_bytes: record.cumulative_bytes, distortion: record.distortion });
                        }
                    } else {
                        let full_bytes = cb.compressed_data.len() as u32;
                        points.push(TruncationPoint { pass: 1, cumulative_bytes: full_bytes, distortion: 0.0 });
                    }
                    traces.push(BlockTrace::new(points));
                }
            }
        }
    }

    let layer_budgets = build_layer_budgets(config, tile_w, tile_h);
    let layers = form_layers(&traces, &layer_budgets)?;

    let mut cursor = 0usize;
    for tc in tile_components.iter_mut() {
        for res in tc.resolutions.iter_mut() {
            for sb in res.subbands.iter_mut() {
                for cb in sb.code_blocks.iter_mut() {
                    cb.first_layer = layers
                        .iter()
                        .position(|layer| layer[cursor].pass >= 1)
                        .map(|p| p as u32)
                        .unwrap_or(layers.len() as u32 - 1);
                    cb.layer_passes = layers.iter().map(|layer| layer[cursor].pass as u32).collect();
                    cb.layer_bytes = layers.iter().map(|layer| layer[cursor].cumulative_bytes).collect();
                    cursor += 1;
                }
            }
        }
    }

    let mut precinct_encoders: Vec<Vec<Vec<PrecinctEncoder>>> = Vec::with_capacity(tile_components.len());
    for tc in &tile_components {
        let mut per_res = Vec::with_capacity(tc.resolutions.len());
        for res in &tc.resolutions {
            let mut per_sb = Vec::with_capacity(res.subbands.len());
            for sb in &res.subbands {
                let (gw, gh) = block_grid_dims(sb.bounds, config.code_block_width, config.code_block_height);
                let contribs: Vec<CodeBlockContribution> = sb
                    .code_blocks
                    .iter()
                    .enumerate()
                    .map(|(i, cb)| CodeBlockContribution {
                        grid_x: i % gw,
                        grid_y: i / gw,
                        zero_bitplanes: cb.zero_bitplanes,
                        first_layer: cb.first_layer,
                        passes_this_layer: 0,
                        bytes_this_layer: 0,
                    })
                    .collect();
                per_sb.push(PrecinctEncoder::new(gw, gh, &contribs));
            }
            per_res.push(per_sb);
        }
        precinct_encoders.push(per_res);
    }

    let num_resolutions = tile_components[0].resolutions.len();
    let order = packet_order(config.progression, config.num_layers, num_resolutions, tile_components.len());

    let sot_offset = out.position();
    marker::write_sot(
        out,
        &Sot {
            tile_index: tile_index as u16,
            tile_part_length: 0,
            tile_part_index: 0,
            tile_part_count: 1,
        },
    )?;
    out.write_u16(code::SOD);

    for &(layer, res_idx, comp_idx) in &order {
        let tc = &tile_components[comp_idx];
        let res = &tc.resolutions[res_idx];
        for (sb_idx, sb) in res.subbands.iter().enumerate() {
            let (gw, _gh) = block_grid_dims(sb.bounds, config.code_block_width, config.code_block_height);
            let contribs: Vec<CodeBlockContribution> = sb
                .code_blocks
                .iter()
                .enumerate()
                .map(|(i, cb)| {
                    let prev_passes = if layer == 0 { 0 } else { cb.layer_passes[layer as usize - 1] };
                    let prev_bytes = if layer == 0 { 0 } else { cb.layer_bytes[layer as usize - 1] };
                    let this_passes = cb.layer_passes[layer as usize];
                    let this_bytes = cb.layer_bytes[layer as usize];
                    CodeBlockContribution {
                        grid_x: i % gw,
                        grid_y: i / gw,
                        zero_bitplanes: cb.zero_bitplanes,
                        first_layer: cb.first_layer,
                        passes_this_layer: this_passes - prev_passes,
                        bytes_this_layer: this_bytes - prev_bytes,
                    }
                })
                .collect();

            let enc = &mut precinct_encoders[comp_idx][res_idx][sb_idx];
            let mut header_writer = BitWriter::new();
            enc.encode_packet(&mut header_writer, layer, &contribs)?;
            out.write_bytes(&header_writer.finish());
            for (i, contrib) in contribs.iter().enumerate() {
                if contrib.passes_this_layer > 0 {
                    let cb = &sb.code_blocks[i];
                    let prev_bytes = if layer == 0 { 0 } else { cb.layer_bytes[layer as usize - 1] };
                    let this_bytes = cb.layer_bytes[layer as usize];
                    out.write_bytes(&cb.compressed_data[prev_bytes as usize..this_bytes as usize]);
                }
            }
        }
    }

    let tile_part_length = (out.position() - sot_offset) as u32;
    marker::patch_sot_length(out, sot_offset, tile_part_length);
    Ok(())
}

/// Decodes a complete codestream back into an [`Image`].
pub fn decode(data: &[u8], config: &DecoderConfig) -> Result<Image> {
    config.cancellation.check()?;
    let mut r = ByteReader::new(data);
    let segments = marker::read_main_header(&mut r)?;

    let siz = segments
        .iter()
        .find_map(|s| if let MarkerSegment::Siz(s) = s { Some(s.clone()) } else { None })
        .ok_or_else(|| J2kError::invalid_codestream("main-header", "missing SIZ segment"))?;
    let cod = segments
        .iter()
        .find_map(|s| if let MarkerSegment::Cod(c) = s { Some(c.clone()) } else { None })
        .ok_or_else(|| J2kError::invalid_codestream("main-header", "missing COD segment"))?;
    let cap_ht = segments.iter().any(|s| matches!(s, MarkerSegment::Cap(c) if c.ht_enabled));

    let pixel_count = siz.width as u64 * siz.height as u64;
    if pixel_count > config.max_pixels {
        return Err(J2kError::InvalidInput(format!("declared image size {pixel_count} pixels exceeds the configured limit")));
    }
    if siz.components.is_empty() {
        return Err(J2kError::invalid_codestream("SIZ", "zero components"));
    }

    let geometry = ImageGeometry::new(siz.width, siz.height, siz.tile_width, siz.tile_height);
    let progression = progression_from_code(cod.progression_order)?;
    let filter = if cod.style.filter == 1 { WaveletFilter::Reversible53 } else { WaveletFilter::Irreversible97 };
    let block_coder = if cod.style.uses_ht() { BlockCoder::Ht } else { BlockCoder::Ebcot };
    if block_coder == BlockCoder::Ht && !cap_ht {
        warn!("COD signals the HT block coder but no CAP segment declared HT support");
    }
    let cb_width = 1u32 << (cod.style.code_block_width_exp + 2);
    let cb_height = 1u32 << (cod.style.code_block_height_exp + 2);
    let num_components = siz.components.len();
    let use_mct = cod.mct != 0 && num_components == 3;
    let color_transform = if use_mct {
        if filter == WaveletFilter::Reversible53 {
            ColorTransform::Reversible
        } else {
            ColorTransform::Irreversible
        }
    } else {
        ColorTransform::None
    };

    let synth_config = EncoderConfig::builder()
        .dwt_levels(cod.style.decomposition_levels)
        .filter(filter)
        .color_transform(color_transform)
        .block_coder(block_coder)
        .code_block_width(cb_width)
        .code_block_height(cb_height)
        .num_layers((cod.num_layers as u32).max(1))
        .progression(progression)
        .build()
        .map_err(|e| J2kError::invalid_codestream("COD", e.to_string()))?;

    let bit_depth = siz.components[0].bit_depth;
    let signed = siz.components[0].signed;
    let mut planes: Vec<Vec<f64>> = vec![vec![0.0; geometry.width as usize * geometry.height as usize]; num_components];

    for tile_index in 0..geometry.num_tiles() {
        decode_tile(&mut r, &mut planes, &geometry, tile_index, &synth_config, config)?;
        config.cancellation.check()?;
    }

    match r.read_u16() {
        Ok(m) if m == code::EOC => {}
        Ok(m) => warn!("expected EOC after the last tile-part, found marker 0x{m:04X}"),
        Err(_) => warn!("codestream ended before an EOC marker"),
    }

    if use_mct {
        match color_transform {
            ColorTransform::Reversible => {
                let to_i32 = |p: &[f64]| -> Vec<i32> { p.iter().map(|&v| v.round() as i32).collect() };
                let (r_, g_, b_) = rct_inverse(&to_i32(&planes[0]), &to_i32(&planes[1]), &to_i32(&planes[2]));
                planes[0] = r_.into_iter().map(|v| v as f64).collect();
                planes[1] = g_.into_iter().map(|v| v as f64).collect();
                planes[2] = b_.into_iter().map(|v| v as f64).collect();
            }
            ColorTransform::Irreversible => {
                let (r_, g_, b_) = ict_inverse(&planes[0], &planes[1], &planes[2]);
                planes[0] = r_;
                planes[1] = g_;
                planes[2] = b_;
            }
            ColorTransform::None => {}
        }
    }

    let dc_shift = if signed { 0.0 } else { -((1u64 << (bit_depth - 1)) as f64) };
    if dc_shift != 0.0 {
        for plane in planes.iter_mut() {
            for v in plane.iter_mut() {
                *v -= dc_shift;
            }
        }
    }

    Ok(Image::new(geometry, bit_depth, signed, color_transform, planes))
}

fn decode_tile(r: &mut ByteReader, planes: &mut [Vec<f64>], geometry: &ImageGeometry, tile_index: u32, synth_config: &EncoderConfig, decoder_config: &DecoderConfig) -> Result<()> {
    let bounds = geometry.tile_bounds_by_index(tile_index);
    let tile_w = bounds.width();
    let tile_h = bounds.height();

    let marker_word = r.read_u16()?;
    if marker_word != code::SOT {
        return Err(J2kError::invalid_codestream("tile-part", format!("expected SOT, found 0x{marker_word:04X}")));
    }
    let sot = marker::read_sot(r)?;
    if sot.tile_index as u32 != tile_index {
        return Err(J2kError::invalid_codestream("SOT", format!("expected tile {tile_index}, found {}", sot.tile_index)));
    }
    let sod = r.read_u16()?;
    if sod != code::SOD {
        return Err(J2kError::invalid_codestream("tile-part", "expected SOD after SOT"));
    }

    let num_components = planes.len();
    let mut tile_components: Vec<TileComponent> = (0..num_components).map(|c| build_tile_component(c as u32, tile_w, tile_h, synth_config, DEFAULT_BASE_STEP)).collect();

    let mut precinct_decoders: Vec<Vec<Vec<PrecinctDecoder>>> = tile_components
        .iter()
        .map(|tc| {
            tc.resolutions
                .iter()
                .map(|res| {
                    res.subbands
                        .iter()
                        .map(|sb| {
                            let (gw, gh) = block_grid_dims(sb.bounds, synth_config.code_block_width, synth_config.code_block_height);
                            PrecinctDecoder::new(gw, gh)
                        })
                        .collect()
                })
                .collect()
        })
        .collect();

    let num_resolutions = tile_components[0].resolutions.len();
    let order = packet_order(synth_config.progression, synth_config.num_layers, num_resolutions, num_components);

    'packets: for &(layer, res_idx, comp_idx) in &order {
        let sb_count = tile_components[comp_idx].resolutions[res_idx].subbands.len();
        for sb_idx in 0..sb_count {
            let mut bit_reader = BitReader::new(r.remaining());
            let headers = {
                let dec = &mut precinct_decoders[comp_idx][res_idx][sb_idx];
                dec.decode_packet(&mut bit_reader, layer)
            };
            let headers = match headers {
                Ok(h) => h,
                Err(e) => {
                    if decoder_config.tolerant_truncation {
                        warn!("tile {tile_index} layer {layer}: {e}; stopping decode of this tile early");
                        break 'packets;
                    }
                    return Err(J2kError::Truncated { tile: tile_index, layer, detail: e.to_string() });
                }
            };
            r.advance(bit_reader.bytes_consumed())?;

            let (gw, _gh) = block_grid_dims(tile_components[comp_idx].resolutions[res_idx].subbands[sb_idx].bounds, synth_config.code_block_width, synth_config.code_block_height);
            for h in &headers {
                let block_i = h.grid_y * gw + h.grid_x;
                let bytes = match r.read_bytes(h.bytes as usize) {
                    Ok(b) => b,
                    Err(e) => {
                        if decoder_config.tolerant_truncation {
                            warn!("tile {tile_index}: truncated code-block body, {e}");
                            break 'packets;
                        }
                        return Err(J2kError::Truncated { tile: tile_index, layer, detail: e.to_string() });
                    }
                };
                let cb = &mut tile_components[comp_idx].resolutions[res_idx].subbands[sb_idx].code_blocks[block_i];
                cb.compressed_data.extend_from_slice(bytes);
                cb.zero_bitplanes = h.zero_bitplanes;
                cb.coding_passes = cb.coding_passes.saturating_add(h.passes as u8);
            }
        }
    }

    for tc in tile_components.iter_mut() {
        let plane = decode_and_reconstruct_component(tc, tile_w as usize, tile_h as usize, synth_config, tile_index)?;
        insert_plane(&mut planes[tc.component_index as usize], geometry.width, bounds, &plane);
    }
    Ok(())
}

fn decode_and_reconstruct_component(tc: &mut TileComponent, tile_w: usize, tile_h: usize, config: &EncoderConfig, tile_index: u32) -> Result<Vec<f64>> {
    for res in tc.resolutions.iter_mut() {
        for sb in res.subbands.iter_mut() {
            let kind: SubbandKind = sb.orientation.into();
            for cb in sb.code_blocks.iter_mut() {
                let w = cb.width() as usize;
                let h = cb.height() as usize;
                if cb.compressed_data.is_empty() {
                    cb.coeffs = vec![0i32; w * h];
                    continue;
                }
                let kmax = zero_bitplanes_to_kmax(cb.zero_bitplanes);
                cb.coeffs = decode_block(&cb.compressed_data, w, h, kmax, kind, config.block_coder, tile_index, tc.component_index, cb.coding_passes as u32)?;
            }
        }
    }

    let levels = config.dwt_levels;
    let sizes = decomposition_sizes(tile_w, tile_h, levels);

    // Reassemble each whole-subband coefficient array from its code-blocks'
    // decoded (still-quantized) coefficients.
    let reassemble = |res_idx: usize, orientation: SubbandOrientation| -> Option<(Vec<i32>, usize, usize)> {
        let res = &tc.resolutions[res_idx];
        let sb = res.subbands.iter().find(|s| s.orientation == orientation)?;
        let array_w = sb.bounds.width() as usize;
        let array_h = sb.bounds.height() as usize;
        let mut array = vec![0i32; array_w * array_h];
        for cb in &sb.code_blocks {
            place_i32(&mut array, array_w, cb.bounds, &cb.coeffs);
        }
        Some((array, array_w, array_h))
    };

    match config.filter {
        WaveletFilter::Reversible53 => {
            let (final_ll, _, _) = reassemble(0, SubbandOrientation::Ll).unwrap_or((vec![], 0, 0));
            let mut level_list = Vec::with_capacity(levels as usize);
            for i in 0..levels as usize {
                let (hl, _, _) = reassemble(i + 1, SubbandOrientation::Hl).unwrap_or((vec![], 0, 0));
                let (lh, _, _) = reassemble(i + 1, SubbandOrientation::Lh).unwrap_or((vec![], 0, 0));
                let (hh, _, _) = reassemble(i + 1, SubbandOrientation::Hh).unwrap_or((vec![], 0, 0));
                let (width, height) = sizes[i];
                let ll_w = width.div_ceil(2);
                let ll_h = height.div_ceil(2);
                level_list.push(dwt::Level {
                    subbands: dwt::Subbands { ll: vec![], hl, lh, hh, ll_w, ll_h, hl_w: width - ll_w, lh_h: height - ll_h },
                    width,
                    height,
                });
            }
            let recon = dwt::inverse_multilevel_53(&level_list, &final_ll);
            Ok(recon.into_iter().map(|v| v as f64).collect())
        }
        WaveletFilter::Irreversible97 => {
            let ll_step = tc.resolutions[0]
                .subbands
                .iter()
                .find(|s| s.orientation == SubbandOrientation::Ll)
                .map(|s| s.step_size)
                .unwrap_or(1.0);
            let (final_ll_q, _, _) = reassemble(0, SubbandOrientation::Ll).unwrap_or((vec![], 0, 0));
            let final_ll: Vec<f64> = final_ll_q.iter().map(|&q| dequantize_scalar(q, ll_step)).collect();

            let mut level_list = Vec::with_capacity(levels as usize);
            for i in 0..levels as usize {
                let res_idx = i + 1;
                let step_for = |orientation: SubbandOrientation| -> f64 {
                    tc.resolutions[res_idx]
                        .subbands
                        .iter()
                        .find(|s| s.orientation == orientation)
                        .map(|s| s.step_size)
                        .unwrap_or(1.0)
                };
                let (hl_q, _, _) = reassemble(res_idx, SubbandOrientation::Hl).unwrap_or((vec![], 0, 0));
                let (lh_q, _, _) = reassemble(res_idx, SubbandOrientation::Lh).unwrap_or((vec![], 0, 0));
                let (hh_q, _, _) = reassemble(res_idx, SubbandOrientation::Hh).unwrap_or((vec![], 0, 0));
                let hl: Vec<f64> = hl_q.iter().map(|&q| dequantize_scalar(q, step_for(SubbandOrientation::Hl))).collect();
                let lh: Vec<f64> = lh_q.iter().map(|&q| dequantize_scalar(q, step_for(SubbandOrientation::Lh))).collect();
                let hh: Vec<f64> = hh_q.iter().map(|&q| dequantize_scalar(q, step_for(SubbandOrientation::Hh))).collect();
                let (width, height) = sizes[i];
                let ll_w = width.div_ceil(2);
                let ll_h = height.div_ceil(2);
                level_list.push(dwt::Level {
                    subbands: dwt::Subbands { ll: vec![], hl, lh, hh, ll_w, ll_h, hl_w: width - ll_w, lh_h: height - ll_h },
                    width,
                    height,
                });
            }
            Ok(dwt::inverse_multilevel_97(&level_list, &final_ll))
        }
    }
}
