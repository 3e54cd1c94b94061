//! Encoder and decoder configuration.
//!
//! Parameters are validated once, at construction, rather than scattered
//! across the pipeline as ad hoc assertions: an invalid [`EncoderConfig`]
//! can never reach [`crate::codestream`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{J2kError, Result};

/// Reversible (5/3, lossless-capable) vs irreversible (9/7, lossy) wavelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletFilter {
    Reversible53,
    Irreversible97,
}

/// Packet progression order (§4.L).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

/// RCT (reversible, paired with the 5/3 filter) vs ICT (irreversible, 9/7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTransform {
    None,
    Reversible,
    Irreversible,
}

/// Entropy coder back end: EBCOT (Part 1 MQ) or FBCOT/HTJ2K (Part 15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCoder {
    Ebcot,
    Ht,
}

/// Cooperative cancellation handle shared between a caller and an in-flight
/// encode/decode; polled between tile-components so a long multi-tile job
/// can be aborted without tearing down the thread pool.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(J2kError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Validated encoder parameters. Construct via [`EncoderConfig::builder`] or
/// one of the presets.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub tile_width: u32,
    pub tile_height: u32,
    pub dwt_levels: u8,
    pub filter: WaveletFilter,
    pub color_transform: ColorTransform,
    pub block_coder: BlockCoder,
    pub code_block_width: u32,
    pub code_block_height: u32,
    pub num_layers: u32,
    /// Target bits per pixel for the final layer; `None` means lossless
    /// (full bit-plane depth, no PCRD truncation).
    pub target_bpp: Option<f64>,
    pub progression: ProgressionOrder,
    pub cancellation: CancellationToken,
    #[cfg(feature = "parallel")]
    pub worker_threads: usize,
}

impl EncoderConfig {
    pub fn builder() -> EncoderConfigBuilder {
        EncoderConfigBuilder::default()
    }

    /// Fast preset: single DWT level, 5/3 filter, lossless, LRCP.
    pub fn fast() -> Self {
        EncoderConfigBuilder::default()
            .dwt_levels(1)
            .filter(WaveletFilter::Reversible53)
            .color_transform(ColorTransform::Reversible)
            .num_layers(1)
            .build()
            .expect("fast preset is always valid")
    }

    /// Balanced preset: 5 DWT levels, 5/3 filter, lossless, 3 quality layers.
    pub fn balanced() -> Self {
        EncoderConfigBuilder::default()
            .dwt_levels(5)
            .filter(WaveletFilter::Reversible53)
            .color_transform(ColorTransform::Reversible)
            .num_layers(3)
            .build()
            .expect("balanced preset is always valid")
    }

    /// Quality preset: 9/7 filter, ICT, PCRD-truncated to 1.0 bpp across 8 layers.
    pub fn quality() -> Self {
        EncoderConfigBuilder::default()
            .dwt_levels(5)
            .filter(WaveletFilter::Irreversible97)
            .color_transform(ColorTransform::Irreversible)
            .num_layers(8)
            .target_bpp(1.0)
            .build()
            .expect("quality preset is always valid")
    }
}

#[derive(Debug, Clone)]
pub struct EncoderConfigBuilder {
    tile_width: u32,
    tile_height: u32,
    dwt_levels: u8,
    filter: WaveletFilter,
    color_transform: ColorTransform,
    block_coder: BlockCoder,
    code_block_width: u32,
    code_block_height: u32,
    num_layers: u32,
    target_bpp: Option<f64>,
    progression: ProgressionOrder,
    cancellation: CancellationToken,
    #[cfg(feature = "parallel")]
    worker_threads: usize,
}

impl Default for EncoderConfigBuilder {
    fn default() -> Self {
        Self {
            tile_width: 0,
            tile_height: 0,
            dwt_levels: 5,
            filter: WaveletFilter::Reversible53,
            color_transform: ColorTransform::Reversible,
            block_coder: BlockCoder::Ebcot,
            code_block_width: 64,
            code_block_height: 64,
            num_layers: 1,
            target_bpp: None,
            progression: ProgressionOrder::Lrcp,
            cancellation: CancellationToken::new(),
            #[cfg(feature = "parallel")]
            worker_threads: 1,
        }
    }
}

macro_rules! setter {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, v: $ty) -> Self {
            self.$name = v;
            self
        }
    };
}

impl EncoderConfigBuilder {
    setter!(tile_width, u32);
    setter!(tile_height, u32);
    setter!(dwt_levels, u8);
    setter!(filter, WaveletFilter);
    setter!(color_transform, ColorTransform);
    setter!(block_coder, BlockCoder);
    setter!(code_block_width, u32);
    setter!(code_block_height, u32);
    setter!(num_layers, u32);
    setter!(progression, ProgressionOrder);
    setter!(cancellation, CancellationToken);

    pub fn target_bpp(mut self, bpp: f64) -> Self {
        self.target_bpp = Some(bpp);
        self
    }

    #[cfg(feature = "parallel")]
    setter!(worker_threads, usize);

    /// Validates the accumulated parameters, per §4.H/§4.I's bounds.
    pub fn build(self) -> Result<EncoderConfig> {
        if self.dwt_levels > 32 {
            return Err(J2kError::InvalidConfiguration(format!(
                "dwt_levels {} exceeds the 32-level ceiling",
                self.dwt_levels
            )));
        }
        if self.num_layers == 0 {
            return Err(J2kError::InvalidConfiguration("num_layers must be at least 1".into()));
        }
        if !self.code_block_width.is_power_of_two() || !self.code_block_height.is_power_of_two() {
            return Err(J2kError::InvalidConfiguration(
                "code-block dimensions must be powers of two".into(),
            ));
        }
        if self.code_block_width * self.code_block_height > 4096
            || self.code_block_width < 4
            || self.code_block_height < 4
        {
            return Err(J2kError::InvalidConfiguration(
                "code-block area must be in [16, 4096] per Table A.18".into(),
            ));
        }
        if let Some(bpp) = self.target_bpp {
            if !(bpp > 0.0 && bpp.is_finite()) {
                return Err(J2kError::InvalidConfiguration("target_bpp must be positive and finite".into()));
            }
        }
        if matches!(self.filter, WaveletFilter::Irreversible97)
            && matches!(self.color_transform, ColorTransform::Reversible)
        {
            return Err(J2kError::InvalidConfiguration(
                "the reversible color transform requires the 5/3 filter".into(),
            ));
        }

        Ok(EncoderConfig {
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            dwt_levels: self.dwt_levels,
            filter: self.filter,
            color_transform: self.color_transform,
            block_coder: self.block_coder,
            code_block_width: self.code_block_width,
            code_block_height: self.code_block_height,
            num_layers: self.num_layers,
            target_bpp: self.target_bpp,
            progression: self.progression,
            cancellation: self.cancellation,
            #[cfg(feature = "parallel")]
            worker_threads: self.worker_threads.max(1),
        })
    }
}

/// Decoder-side parameters; far smaller than [`EncoderConfig`] since most
/// decisions (filter, geometry, progression) are read back out of the
/// codestream itself.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// When `true`, a codestream that ends mid-packet decodes as far as it
    /// can and logs a warning instead of returning [`J2kError::Truncated`].
    pub tolerant_truncation: bool,
    /// Refuse to allocate an image whose declared size exceeds this many
    /// pixels, guarding against a hostile or corrupt SIZ segment.
    pub max_pixels: u64,
    pub cancellation: CancellationToken,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            tolerant_truncation: true,
            max_pixels: 1 << 30,
            cancellation: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        let _ = EncoderConfig::fast();
        let _ = EncoderConfig::balanced();
        let _ = EncoderConfig::quality();
    }

    #[test]
    fn rejects_non_power_of_two_code_block() {
        let result = EncoderConfig::builder().code_block_width(48).code_block_height(64).build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_irreversible_filter_with_reversible_transform() {
        let result = EncoderConfig::builder()
            .filter(WaveletFilter::Irreversible97)
            .color_transform(ColorTransform::Reversible)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn cancellation_token_round_trips() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(J2kError::Cancelled)));
    }
}
