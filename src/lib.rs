/*!
# jpegexp-rs

A pure Rust implementation of the JPEG 2000 Part 1 (ISO/IEC 15444-1) codec
core, with Part 15 (ISO/IEC 15444-15, "HTJ2K") block coding as an alternate
entropy coder selectable at encode time.

## Pipeline

```text
pixels -> DC shift -> color transform -> DWT -> quantization -> block coding
       -> rate control -> codestream assembly
```

Decoding reverses the order. [`encode`] and [`decode`] are the two entry
points; everything else in this crate is a module that one stage of that
pipeline owns:

- [`color_transform`]: reversible (RCT) and irreversible (ICT) component transforms.
- [`dwt`]: multi-level 5/3 and 9/7 discrete wavelet transform via lifting.
- [`quantization`]: scalar dead-zone quantization with exponent/mantissa step sizes.
- [`ebcot`]: the Part 1 EBCOT bit-plane coder (three coding passes, MQ arithmetic coding).
- [`ht`]: the Part 15 FBCOT block coder (MEL + MagSgn substreams).
- [`rate_control`]: PCRD-opt convex-hull layer formation.
- [`packet`]: packet header assembly and parsing (inclusion and zero-bitplane tag trees).
- [`marker`]: codestream marker segment encoding/decoding.
- [`codestream`]: the top-level encode/decode orchestrator tying every stage together.
- [`image`]: the tile/component/resolution/subband/code-block tree the above stages operate on.
- [`geometry`]: tile and subband partitioning, independent of pixel data.
- [`config`]: validated encoder/decoder configuration.
- [`pnm`]: a minimal PGM/PPM loader for the `bin/` front-end; not part of the codec core.

## Example

```no_run
use jpegexp_rs::{config::EncoderConfig, geometry::ImageGeometry, image::Image, config::ColorTransform};

let geometry = ImageGeometry::new(64, 64, 64, 64);
let image = Image::new(geometry, 8, false, ColorTransform::None, vec![vec![0.0; 64 * 64]]);
let config = EncoderConfig::balanced();
let codestream = jpegexp_rs::encode(&image, &config).unwrap();
let decoded = jpegexp_rs::decode(&codestream, &Default::default()).unwrap();
assert_eq!(decoded.components[0].len(), 64 * 64);
```
*/

pub mod codestream;
pub mod color_transform;
pub mod config;
pub mod dwt;
pub mod ebcot;
pub mod error;
pub mod geometry;
pub mod ht;
pub mod image;
pub mod io;
pub mod marker;
pub mod mq_coder;
pub mod packet;
pub mod pnm;
pub mod quantization;
pub mod rate_control;
pub mod tag_tree;

pub use codestream::{decode, encode};
pub use config::{DecoderConfig, EncoderConfig};
pub use error::{J2kError, Result};
pub use image::Image;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColorTransform;
    use crate::geometry::ImageGeometry;

    #[test]
    fn round_trips_a_small_reversible_grayscale_image() {
        let width = 32;
        let height = 32;
        let geometry = ImageGeometry::new(width, height, width, height);
        let pixels: Vec<f64> = (0..width * height).map(|i| (i % 256) as f64).collect();
        let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels.clone()]);

        let config = EncoderConfig::builder().dwt_levels(2).build().unwrap();
        let codestream = encode(&image, &config).unwrap();
        let decoded = decode(&codestream, &DecoderConfig::default()).unwrap();

        assert_eq!(decoded.components[0], pixels);
    }
}
