//! End-to-end encode/decode coverage over the public API.

use jpegexp_rs::config::{BlockCoder, ColorTransform, ProgressionOrder, WaveletFilter};
use jpegexp_rs::geometry::ImageGeometry;
use jpegexp_rs::image::Image;
use jpegexp_rs::{decode, encode, DecoderConfig, EncoderConfig, J2kError};

fn ramp(width: u32, height: u32) -> Vec<f64> {
    (0..width * height).map(|i| (i % 256) as f64).collect()
}

fn checkerboard(width: u32, height: u32, lo: f64, hi: f64) -> Vec<f64> {
    (0..width * height)
        .map(|i| {
            let x = i % width;
            let y = i / width;
            if (x + y) % 2 == 0 { lo } else { hi }
        })
        .collect()
}

#[test]
fn reversible_single_tile_grayscale_round_trips_exactly() {
    let width = 48;
    let height = 32;
    let geometry = ImageGeometry::new(width, height, width, height);
    let pixels = ramp(width, height);
    let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels.clone()]);

    let config = EncoderConfig::builder()
        .dwt_levels(4)
        .filter(WaveletFilter::Reversible53)
        .color_transform(ColorTransform::None)
        .num_layers(2)
        .build()
        .unwrap();

    let codestream = encode(&image, &config).unwrap();
    let decoded = decode(&codestream, &DecoderConfig::default()).unwrap();

    assert_eq!(decoded.geometry.width, width);
    assert_eq!(decoded.geometry.height, height);
    assert_eq!(decoded.components[0], pixels);
}

#[test]
fn lossy_rgb_round_trip_stays_within_tolerance() {
    let width = 64;
    let height = 64;
    let geometry = ImageGeometry::new(width, height, width, height);
    let r = ramp(width, height);
    let g = checkerboard(width, height, 10.0, 240.0);
    let b: Vec<f64> = (0..width * height).map(|i| ((i * 37) % 200) as f64).collect();
    let image = Image::new(geometry, 8, false, ColorTransform::Irreversible, vec![r.clone(), g.clone(), b.clone()]);

    let config = EncoderConfig::builder()
        .dwt_levels(5)
        .filter(WaveletFilter::Irreversible97)
        .color_transform(ColorTransform::Irreversible)
        .num_layers(4)
        .target_bpp(2.0)
        .build()
        .unwrap();

    let codestream = encode(&image, &config).unwrap();
    let decoded = decode(&codestream, &DecoderConfig::default()).unwrap();

    for (original, reconstructed) in [&r, &g, &b].into_iter().zip(decoded.components.iter()) {
        let mae: f64 = original
            .iter()
            .zip(reconstructed.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / original.len() as f64;
        assert!(mae < 20.0, "mean absolute error {mae} too high for a 2 bpp target");
    }
}

#[test]
fn multi_tile_image_partitions_and_reassembles_correctly() {
    let width = 96;
    let height = 64;
    let tile = 32;
    let geometry = ImageGeometry::new(width, height, tile, tile);
    let pixels = ramp(width, height);
    let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels.clone()]);

    let config = EncoderConfig::builder()
        .tile_width(tile)
        .tile_height(tile)
        .dwt_levels(3)
        .filter(WaveletFilter::Reversible53)
        .color_transform(ColorTransform::None)
        .num_layers(1)
        .progression(ProgressionOrder::Rlcp)
        .build()
        .unwrap();

    assert_eq!(geometry.num_tiles(), 6);

    let codestream = encode(&image, &config).unwrap();
    let decoded = decode(&codestream, &DecoderConfig::default()).unwrap();

    assert_eq!(decoded.components[0], pixels);
}

#[test]
fn htj2k_block_coder_round_trips_losslessly() {
    let width = 40;
    let height = 40;
    let geometry = ImageGeometry::new(width, height, width, height);
    let pixels = checkerboard(width, height, 5.0, 250.0);
    let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels.clone()]);

    let config = EncoderConfig::builder()
        .dwt_levels(3)
        .filter(WaveletFilter::Reversible53)
        .color_transform(ColorTransform::None)
        .block_coder(BlockCoder::Ht)
        .num_layers(1)
        .build()
        .unwrap();

    let codestream = encode(&image, &config).unwrap();
    let decoded = decode(&codestream, &DecoderConfig::default()).unwrap();

    assert_eq!(decoded.components[0], pixels);
}

#[test]
fn truncated_codestream_is_tolerated_by_default_and_rejected_when_configured_strict() {
    let width = 32;
    let height = 32;
    let geometry = ImageGeometry::new(width, height, width, height);
    let pixels = ramp(width, height);
    let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels]);

    let config = EncoderConfig::builder()
        .dwt_levels(2)
        .filter(WaveletFilter::Reversible53)
        .color_transform(ColorTransform::None)
        .num_layers(1)
        .build()
        .unwrap();

    let codestream = encode(&image, &config).unwrap();
    let truncated = &codestream[..codestream.len() - 8];

    let tolerant = DecoderConfig::default();
    assert!(decode(truncated, &tolerant).is_ok());

    let strict = DecoderConfig {
        tolerant_truncation: false,
        ..DecoderConfig::default()
    };
    let result = decode(truncated, &strict);
    assert!(matches!(result, Err(J2kError::Truncated { .. }) | Err(J2kError::InvalidCodestream { .. })));
}

#[test]
fn encoding_the_same_image_twice_is_deterministic() {
    let width = 32;
    let height = 32;
    let geometry = ImageGeometry::new(width, height, width, height);
    let pixels = ramp(width, height);
    let image = Image::new(geometry, 8, false, ColorTransform::None, vec![pixels]);
    let config = EncoderConfig::balanced();

    let first = encode(&image, &config).unwrap();
    let second = encode(&image, &config).unwrap();
    assert_eq!(first, second);
}
