//! Minimal PGM/PPM pixel-plane loader and writer: the thin collaborator
//! the binary front-end uses to get raw pixels in and out of [`crate::Image`],
//! not part of the codec core itself.
//!
//! Supports the binary flavors only (P5 grayscale, P6 RGB) at 8 or 16 bits
//! per sample, which is what `encode`/`decode` round-trip through.

use std::io::Write;

use crate::error::{J2kError, Result};

pub struct PnmImage {
    pub width: u32,
    pub height: u32,
    pub max_value: u16,
    /// One plane per component (1 for P5, 3 for P6), row-major, each sample
    /// already widened to `f64` ready for [`crate::Image`].
    pub planes: Vec<Vec<f64>>,
}

fn skip_whitespace_and_comments(data: &[u8], pos: &mut usize) {
    loop {
        while *pos < data.len() && data[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < data.len() && data[*pos] == b'#' {
            while *pos < data.len() && data[*pos] != b'\n' {
                *pos += 1;
            }
        } else {
            break;
        }
    }
}

fn read_token(data: &[u8], pos: &mut usize) -> Result<u32> {
    skip_whitespace_and_comments(data, pos);
    let start = *pos;
    while *pos < data.len() && !data[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    if start == *pos {
        return Err(J2kError::InvalidInput("unexpected end of PNM header".into()));
    }
    std::str::from_utf8(&data[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| J2kError::InvalidInput("malformed PNM header token".into()))
}

/// Parses a binary PGM (P5) or PPM (P6) file into per-component planes.
pub fn read(data: &[u8]) -> Result<PnmImage> {
    if data.len() < 2 {
        return Err(J2kError::InvalidInput("PNM file too short".into()));
    }
    let components = match &data[0..2] {
        b"P5" => 1,
        b"P6" => 3,
        _ => return Err(J2kError::InvalidInput("unsupported PNM magic number, expected P5 or P6".into())),
    };

    let mut pos = 2;
    let width = read_token(data, &mut pos)?;
    let height = read_token(data, &mut pos)?;
    let max_value = read_token(data, &mut pos)?;
    if max_value == 0 || max_value > u16::MAX as u32 {
        return Err(J2kError::InvalidInput(format!("unsupported PNM max value {max_value}")));
    }
    // A single whitespace byte separates the header from the pixel data.
    if pos >= data.len() || !data[pos].is_ascii_whitespace() {
        return Err(J2kError::InvalidInput("malformed PNM header, missing whitespace before pixel data".into()));
    }
    pos += 1;

    let bytes_per_sample = if max_value > 255 { 2 } else { 1 };
    let sample_count = width as usize * height as usize * components;
    let expected_bytes = sample_count * bytes_per_sample;
    if data.len() - pos < expected_bytes {
        return Err(J2kError::InvalidInput("PNM pixel data shorter than width*height*components implies".into()));
    }

    let mut planes = vec![Vec::with_capacity(width as usize * height as usize); components];
    let body = &data[pos..pos + expected_bytes];
    for (i, chunk) in body.chunks_exact(bytes_per_sample).enumerate() {
        let value = if bytes_per_sample == 2 { u16::from_be_bytes([chunk[0], chunk[1]]) } else { chunk[0] as u16 };
        planes[i % components].push(value as f64);
    }

    Ok(PnmImage {
        width,
        height,
        max_value: max_value as u16,
        planes,
    })
}

/// Writes `planes` (1 or 3 components, already in `0..=max_value` range) as
/// a binary PGM/PPM file.
pub fn write<W: Write>(out: &mut W, width: u32, height: u32, max_value: u16, planes: &[Vec<f64>]) -> Result<()> {
    let magic = match planes.len() {
        1 => "P5",
        3 => "P6",
        n => return Err(J2kError::InvalidInput(format!("PNM output supports 1 or 3 components, got {n}"))),
    };
    writeln!(out, "{magic}\n{width} {height}\n{max_value}").map_err(|e| J2kError::InvalidInput(e.to_string()))?;

    let bytes_per_sample = if max_value > 255 { 2 } else { 1 };
    let pixel_count = width as usize * height as usize;
    let mut body = Vec::with_capacity(pixel_count * planes.len() * bytes_per_sample);
    for i in 0..pixel_count {
        for plane in planes {
            let v = plane[i].round().clamp(0.0, max_value as f64) as u16;
            if bytes_per_sample == 2 {
                body.extend_from_slice(&v.to_be_bytes());
            } else {
                body.push(v as u8);
            }
        }
    }
    out.write_all(&body).map_err(|e| J2kError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgm_round_trips_through_write_and_read() {
        let width = 4;
        let height = 3;
        let plane: Vec<f64> = (0..width * height).map(|i| (i * 17) as f64).collect();
        let mut buf = Vec::new();
        write(&mut buf, width, height, 255, &[plane.clone()]).unwrap();

        let parsed = read(&buf).unwrap();
        assert_eq!(parsed.width, width);
        assert_eq!(parsed.height, height);
        assert_eq!(parsed.planes.len(), 1);
        assert_eq!(parsed.planes[0], plane);
    }

    #[test]
    fn ppm_round_trips_three_components() {
        let width = 2;
        let height = 2;
        let r: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0];
        let g: Vec<f64> = vec![10.0, 20.0, 30.0, 40.0];
        let b: Vec<f64> = vec![100.0, 110.0, 120.0, 130.0];
        let mut buf = Vec::new();
        write(&mut buf, width, height, 255, &[r.clone(), g.clone(), b.clone()]).unwrap();

        let parsed = read(&buf).unwrap();
        assert_eq!(parsed.planes, vec![r, g, b]);
    }

    #[test]
    fn rejects_unknown_magic() {
        assert!(read(b"P2\n4 3\n255\n").is_err());
    }
}
