//! JPEG and PNG recompression
//!
//! Both paths walk a fixed parameter ladder from least to most
//! aggressive and stop at the first setting that meets the byte budget.
//! Encoding is CPU-bound and runs on the blocking pool.

use super::{compressed_sibling, descend_ladder, LadderOutcome};
use crate::error::{AppError, Result};
use color_quant::NeuQuant;
use image::codecs::jpeg::JpegEncoder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// JPEG quality ladder: start at 75, step down by 10 to a floor of 10.
const JPEG_QUALITIES: [u64; 8] = [75, 65, 55, 45, 35, 25, 15, 10];

/// PNG palette ladder: start at 256 colors, halve down to a floor of 16.
const PNG_COLOR_COUNTS: [u64; 5] = [256, 128, 64, 32, 16];

/// Sampling factor for the NeuQuant quantizer. 10 trades a little
/// fidelity for much faster palette training; per its docs the range is
/// 1 (slow, exact) to 30.
const QUANT_SAMPLE_FACTOR: i32 = 10;

fn log_outcome(what: &str, input: &Path, target: u64, outcome: &LadderOutcome) {
    if outcome.fits {
        debug!(
            input = %input.display(),
            level = outcome.level,
            size = outcome.size,
            "compressed {what} within target"
        );
    } else {
        warn!(
            input = %input.display(),
            size = outcome.size,
            target,
            "could not compress {what} to target, keeping most aggressive result"
        );
    }
}

/// Recompress a JPEG, lowering quality until the output fits `target`.
///
/// Returns the `_compressed` sibling path. When even the floor quality
/// stays over budget the last output is kept and a warning is logged.
pub async fn compress_jpeg(input: &Path, target: u64) -> Result<PathBuf> {
    let input = input.to_path_buf();
    let output = compressed_sibling(&input, None);
    let output_task = output.clone();

    let outcome = tokio::task::spawn_blocking(move || -> Result<LadderOutcome> {
        let img = image::open(&input)
            .map_err(|e| AppError::validation(format!("failed to decode {}: {e}", input.display())))?;
        // JPEG has no alpha channel.
        let rgb = img.to_rgb8();

        let outcome = descend_ladder(&JPEG_QUALITIES, target, |quality| {
            let mut buffer = Vec::new();
            JpegEncoder::new_with_quality(&mut buffer, quality as u8)
                .encode_image(&rgb)
                .map_err(|e| AppError::internal(format!("jpeg encode failed: {e}")))?;
            std::fs::write(&output_task, &buffer)?;
            Ok(buffer.len() as u64)
        })?;
        log_outcome("JPEG", &input, target, &outcome);
        Ok(outcome)
    })
    .await
    .map_err(|e| AppError::internal(format!("jpeg task panicked: {e}")))??;

    debug!(size = outcome.size, "jpeg compression finished");
    Ok(output)
}

/// Recompress a PNG by reducing it to an adaptive palette, halving the
/// color count until the output fits `target`.
pub async fn compress_png(input: &Path, target: u64) -> Result<PathBuf> {
    let input = input.to_path_buf();
    let output = compressed_sibling(&input, None);
    let output_task = output.clone();

    let outcome = tokio::task::spawn_blocking(move || -> Result<LadderOutcome> {
        let img = image::open(&input)
            .map_err(|e| AppError::validation(format!("failed to decode {}: {e}", input.display())))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba.as_raw();

        let outcome = descend_ladder(&PNG_COLOR_COUNTS, target, |colors| {
            write_paletted_png(&output_task, width, height, pixels, colors as usize)
        })?;
        log_outcome("PNG", &input, target, &outcome);
        Ok(outcome)
    })
    .await
    .map_err(|e| AppError::internal(format!("png task panicked: {e}")))??;

    debug!(size = outcome.size, "png compression finished");
    Ok(output)
}

/// Quantize RGBA pixels to an adaptive `colors`-entry palette and write
/// an indexed PNG. Returns the written byte count.
fn write_paletted_png(
    output: &Path,
    width: u32,
    height: u32,
    pixels: &[u8],
    colors: usize,
) -> Result<u64> {
    let quantizer = NeuQuant::new(QUANT_SAMPLE_FACTOR, colors, pixels);

    let mut indices = Vec::with_capacity((width as usize) * (height as usize));
    for pixel in pixels.chunks_exact(4) {
        indices.push(quantizer.index_of(pixel) as u8);
    }

    // The quantizer hands back an RGBA palette; PNG wants the alpha
    // channel as a separate tRNS table.
    let palette_rgba = quantizer.color_map_rgba();
    let mut palette = Vec::with_capacity(palette_rgba.len() / 4 * 3);
    let mut alphas = Vec::with_capacity(palette_rgba.len() / 4);
    for entry in palette_rgba.chunks_exact(4) {
        palette.extend_from_slice(&entry[..3]);
        alphas.push(entry[3]);
    }

    let file = std::fs::File::create(output)?;
    let writer = std::io::BufWriter::new(file);
    let mut encoder = png::Encoder::new(writer, width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(palette);
    encoder.set_trns(alphas);
    encoder.set_compression(png::Compression::Best);

    let map_png = |e: png::EncodingError| AppError::internal(format!("png encode failed: {e}"));
    let mut png_writer = encoder.write_header().map_err(map_png)?;
    png_writer.write_image_data(&indices).map_err(map_png)?;
    png_writer.finish().map_err(map_png)?;

    Ok(std::fs::metadata(output)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[tokio::test]
    async fn test_compress_jpeg_meets_generous_target() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("photo.jpg");
        gradient_image(64, 64).save(&source).unwrap();

        let target = 1024 * 1024;
        let output = compress_jpeg(&source, target).await.unwrap();

        assert!(output.exists());
        assert!(is_artifact_name(&output));
        assert!(std::fs::metadata(&output).unwrap().len() <= target);
    }

    #[tokio::test]
    async fn test_compress_png_meets_generous_target() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("chart.png");
        gradient_image(64, 64).save(&source).unwrap();

        let target = 1024 * 1024;
        let output = compress_png(&source, target).await.unwrap();

        assert!(output.exists());
        assert!(is_artifact_name(&output));
        assert!(std::fs::metadata(&output).unwrap().len() <= target);
    }

    #[tokio::test]
    async fn test_compress_png_unreachable_target_still_produces_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("chart.png");
        gradient_image(64, 64).save(&source).unwrap();

        // One byte is never reachable; the most aggressive setting wins
        // and the call still succeeds with a warning.
        let output = compress_png(&source, 1).await.unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_compress_jpeg_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("fake.jpg");
        std::fs::write(&source, b"not an image at all").unwrap();

        let err = compress_jpeg(&source, 1024).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    fn is_artifact_name(path: &Path) -> bool {
        super::super::is_compressed_artifact(path)
    }
}
