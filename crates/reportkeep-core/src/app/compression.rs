//! CompressionLadder - 下書き保存用の画像縮小・再エンコード
//!
//! DraftStore が容量不足で書けなかったときだけ使います。BlobStore に
//! 置いた画像は再圧縮しません。
//!
//! # 変換
//! 1. 長辺が `max_edge` を超えていれば縦横比を保って縮小（拡大はしない）
//! 2. RGB に落として JPEG（`quality`）で再エンコード
//! 3. 元より小さくならなければ元のバイト列を返す
//!
//! 同じ入力からは常に同じ出力（autosave のリトライで結果が揺れない）。

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{InlineImage, Report};

pub const DEFAULT_MAX_EDGE: u32 = 1024;
pub const DEFAULT_QUALITY: u8 = 70;

const OUTPUT_MEDIA_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLadder {
    max_edge: u32,
    quality: u8,
}

impl Default for CompressionLadder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EDGE, DEFAULT_QUALITY)
    }
}

/// Scale `(width, height)` so the longer edge is at most `max_edge`.
fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_edge {
        return (width, height);
    }
    let scale = f64::from(max_edge) / f64::from(longer);
    let scaled = |edge: u32| ((f64::from(edge) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

impl CompressionLadder {
    pub fn new(max_edge: u32, quality: u8) -> Self {
        Self {
            max_edge: max_edge.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Downscale and re-encode as JPEG. Never returns more bytes than given.
    pub fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let img = image::load_from_memory(bytes).map_err(CompressionError::Decode)?;
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(CompressionError::InvalidImage(format!(
                "{width}x{height} has no pixels"
            )));
        }

        let (target_w, target_h) = fit_within(width, height, self.max_edge);
        let img = if (target_w, target_h) == (width, height) {
            img
        } else {
            img.resize_exact(target_w, target_h, FilterType::Triangle)
        };

        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buffer = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        rgb.write_with_encoder(encoder)
            .map_err(CompressionError::Encode)?;
        let encoded = buffer.into_inner();

        if encoded.len() >= bytes.len() {
            debug!(
                original = bytes.len(),
                encoded = encoded.len(),
                "re-encoding did not shrink image, keeping original"
            );
            return Ok(bytes.to_vec());
        }
        debug!(
            from = bytes.len(),
            to = encoded.len(),
            width = target_w,
            height = target_h,
            "compressed image"
        );
        Ok(encoded)
    }

    /// Best effort: on any failure the original image is kept.
    pub fn compress_inline(&self, image: &InlineImage) -> InlineImage {
        let (_, bytes) = match image.decode() {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "inline image is not decodable, left as is");
                return image.clone();
            }
        };
        match self.compress(&bytes) {
            Ok(out) if out.len() < bytes.len() => InlineImage::from_bytes(OUTPUT_MEDIA_TYPE, &out),
            Ok(_) => image.clone(),
            Err(e) => {
                warn!(error = %e, "inline image compression failed, left as is");
                image.clone()
            }
        }
    }

    /// Copy of `report` with every inline image run through the ladder.
    pub fn compress_report(&self, report: &Report) -> Report {
        let mut out = report.clone();
        for issue in &mut out.issues {
            issue.images = issue
                .images
                .iter()
                .map(|image| self.compress_inline(image))
                .collect();
        }
        out
    }
}
