//! Score extraction from the captured frame via OCR.
//!
//! Uses `ocrs` (pure Rust). The reader is an optional capability: callers
//! resolve it once at startup and branch on its presence, and any
//! extraction failure degrades to a score of 0 rather than an error.

use crate::config::ScoreRegion;
use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
use rten::Model;
use std::path::Path;

/// Score reading capability consumed by the episode controller's reward.
pub trait ScoreSource {
    /// Score currently shown on the frame, or 0 when extraction fails.
    fn extract_score(&self, frame: &RgbImage) -> i64;
}

/// OCR-backed score reader over a fixed, calibrated frame sub-region.
pub struct ScoreReader {
    engine: OcrEngine,
    region: ScoreRegion,
}

impl ScoreReader {
    /// Load OCR models from the given directory, or `~/.cache/ocrs/` when
    /// `model_dir` is None.
    pub fn new(model_dir: Option<&Path>, region: ScoreRegion) -> Result<Self> {
        let cache_dir = model_dir.map(|p| p.to_path_buf()).unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
                .join("ocrs")
        });

        let detection_path = cache_dir.join("text-detection.rten");
        let recognition_path = cache_dir.join("text-recognition.rten");

        if !detection_path.exists() || !recognition_path.exists() {
            anyhow::bail!(
                "OCR models not found in {:?}. Run `ocrs-cli` once to download them, \
                or download manually from https://github.com/robertknight/ocrs",
                cache_dir
            );
        }

        let detection_model = Model::load_file(&detection_path)
            .with_context(|| format!("Failed to load {:?}", detection_path))?;
        let recognition_model = Model::load_file(&recognition_path)
            .with_context(|| format!("Failed to load {:?}", recognition_path))?;

        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(detection_model),
            recognition_model: Some(recognition_model),
            ..Default::default()
        })?;

        Ok(Self { engine, region })
    }

    fn read_region(&self, frame: &RgbImage) -> Result<String> {
        let image = DynamicImage::ImageRgb8(frame.clone());
        // Clamp the calibrated region to the frame's actual bounds
        let x = self.region.x.min(frame.width().saturating_sub(1));
        let y = self.region.y.min(frame.height().saturating_sub(1));
        let width = self.region.width.min(frame.width() - x);
        let height = self.region.height.min(frame.height() - y);
        let cropped = image.crop_imm(x, y, width, height);

        let rgb = cropped.to_rgb8();
        let dims = rgb.dimensions();
        let source = ImageSource::from_bytes(rgb.as_raw(), dims)?;

        let input = self.engine.prepare_input(source)?;
        let word_rects = self.engine.detect_words(&input)?;
        let line_rects = self.engine.find_text_lines(&input, &word_rects);
        let text = self.engine.recognize_text(&input, &line_rects)?;

        let result: String = text
            .iter()
            .filter_map(|line| line.as_ref())
            .flat_map(|line| line.words())
            .map(|word| word.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(result.trim().to_string())
    }
}

impl ScoreSource for ScoreReader {
    fn extract_score(&self, frame: &RgbImage) -> i64 {
        match self.read_region(frame) {
            Ok(text) => parse_digits(&text).unwrap_or(0),
            Err(e) => {
                log::debug!("Score extraction failed: {e}");
                0
            }
        }
    }
}

/// Normalize common OCR character confusions before parsing.
fn normalize_ocr(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'l' | 'I' => '1',
            'S' => '5',
            'B' => '8',
            _ => c,
        })
        .collect()
}

/// Parse the digits of an OCR line into a score. Empty or non-numeric
/// text yields None (which callers degrade to 0).
fn parse_digits(s: &str) -> Option<i64> {
    let cleaned: String = normalize_ocr(s)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    cleaned.parse().ok()
}
