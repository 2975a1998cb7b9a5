//! Image-region strategy: integers recognized in fixed crops of the image.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::{AssetInput, FieldExtractor, ValidRange};
use crate::recognizer::TextRecognizer;
use crate::types::{FieldRecord, FieldValue, HarvestError, HarvestResult};

/// Characters recognition is restricted to.
pub const DIGIT_ALLOWLIST: &str = "0123456789";

/// A rectangle in source pixels and the range its value must fall in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionField {
    pub name: String,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub min: i64,
    pub max: i64,
}

impl RegionField {
    pub fn range(&self) -> ValidRange {
        ValidRange::new(self.min, self.max)
    }

    pub fn validate(&self) -> HarvestResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(HarvestError::Config(format!(
                "region {:?} has zero size",
                self.name
            )));
        }
        self.range()
            .check()
            .map_err(|e| HarvestError::Config(format!("region {:?}: {e}", self.name)))
    }

    fn fits(&self, img: &DynamicImage) -> bool {
        self.left.checked_add(self.width).is_some_and(|r| r <= img.width())
            && self.top.checked_add(self.height).is_some_and(|b| b <= img.height())
    }
}

/// Reads [`RegionField`]s with a recognition engine.
pub struct RegionExtractor<R> {
    recognizer: R,
    fields: Vec<RegionField>,
    min_confidence: f32,
    debug_crops: Option<PathBuf>,
}

impl<R: TextRecognizer> RegionExtractor<R> {
    pub fn new(recognizer: R, fields: Vec<RegionField>) -> Self {
        Self {
            recognizer,
            fields,
            min_confidence: 0.0,
            debug_crops: None,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Save every crop as `<stem>_<field>.png` under `dir`.
    pub fn with_debug_crops(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_crops = Some(dir.into());
        self
    }

    fn read(&mut self, img: &DynamicImage, stem: &str, index: usize) -> FieldRecord {
        let mut record = FieldRecord::new();
        for i in 0..self.fields.len() {
            let value = self.read_field(img, stem, i);
            if value.is_unknown() {
                tracing::debug!("Asset {index} ({stem}): {} unknown", self.fields[i].name);
            }
            record.push(self.fields[i].name.clone(), value);
        }
        record
    }

    fn read_field(&mut self, img: &DynamicImage, stem: &str, i: usize) -> FieldValue {
        let field = &self.fields[i];
        if !field.fits(img) {
            tracing::warn!(
                "Region {} ({}x{} at {},{}) does not fit {stem} ({}x{})",
                field.name,
                field.width,
                field.height,
                field.left,
                field.top,
                img.width(),
                img.height()
            );
            return FieldValue::Unknown;
        }

        let crop = img.crop_imm(field.left, field.top, field.width, field.height);
        if let Some(dir) = &self.debug_crops {
            save_crop(&crop, dir, stem, &field.name);
        }

        let name = field.name.clone();
        let range = field.range();
        let recognitions = match self.recognizer.recognize(&crop, DIGIT_ALLOWLIST) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Recognition failed for {stem} {name}: {e}");
                return FieldValue::Unknown;
            }
        };

        let Some(first) = recognitions.first() else {
            return FieldValue::Unknown;
        };
        if first.confidence < self.min_confidence {
            tracing::debug!(
                "{stem} {name}: {:?} below confidence ({:.2})",
                first.text,
                first.confidence
            );
            return FieldValue::Unknown;
        }
        // The whole result is the token: "1 2" must not read as 1.
        match range.accept(&name, first.text.trim()) {
            Ok(n) => FieldValue::Integer(n),
            Err(e) => {
                tracing::debug!("{stem}: {e}");
                FieldValue::Unknown
            }
        }
    }
}

fn save_crop(crop: &DynamicImage, dir: &Path, stem: &str, field: &str) {
    let path = dir.join(format!("{stem}_{field}.png"));
    let result = std::fs::create_dir_all(dir)
        .map_err(HarvestError::from)
        .and_then(|_| crop.save(&path).map_err(HarvestError::from));
    if let Err(e) = result {
        tracing::warn!("Failed to save debug crop {}: {e}", path.display());
    }
}

impl<R: TextRecognizer> FieldExtractor for RegionExtractor<R> {
    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn extract(&mut self, asset: &AssetInput<'_>) -> FieldRecord {
        let Some(path) = asset.local_path else {
            return FieldRecord::unknown(self.field_names(), "no local image");
        };

        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("Cannot read {}: {e}", path.display());
                return FieldRecord::unknown(
                    self.field_names(),
                    HarvestError::Extraction(format!("{}: {e}", path.display())).to_string(),
                );
            }
        };

        let stem = asset.reference.stem();
        self.read(&img, &stem, asset.reference.index)
    }
}
