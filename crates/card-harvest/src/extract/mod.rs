//! Structured field extraction.
//!
//! Two strategies share one contract: [`dom::DomExtractor`] reads sub-elements
//! of the discovered DOM node, [`region::RegionExtractor`] runs recognition on
//! fixed crops of the image. Neither ever fails a batch: a bad asset becomes a
//! record of unknown fields.

pub mod dom;
pub mod region;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{AssetRecord, AssetReference, FieldRecord, HarvestError, HarvestResult};

/// What an extractor gets to look at for one asset.
#[derive(Debug, Clone, Copy)]
pub struct AssetInput<'a> {
    pub reference: &'a AssetReference,
    /// Local copy of the image, when one exists.
    pub local_path: Option<&'a Path>,
}

impl<'a> AssetInput<'a> {
    pub fn from_reference(reference: &'a AssetReference) -> Self {
        Self {
            reference,
            local_path: None,
        }
    }

    /// Input for a materialized asset; failed downloads have no local file.
    pub fn from_record(record: &'a AssetRecord) -> Self {
        Self {
            reference: &record.reference,
            local_path: record
                .status
                .is_available()
                .then_some(record.local_path.as_path()),
        }
    }
}

/// Produces one [`FieldRecord`] per asset.
pub trait FieldExtractor {
    /// Field names this extractor emits, in order.
    fn field_names(&self) -> Vec<&str>;

    /// Extract the fields of one asset. Failures degrade to unknown fields.
    fn extract(&mut self, asset: &AssetInput<'_>) -> FieldRecord;
}

/// Run an extractor over every asset, in order.
pub fn extract_all<E: FieldExtractor + ?Sized>(
    extractor: &mut E,
    assets: &[AssetInput<'_>],
) -> Vec<FieldRecord> {
    let records: Vec<FieldRecord> = assets.iter().map(|a| extractor.extract(a)).collect();
    let incomplete = records.iter().filter(|r| r.is_incomplete()).count();
    tracing::info!(
        "Extracted {} records ({incomplete} with unknown fields)",
        records.len()
    );
    records
}

/// Inclusive bounds for an integer field; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ValidRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    /// Reject inverted bounds.
    pub fn check(&self) -> HarvestResult<()> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min > max => Err(HarvestError::Config(format!(
                "range min {min} is greater than max {max}"
            ))),
            _ => Ok(()),
        }
    }

    /// Accept `text` only if it is all ASCII digits and inside the range.
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn accept(&self, field: &str, text: &str) -> HarvestResult<i64> {
        let rejected = || HarvestError::ValidationRejected {
            field: field.to_string(),
            value: text.to_string(),
        };

        let digits = text.strip_prefix('-').unwrap_or(text);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(rejected());
        }
        let value: i64 = text.parse().map_err(|_| rejected())?;
        if self.contains(value) {
            Ok(value)
        } else {
            Err(rejected())
        }
    }
}
