//! Core data types for discovered assets, their local records, and extracted fields.

use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Width of the zero-padded discovery index used in generated file names.
pub const INDEX_PAD_WIDTH: usize = 4;

/// Extension used for generated names when the URL carries none.
const FALLBACK_EXTENSION: &str = ".jpg";

/// A discovered pointer to a remote (or local) image.
///
/// Produced once by discovery and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    /// 0-based position in discovery order.
    pub index: usize,
    /// Absolute source URL, or a filesystem path for local sources.
    pub url: String,
    /// File name proposed by discovery, if the source offered a usable one.
    pub suggested_name: Option<String>,
    /// Outer markup of the DOM node the reference was found in.
    pub fragment: Option<String>,
}

impl AssetReference {
    /// The file name this reference materializes to.
    ///
    /// Falls back to `image_<index>` padded to a fixed width, which cannot
    /// collide with another reference of the same run.
    pub fn file_name(&self) -> String {
        match &self.suggested_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!(
                "image_{:0width$}{}",
                self.index,
                url_extension(&self.url).unwrap_or_else(|| FALLBACK_EXTENSION.to_string()),
                width = INDEX_PAD_WIDTH
            ),
        }
    }

    /// File name without its extension; used as the record identifier.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or(name)
    }
}

/// Extension (with the leading dot) of the last path segment of a URL or path.
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) if parsed.has_host() => parsed.path().to_string(),
        _ => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let segment = path.rsplit('/').next().unwrap_or("");
    let ext = Path::new(segment).extension()?.to_str()?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Outcome of materializing one reference locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetStatus {
    Downloaded,
    SkippedExisting,
    Failed { reason: String },
}

impl AssetStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, AssetStatus::Failed { .. })
    }

    /// Whether the asset is present on disk after this attempt.
    pub fn is_available(&self) -> bool {
        !self.is_failed()
    }
}

/// The result of one download attempt. A retry produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub reference: AssetReference,
    pub local_path: PathBuf,
    pub status: AssetStatus,
}

/// An absent-safe field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Could not be determined, or failed validation.
    Unknown,
    Text(String),
    /// An integer that passed its declared range check.
    Integer(i64),
    /// Raw markup payload (e.g. an inline SVG icon).
    Markup(String),
    /// Reference into an [`crate::index::IconIndex`].
    Icon(usize),
}

impl FieldValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, FieldValue::Unknown)
    }

    /// Cell rendering for tabular output; unknown is an empty cell.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Unknown => String::new(),
            FieldValue::Text(s) | FieldValue::Markup(s) => s.clone(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Icon(id) => id.to_string(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Unknown => serializer.serialize_none(),
            FieldValue::Text(s) | FieldValue::Markup(s) => serializer.serialize_str(s),
            FieldValue::Integer(n) => serializer.serialize_i64(*n),
            FieldValue::Icon(id) => serializer.serialize_u64(*id as u64),
        }
    }
}

/// One named field of a [`FieldRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// Structured attributes extracted for one asset, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRecord {
    pub fields: Vec<Field>,
    /// Set when the whole asset could not be read; every field is then unknown.
    pub failure: Option<String>,
}

impl FieldRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record whose every named field is unknown.
    pub fn unknown<'a>(names: impl IntoIterator<Item = &'a str>, reason: impl Into<String>) -> Self {
        Self {
            fields: names
                .into_iter()
                .map(|name| Field {
                    name: name.to_string(),
                    value: FieldValue::Unknown,
                })
                .collect(),
            failure: Some(reason.into()),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push(Field {
            name: name.into(),
            value,
        });
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| &mut f.value)
    }

    /// True if at least one field is unknown.
    pub fn is_incomplete(&self) -> bool {
        self.fields.iter().any(|f| f.value.is_unknown())
    }
}

impl Serialize for FieldRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.end()
    }
}

/// Errors that can occur while harvesting.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Control not found: {selector}")]
    ControlNotFound { selector: String },

    #[error("Content did not saturate after {rounds} rounds (last measure {last_measure})")]
    SaturationTimeout { rounds: u32, last_measure: u64 },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Value {value:?} rejected for field {field}")]
    ValidationRejected { field: String, value: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;
