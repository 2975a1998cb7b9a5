//! card-harvest: render card catalogs, download their images, and extract
//! structured fields into a deduplicated manifest.

pub mod activator;
pub mod config;
pub mod discover;
pub mod download;
pub mod extract;
pub mod http_client;
pub mod index;
pub mod local;
pub mod manifest;
pub mod pipeline;
pub mod recognizer;
pub mod renderer;
pub mod saturation;
pub mod types;

pub use activator::{open, ActivationConfig, Session};
pub use config::{resolve_config_path, HarvestConfig};
pub use discover::{discover, discover_in_html, MatchRule, NameRule};
pub use download::Downloader;
pub use extract::dom::{DomExtractor, DomField, FieldKind};
pub use extract::region::{RegionExtractor, RegionField};
pub use extract::{extract_all, AssetInput, FieldExtractor, ValidRange};
pub use http_client::HttpClient;
pub use index::{build_index, IconIndex, IconSettings};
pub use local::{catalog, harvest_local};
pub use manifest::{Manifest, ManifestEntry, ManifestSummary};
pub use pipeline::harvest_web;
pub use recognizer::{OnnxRecognizer, Recognition, TextRecognizer};
pub use renderer::chromium::ChromiumRenderer;
pub use renderer::{RenderContext, Renderer};
pub use saturation::{wait_for_saturation, ContentProbe, Saturation, SaturationState};
pub use types::*;
