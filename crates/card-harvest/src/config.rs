//! Configuration loading, defaults and validation.
//!
//! Everything target-specific (selectors, crop geometry, ranges, timings) comes
//! from a TOML file so a new site layout never needs a code change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discover::{MatchRule, NameRule};
use crate::extract::dom::DomField;
use crate::extract::region::RegionField;
use crate::index::IconSettings;
use crate::types::{HarvestError, HarvestResult};

/// Environment variable consulted when no config path is given.
pub const CONFIG_ENV: &str = "CARD_HARVEST_CONFIG";

/// Default config file name in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

/// Resolve the config file path: explicit flag, then env var, then `./harvest.toml`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(env_path);
    }

    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Root configuration, one file per project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub browser: BrowserSettings,
    pub download: DownloadSettings,
    pub saturation: SaturationSettings,
    pub web: WebSettings,
    pub local: LocalSettings,
}

impl HarvestConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> HarvestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(
            "Loaded config from {} ({} profiles, {} targets)",
            path.display(),
            config.web.profiles.len(),
            config.web.targets.len()
        );
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn from_toml(text: &str) -> HarvestResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| HarvestError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot honor.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.download.concurrency == 0 {
            return Err(HarvestError::Config(
                "download.concurrency must be at least 1".into(),
            ));
        }
        if self.saturation.max_rounds == 0 {
            return Err(HarvestError::Config(
                "saturation.max_rounds must be at least 1".into(),
            ));
        }
        if let Measure::Count(selector) = &self.saturation.measure {
            check_selector("saturation.measure.count", selector)?;
        }

        for (name, profile) in &self.web.profiles {
            profile
                .validate()
                .map_err(|e| HarvestError::Config(format!("profile {name:?}: {e}")))?;
        }

        for target in &self.web.targets {
            if target.name.trim().is_empty() {
                return Err(HarvestError::Config("web target with empty name".into()));
            }
            if !self.web.profiles.contains_key(&target.profile) {
                return Err(HarvestError::Config(format!(
                    "target {:?} references unknown profile {:?}",
                    target.name, target.profile
                )));
            }
        }

        for region in &self.local.regions {
            region.validate()?;
        }

        Ok(())
    }
}

fn check_selector(what: &str, selector: &str) -> HarvestResult<()> {
    if selector.trim().is_empty() {
        return Err(HarvestError::Config(format!("{what}: empty selector")));
    }
    scraper::Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| HarvestError::Config(format!("{what}: invalid selector {selector:?}: {e}")))
}

/// Browser launch and navigation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Explicit Chromium binary; searched for when absent.
    pub chrome_path: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            window_width: 1280,
            window_height: 2000,
            user_agent: None,
            navigation_timeout_ms: 30_000,
        }
    }
}

/// Asset download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Maximum in-flight requests.
    pub concurrency: usize,
    pub timeout_ms: u64,
    /// Retries on 5xx, 429 and connection errors.
    pub retries: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_ms: 30_000,
            retries: 2,
        }
    }
}

/// What the saturation probe measures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// `document.body.scrollHeight`.
    #[default]
    ScrollHeight,
    /// Number of elements matching a CSS selector.
    Count(String),
}

/// What to do when content never stops growing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Warn and continue with whatever content is present.
    #[default]
    Proceed,
    Abort,
}

/// Lazy-load saturation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationSettings {
    pub max_rounds: u32,
    pub settle_delay_ms: u64,
    /// Upper bound on each probe call.
    pub step_timeout_ms: u64,
    pub measure: Measure,
    pub on_timeout: TimeoutPolicy,
}

impl SaturationSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for SaturationSettings {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            settle_delay_ms: 1_000,
            step_timeout_ms: 10_000,
            measure: Measure::ScrollHeight,
            on_timeout: TimeoutPolicy::Proceed,
        }
    }
}

/// Web catalog settings: profiles describe page shapes, targets name pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    /// Each target writes into `<output_root>/<target name>`.
    pub output_root: PathBuf,
    /// Base for relative target URLs.
    pub base_url: Option<String>,
    pub profiles: BTreeMap<String, PageProfile>,
    pub targets: Vec<WebTarget>,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("images"),
            base_url: None,
            profiles: BTreeMap::new(),
            targets: Vec::new(),
        }
    }
}

impl WebSettings {
    /// Absolute address of a target.
    pub fn resolve_url(&self, target: &WebTarget) -> HarvestResult<String> {
        if let Ok(url) = url::Url::parse(&target.url) {
            return Ok(url.to_string());
        }
        let base = self.base_url.as_deref().ok_or_else(|| {
            HarvestError::Config(format!(
                "target {:?} has relative url {:?} but web.base_url is not set",
                target.name, target.url
            ))
        })?;
        let base = url::Url::parse(base)
            .map_err(|e| HarvestError::Config(format!("invalid web.base_url {base:?}: {e}")))?;
        base.join(&target.url)
            .map(|u| u.to_string())
            .map_err(|e| HarvestError::Config(format!("cannot join {:?}: {e}", target.url)))
    }

    pub fn destination(&self, target: &WebTarget) -> PathBuf {
        self.output_root.join(&target.name)
    }

    /// Where a target's manifest is written unless it names one itself.
    pub fn manifest_path(&self, target: &WebTarget) -> PathBuf {
        target
            .manifest
            .clone()
            .unwrap_or_else(|| self.output_root.join(format!("{}.json", target.name)))
    }

    pub fn profile(&self, target: &WebTarget) -> HarvestResult<&PageProfile> {
        self.profiles.get(&target.profile).ok_or_else(|| {
            HarvestError::Config(format!("unknown profile {:?}", target.profile))
        })
    }
}

/// The shape of one kind of page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageProfile {
    /// Selector that must exist before the page counts as loaded.
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default = "default_wait_for_timeout_ms")]
    pub wait_for_timeout_ms: u64,
    /// Fixed pause after navigation for client-side rendering to mount.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub interaction: Option<Interaction>,
    pub discovery: MatchRule,
    #[serde(default)]
    pub fields: Vec<DomField>,
    #[serde(default)]
    pub icons: Option<IconSettings>,
}

fn default_wait_for_timeout_ms() -> u64 {
    30_000
}

fn default_initial_delay_ms() -> u64 {
    3_000
}

impl PageProfile {
    /// A profile with only a discovery rule and default timings.
    pub fn new(discovery: MatchRule) -> Self {
        Self {
            wait_for: None,
            wait_for_timeout_ms: default_wait_for_timeout_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            interaction: None,
            discovery,
            fields: Vec::new(),
            icons: None,
        }
    }

    fn validate(&self) -> HarvestResult<()> {
        if let Some(selector) = &self.wait_for {
            check_selector("wait_for", selector)?;
        }
        if let Some(interaction) = &self.interaction {
            check_selector("interaction.selector", &interaction.selector)?;
        }

        let rule = &self.discovery;
        check_selector("discovery.container", &rule.container)?;
        if let Some(image) = &rule.image {
            check_selector("discovery.image", image)?;
        }
        if rule.attributes.is_empty() {
            return Err(HarvestError::Config(
                "discovery.attributes must name at least one attribute".into(),
            ));
        }
        if let NameRule::Fields(selectors) = &rule.naming {
            for selector in selectors {
                check_selector("discovery.naming.fields", selector)?;
            }
        }

        for field in &self.fields {
            if let Some(selector) = &field.selector {
                check_selector(&format!("fields.{}", field.name), selector)?;
            }
            field.range().check()?;
        }

        if let Some(icons) = &self.icons {
            if !self.fields.iter().any(|f| f.name == icons.field) {
                return Err(HarvestError::Config(format!(
                    "icons.field {:?} is not one of the profile's fields",
                    icons.field
                )));
            }
        }
        Ok(())
    }
}

/// A control to set before reading the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub selector: String,
    /// Value to assign; `max` means the control's own `max` attribute.
    pub value: String,
    #[serde(default = "default_interaction_settle_ms")]
    pub settle_delay_ms: u64,
}

fn default_interaction_settle_ms() -> u64 {
    2_000
}

/// One page to harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebTarget {
    /// Category name; also the output subdirectory.
    pub name: String,
    pub url: String,
    pub profile: String,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

/// Parse a `folder, url` target list; blank lines and a `Folder name` header are skipped.
pub fn parse_target_list(text: &str, profile: &str) -> Vec<WebTarget> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Folder name"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            match parts.as_slice() {
                [name, url] if !name.is_empty() && !url.is_empty() => Some(WebTarget {
                    name: name.to_string(),
                    url: url.to_string(),
                    profile: profile.to_string(),
                    manifest: None,
                }),
                _ => {
                    tracing::warn!("Ignoring malformed target line: {line}");
                    None
                }
            }
        })
        .collect()
}

/// Settings for the local-image OCR pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub root: PathBuf,
    pub manifest: PathBuf,
    /// Header of the identifier column in the tabular manifest.
    pub id_column: String,
    /// When set, every crop is saved here for tuning coordinates.
    pub debug_crops: Option<PathBuf>,
    pub regions: Vec<RegionField>,
    pub recognizer: RecognizerSettings,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            manifest: PathBuf::from("cards.csv"),
            id_column: "card_name".to_string(),
            debug_crops: None,
            regions: Vec::new(),
            recognizer: RecognizerSettings::default(),
        }
    }
}

/// Recognition engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    /// ONNX text-recognition model.
    pub model: Option<PathBuf>,
    /// Character dictionary, one entry per line; digits when absent.
    pub dictionary: Option<PathBuf>,
    pub input_height: u32,
    pub min_confidence: f32,
    /// Model emits raw logits rather than probabilities.
    pub logits: bool,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            model: None,
            dictionary: None,
            input_height: 48,
            min_confidence: 0.5,
            logits: false,
        }
    }
}
