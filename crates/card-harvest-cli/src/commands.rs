//! Command implementations behind the CLI.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use card_harvest::config::{parse_target_list, WebTarget};
use card_harvest::{
    catalog, harvest_local, harvest_web, ChromiumRenderer, Downloader, HarvestConfig,
    HarvestError, HttpClient, ManifestSummary, OnnxRecognizer, RegionExtractor, Renderer,
};
use tokio_util::sync::CancellationToken;

use crate::output;

/// How a command finished; maps onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every asset materialized and extracted.
    Complete,
    /// Finished, but some asset failed to download or be read.
    Partial,
    /// A run-level error stopped at least one target.
    Failed,
}

impl RunStatus {
    pub fn from_summary(summary: &ManifestSummary) -> Self {
        if summary.has_failures() {
            RunStatus::Partial
        } else {
            RunStatus::Complete
        }
    }

    /// The worse of two outcomes.
    pub fn merge(self, other: RunStatus) -> RunStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::Partial => 1,
            RunStatus::Failed => 2,
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Complete => 0,
            RunStatus::Partial => 2,
            RunStatus::Failed => 1,
        }
    }
}

/// Targets to run: from a `folder, url` list file, or the config filtered by name.
pub fn select_targets(
    config: &HarvestConfig,
    names: &[String],
    list: Option<(&Path, &str)>,
) -> anyhow::Result<Vec<WebTarget>> {
    let mut targets = match list {
        Some((file, profile)) => {
            if !config.web.profiles.contains_key(profile) {
                bail!("unknown profile {profile:?}");
            }
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("reading target list {}", file.display()))?;
            parse_target_list(&text, profile)
        }
        None => config.web.targets.clone(),
    };

    if !names.is_empty() {
        for name in names {
            if !targets.iter().any(|t| &t.name == name) {
                bail!("no target named {name:?}");
            }
        }
        targets.retain(|t| names.contains(&t.name));
    }

    if targets.is_empty() {
        bail!("no web targets configured; add [[web.targets]] or pass --targets");
    }
    Ok(targets)
}

/// Harvest each target in turn with one shared browser.
pub async fn run_web(
    config: &HarvestConfig,
    targets: &[WebTarget],
    cancel: &CancellationToken,
) -> anyhow::Result<RunStatus> {
    let client = HttpClient::new(&config.download, config.browser.user_agent.as_deref())?;
    let downloader = Downloader::new(client, config.download.concurrency);
    let renderer = ChromiumRenderer::new(&config.browser)
        .await
        .context("starting browser")?;

    let result = run_targets(&renderer, &downloader, config, targets, cancel).await;

    let open_pages = renderer.active_contexts();
    if open_pages > 0 {
        tracing::warn!("{open_pages} page(s) still open at shutdown");
    }
    if let Err(e) = renderer.shutdown().await {
        tracing::warn!("Browser shutdown failed: {e}");
    }
    result
}

async fn run_targets(
    renderer: &dyn Renderer,
    downloader: &Downloader,
    config: &HarvestConfig,
    targets: &[WebTarget],
    cancel: &CancellationToken,
) -> anyhow::Result<RunStatus> {
    let mut status = RunStatus::Complete;

    for target in targets {
        match harvest_web(renderer, downloader, config, target, cancel).await {
            Ok(manifest) => {
                let path = config.web.manifest_path(target);
                output::write_json_manifest(&path, &manifest)?;
                let summary = manifest.summary();
                println!("{}: {summary}", target.name);
                status = status.merge(RunStatus::from_summary(&summary));
            }
            Err(HarvestError::Cancelled) => {
                bail!("cancelled during {}", target.name);
            }
            Err(e) => {
                tracing::error!("{} failed: {e}", target.name);
                status = status.merge(RunStatus::Failed);
            }
        }
    }

    Ok(status)
}

/// OCR every image under the root and write one CSV.
pub fn run_scan(
    config: &HarvestConfig,
    root: Option<PathBuf>,
    output: Option<PathBuf>,
    cancel: &CancellationToken,
) -> anyhow::Result<RunStatus> {
    let local = &config.local;
    if local.regions.is_empty() {
        bail!("no [[local.regions]] configured");
    }
    let root = root.unwrap_or_else(|| local.root.clone());
    let output = output.unwrap_or_else(|| local.manifest.clone());

    let recognizer = OnnxRecognizer::new(&local.recognizer).context("loading recognizer")?;
    let mut extractor = RegionExtractor::new(recognizer, local.regions.clone())
        .with_min_confidence(local.recognizer.min_confidence);
    if let Some(dir) = &local.debug_crops {
        extractor = extractor.with_debug_crops(dir);
    }

    let manifest = harvest_local(&root, &mut extractor, cancel)
        .with_context(|| format!("scanning {}", root.display()))?;
    output::write_csv(&output, &manifest, &local.id_column)?;

    let summary = manifest.summary();
    println!("{}: {summary}", root.display());
    Ok(RunStatus::from_summary(&summary))
}

/// Write the folder-to-stems listing of the image tree.
pub fn run_catalog(root: &Path, output: &Path) -> anyhow::Result<RunStatus> {
    let listing = catalog(root).with_context(|| format!("cataloging {}", root.display()))?;
    output::write_catalog(output, &listing)?;
    let cards: usize = listing.values().map(Vec::len).sum();
    println!("{}: {} folders, {cards} cards", root.display(), listing.len());
    Ok(RunStatus::Complete)
}
