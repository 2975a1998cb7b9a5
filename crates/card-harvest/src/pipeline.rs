//! The web pipeline: one target from address to manifest.

use tokio_util::sync::CancellationToken;

use crate::activator::{self, ActivationConfig, Session};
use crate::config::{HarvestConfig, PageProfile, TimeoutPolicy, WebTarget};
use crate::discover::discover;
use crate::download::Downloader;
use crate::extract::dom::DomExtractor;
use crate::extract::{extract_all, AssetInput};
use crate::index::build_index;
use crate::manifest::Manifest;
use crate::renderer::Renderer;
use crate::types::{AssetReference, HarvestError, HarvestResult};

/// Harvest one web target: activate, saturate, discover, extract, download, index.
///
/// The page is released before downloads start, on every path.
pub async fn harvest_web(
    renderer: &dyn Renderer,
    downloader: &Downloader,
    config: &HarvestConfig,
    target: &WebTarget,
    cancel: &CancellationToken,
) -> HarvestResult<Manifest> {
    let address = config.web.resolve_url(target)?;
    let profile = config.web.profile(target)?;
    let destination = config.web.destination(target);
    let mut extractor = DomExtractor::new(&profile.fields)?;

    tracing::info!("Harvesting {} from {address}", target.name);
    let activation = ActivationConfig::from_profile(profile, config.browser.navigation_timeout_ms);
    let mut session = activator::open(renderer, &address, &activation, cancel).await?;

    let read = read_page(&mut session, config, profile, cancel).await;
    if let Err(e) = session.close().await {
        tracing::warn!("Failed to close page for {}: {e}", target.name);
    }
    let references = read?;

    let inputs: Vec<AssetInput<'_>> = references.iter().map(AssetInput::from_reference).collect();
    let records = extract_all(&mut extractor, &inputs);

    let assets = downloader
        .download_all(&references, &destination, cancel)
        .await;
    if cancel.is_cancelled() {
        return Err(HarvestError::Cancelled);
    }

    let (icons, records) = match &profile.icons {
        Some(settings) => {
            let (index, records) = build_index(records, &settings.field, &settings.category);
            (Some(index), records)
        }
        None => (None, records),
    };

    Manifest::assemble(assets, records, icons)
}

async fn read_page(
    session: &mut Session,
    config: &HarvestConfig,
    profile: &PageProfile,
    cancel: &CancellationToken,
) -> HarvestResult<Vec<AssetReference>> {
    let settings = &config.saturation;
    match session.saturate(settings.measure.clone(), settings, cancel).await {
        Ok(_) => {}
        Err(HarvestError::SaturationTimeout {
            rounds,
            last_measure,
        }) if settings.on_timeout == TimeoutPolicy::Proceed => {
            tracing::warn!(
                "Content still growing after {rounds} rounds (measure {last_measure}); \
                 continuing with what is loaded"
            );
        }
        Err(e) => return Err(e),
    }

    session.scroll_to_top().await?;
    discover(session, &profile.discovery).await
}
