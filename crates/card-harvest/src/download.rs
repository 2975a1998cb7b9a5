//! Asset downloads with skip-existing resumability and per-asset isolation.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::http_client::HttpClient;
use crate::types::{AssetRecord, AssetReference, AssetStatus, HarvestError, HarvestResult};

/// Suffix of in-progress writes; renamed into place once complete.
const PARTIAL_SUFFIX: &str = ".part";

/// Downloads references into a destination directory.
#[derive(Clone)]
pub struct Downloader {
    client: HttpClient,
    concurrency: usize,
}

impl Downloader {
    pub fn new(client: HttpClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Materialize one reference. Never fails: errors become [`AssetStatus::Failed`].
    pub async fn download(&self, reference: &AssetReference, destination: &Path) -> AssetRecord {
        let local_path = destination.join(reference.file_name());

        let status = match self.fetch_to(&reference.url, &local_path).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Failed to download {}: {e}", reference.url);
                AssetStatus::Failed {
                    reason: e.to_string(),
                }
            }
        };

        AssetRecord {
            reference: reference.clone(),
            local_path,
            status,
        }
    }

    async fn fetch_to(&self, url: &str, local_path: &Path) -> HarvestResult<AssetStatus> {
        if tokio::fs::try_exists(local_path).await? {
            tracing::debug!("Skipped (exists): {}", local_path.display());
            return Ok(AssetStatus::SkippedExisting);
        }

        let resp = self.client.get_bytes(url).await?;
        if !resp.is_success() {
            return Err(HarvestError::Download(format!("HTTP {}", resp.status)));
        }
        if resp.is_text() {
            return Err(HarvestError::Download(format!(
                "unexpected content type {}",
                resp.content_type.as_deref().unwrap_or_default()
            )));
        }
        if resp.body.is_empty() {
            return Err(HarvestError::Download("empty response body".into()));
        }

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(local_path);
        tokio::fs::write(&partial, &resp.body).await?;
        tokio::fs::rename(&partial, local_path).await?;

        tracing::debug!(
            "Downloaded {} ({} bytes) to {}",
            resp.final_url,
            resp.body.len(),
            local_path.display()
        );
        Ok(AssetStatus::Downloaded)
    }

    /// Materialize every reference with bounded parallelism.
    ///
    /// Returns exactly one record per reference, in input order. References not
    /// yet started when `cancel` fires are recorded as failed.
    pub async fn download_all(
        &self,
        references: &[AssetReference],
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Vec<AssetRecord> {
        tracing::info!(
            "Downloading {} assets to {} ({} concurrent)",
            references.len(),
            destination.display(),
            self.concurrency
        );

        let records: Vec<AssetRecord> = stream::iter(references)
            .map(move |reference| async move {
                if cancel.is_cancelled() {
                    return AssetRecord {
                        reference: reference.clone(),
                        local_path: destination.join(reference.file_name()),
                        status: AssetStatus::Failed {
                            reason: HarvestError::Cancelled.to_string(),
                        },
                    };
                }
                self.download(reference, destination).await
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed = records.iter().filter(|r| r.status.is_failed()).count();
        let skipped = records
            .iter()
            .filter(|r| r.status == AssetStatus::SkippedExisting)
            .count();
        tracing::info!(
            "Downloads complete: {} new, {skipped} skipped, {failed} failed",
            records.len() - failed - skipped
        );
        records
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}
