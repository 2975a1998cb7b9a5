//! Local image trees: category folders of card images already on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::extract::{AssetInput, FieldExtractor};
use crate::manifest::Manifest;
use crate::types::{AssetRecord, AssetReference, AssetStatus, HarvestError, HarvestResult};

/// Extensions treated as card images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub fn is_supported_format(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn scan_images(dir: &Path) -> HarvestResult<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported_format(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Category folders under `root`, sorted; the root itself when it has none.
pub fn categories(root: &Path) -> HarvestResult<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(HarvestError::Config(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    if dirs.is_empty() {
        Ok(vec![root.to_path_buf()])
    } else {
        Ok(dirs)
    }
}

fn category_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

/// `{ "<folder>": [card stems...] }` for every non-empty category.
pub fn catalog(root: &Path) -> HarvestResult<BTreeMap<String, Vec<String>>> {
    let mut listing = BTreeMap::new();
    for dir in categories(root)? {
        let name = category_name(&dir);
        let stems: Vec<String> = scan_images(&dir)?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        if stems.is_empty() {
            tracing::warn!("No images in {}, skipping", dir.display());
            continue;
        }
        tracing::debug!("{name}: {} cards", stems.len());
        listing.insert(name, stems);
    }
    tracing::info!("Cataloged {} folders under {}", listing.len(), root.display());
    Ok(listing)
}

/// Asset records for every image under `root`, in category then name order.
pub fn local_assets(root: &Path) -> HarvestResult<Vec<AssetRecord>> {
    let mut assets = Vec::new();
    for dir in categories(root)? {
        let images = scan_images(&dir)?;
        if images.is_empty() {
            tracing::warn!("No images in {}, skipping", dir.display());
            continue;
        }
        for path in images {
            let reference = AssetReference {
                index: assets.len(),
                url: path.display().to_string(),
                suggested_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                fragment: None,
            };
            assets.push(AssetRecord {
                reference,
                local_path: path,
                status: AssetStatus::SkippedExisting,
            });
        }
    }
    Ok(assets)
}

/// Run an extractor over every image under `root`.
pub fn harvest_local<E: FieldExtractor + ?Sized>(
    root: &Path,
    extractor: &mut E,
    cancel: &CancellationToken,
) -> HarvestResult<Manifest> {
    let assets = local_assets(root)?;
    tracing::info!("Scanning {} images under {}", assets.len(), root.display());

    let mut records = Vec::with_capacity(assets.len());
    for asset in &assets {
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }
        records.push(extractor.extract(&AssetInput::from_record(asset)));
    }

    let manifest = Manifest::assemble(assets, records, None)?;
    tracing::info!("Scanned {}: {}", root.display(), manifest.summary());
    Ok(manifest)
}
