//! The run's output: one entry per asset, in discovery order, plus the icon index.

use std::fmt;
use std::path::PathBuf;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::index::IconIndex;
use crate::types::{AssetRecord, AssetStatus, FieldRecord, HarvestError, HarvestResult};

/// Key of the item list in the nested manifest.
pub const ITEMS_KEY: &str = "items";

/// Header of the source-path column in the tabular manifest.
pub const FILE_COLUMN: &str = "file";

/// One asset and what was learned about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// File stem of the materialized asset.
    pub id: String,
    pub source_url: String,
    /// Absent when the asset is not on disk.
    pub local_path: Option<PathBuf>,
    pub status: AssetStatus,
    pub fields: FieldRecord,
}

impl ManifestEntry {
    pub fn is_incomplete(&self) -> bool {
        self.fields.is_incomplete() || self.fields.failure.is_some()
    }
}

/// Ordered entries and, for web targets with icons, the shared index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub icons: Option<IconIndex>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Pair each asset record with its field record, positionally.
    pub fn assemble(
        assets: Vec<AssetRecord>,
        records: Vec<FieldRecord>,
        icons: Option<IconIndex>,
    ) -> HarvestResult<Self> {
        if assets.len() != records.len() {
            return Err(HarvestError::Extraction(format!(
                "{} assets but {} field records",
                assets.len(),
                records.len()
            )));
        }

        let entries = assets
            .into_iter()
            .zip(records)
            .map(|(asset, fields)| ManifestEntry {
                id: asset.reference.stem(),
                source_url: asset.reference.url,
                local_path: asset.status.is_available().then_some(asset.local_path),
                status: asset.status,
                fields,
            })
            .collect();

        Ok(Self { icons, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header and cell rows: identifier, every field, then the local file.
    pub fn to_rows(&self, id_column: &str) -> (Vec<String>, Vec<Vec<String>>) {
        let mut header = vec![id_column.to_string()];
        if let Some(first) = self.entries.first() {
            header.extend(first.fields.fields.iter().map(|f| f.name.clone()));
        }
        header.push(FILE_COLUMN.to_string());

        let rows = self
            .entries
            .iter()
            .map(|entry| {
                let mut row = Vec::with_capacity(header.len());
                row.push(entry.id.clone());
                row.extend(entry.fields.fields.iter().map(|f| f.value.to_cell()));
                row.push(
                    entry
                        .local_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                );
                row
            })
            .collect();

        (header, rows)
    }

    pub fn summary(&self) -> ManifestSummary {
        let mut summary = ManifestSummary {
            records: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.status {
                AssetStatus::Downloaded => summary.downloaded += 1,
                AssetStatus::SkippedExisting => summary.skipped += 1,
                AssetStatus::Failed { .. } => summary.failed += 1,
            }
            if entry.is_incomplete() {
                summary.incomplete += 1;
            }
            if entry.fields.failure.is_some() {
                summary.extraction_failures += 1;
            }
        }
        summary
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestSummary {
    pub records: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub incomplete: usize,
    pub extraction_failures: usize,
}

impl ManifestSummary {
    /// Some asset could not be downloaded or read at all.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.extraction_failures > 0
    }
}

impl fmt::Display for ManifestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records={} downloaded={} skipped={} failed={} incomplete={}",
            self.records, self.downloaded, self.skipped, self.failed, self.incomplete
        )
    }
}

struct Item<'a>(&'a ManifestEntry);

impl Serialize for Item<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entry = self.0;
        let mut map = serializer.serialize_map(Some(entry.fields.fields.len() + 2))?;
        for field in &entry.fields.fields {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.serialize_entry("image_url", &entry.source_url)?;
        map.serialize_entry(
            "local_image",
            &entry.local_path.as_ref().map(|p| p.display().to_string()),
        )?;
        map.end()
    }
}

struct Items<'a>(&'a [ManifestEntry]);

impl Serialize for Items<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for entry in self.0 {
            seq.serialize_element(&Item(entry))?;
        }
        seq.end()
    }
}

/// `{ "<icon category>": [payload, ...], "items": [...] }`
impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.icons.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(icons) = &self.icons {
            map.serialize_entry(icons.category(), icons.entries())?;
        }
        map.serialize_entry(ITEMS_KEY, &Items(&self.entries))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build_index;
    use crate::types::{AssetReference, FieldValue};

    fn asset(index: usize, status: AssetStatus) -> AssetRecord {
        AssetRecord {
            reference: AssetReference {
                index,
                url: format!("https://cards.test/items/{index:03}.webp"),
                suggested_name: Some(format!("{index:03}_item.webp")),
                fragment: None,
            },
            local_path: PathBuf::from(format!("images/Items/{index:03}_item.webp")),
            status,
        }
    }

    fn fields(name: &str, icon: &str) -> FieldRecord {
        let mut r = FieldRecord::new();
        r.push("name", FieldValue::Text(name.into()));
        r.push("equip_slot_icon", FieldValue::Markup(icon.into()));
        r
    }

    #[test]
    fn test_nested_json_layout() {
        let (icons, records) = build_index(
            vec![fields("Boots", "<svg>a</svg>"), fields("Cloak", "<svg>a</svg>")],
            "equip_slot_icon",
            "equip_slot_icons",
        );
        let manifest = Manifest::assemble(
            vec![
                asset(1, AssetStatus::Downloaded),
                asset(2, AssetStatus::Failed {
                    reason: "HTTP 404".into(),
                }),
            ],
            records,
            Some(icons),
        )
        .unwrap();

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "equip_slot_icons": ["<svg>a</svg>"],
                "items": [
                    {
                        "name": "Boots",
                        "equip_slot_icon": 0,
                        "image_url": "https://cards.test/items/001.webp",
                        "local_image": "images/Items/001_item.webp"
                    },
                    {
                        "name": "Cloak",
                        "equip_slot_icon": 0,
                        "image_url": "https://cards.test/items/002.webp",
                        "local_image": null
                    }
                ]
            })
        );
        let keys: Vec<&String> = json["items"][0].as_object().unwrap().keys().collect();
        assert_eq!(keys, ["name", "equip_slot_icon", "image_url", "local_image"]);
    }

    #[test]
    fn test_no_icon_category_without_index() {
        let manifest = Manifest::assemble(
            vec![asset(0, AssetStatus::SkippedExisting)],
            vec![FieldRecord::new()],
            None,
        )
        .unwrap();
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert!(json["items"].is_array());
    }

    #[test]
    fn test_rows() {
        let mut record = FieldRecord::new();
        record.push("level", FieldValue::Integer(3));
        record.push("initiative", FieldValue::Unknown);
        let manifest = Manifest::assemble(
            vec![asset(7, AssetStatus::SkippedExisting)],
            vec![record],
            None,
        )
        .unwrap();

        let (header, rows) = manifest.to_rows("card_name");
        assert_eq!(header, ["card_name", "level", "initiative", "file"]);
        assert_eq!(
            rows,
            vec![vec![
                "007_item".to_string(),
                "3".to_string(),
                String::new(),
                "images/Items/007_item.webp".to_string()
            ]]
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Manifest::assemble(vec![asset(0, AssetStatus::Downloaded)], vec![], None);
        assert!(matches!(err, Err(HarvestError::Extraction(_))));
    }

    #[test]
    fn test_summary() {
        let mut unknown = FieldRecord::new();
        unknown.push("level", FieldValue::Unknown);
        let manifest = Manifest::assemble(
            vec![
                asset(0, AssetStatus::Downloaded),
                asset(1, AssetStatus::SkippedExisting),
                asset(2, AssetStatus::Failed {
                    reason: "HTTP 500".into(),
                }),
            ],
            vec![
                FieldRecord::new(),
                unknown,
                FieldRecord::unknown(["level"], "no local image"),
            ],
            None,
        )
        .unwrap();

        let summary = manifest.summary();
        assert_eq!(
            summary,
            ManifestSummary {
                records: 3,
                downloaded: 1,
                skipped: 1,
                failed: 1,
                incomplete: 2,
                extraction_failures: 1,
            }
        );
        assert!(summary.has_failures());
        assert_eq!(
            summary.to_string(),
            "records=3 downloaded=1 skipped=1 failed=1 incomplete=2"
        );
    }
}
