//! Deduplication of recurring sub-resources (icons) across records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{FieldRecord, FieldValue};

/// Which field holds the icon payload, and the manifest key its index lives under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconSettings {
    pub field: String,
    pub category: String,
}

/// Ordered set of distinct payloads; ids are positions, first seen first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconIndex {
    category: String,
    entries: Vec<String>,
    ids: HashMap<String, usize>,
}

impl IconIndex {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Id of `payload`, adding it if its canonical form is new.
    pub fn intern(&mut self, payload: &str) -> usize {
        let key = canonical_form(payload);
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = self.entries.len();
        self.entries.push(payload.to_string());
        self.ids.insert(key.to_string(), id);
        id
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Equality key for payloads: surrounding whitespace trimmed, otherwise verbatim.
pub fn canonical_form(payload: &str) -> &str {
    payload.trim()
}

/// Replace each record's `field` payload with its index id.
///
/// Unknown or non-markup values become unknown, as do ids from an earlier
/// index. Deterministic in record order.
pub fn build_index(
    records: Vec<FieldRecord>,
    field: &str,
    category: &str,
) -> (IconIndex, Vec<FieldRecord>) {
    let mut index = IconIndex::new(category);

    let records = records
        .into_iter()
        .map(|mut record| {
            if let Some(value) = record.get_mut(field) {
                *value = match std::mem::replace(value, FieldValue::Unknown) {
                    FieldValue::Markup(payload) | FieldValue::Text(payload) => {
                        FieldValue::Icon(index.intern(&payload))
                    }
                    FieldValue::Integer(_) | FieldValue::Icon(_) | FieldValue::Unknown => {
                        FieldValue::Unknown
                    }
                };
            }
            record
        })
        .collect();

    tracing::info!(
        "Indexed {} distinct {category} entries from field {field}",
        index.len()
    );
    (index, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(icon: FieldValue) -> FieldRecord {
        let mut r = FieldRecord::new();
        r.push("name", FieldValue::Text("x".into()));
        r.push("equip_slot_icon", icon);
        r
    }

    fn svg(s: &str) -> FieldValue {
        FieldValue::Markup(s.to_string())
    }

    #[test]
    fn test_identical_payloads_share_ids() {
        let records = vec![
            record(svg("<svg><path d=\"A\"/></svg>")),
            record(svg("<svg><path d=\"B\"/></svg>")),
            record(svg("<svg><path d=\"A\"/></svg>")),
            record(svg("<svg><path d=\"C\"/></svg>")),
        ];
        let (index, records) = build_index(records, "equip_slot_icon", "equip_slot_icons");

        let ids: Vec<&FieldValue> = records
            .iter()
            .map(|r| r.get("equip_slot_icon").unwrap())
            .collect();
        assert_eq!(
            ids,
            [
                &FieldValue::Icon(0),
                &FieldValue::Icon(1),
                &FieldValue::Icon(0),
                &FieldValue::Icon(2)
            ]
        );
        assert_eq!(index.len(), 3);
        assert_eq!(index.get(1), Some("<svg><path d=\"B\"/></svg>"));
        assert_eq!(index.category(), "equip_slot_icons");
    }

    #[test]
    fn test_two_pairs_yield_two_entries() {
        let head = "<svg><path d=\"head\"/></svg>";
        let body = "<svg><path d=\"body\"/></svg>";
        let records = vec![
            record(svg(head)),
            record(svg(body)),
            record(svg(head)),
            record(svg(body)),
        ];
        let (index, records) = build_index(records, "equip_slot_icon", "equip_slot_icons");
        assert_eq!(index.entries(), [head.to_string(), body.to_string()]);
        assert_eq!(records[2].get("equip_slot_icon"), Some(&FieldValue::Icon(0)));
        assert_eq!(records[3].get("equip_slot_icon"), Some(&FieldValue::Icon(1)));
    }

    #[test]
    fn test_canonical_form_trims_edges() {
        let mut index = IconIndex::new("icons");
        assert_eq!(index.intern("<svg/>"), 0);
        assert_eq!(index.intern("  <svg/>\n"), 0);
        assert_eq!(index.intern("<svg />"), 1);
    }

    #[test]
    fn test_unknown_stays_unknown() {
        let records = vec![record(FieldValue::Unknown), record(svg("<svg/>"))];
        let (index, records) = build_index(records, "equip_slot_icon", "icons");
        assert_eq!(records[0].get("equip_slot_icon"), Some(&FieldValue::Unknown));
        assert_eq!(records[1].get("equip_slot_icon"), Some(&FieldValue::Icon(0)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_foreign_ids_are_not_carried_over() {
        let records = vec![record(FieldValue::Icon(7)), record(svg("<svg/>"))];
        let (index, records) = build_index(records, "equip_slot_icon", "icons");
        assert_eq!(index.len(), 1);
        assert_eq!(records[0].get("equip_slot_icon"), Some(&FieldValue::Unknown));
        assert_eq!(records[1].get("equip_slot_icon"), Some(&FieldValue::Icon(0)));
    }

    #[test]
    fn test_deterministic() {
        let make = || {
            vec![
                record(svg("b")),
                record(svg("a")),
                record(svg("b")),
            ]
        };
        let (first, a) = build_index(make(), "equip_slot_icon", "icons");
        let (second, b) = build_index(make(), "equip_slot_icon", "icons");
        assert_eq!(first, second);
        assert_eq!(a, b);
    }
}
