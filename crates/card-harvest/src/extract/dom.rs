//! DOM strategy: fields read from sub-elements of the discovered node.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use super::{AssetInput, FieldExtractor, ValidRange};
use crate::types::{FieldRecord, FieldValue, HarvestError, HarvestResult};

/// How an element's content becomes a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Trimmed text content.
    #[default]
    Text,
    /// Trimmed text, parsed and range-checked.
    Integer,
    /// Outer HTML of the element.
    Markup,
}

/// One named field of the DOM strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomField {
    pub name: String,
    /// Sub-element inside the container; the container itself when absent.
    #[serde(default)]
    pub selector: Option<String>,
    /// Read this attribute instead of the text.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

impl DomField {
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: Some(selector.into()),
            attribute: None,
            kind: FieldKind::Text,
            min: None,
            max: None,
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn range(&self) -> ValidRange {
        ValidRange {
            min: self.min,
            max: self.max,
        }
    }
}

struct CompiledField {
    field: DomField,
    selector: Option<Selector>,
}

/// Reads [`DomField`]s out of each asset's DOM fragment.
pub struct DomExtractor {
    fields: Vec<CompiledField>,
}

impl DomExtractor {
    /// Compile every field selector up front.
    pub fn new(fields: &[DomField]) -> HarvestResult<Self> {
        let fields = fields
            .iter()
            .map(|field| {
                let selector = field
                    .selector
                    .as_deref()
                    .map(|s| {
                        Selector::parse(s)
                            .map_err(|e| HarvestError::InvalidSelector(format!("{s}: {e}")))
                    })
                    .transpose()?;
                Ok(CompiledField {
                    field: field.clone(),
                    selector,
                })
            })
            .collect::<HarvestResult<Vec<_>>>()?;
        Ok(Self { fields })
    }

    fn read(&self, root: ElementRef<'_>, compiled: &CompiledField) -> FieldValue {
        let field = &compiled.field;
        let element = match &compiled.selector {
            Some(sel) => match root.select(sel).next() {
                Some(el) => el,
                None => return FieldValue::Unknown,
            },
            None => root,
        };

        if field.kind == FieldKind::Markup && field.attribute.is_none() {
            return FieldValue::Markup(element.html());
        }

        let raw = match &field.attribute {
            Some(attr) => element.value().attr(attr).unwrap_or("").to_string(),
            None => element.text().collect::<String>(),
        };
        let text = raw.trim();
        if text.is_empty() {
            return FieldValue::Unknown;
        }

        match field.kind {
            FieldKind::Text => FieldValue::Text(text.to_string()),
            FieldKind::Markup => FieldValue::Markup(text.to_string()),
            FieldKind::Integer => match field.range().accept(&field.name, text) {
                Ok(n) => FieldValue::Integer(n),
                Err(e) => {
                    tracing::debug!("{e}");
                    FieldValue::Unknown
                }
            },
        }
    }
}

impl FieldExtractor for DomExtractor {
    fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.name.as_str()).collect()
    }

    fn extract(&mut self, asset: &AssetInput<'_>) -> FieldRecord {
        let Some(fragment) = asset.reference.fragment.as_deref() else {
            tracing::warn!(
                "No DOM fragment for asset {}, fields unknown",
                asset.reference.index
            );
            return FieldRecord::unknown(self.field_names(), "no DOM fragment");
        };

        let html = Html::parse_fragment(fragment);
        // parse_fragment wraps the content in an <html> element; the node is its first child element.
        let root = html
            .root_element()
            .children()
            .find_map(ElementRef::wrap)
            .unwrap_or_else(|| html.root_element());

        let mut record = FieldRecord::new();
        for compiled in &self.fields {
            record.push(compiled.field.name.clone(), self.read(root, compiled));
        }
        record
    }
}
