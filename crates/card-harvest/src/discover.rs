//! Asset discovery over a saturated DOM snapshot.
//!
//! Discovery is a pure read: the session hands over its serialized DOM and
//! everything else happens on the parsed document, so the same rules can be
//! tested against static HTML.

use std::collections::HashSet;
use std::path::Path;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::activator::Session;
use crate::types::{url_extension, AssetReference, HarvestError, HarvestResult, INDEX_PAD_WIDTH};

/// Extension for names generated from fields when the URL has none.
const FIELDS_NAME_EXTENSION: &str = ".webp";

/// Which elements carry assets, and how to name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    /// One match per candidate asset.
    pub container: String,
    /// Element inside the container holding the URL; the container itself when absent.
    #[serde(default)]
    pub image: Option<String>,
    /// Attributes tried in order for the URL.
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,
    /// Keep only URLs containing this substring.
    #[serde(default)]
    pub url_contains: Option<String>,
    #[serde(default)]
    pub naming: NameRule,
}

fn default_attributes() -> Vec<String> {
    vec!["src".into(), "href".into(), "xlink:href".into()]
}

impl MatchRule {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            image: None,
            attributes: default_attributes(),
            url_contains: None,
            naming: NameRule::Url,
        }
    }
}

/// How a suggested file name is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameRule {
    /// Last segment of the URL path.
    #[default]
    Url,
    /// Text of these sub-selectors, joined with `_`.
    Fields(Vec<String>),
}

/// Discover assets in a live session.
pub async fn discover(session: &Session, rule: &MatchRule) -> HarvestResult<Vec<AssetReference>> {
    let html = session.html().await?;
    let base = Url::parse(session.address()).ok();
    let references = discover_in_html(&html, base.as_ref(), rule)?;
    tracing::info!(
        "Discovered {} assets matching {:?} on {}",
        references.len(),
        rule.container,
        session.address()
    );
    Ok(references)
}

/// Discover assets in an HTML document, in document order.
pub fn discover_in_html(
    html: &str,
    base: Option<&Url>,
    rule: &MatchRule,
) -> HarvestResult<Vec<AssetReference>> {
    let container = parse_selector(&rule.container)?;
    let image = rule.image.as_deref().map(parse_selector).transpose()?;
    let name_selectors = match &rule.naming {
        NameRule::Url => Vec::new(),
        NameRule::Fields(selectors) => selectors
            .iter()
            .map(|s| parse_selector(s))
            .collect::<HarvestResult<Vec<_>>>()?,
    };

    let document = Html::parse_document(html);
    let mut references = Vec::new();
    let mut taken: HashSet<String> = HashSet::new();

    for node in document.select(&container) {
        let holder = match &image {
            Some(sel) => match node.select(sel).next() {
                Some(el) => el,
                None => continue,
            },
            None => node,
        };

        let Some(raw) = rule
            .attributes
            .iter()
            .find_map(|attr| holder.value().attr(attr))
            .map(str::trim)
            .filter(|v| !v.is_empty())
        else {
            continue;
        };

        let Some(url) = resolve(raw, base) else {
            tracing::debug!("Skipping unresolvable asset URL {raw:?}");
            continue;
        };

        if let Some(needle) = &rule.url_contains {
            if !url.contains(needle.as_str()) {
                continue;
            }
        }

        let index = references.len();
        let suggested = match &rule.naming {
            NameRule::Url => name_from_url(&url),
            NameRule::Fields(_) => name_from_fields(node, &name_selectors, &url),
        };

        let mut reference = AssetReference {
            index,
            url,
            suggested_name: suggested,
            fragment: Some(node.html()),
        };

        let file_name = reference.file_name();
        if !taken.insert(file_name.clone()) {
            let mut deduped = suffix_with_index(&file_name, index);
            while !taken.insert(deduped.clone()) {
                deduped = suffix_with_index(&deduped, index);
            }
            tracing::debug!("File name {file_name} already taken, using {deduped}");
            reference.suggested_name = Some(deduped);
        }

        references.push(reference);
    }

    Ok(references)
}

fn parse_selector(selector: &str) -> HarvestResult<Selector> {
    Selector::parse(selector).map_err(|e| HarvestError::InvalidSelector(format!("{selector}: {e}")))
}

fn resolve(raw: &str, base: Option<&Url>) -> Option<String> {
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(raw).ok()).map(|u| u.to_string())
        }
        Err(_) => None,
    }
}

fn name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let name = sanitize(segment, true);
    if name.is_empty() || name.starts_with('.') {
        None
    } else {
        Some(name)
    }
}

fn name_from_fields(node: ElementRef<'_>, selectors: &[Selector], url: &str) -> Option<String> {
    let parts: Vec<String> = selectors
        .iter()
        .filter_map(|sel| node.select(sel).next())
        .map(|el| sanitize(el.text().collect::<String>().trim(), false))
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        return None;
    }

    let ext = url_extension(url).unwrap_or_else(|| FIELDS_NAME_EXTENSION.to_string());
    Some(format!("{}{ext}", parts.join("_")))
}

/// Keep alphanumerics, `-` and `_` (and `.` for URL segments); spaces become `_`.
fn sanitize(raw: &str, keep_dots: bool) -> String {
    raw.chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            '.' if keep_dots => Some('.'),
            ' ' => Some('_'),
            _ => None,
        })
        .collect()
}

fn suffix_with_index(file_name: &str, index: usize) -> String {
    let path = Path::new(file_name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{index:0width$}.{ext}", width = INDEX_PAD_WIDTH),
        None => format!("{stem}_{index:0width$}", width = INDEX_PAD_WIDTH),
    }
}
