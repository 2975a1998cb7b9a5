//! Web pipeline end to end: a fake browser serving static HTML, a mock image server.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use card_harvest::renderer::NavigationResult;
use card_harvest::{
    harvest_web, AssetStatus, Downloader, FieldValue, HarvestConfig, HarvestError,
    HarvestResult, HttpClient, RenderContext, Renderer,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HEAD_ICON: &str = r#"<svg viewBox="0 0 20 20"><path d="M2 2h16v16H2z"></path></svg>"#;
const BODY_ICON: &str = r#"<svg viewBox="0 0 20 20"><circle cx="10" cy="10" r="8"></circle></svg>"#;

fn item(code: &str, name: &str, cost: &str, icon: &str) -> String {
    format!(
        r#"<div class="overlay-card">
  <p class="name">{name}</p><p class="cost">{cost}</p><p class="code">{code}</p>
  <div class="equip-slot"><svg class="icon">{icon}</svg></div>
  <svg class="fs_image"><image href="/img/items/{code}.png"></image></svg>
</div>"#
    )
}

fn catalog_page() -> String {
    format!(
        "<html><body>{}{}{}{}</body></html>",
        item("001", "Boots of Striding", "20", HEAD_ICON),
        item("002", "Cloak", "??", BODY_ICON),
        item("003", "Helm", "35", HEAD_ICON),
        item("004", "Ring", "10", BODY_ICON),
    )
}

/// Shared observations of everything the fake browser did.
#[derive(Default)]
struct Journal {
    opened: AtomicUsize,
    closed: AtomicUsize,
    measures: AtomicUsize,
    scripts: Mutex<Vec<String>>,
}

struct FakePage {
    html: String,
    /// Successive scroll heights; the last repeats.
    heights: Vec<u64>,
    journal: Arc<Journal>,
}

#[async_trait]
impl RenderContext for FakePage {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> HarvestResult<NavigationResult> {
        Ok(NavigationResult {
            final_url: url.to_string(),
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, script: &str) -> HarvestResult<serde_json::Value> {
        self.journal.scripts.lock().unwrap().push(script.to_string());
        if script == "document.body.scrollHeight" {
            let i = self.journal.measures.fetch_add(1, Ordering::SeqCst);
            let h = self.heights[i.min(self.heights.len() - 1)];
            return Ok(serde_json::json!(h));
        }
        Ok(serde_json::json!(true))
    }

    async fn get_html(&self) -> HarvestResult<String> {
        Ok(self.html.clone())
    }

    async fn close(self: Box<Self>) -> HarvestResult<()> {
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeBrowser {
    html: String,
    heights: Vec<u64>,
    journal: Arc<Journal>,
}

impl FakeBrowser {
    fn new(heights: Vec<u64>) -> Self {
        Self {
            html: catalog_page(),
            heights,
            journal: Arc::default(),
        }
    }
}

#[async_trait]
impl Renderer for FakeBrowser {
    async fn new_context(&self) -> HarvestResult<Box<dyn RenderContext>> {
        self.journal.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            html: self.html.clone(),
            heights: self.heights.clone(),
            journal: Arc::clone(&self.journal),
        }))
    }

    async fn shutdown(&self) -> HarvestResult<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.journal.opened.load(Ordering::SeqCst) - self.journal.closed.load(Ordering::SeqCst)
    }
}

fn config(server: &MockServer, out: &Path, on_timeout: &str) -> HarvestConfig {
    let text = format!(
        r#"
[download]
concurrency = 2
retries = 0

[saturation]
max_rounds = 3
settle_delay_ms = 0
on_timeout = "{on_timeout}"

[web]
output_root = "{out}"

[web.profiles.items]
wait_for = "div.overlay-card"
initial_delay_ms = 0
discovery = {{ container = "div.overlay-card", image = "svg.fs_image image", naming = {{ fields = ["p.code", "p.name"] }} }}
icons = {{ field = "equip_slot_icon", category = "equip_slot_icons" }}

[[web.profiles.items.fields]]
name = "name"
selector = "p.name"

[[web.profiles.items.fields]]
name = "code"
selector = "p.code"

[[web.profiles.items.fields]]
name = "cost"
selector = "p.cost"
kind = "integer"
min = 0

[[web.profiles.items.fields]]
name = "equip_slot_icon"
selector = "div.equip-slot svg.icon > svg"
kind = "markup"

[[web.targets]]
name = "Items"
url = "{uri}/items"
profile = "items"
"#,
        out = out.display(),
        uri = server.uri(),
    );
    HarvestConfig::from_toml(&text).unwrap()
}

async fn image_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/items/004.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/items/\d+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG-ish".to_vec()))
        .mount(&server)
        .await;
    server
}

fn downloader(config: &HarvestConfig) -> Downloader {
    let client = HttpClient::new(&config.download, None).unwrap();
    Downloader::new(client, config.download.concurrency)
}

async fn image_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path().starts_with("/img/"))
        .count()
}

#[tokio::test]
async fn test_items_manifest_end_to_end() {
    let server = image_server().await;
    let out = tempfile::tempdir().unwrap();
    let config = config(&server, out.path(), "proceed");
    let browser = FakeBrowser::new(vec![1_000, 2_000, 2_000]);

    let manifest = harvest_web(
        &browser,
        &downloader(&config),
        &config,
        &config.web.targets[0],
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(browser.journal.closed.load(Ordering::SeqCst), 1);
    assert_eq!(browser.active_contexts(), 0);
    assert_eq!(browser.journal.measures.load(Ordering::SeqCst), 3);
    let scripts = browser.journal.scripts.lock().unwrap().clone();
    assert!(scripts.last().unwrap().contains("scrollTo(0, 0)"));

    // Discovery order survives to the manifest.
    let ids: Vec<&str> = manifest.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(
        ids,
        ["001_Boots_of_Striding", "002_Cloak", "003_Helm", "004_Ring"]
    );

    // Two distinct icons, shared across the four items.
    let icons = manifest.icons.as_ref().unwrap();
    assert_eq!(icons.len(), 2);
    assert!(icons.get(0).unwrap().contains("M2 2h16v16H2z"));
    assert!(icons.get(1).unwrap().contains("<circle"));
    let icon_ids: Vec<&FieldValue> = manifest
        .entries
        .iter()
        .map(|e| e.fields.get("equip_slot_icon").unwrap())
        .collect();
    assert_eq!(
        icon_ids,
        [
            &FieldValue::Icon(0),
            &FieldValue::Icon(1),
            &FieldValue::Icon(0),
            &FieldValue::Icon(1)
        ]
    );

    // Unparseable cost is unknown, not a failure.
    assert_eq!(manifest.entries[1].fields.get("cost"), Some(&FieldValue::Unknown));
    assert_eq!(manifest.entries[2].fields.get("cost"), Some(&FieldValue::Integer(35)));

    // One failed download, isolated.
    assert!(manifest.entries[3].status.is_failed());
    assert!(manifest.entries[3].local_path.is_none());
    let items = out.path().join("Items");
    assert!(items.join("001_Boots_of_Striding.png").exists());
    assert!(!items.join("004_Ring.png").exists());

    let summary = manifest.summary();
    assert_eq!(summary.records, 4);
    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.failed, 1);
    assert!(summary.has_failures());

    let json = serde_json::to_value(&manifest).unwrap();
    assert_eq!(json["equip_slot_icons"].as_array().unwrap().len(), 2);
    assert_eq!(json["items"][0]["name"], "Boots of Striding");
    assert_eq!(json["items"][0]["cost"], 20);
    assert_eq!(json["items"][1]["cost"], serde_json::Value::Null);
    assert_eq!(json["items"][3]["local_image"], serde_json::Value::Null);
    assert_eq!(
        json["items"][2]["image_url"],
        format!("{}/img/items/003.png", server.uri())
    );
}

#[tokio::test]
async fn test_rerun_only_retries_missing_assets() {
    let server = image_server().await;
    let out = tempfile::tempdir().unwrap();
    let config = config(&server, out.path(), "proceed");
    let target = &config.web.targets[0];
    let cancel = CancellationToken::new();

    let first = harvest_web(
        &FakeBrowser::new(vec![500]),
        &downloader(&config),
        &config,
        target,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(first.summary().downloaded, 3);
    assert_eq!(image_requests(&server).await, 4);

    let second = harvest_web(
        &FakeBrowser::new(vec![500]),
        &downloader(&config),
        &config,
        target,
        &cancel,
    )
    .await
    .unwrap();
    let statuses: Vec<&AssetStatus> = second.entries.iter().map(|e| &e.status).collect();
    assert_eq!(statuses[0], &AssetStatus::SkippedExisting);
    assert_eq!(statuses[2], &AssetStatus::SkippedExisting);
    assert!(statuses[3].is_failed());
    // Only the previously failed asset was requested again.
    assert_eq!(image_requests(&server).await, 5);
    assert_eq!(first.icons, second.icons);
}

#[tokio::test]
async fn test_abort_policy_fails_run_and_releases_page() {
    let server = image_server().await;
    let out = tempfile::tempdir().unwrap();
    let config = config(&server, out.path(), "abort");
    let browser = FakeBrowser::new(vec![100, 200, 300, 400, 500, 600]);

    let err = harvest_web(
        &browser,
        &downloader(&config),
        &config,
        &config.web.targets[0],
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HarvestError::SaturationTimeout { rounds: 3, .. }));
    assert_eq!(browser.journal.closed.load(Ordering::SeqCst), 1);
    assert_eq!(browser.active_contexts(), 0);
    assert_eq!(image_requests(&server).await, 0);
}

#[tokio::test]
async fn test_proceed_policy_keeps_loaded_content() {
    let server = image_server().await;
    let out = tempfile::tempdir().unwrap();
    let config = config(&server, out.path(), "proceed");
    let browser = FakeBrowser::new(vec![100, 200, 300, 400, 500, 600]);

    let manifest = harvest_web(
        &browser,
        &downloader(&config),
        &config,
        &config.web.targets[0],
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(manifest.len(), 4);
    assert_eq!(browser.journal.closed.load(Ordering::SeqCst), 1);
    assert_eq!(browser.active_contexts(), 0);
}

#[tokio::test]
async fn test_cancelled_run_releases_page() {
    let server = image_server().await;
    let out = tempfile::tempdir().unwrap();
    let config = config(&server, out.path(), "proceed");
    let browser = FakeBrowser::new(vec![500]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harvest_web(
        &browser,
        &downloader(&config),
        &config,
        &config.web.targets[0],
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HarvestError::Cancelled));
    assert_eq!(browser.journal.closed.load(Ordering::SeqCst), 1);
    assert_eq!(browser.active_contexts(), 0);
    assert_eq!(image_requests(&server).await, 0);
}
