//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide), so the
//! activation and saturation logic can run against a fake page in tests.

pub mod chromium;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::HarvestResult;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> HarvestResult<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> HarvestResult<()>;
    /// Number of currently open contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL and wait for the load event, bounded by a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> HarvestResult<NavigationResult>;
    /// Evaluate a JavaScript expression in the page and return its value.
    async fn execute_js(&self, script: &str) -> HarvestResult<serde_json::Value>;
    /// Serialized DOM of the current page.
    async fn get_html(&self) -> HarvestResult<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> HarvestResult<()>;
}
