//! Content activation: navigate, wait for readiness, and drive the page's
//! interactive control so the full data set is rendered.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{Interaction, Measure, PageProfile, SaturationSettings};
use crate::renderer::{RenderContext, Renderer};
use crate::saturation::{
    run_tracker, sleep_or_cancel, PageProbe, Saturation, SaturationState, SaturationTracker,
    SCROLL_TO_TOP_JS,
};
use crate::types::{HarvestError, HarvestResult};

/// Poll interval while waiting for a readiness selector.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do to a page before reading it.
#[derive(Debug, Clone, Default)]
pub struct ActivationConfig {
    pub navigation_timeout_ms: u64,
    pub wait_for: Option<String>,
    pub wait_for_timeout_ms: u64,
    pub initial_delay_ms: u64,
    pub interaction: Option<Interaction>,
}

impl ActivationConfig {
    pub fn from_profile(profile: &PageProfile, navigation_timeout_ms: u64) -> Self {
        Self {
            navigation_timeout_ms,
            wait_for: profile.wait_for.clone(),
            wait_for_timeout_ms: profile.wait_for_timeout_ms,
            initial_delay_ms: profile.initial_delay_ms,
            interaction: profile.interaction.clone(),
        }
    }
}

/// One page bound to one target for the duration of a run.
pub struct Session {
    context: Box<dyn RenderContext>,
    address: String,
    tracker: SaturationTracker,
}

impl Session {
    /// The address the session was opened on (after redirects).
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn phase(&self) -> SaturationState {
        self.tracker.state()
    }

    /// Serialized DOM snapshot.
    pub async fn html(&self) -> HarvestResult<String> {
        self.context.get_html().await
    }

    pub async fn scroll_to_top(&self) -> HarvestResult<()> {
        self.context.execute_js(SCROLL_TO_TOP_JS).await?;
        Ok(())
    }

    /// Scroll until the measured content stops growing.
    pub async fn saturate(
        &mut self,
        measure: Measure,
        settings: &SaturationSettings,
        cancel: &CancellationToken,
    ) -> HarvestResult<Saturation> {
        self.tracker = SaturationTracker::new(settings.max_rounds);
        self.tracker.activate();
        let probe = PageProbe::new(self.context.as_ref(), measure);
        run_tracker(&mut self.tracker, &probe, settings, cancel).await
    }

    /// Release the page. Consumes the session so it cannot be used afterwards.
    pub async fn close(self) -> HarvestResult<()> {
        tracing::debug!("Closing session on {}", self.address);
        self.context.close().await
    }
}

/// Open a page and bring it into its activated state.
///
/// The page is closed again if activation fails, so a failed `open` never
/// leaks a tab.
pub async fn open(
    renderer: &dyn Renderer,
    address: &str,
    config: &ActivationConfig,
    cancel: &CancellationToken,
) -> HarvestResult<Session> {
    let context = renderer.new_context().await?;
    let mut session = Session {
        context,
        address: address.to_string(),
        tracker: SaturationTracker::new(1),
    };

    match activate(&mut session, config, cancel).await {
        Ok(()) => Ok(session),
        Err(e) => {
            if let Err(close_err) = session.close().await {
                tracing::warn!("Failed to close session after activation error: {close_err}");
            }
            Err(e)
        }
    }
}

async fn activate(
    session: &mut Session,
    config: &ActivationConfig,
    cancel: &CancellationToken,
) -> HarvestResult<()> {
    session.tracker.activate();

    let nav = session
        .context
        .navigate(&session.address, config.navigation_timeout_ms)
        .await?;
    tracing::info!("Loaded {} in {}ms", nav.final_url, nav.load_time_ms);
    session.address = nav.final_url;

    if let Some(selector) = &config.wait_for {
        wait_for_selector(
            session.context.as_ref(),
            selector,
            config.wait_for_timeout_ms,
            cancel,
        )
        .await?;
    }

    sleep_or_cancel(Duration::from_millis(config.initial_delay_ms), cancel).await?;

    if let Some(interaction) = &config.interaction {
        set_control(session.context.as_ref(), interaction).await?;
        tracing::info!(
            "Set {} to {}, waiting {}ms for content to update",
            interaction.selector,
            interaction.value,
            interaction.settle_delay_ms
        );
        sleep_or_cancel(Duration::from_millis(interaction.settle_delay_ms), cancel).await?;
    }

    Ok(())
}

/// Poll until `selector` matches an element.
pub async fn wait_for_selector(
    context: &dyn RenderContext,
    selector: &str,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> HarvestResult<()> {
    let check_js = format!(
        "document.querySelector({}) !== null",
        serde_json::to_string(selector)?
    );
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);

    while Instant::now() < deadline {
        let found = context.execute_js(&check_js).await?.as_bool().unwrap_or(false);
        if found {
            tracing::debug!("Element {selector} found");
            return Ok(());
        }
        sleep_or_cancel(WAIT_POLL_INTERVAL, cancel).await?;
    }

    Err(HarvestError::Timeout(format!(
        "element {selector} not found after {timeout_ms}ms"
    )))
}

/// Script that assigns a control's value through the native setter and fires
/// `input` then `change`. Evaluates to `false` when the control is missing.
pub fn set_control_script(selector: &str, value: &str) -> HarvestResult<String> {
    let selector = serde_json::to_string(selector)?;
    let value = serde_json::to_string(value)?;
    Ok(format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  let value = {value};
  if (value === "max" && el.max !== undefined && el.max !== "") value = el.max;
  const proto = el instanceof HTMLSelectElement ? HTMLSelectElement.prototype
    : el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype
    : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, "value").set;
  setter.call(el, value);
  el.dispatchEvent(new Event("input", {{ bubbles: true }}));
  el.dispatchEvent(new Event("change", {{ bubbles: true }}));
  return true;
}})()"#
    ))
}

async fn set_control(context: &dyn RenderContext, interaction: &Interaction) -> HarvestResult<()> {
    let script = set_control_script(&interaction.selector, &interaction.value)?;
    let found = context.execute_js(&script).await?.as_bool().unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(HarvestError::ControlNotFound {
            selector: interaction.selector.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NavigationResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A page that answers readiness checks and control scripts.
    struct FakePage {
        control_present: bool,
        ready_after_polls: usize,
        polls: AtomicUsize,
        scripts: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RenderContext for FakePage {
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> HarvestResult<NavigationResult> {
            Ok(NavigationResult {
                final_url: format!("{url}#loaded"),
                load_time_ms: 5,
            })
        }

        async fn execute_js(&self, script: &str) -> HarvestResult<serde_json::Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            if script.starts_with("document.querySelector(") {
                let n = self.polls.fetch_add(1, Ordering::SeqCst);
                return Ok(serde_json::json!(n >= self.ready_after_polls));
            }
            if script.contains("dispatchEvent") {
                return Ok(serde_json::json!(self.control_present));
            }
            Ok(serde_json::Value::Null)
        }

        async fn get_html(&self) -> HarvestResult<String> {
            Ok("<html></html>".into())
        }

        async fn close(self: Box<Self>) -> HarvestResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeRenderer {
        control_present: bool,
        ready_after_polls: usize,
        scripts: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl FakeRenderer {
        fn new(control_present: bool) -> Self {
            Self {
                control_present,
                ready_after_polls: 2,
                scripts: Arc::default(),
                closed: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> HarvestResult<Box<dyn RenderContext>> {
            Ok(Box::new(FakePage {
                control_present: self.control_present,
                ready_after_polls: self.ready_after_polls,
                polls: AtomicUsize::new(0),
                scripts: Arc::clone(&self.scripts),
                closed: Arc::clone(&self.closed),
            }))
        }

        async fn shutdown(&self) -> HarvestResult<()> {
            Ok(())
        }

        fn active_contexts(&self) -> usize {
            0
        }
    }

    fn config() -> ActivationConfig {
        ActivationConfig {
            navigation_timeout_ms: 1_000,
            wait_for: Some("div.card".into()),
            wait_for_timeout_ms: 5_000,
            initial_delay_ms: 0,
            interaction: Some(Interaction {
                selector: "input#level[type='range']".into(),
                value: "max".into(),
                settle_delay_ms: 0,
            }),
        }
    }

    #[tokio::test]
    async fn test_open_sets_control() {
        let renderer = FakeRenderer::new(true);
        let session = open(&renderer, "https://cards.test/x", &config(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(session.address(), "https://cards.test/x#loaded");
        assert_eq!(session.phase(), SaturationState::Activating);

        let scripts = renderer.scripts.lock().unwrap().clone();
        let polls = scripts
            .iter()
            .filter(|s| s.starts_with("document.querySelector("))
            .count();
        assert_eq!(polls, 3);
        let control = scripts.last().unwrap();
        assert!(control.contains(r#"document.querySelector("input#level[type='range']")"#));
        assert!(control.contains("\"input\""));
        assert!(control.contains("\"change\""));

        session.close().await.unwrap();
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_control_is_reported_and_page_closed() {
        let renderer = FakeRenderer::new(false);
        let err = open(&renderer, "https://cards.test/x", &config(), &CancellationToken::new())
            .await
            .err()
            .unwrap();

        match err {
            HarvestError::ControlNotFound { selector } => {
                assert_eq!(selector, "input#level[type='range']");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let mut renderer = FakeRenderer::new(true);
        renderer.ready_after_polls = usize::MAX;
        let mut cfg = config();
        cfg.wait_for_timeout_ms = 250;

        let err = open(&renderer, "https://cards.test/x", &cfg, &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HarvestError::Timeout(_)));
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_control_script_quotes_inputs() {
        let script = set_control_script(r#"input[name="lvl"]"#, "9").unwrap();
        assert!(script.contains(r#"document.querySelector("input[name=\"lvl\"]")"#));
        assert!(script.contains(r#"let value = "9";"#));
    }
}
