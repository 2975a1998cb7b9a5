//! Saturation detection for lazily-loaded pages.
//!
//! The detector only talks to a [`ContentProbe`]: it asks the probe to extend
//! the page, waits, and re-measures until two consecutive measurements are
//! equal. Content grows in discrete steps, so convergence is exact equality.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Measure, SaturationSettings};
use crate::renderer::RenderContext;
use crate::types::{HarvestError, HarvestResult};

/// Lifecycle of a session from activation to a saturated (or abandoned) page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SaturationState {
    NotStarted,
    Activating,
    /// `round` extend rounds done; `last` is the latest measurement.
    Saturating { round: u32, last: u64 },
    Saturated { rounds: u32, measure: u64 },
    TimedOut { rounds: u32, measure: u64 },
}

impl SaturationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SaturationState::Saturated { .. } | SaturationState::TimedOut { .. }
        )
    }
}

/// Pure transition logic, separate from any waiting or I/O.
#[derive(Debug, Clone)]
pub struct SaturationTracker {
    max_rounds: u32,
    state: SaturationState,
}

impl SaturationTracker {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            state: SaturationState::NotStarted,
        }
    }

    pub fn state(&self) -> SaturationState {
        self.state
    }

    /// `NotStarted -> Activating`.
    pub fn activate(&mut self) -> SaturationState {
        if self.state == SaturationState::NotStarted {
            self.state = SaturationState::Activating;
        }
        self.state
    }

    /// Record the measurement taken before the first extend round.
    pub fn baseline(&mut self, measure: u64) -> SaturationState {
        if matches!(
            self.state,
            SaturationState::NotStarted | SaturationState::Activating
        ) {
            self.state = SaturationState::Saturating {
                round: 0,
                last: measure,
            };
        }
        self.state
    }

    /// Record the measurement taken after an extend round.
    pub fn observe(&mut self, measure: u64) -> SaturationState {
        if let SaturationState::Saturating { round, last } = self.state {
            let round = round + 1;
            self.state = if measure == last {
                SaturationState::Saturated {
                    rounds: round,
                    measure,
                }
            } else if round >= self.max_rounds {
                SaturationState::TimedOut {
                    rounds: round,
                    measure,
                }
            } else {
                SaturationState::Saturating {
                    round,
                    last: measure,
                }
            };
        }
        self.state
    }
}

/// A successful saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Saturation {
    /// Extend rounds performed.
    pub rounds: u32,
    /// Final (stable) measurement.
    pub measure: u64,
}

/// Something that can grow a page and measure how big it is.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    /// Extend the view to its current maximum (e.g. scroll to the bottom).
    async fn extend(&self) -> HarvestResult<()>;
    /// A monotonic proxy for content size.
    async fn measure(&self) -> HarvestResult<u64>;
}

/// Poll the probe until content stops growing.
///
/// Fails with [`HarvestError::SaturationTimeout`] after `max_rounds` rounds
/// without two equal consecutive measurements.
pub async fn wait_for_saturation<P: ContentProbe + ?Sized>(
    probe: &P,
    settings: &SaturationSettings,
    cancel: &CancellationToken,
) -> HarvestResult<Saturation> {
    let mut tracker = SaturationTracker::new(settings.max_rounds);
    tracker.activate();
    run_tracker(&mut tracker, probe, settings, cancel).await
}

pub(crate) async fn run_tracker<P: ContentProbe + ?Sized>(
    tracker: &mut SaturationTracker,
    probe: &P,
    settings: &SaturationSettings,
    cancel: &CancellationToken,
) -> HarvestResult<Saturation> {
    let step_timeout = settings.step_timeout();

    let baseline = bounded(probe.measure(), step_timeout, "initial measure").await?;
    tracker.baseline(baseline);
    tracing::debug!("Saturation baseline: {baseline}");

    loop {
        bounded(probe.extend(), step_timeout, "extend").await?;
        sleep_or_cancel(settings.settle_delay(), cancel).await?;
        let measure = bounded(probe.measure(), step_timeout, "measure").await?;

        match tracker.observe(measure) {
            SaturationState::Saturated { rounds, measure } => {
                tracing::info!("Content saturated after {rounds} rounds (measure {measure})");
                return Ok(Saturation { rounds, measure });
            }
            SaturationState::TimedOut { rounds, measure } => {
                return Err(HarvestError::SaturationTimeout {
                    rounds,
                    last_measure: measure,
                });
            }
            SaturationState::Saturating { round, last } => {
                tracing::debug!("Saturation round {round}: measure {last}");
            }
            other => {
                return Err(HarvestError::Browser(format!(
                    "saturation tracker in unexpected state {other:?}"
                )));
            }
        }
    }
}

async fn bounded<T>(
    fut: impl std::future::Future<Output = HarvestResult<T>>,
    limit: Duration,
    what: &str,
) -> HarvestResult<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| HarvestError::Timeout(format!("saturation {what} after {}ms", limit.as_millis())))?
}

/// Sleep for `delay` unless cancelled first.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> HarvestResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(HarvestError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Probe backed by a live page.
pub struct PageProbe<'a> {
    context: &'a dyn RenderContext,
    measure: Measure,
}

impl<'a> PageProbe<'a> {
    pub fn new(context: &'a dyn RenderContext, measure: Measure) -> Self {
        Self { context, measure }
    }
}

/// Scroll to the bottom of the document.
pub const SCROLL_TO_END_JS: &str = "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()";

/// Total document height.
pub const SCROLL_HEIGHT_JS: &str = "document.body.scrollHeight";

/// Scroll back to the top of the document.
pub const SCROLL_TO_TOP_JS: &str = "(() => { window.scrollTo(0, 0); return true; })()";

/// Script counting elements that match `selector`.
pub fn count_script(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!("document.querySelectorAll({quoted}).length")
}

#[async_trait]
impl ContentProbe for PageProbe<'_> {
    async fn extend(&self) -> HarvestResult<()> {
        self.context.execute_js(SCROLL_TO_END_JS).await?;
        Ok(())
    }

    async fn measure(&self) -> HarvestResult<u64> {
        let script = match &self.measure {
            Measure::ScrollHeight => SCROLL_HEIGHT_JS.to_string(),
            Measure::Count(selector) => count_script(selector),
        };
        let value = self.context.execute_js(&script).await?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| HarvestError::Browser(format!("measure returned non-number {value}")))
    }
}
