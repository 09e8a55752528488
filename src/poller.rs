//! Poll Loop
//!
//! Fetch → evaluate → observe, strictly one cycle at a time.

use crate::condition::{ConditionEvaluator, ConditionKind};
use crate::debounce::{Clock, DebounceNotifier, DebouncePolicy, NotifierState, Transition};
use crate::fetcher::{ConfigSource, FetchError};
use crate::notification::{Notification, NotificationAction, NotificationSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Loop settings fixed at startup
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub policy: DebouncePolicy,
    pub app_id: String,
    pub action: Option<NotificationAction>,
}

/// What one tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// Fetch failed; no notifier was touched
    Skipped(FetchError),
    /// Every notifier observed its condition
    Observed { notified: usize },
}

pub struct Poller<F> {
    fetcher: F,
    evaluator: ConditionEvaluator,
    notifiers: Vec<DebounceNotifier>,
    sink: Arc<dyn NotificationSink>,
    interval: Duration,
    span: Span,
}

impl<F: ConfigSource> Poller<F> {
    /// One notifier per watched condition, each in its own child span of `span`
    pub fn new(
        fetcher: F,
        evaluator: ConditionEvaluator,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        options: PollOptions,
        span: Span,
    ) -> Self {
        let notifiers = evaluator
            .watched()
            .iter()
            .map(|&kind| {
                DebounceNotifier::new(
                    kind,
                    Notification::for_condition(kind, &options.app_id, options.action.clone()),
                    options.policy,
                    clock.clone(),
                    info_span!(parent: &span, "notifier", condition = kind.name()),
                )
            })
            .collect();

        Self {
            fetcher,
            evaluator,
            notifiers,
            sink,
            interval: options.interval,
            span,
        }
    }

    pub fn notifier_state(&self, kind: ConditionKind) -> Option<NotifierState> {
        self.notifiers
            .iter()
            .find(|n| n.kind() == kind)
            .map(DebounceNotifier::state)
    }

    /// Runs one fetch → evaluate → observe cycle
    pub async fn tick(&mut self) -> TickOutcome {
        let snapshot = match self.fetcher.fetch().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                return TickOutcome::Skipped(e);
            }
        };

        let values = self.evaluator.evaluate(&snapshot);
        debug!("Conditions: {:?}", values);

        let mut notified = 0;
        for (kind, value) in values {
            let Some(notifier) = self.notifiers.iter_mut().find(|n| n.kind() == kind) else {
                continue;
            };

            let observation = notifier.observe(value, self.sink.as_ref());
            if let Transition::Fire { .. } = observation.transition {
                match observation.delivery_error {
                    None => notified += 1,
                    Some(e) => warn!("Could not show \"{}\" alert: {}", kind.title(), e),
                }
            }
        }

        TickOutcome::Observed { notified }
    }

    /// Ticks until `shutdown` is notified. A running cycle always finishes
    /// first; a slow cycle delays the next tick instead of overlapping it.
    pub async fn run(mut self, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.span.in_scope(|| info!("Polling every {}s", self.interval.as_secs()));

        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    let span = self.span.clone();
                    self.tick().instrument(span).await;
                }
            }
        }

        self.span.in_scope(|| info!("Poll loop stopped"));
    }
}
