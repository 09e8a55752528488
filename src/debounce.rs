//! Debounced Notifier
//!
//! Rate-limits alerts for one condition. The first `true` in a streak only
//! starts the cooldown clock; after that the condition may fire once per
//! cooldown window, at most `max_notifications` times, until it is seen
//! `false` again.

use crate::condition::ConditionKind;
use crate::notification::{Notification, NotificationSink, NotifyError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, Span};

/// Source of "now" for the state machine
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Rate limits shared by all notifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub cooldown: Duration,
    pub max_notifications: u32,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(19 * 60),
            max_notifications: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Suppressed,
}

/// What a single observation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `false` while already idle
    Unchanged,
    /// First `true` of a streak; clock started, nothing shown
    Armed,
    /// `true` inside the cooldown window
    Cooling,
    /// Notification due; `count` is the streak's notification number
    Fire { count: u32 },
    /// `true` after the cap was reached
    Suppressed,
    /// `false` ended a streak
    Reset,
}

/// Per-condition state. `last_fire` is `None` exactly while idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierState {
    pub last_fire: Option<Instant>,
    pub fire_count: u32,
}

impl NotifierState {
    pub fn phase(&self, policy: &DebouncePolicy) -> Phase {
        match self.last_fire {
            None => Phase::Idle,
            Some(_) if self.fire_count >= policy.max_notifications => Phase::Suppressed,
            Some(_) => Phase::Armed,
        }
    }

    /// Pure transition function
    pub fn step(self, input: bool, now: Instant, policy: &DebouncePolicy) -> (Self, Transition) {
        if !input {
            return match self.phase(policy) {
                Phase::Idle => (Self::default(), Transition::Unchanged),
                Phase::Armed | Phase::Suppressed => (Self::default(), Transition::Reset),
            };
        }

        match (self.phase(policy), self.last_fire) {
            (Phase::Idle, _) | (_, None) => (
                Self {
                    last_fire: Some(now),
                    fire_count: 0,
                },
                Transition::Armed,
            ),
            (Phase::Suppressed, _) => (self, Transition::Suppressed),
            (Phase::Armed, Some(last)) => {
                if now.saturating_duration_since(last) < policy.cooldown {
                    return (self, Transition::Cooling);
                }
                let count = self.fire_count + 1;
                (
                    Self {
                        last_fire: Some(now),
                        fire_count: count,
                    },
                    Transition::Fire { count },
                )
            }
        }
    }
}

/// Result of [`DebounceNotifier::observe`]
#[derive(Debug)]
pub struct Observation {
    pub transition: Transition,
    /// Set when a due notification could not be shown. The state change stands.
    pub delivery_error: Option<NotifyError>,
}

/// Owns the state of one condition and shows its alert when due
pub struct DebounceNotifier {
    kind: ConditionKind,
    notification: Notification,
    policy: DebouncePolicy,
    state: NotifierState,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl DebounceNotifier {
    pub fn new(
        kind: ConditionKind,
        notification: Notification,
        policy: DebouncePolicy,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Self {
        Self {
            kind,
            notification,
            policy,
            state: NotifierState::default(),
            clock,
            span,
        }
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn state(&self) -> NotifierState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase(&self.policy)
    }

    /// Feeds one observation. Calls `sink` at most once.
    pub fn observe(&mut self, is_true: bool, sink: &dyn NotificationSink) -> Observation {
        let _span = self.span.enter();

        let (next, transition) = self.state.step(is_true, self.clock.now(), &self.policy);
        self.state = next;

        let mut delivery_error = None;
        match transition {
            Transition::Armed => debug!("Condition became true, cooldown started"),
            Transition::Reset => debug!("Condition cleared, notifier re-armed"),
            Transition::Fire { count } => {
                info!(
                    "Notifying \"{}\" ({}/{})",
                    self.notification.title, count, self.policy.max_notifications
                );
                if let Err(e) = sink.deliver(&self.notification) {
                    delivery_error = Some(e);
                }
                if count >= self.policy.max_notifications {
                    info!("Notification cap reached, suppressed until the condition clears");
                }
            }
            Transition::Unchanged | Transition::Cooling | Transition::Suppressed => {}
        }

        Observation {
            transition,
            delivery_error,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Clock moved by hand
    pub struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    /// Records deliveries, optionally failing them
    #[derive(Default)]
    pub struct RecordingSink {
        pub delivered: Mutex<Vec<Notification>>,
        pub fail: bool,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Delivery("toast service down".to_string()));
            }
            self.delivered.lock().push(notification.clone());
            Ok(())
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    fn policy() -> DebouncePolicy {
        DebouncePolicy {
            cooldown: 19 * MINUTE,
            max_notifications: 3,
        }
    }

    fn notifier(clock: &Arc<ManualClock>, policy: DebouncePolicy) -> DebounceNotifier {
        let kind = ConditionKind::ProxyNotInRuleMode;
        DebounceNotifier::new(
            kind,
            Notification::for_condition(kind, "CFWHelper", None),
            policy,
            clock.clone(),
            Span::none(),
        )
    }

    #[test]
    fn isolated_true_only_arms() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut n = notifier(&clock, policy());

        let obs = n.observe(true, &sink);
        assert_eq!(obs.transition, Transition::Armed);
        assert_eq!(n.phase(), Phase::Armed);
        assert!(sink.delivered.lock().is_empty());
    }

    #[test]
    fn trues_inside_cooldown_fire_at_most_once() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut n = notifier(&clock, policy());

        n.observe(true, &sink);
        clock.advance(18 * MINUTE);
        assert_eq!(n.observe(true, &sink).transition, Transition::Cooling);
        clock.advance(MINUTE);
        assert_eq!(n.observe(true, &sink).transition, Transition::Fire { count: 1 });
        clock.advance(MINUTE);
        assert_eq!(n.observe(true, &sink).transition, Transition::Cooling);

        assert_eq!(sink.delivered.lock().len(), 1);
    }

    #[test]
    fn spaced_trues_fire_min_of_n_minus_one_and_cap() {
        for max in 0..=4u32 {
            for n_obs in 1..=7u32 {
                let clock = Arc::new(ManualClock::new());
                let sink = RecordingSink::default();
                let mut n = notifier(
                    &clock,
                    DebouncePolicy {
                        cooldown: 19 * MINUTE,
                        max_notifications: max,
                    },
                );

                for _ in 0..n_obs {
                    n.observe(true, &sink);
                    clock.advance(20 * MINUTE);
                }

                let expected = (n_obs - 1).min(max) as usize;
                assert_eq!(sink.delivered.lock().len(), expected, "max={} n={}", max, n_obs);
            }
        }
    }

    #[test]
    fn false_always_resets() {
        let start = Instant::now();
        let states = [
            NotifierState::default(),
            NotifierState { last_fire: Some(start), fire_count: 0 },
            NotifierState { last_fire: Some(start), fire_count: 2 },
            NotifierState { last_fire: Some(start), fire_count: 3 },
        ];

        for state in states {
            let (next, _) = state.step(false, start + 40 * MINUTE, &policy());
            assert_eq!(next, NotifierState::default());
        }
    }

    #[test]
    fn step_is_pure() {
        let start = Instant::now();
        let state = NotifierState { last_fire: Some(start), fire_count: 1 };

        let a = state.step(true, start + 30 * MINUTE, &policy());
        let b = state.step(true, start + 30 * MINUTE, &policy());
        assert_eq!(a, b);
        assert_eq!(
            a,
            (
                NotifierState { last_fire: Some(start + 30 * MINUTE), fire_count: 2 },
                Transition::Fire { count: 2 }
            )
        );
    }

    #[test]
    fn suppressed_until_false() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut n = notifier(
            &clock,
            DebouncePolicy {
                cooldown: 19 * MINUTE,
                max_notifications: 1,
            },
        );

        n.observe(true, &sink);
        clock.advance(20 * MINUTE);
        n.observe(true, &sink);
        assert_eq!(n.phase(), Phase::Suppressed);

        for _ in 0..5 {
            clock.advance(60 * MINUTE);
            assert_eq!(n.observe(true, &sink).transition, Transition::Suppressed);
        }
        assert_eq!(sink.delivered.lock().len(), 1);

        assert_eq!(n.observe(false, &sink).transition, Transition::Reset);
        assert_eq!(n.phase(), Phase::Idle);
    }

    #[test]
    fn cooldown_scenario() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink::default();
        let mut n = notifier(&clock, policy());

        // (minute, input, expected transition)
        let timeline = [
            (0, true, Transition::Armed),
            (20, true, Transition::Fire { count: 1 }),
            (21, true, Transition::Cooling),
            (41, true, Transition::Fire { count: 2 }),
            (61, true, Transition::Fire { count: 3 }),
            (80, true, Transition::Suppressed),
            (81, false, Transition::Reset),
            (82, true, Transition::Armed),
        ];

        let mut elapsed = 0;
        for (minute, input, expected) in timeline {
            clock.advance((minute - elapsed) * MINUTE);
            elapsed = minute;
            assert_eq!(n.observe(input, &sink).transition, expected, "t={}min", minute);
        }

        assert_eq!(sink.delivered.lock().len(), 3);
        assert_eq!(n.state().fire_count, 0);
        assert_eq!(n.phase(), Phase::Armed);
    }

    #[test]
    fn delivery_failure_keeps_transition() {
        let clock = Arc::new(ManualClock::new());
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut n = notifier(&clock, policy());

        n.observe(true, &sink);
        clock.advance(20 * MINUTE);
        let obs = n.observe(true, &sink);

        assert_eq!(obs.transition, Transition::Fire { count: 1 });
        assert!(matches!(obs.delivery_error, Some(NotifyError::Delivery(_))));
        assert_eq!(n.state().fire_count, 1);
        assert_eq!(n.state().last_fire, Some(clock.now()));
    }

    #[test]
    fn zero_cap_arms_then_stays_suppressed() {
        let start = Instant::now();
        let policy = DebouncePolicy {
            cooldown: MINUTE,
            max_notifications: 0,
        };

        let (armed, t) = NotifierState::default().step(true, start, &policy);
        assert_eq!(t, Transition::Armed);
        assert_eq!(armed.phase(&policy), Phase::Suppressed);

        let (_, t) = armed.step(true, start + 10 * MINUTE, &policy);
        assert_eq!(t, Transition::Suppressed);
    }
}
