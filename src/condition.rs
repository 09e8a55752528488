//! Watched Conditions
//!
//! Maps a controller snapshot to the fixed set of alert conditions.

use crate::fetcher::ConfigSnapshot;
use clap::ValueEnum;

/// The alert conditions the helper knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ConditionKind {
    /// Routing mode is anything but `rule`
    #[value(name = "not-rule")]
    ProxyNotInRuleMode,
    /// Routing mode is `global`
    #[value(name = "global")]
    ProxyInGlobalMode,
    /// `allow-lan` is switched on
    #[value(name = "allow-lan")]
    LanAccessAllowed,
}

impl ConditionKind {
    /// Watched when no `--watch` is given
    pub const DEFAULT_SET: [ConditionKind; 2] =
        [ConditionKind::ProxyNotInRuleMode, ConditionKind::LanAccessAllowed];

    pub fn name(&self) -> &'static str {
        match self {
            ConditionKind::ProxyNotInRuleMode => "not-rule",
            ConditionKind::ProxyInGlobalMode => "global",
            ConditionKind::LanAccessAllowed => "allow-lan",
        }
    }

    /// Alert title shown to the user
    pub fn title(&self) -> &'static str {
        match self {
            ConditionKind::ProxyNotInRuleMode => "Clash Not Rule",
            ConditionKind::ProxyInGlobalMode => "Clash Global Mode",
            ConditionKind::LanAccessAllowed => "Clash Allow Lan",
        }
    }

    /// Missing fields never hold.
    pub fn holds(&self, snapshot: &ConfigSnapshot) -> bool {
        match self {
            ConditionKind::ProxyNotInRuleMode => snapshot
                .mode
                .as_deref()
                .is_some_and(|mode| !mode.eq_ignore_ascii_case("rule")),
            ConditionKind::ProxyInGlobalMode => snapshot
                .mode
                .as_deref()
                .is_some_and(|mode| mode.eq_ignore_ascii_case("global")),
            ConditionKind::LanAccessAllowed => snapshot.allow_lan == Some(true),
        }
    }
}

/// Evaluates the watched conditions, in watch order
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    watched: Vec<ConditionKind>,
}

impl ConditionEvaluator {
    /// Duplicates are dropped, first occurrence wins.
    pub fn new(kinds: impl IntoIterator<Item = ConditionKind>) -> Self {
        let mut watched = Vec::new();
        for kind in kinds {
            if !watched.contains(&kind) {
                watched.push(kind);
            }
        }
        Self { watched }
    }

    pub fn watched(&self) -> &[ConditionKind] {
        &self.watched
    }

    pub fn evaluate(&self, snapshot: &ConfigSnapshot) -> Vec<(ConditionKind, bool)> {
        self.watched
            .iter()
            .map(|&kind| (kind, kind.holds(snapshot)))
            .collect()
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new(ConditionKind::DEFAULT_SET)
    }
}
