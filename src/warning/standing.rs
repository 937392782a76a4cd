//! Account standing calculator
//!
//! Maps a user's violations to a trust tier. Pure and side-effect free; the
//! caller decides what to do with a `Suspended` result.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::violation::{FeatureRestriction, Violation};
use crate::config::{SeverityTable, StandingThresholds, WarningConfig};

/// Trust tier, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStanding {
    Good,
    Limited,
    VeryLimited,
    AtRisk,
    Suspended,
}

impl fmt::Display for AccountStanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::Limited => write!(f, "Limited"),
            Self::VeryLimited => write!(f, "Very Limited"),
            Self::AtRisk => write!(f, "At Risk"),
            Self::Suspended => write!(f, "Suspended"),
        }
    }
}

/// Weights and thresholds used to score violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandingRules {
    pub weights: SeverityTable<u32>,
    pub thresholds: StandingThresholds,
}

impl StandingRules {
    #[must_use]
    pub fn from_config(config: &WarningConfig) -> Self {
        Self {
            weights: config.severity_weights,
            thresholds: config.standing_thresholds,
        }
    }

    /// Map a severity score onto a tier
    #[must_use]
    pub const fn tier_for(&self, score: u32) -> AccountStanding {
        let t = &self.thresholds;
        if score >= t.suspended {
            AccountStanding::Suspended
        } else if score >= t.at_risk {
            AccountStanding::AtRisk
        } else if score >= t.very_limited {
            AccountStanding::VeryLimited
        } else if score >= t.limited {
            AccountStanding::Limited
        } else {
            AccountStanding::Good
        }
    }
}

impl Default for StandingRules {
    fn default() -> Self {
        Self::from_config(&WarningConfig::default())
    }
}

/// Derived summary of a user's violation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStandingData {
    pub standing: AccountStanding,
    pub active_violations: usize,
    pub total_violations: usize,
    pub severity_score: u32,
    pub restrictions: BTreeSet<FeatureRestriction>,
    pub last_violation: Option<DateTime<Utc>>,
    pub next_expiration: Option<DateTime<Utc>>,
}

/// Calculate standing from a set of violations
#[must_use]
pub fn calculate_standing(violations: &[Violation], rules: &StandingRules) -> AccountStandingData {
    let active: Vec<&Violation> = violations.iter().filter(|v| v.is_active()).collect();

    let severity_score = active
        .iter()
        .map(|v| rules.weights.get(v.severity))
        .fold(0u32, u32::saturating_add);

    let restrictions = active
        .iter()
        .flat_map(|v| v.restrictions.iter().copied())
        .collect();

    AccountStandingData {
        standing: rules.tier_for(severity_score),
        active_violations: active.len(),
        total_violations: violations.len(),
        severity_score,
        restrictions,
        last_violation: violations.iter().map(|v| v.issued_at).max(),
        next_expiration: active.iter().filter_map(|v| v.expires_at).min(),
    }
}
