//! Violation policy table
//!
//! Static mapping from violation type to its policies, default restrictions
//! and per-severity expiration rules.

use std::collections::{BTreeSet, HashMap};

use chrono::Duration;

use super::violation::{FeatureRestriction, PolicyViolated, Severity, ViolationType};
use crate::config::{SeverityTable, WarningConfig};

/// How long a violation lasts and how it is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationRule {
    /// 0 = permanent
    pub first_offense_days: u32,
    /// 0 = permanent
    pub repeat_offense_days: u32,
    /// Enforce with a native timeout/ban instead of rate limiting
    pub use_discord_timeout: bool,
}

impl ExpirationRule {
    #[must_use]
    pub const fn new(first_offense_days: u32, repeat_offense_days: u32, use_discord_timeout: bool) -> Self {
        Self {
            first_offense_days,
            repeat_offense_days,
            use_discord_timeout,
        }
    }

    #[must_use]
    pub const fn days(&self, repeat_offense: bool) -> u32 {
        if repeat_offense {
            self.repeat_offense_days
        } else {
            self.first_offense_days
        }
    }

    /// Duration of the violation, `None` when permanent
    #[must_use]
    pub fn duration(&self, repeat_offense: bool) -> Option<Duration> {
        match self.days(repeat_offense) {
            0 => None,
            days => Some(Duration::days(i64::from(days))),
        }
    }
}

use ExpirationRule as R;
use Severity::{Critical, High, Low, Medium};
use ViolationType as T;

/// Built-in rules; pairs not listed fall back to the severity defaults
const BUILTIN_RULES: &[(ViolationType, Severity, ExpirationRule)] = &[
    (T::Spam, Low, R::new(1, 3, false)),
    (T::Spam, Medium, R::new(3, 7, false)),
    (T::Spam, High, R::new(7, 30, true)),
    (T::Spam, Critical, R::new(30, 0, true)),
    (T::Toxicity, Low, R::new(3, 7, false)),
    (T::Toxicity, Medium, R::new(7, 30, false)),
    (T::Toxicity, High, R::new(14, 60, true)),
    (T::Toxicity, Critical, R::new(0, 0, true)),
    (T::Nsfw, Medium, R::new(14, 30, false)),
    (T::Nsfw, High, R::new(30, 90, true)),
    (T::Nsfw, Critical, R::new(0, 0, true)),
    (T::Illegal, High, R::new(0, 0, true)),
    (T::Illegal, Critical, R::new(0, 0, true)),
    (T::SelfHarm, Low, R::new(1, 3, false)),
    (T::SelfHarm, Medium, R::new(3, 7, false)),
    (T::Evasion, Medium, R::new(30, 90, false)),
    (T::Evasion, High, R::new(90, 0, true)),
    (T::Evasion, Critical, R::new(0, 0, true)),
    (T::Other, Critical, R::new(0, 0, true)),
];

/// Lookup table for violation policies
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: HashMap<(ViolationType, Severity), ExpirationRule>,
    defaults: SeverityTable<u32>,
}

impl PolicyTable {
    /// Built-in rules with the given fallback durations
    #[must_use]
    pub fn new(defaults: SeverityTable<u32>) -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(violation_type, severity, rule)| ((*violation_type, *severity), *rule))
            .collect();

        Self { rules, defaults }
    }

    /// Built-in rules with the configured overrides applied on top
    #[must_use]
    pub fn from_config(config: &WarningConfig) -> Self {
        let mut table = Self::new(config.default_durations);
        for entry in &config.expiration_overrides {
            table.rules.insert(
                (entry.violation_type, entry.severity),
                ExpirationRule::new(
                    entry.first_offense_days,
                    entry.repeat_offense_days,
                    entry.use_discord_timeout,
                ),
            );
        }
        table
    }

    /// Expiration rule for a type and severity
    #[must_use]
    pub fn expiration_rule(&self, violation_type: ViolationType, severity: Severity) -> ExpirationRule {
        self.rules
            .get(&(violation_type, severity))
            .copied()
            .unwrap_or_else(|| {
                let days = self.defaults.get(severity);
                ExpirationRule::new(days, days, false)
            })
    }

    /// Restrictions applied when a draft carries none
    #[must_use]
    pub fn restrictions_for_type(violation_type: ViolationType) -> BTreeSet<FeatureRestriction> {
        use FeatureRestriction as F;

        let restrictions: &[FeatureRestriction] = match violation_type {
            T::Spam => &[F::RateLimit, F::MessageLink, F::MessageEmbed],
            T::Toxicity => &[F::RateLimit],
            T::Nsfw => &[F::MessageAttach, F::MessageEmbed, F::MessageLink],
            T::Privacy => &[F::MessageAttach, F::MessageLink],
            T::Impersonation => &[F::NicknameChange],
            T::Illegal => &[F::MessageAttach, F::MessageLink, F::MessageEmbed, F::VoiceStream],
            T::Advertising => &[F::MessageLink, F::MessageEmbed],
            T::SelfHarm => &[F::MessageAttach],
            T::Evasion => &[F::RateLimit, F::NicknameChange],
            T::Other => &[],
        };

        restrictions.iter().copied().collect()
    }

    /// Applicable policies; the first is the primary one
    #[must_use]
    pub const fn policies_for_type(violation_type: ViolationType) -> &'static [PolicyViolated] {
        use PolicyViolated as P;

        match violation_type {
            T::Spam => &[P::SpamPolicy, P::CommunityGuidelines],
            T::Toxicity => &[P::HarassmentPolicy, P::HateSpeechPolicy, P::CommunityGuidelines],
            T::Nsfw => &[P::ContentPolicy, P::CommunityGuidelines],
            T::Privacy => &[P::PrivacyPolicy, P::TermsOfService],
            T::Impersonation => &[P::ImpersonationPolicy, P::TermsOfService],
            T::Illegal => &[P::IllegalActivityPolicy, P::TermsOfService],
            T::Advertising => &[P::AdvertisingPolicy, P::SpamPolicy],
            T::SelfHarm => &[P::SelfHarmPolicy, P::CommunityGuidelines],
            T::Evasion => &[P::EvasionPolicy, P::TermsOfService],
            T::Other => &[P::CommunityGuidelines],
        }
    }

    #[must_use]
    pub const fn primary_policy(violation_type: ViolationType) -> PolicyViolated {
        Self::policies_for_type(violation_type)[0]
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_config(&WarningConfig::default())
    }
}
