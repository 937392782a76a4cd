//! Violation record and lifecycle
//!
//! A violation is immutable once the backend has created it, except for the
//! single `expired_at` transition and the review fields owned by the review
//! workflow.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::GuildId;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ids::{InternalUserId, PlatformUserId, ViolationId};
use super::{WarningError, WarningResult};
use crate::MODERATION_TARGET;

/// Category of rule breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    Spam,
    Toxicity,
    Nsfw,
    Privacy,
    Impersonation,
    Illegal,
    Advertising,
    SelfHarm,
    Evasion,
    Other,
}

impl ViolationType {
    pub const ALL: [Self; 10] = [
        Self::Spam,
        Self::Toxicity,
        Self::Nsfw,
        Self::Privacy,
        Self::Impersonation,
        Self::Illegal,
        Self::Advertising,
        Self::SelfHarm,
        Self::Evasion,
        Self::Other,
    ];
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spam => write!(f, "Spam"),
            Self::Toxicity => write!(f, "Toxicity"),
            Self::Nsfw => write!(f, "NSFW Content"),
            Self::Privacy => write!(f, "Privacy Violation"),
            Self::Impersonation => write!(f, "Impersonation"),
            Self::Illegal => write!(f, "Illegal Content"),
            Self::Advertising => write!(f, "Advertising"),
            Self::SelfHarm => write!(f, "Self-Harm"),
            Self::Evasion => write!(f, "Punishment Evasion"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// Severity of a violation, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Community policy a violation falls under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyViolated {
    CommunityGuidelines,
    SpamPolicy,
    HarassmentPolicy,
    HateSpeechPolicy,
    ContentPolicy,
    PrivacyPolicy,
    ImpersonationPolicy,
    IllegalActivityPolicy,
    AdvertisingPolicy,
    SelfHarmPolicy,
    EvasionPolicy,
    TermsOfService,
}

impl fmt::Display for PolicyViolated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommunityGuidelines => write!(f, "Community Guidelines"),
            Self::SpamPolicy => write!(f, "Spam Policy"),
            Self::HarassmentPolicy => write!(f, "Harassment Policy"),
            Self::HateSpeechPolicy => write!(f, "Hate Speech Policy"),
            Self::ContentPolicy => write!(f, "Content Policy"),
            Self::PrivacyPolicy => write!(f, "Privacy Policy"),
            Self::ImpersonationPolicy => write!(f, "Impersonation Policy"),
            Self::IllegalActivityPolicy => write!(f, "Illegal Activity Policy"),
            Self::AdvertisingPolicy => write!(f, "Advertising Policy"),
            Self::SelfHarmPolicy => write!(f, "Self-Harm Policy"),
            Self::EvasionPolicy => write!(f, "Evasion Policy"),
            Self::TermsOfService => write!(f, "Terms of Service"),
        }
    }
}

/// Capability that can be removed from a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureRestriction {
    MessageEmbed,
    MessageAttach,
    MessageLink,
    RateLimit,
    /// Legacy alias of `RateLimit`
    Timeout,
    VoiceSpeak,
    VoiceVideo,
    VoiceStream,
    ReactionAdd,
    NicknameChange,
}

impl FeatureRestriction {
    /// Whether this restriction throttles messages (`RateLimit` or its legacy alias)
    #[must_use]
    pub const fn is_rate_limit(self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout)
    }

    /// Whether `other` satisfies this restriction, folding the legacy alias
    #[must_use]
    pub const fn covers(self, other: Self) -> bool {
        if self.is_rate_limit() {
            other.is_rate_limit()
        } else {
            self as u8 == other as u8
        }
    }

    /// What the user can no longer do
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MessageEmbed => "You cannot send messages containing embeds.",
            Self::MessageAttach => "You cannot send attachments.",
            Self::MessageLink => "You cannot send links.",
            Self::RateLimit | Self::Timeout => "Your messages are rate limited.",
            Self::VoiceSpeak => "You cannot speak in voice channels.",
            Self::VoiceVideo => "You cannot use your camera in voice channels.",
            Self::VoiceStream => "You cannot stream in voice channels.",
            Self::ReactionAdd => "You cannot add reactions.",
            Self::NicknameChange => "You cannot change your nickname.",
        }
    }
}

impl fmt::Display for FeatureRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageEmbed => write!(f, "Embeds"),
            Self::MessageAttach => write!(f, "Attachments"),
            Self::MessageLink => write!(f, "Links"),
            Self::RateLimit | Self::Timeout => write!(f, "Rate Limit"),
            Self::VoiceSpeak => write!(f, "Voice Speak"),
            Self::VoiceVideo => write!(f, "Voice Video"),
            Self::VoiceStream => write!(f, "Voice Stream"),
            Self::ReactionAdd => write!(f, "Reactions"),
            Self::NicknameChange => write!(f, "Nickname Change"),
        }
    }
}

/// Kind of enforcement recorded on a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Restriction,
    Timeout,
    Ban,
}

/// One enforcement step attached to a violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionApplied {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub applied: bool,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl ActionApplied {
    #[must_use]
    pub fn pending(kind: ActionKind) -> Self {
        Self {
            kind,
            applied: false,
            applied_at: None,
        }
    }

    #[must_use]
    pub fn applied(kind: ActionKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            applied: true,
            applied_at: Some(at),
        }
    }
}

/// Outcome of a moderator review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Upheld,
    Overturned,
    Reduced,
}

/// A recorded, adjudicated rule breach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub id: ViolationId,
    pub user_id: InternalUserId,
    pub guild_id: GuildId,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub policy_violated: PolicyViolated,
    pub reason: String,
    #[serde(default)]
    pub content_snapshot: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub restrictions: BTreeSet<FeatureRestriction>,
    #[serde(default)]
    pub actions_applied: Vec<ActionApplied>,
    pub issued_by: InternalUserId,
    pub issued_at: DateTime<Utc>,
    /// `None` means permanent
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_requested: bool,
    #[serde(default)]
    pub reviewed_by: Option<InternalUserId>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_outcome: Option<ReviewOutcome>,
    #[serde(default)]
    pub review_notes: Option<String>,
}

impl Violation {
    /// Not yet marked expired
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.expired_at.is_none()
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Check if this violation's window has elapsed but it has not been swept yet
    #[must_use]
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Whether this violation carries `restriction` (legacy alias folded)
    #[must_use]
    pub fn carries(&self, restriction: FeatureRestriction) -> bool {
        self.restrictions
            .iter()
            .any(|held| restriction.covers(*held))
    }

    /// Mark this violation expired
    ///
    /// # Errors
    /// Returns `AlreadyExpired` if `expired_at` is already set, and `NotYetDue`
    /// when not forced and the expiry has not elapsed (permanent violations
    /// never elapse).
    pub fn expire(&mut self, now: DateTime<Utc>, forced: bool) -> WarningResult<()> {
        if self.expired_at.is_some() {
            return Err(WarningError::AlreadyExpired(self.id));
        }

        if !forced && !self.is_due_for_expiry(now) {
            return Err(WarningError::NotYetDue(self.id));
        }

        self.expired_at = Some(now);

        info!(
            target: MODERATION_TARGET,
            violation_id = %self.id,
            user_id = %self.user_id,
            guild_id = %self.guild_id,
            violation_type = %self.violation_type,
            forced,
            "Violation expired"
        );

        Ok(())
    }
}

/// How long a violation should last when the issuer picks it explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(DateTime<Utc>),
}

impl Expiry {
    #[must_use]
    pub fn as_option(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(at),
        }
    }
}

/// Who is issuing a violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub platform_id: PlatformUserId,
    pub display_name: String,
}

/// A violation before the backend has assigned its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationDraft {
    pub target: PlatformUserId,
    pub guild_id: GuildId,
    pub violation_type: ViolationType,
    pub severity: Severity,
    /// Defaults to the type's primary policy
    pub policy_violated: Option<PolicyViolated>,
    pub reason: String,
    pub content_snapshot: Option<String>,
    pub context: Option<String>,
    pub evidence: Option<String>,
    /// Defaults to the type's restriction set
    pub restrictions: Option<BTreeSet<FeatureRestriction>>,
    /// Derived from the policy table when absent
    pub expiry: Option<Expiry>,
}

impl ViolationDraft {
    pub fn new(
        target: PlatformUserId,
        guild_id: GuildId,
        violation_type: ViolationType,
        severity: Severity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target,
            guild_id,
            violation_type,
            severity,
            policy_violated: None,
            reason: reason.into(),
            content_snapshot: None,
            context: None,
            evidence: None,
            restrictions: None,
            expiry: None,
        }
    }

    #[must_use]
    pub fn with_restrictions(
        mut self,
        restrictions: impl IntoIterator<Item = FeatureRestriction>,
    ) -> Self {
        self.restrictions = Some(restrictions.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}
