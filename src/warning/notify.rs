//! Notification formatting
//!
//! Builds the DM and mod-log notices sent by the warning system. Everything
//! here is pure; delivery lives behind `ModerationPlatform`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, GuildId};

use super::ids::PlatformUserId;
use super::standing::{AccountStanding, AccountStandingData};
use super::violation::{Actor, Expiry, FeatureRestriction, Severity, Violation};

const COLOR_INFO: u32 = 0x0034_98DB;
const COLOR_WARN: u32 = 0x00F1_C40F;
const COLOR_DANGER: u32 = 0x00E7_4C3C;
const COLOR_OK: u32 = 0x002E_CC71;

/// One name/value row of a notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// A platform-neutral rich message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub fields: Vec<NoticeField>,
    pub color: u32,
}

impl Notice {
    fn new(title: impl Into<String>, description: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            color,
        }
    }

    fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    /// Value of the first field named `name`
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }
}

/// Render an expiry as an absolute and relative Discord timestamp
#[must_use]
pub fn format_expiry(expires_at: Option<DateTime<Utc>>) -> String {
    match expires_at {
        None => "Permanent".to_string(),
        Some(at) => {
            let ts = at.timestamp();
            format!("<t:{ts}:F> (<t:{ts}:R>)")
        }
    }
}

fn format_restrictions(restrictions: &BTreeSet<FeatureRestriction>) -> String {
    if restrictions.is_empty() {
        return "None".to_string();
    }

    restrictions
        .iter()
        .map(|r| format!("• {}", r.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

const fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Low => COLOR_INFO,
        Severity::Medium => COLOR_WARN,
        Severity::High | Severity::Critical => COLOR_DANGER,
    }
}

/// DM sent to the user a violation was issued against
#[must_use]
pub fn violation_notice(violation: &Violation) -> Notice {
    let mut notice = Notice::new(
        "You have received a violation",
        format!(
            "A moderator recorded a violation against your account in this server.\n\n**Reason:** {}",
            violation.reason
        ),
        severity_color(violation.severity),
    )
    .field("Type", violation.violation_type.to_string(), true)
    .field("Severity", violation.severity.to_string(), true)
    .field("Policy", violation.policy_violated.to_string(), true)
    .field("Expires", format_expiry(violation.expires_at), false)
    .field("Restrictions", format_restrictions(&violation.restrictions), false);

    if let Some(evidence) = &violation.evidence {
        notice = notice.field("Evidence", evidence.clone(), false);
    }

    notice
}

/// DM sent when a restricted action was blocked
///
/// `lapses` is when the last violation carrying the restriction expires, or
/// `None` when no such violation is known yet.
#[must_use]
pub fn restriction_notice(
    restriction: FeatureRestriction,
    lapses: Option<Expiry>,
    repeat_offense: bool,
) -> Notice {
    let mut description = format!("Your message was removed. {}", restriction.description());
    if repeat_offense {
        description.push_str(
            "\n\nThis restriction stems from repeated violations. Further breaches may lead to a suspension.",
        );
    }

    let active_until = match lapses {
        Some(expiry) => format_expiry(expiry.as_option()),
        None => "Until your active violations expire".to_string(),
    };

    Notice::new("Restricted action blocked", description, COLOR_WARN)
        .field("Restriction", restriction.to_string(), true)
        .field("Active until", active_until, true)
}

/// Ephemeral reply for a blocked component interaction
#[must_use]
pub fn interaction_blocked_notice() -> Notice {
    Notice::new(
        "Action blocked",
        FeatureRestriction::ReactionAdd.description(),
        COLOR_WARN,
    )
}

/// DM sent right before a suspension ban
#[must_use]
pub fn suspension_notice(standing: &AccountStandingData, appeal_channel: Option<ChannelId>) -> Notice {
    let appeal = appeal_channel.map_or_else(
        || "Contact the server staff to appeal.".to_string(),
        |channel| format!("You may appeal in <#{channel}>."),
    );

    Notice::new(
        "Your account has been suspended",
        format!(
            "Your account standing reached **{}** after repeated violations and you have been banned from this server.\n\n{appeal}",
            standing.standing
        ),
        COLOR_DANGER,
    )
    .field("Active violations", standing.active_violations.to_string(), true)
    .field("Severity score", standing.severity_score.to_string(), true)
}

/// Summary shown by the standing command
#[must_use]
pub fn standing_notice(target: PlatformUserId, standing: &AccountStandingData) -> Notice {
    let color = match standing.standing {
        AccountStanding::Good => COLOR_OK,
        AccountStanding::Limited | AccountStanding::VeryLimited => COLOR_WARN,
        AccountStanding::AtRisk | AccountStanding::Suspended => COLOR_DANGER,
    };
    let last = standing
        .last_violation
        .map_or_else(|| "Never".to_string(), |at| format!("<t:{}:R>", at.timestamp()));
    let next = match standing.next_expiration {
        Some(at) => format_expiry(Some(at)),
        None if standing.active_violations > 0 => "Permanent".to_string(),
        None => "Nothing active".to_string(),
    };

    Notice::new(
        "Account standing",
        format!("<@{target}> is in **{}** standing", standing.standing),
        color,
    )
    .field("Active violations", standing.active_violations.to_string(), true)
    .field("Total violations", standing.total_violations.to_string(), true)
    .field("Severity score", standing.severity_score.to_string(), true)
    .field("Last violation", last, true)
    .field("Next expiration", next, true)
    .field("Restrictions", format_restrictions(&standing.restrictions), false)
}

/// Mod-log entry for a newly issued violation
#[must_use]
pub fn issued_audit_notice(
    violation: &Violation,
    target: PlatformUserId,
    actor: &Actor,
    repeat_offense: bool,
) -> Notice {
    let offense = if repeat_offense { "Repeat" } else { "First" };

    let mut notice = Notice::new(
        format!("Violation #{} issued", violation.id),
        format!("<@{target}> by <@{}> ({})", actor.platform_id, actor.display_name),
        severity_color(violation.severity),
    )
    .field("Type", violation.violation_type.to_string(), true)
    .field("Severity", violation.severity.to_string(), true)
    .field("Offense", offense, true)
    .field("Reason", violation.reason.clone(), false)
    .field("Expires", format_expiry(violation.expires_at), true)
    .field("Restrictions", format_restrictions(&violation.restrictions), false);

    if let Some(snapshot) = &violation.content_snapshot {
        notice = notice.field("Content", format!("> {snapshot}"), false);
    }

    notice
}

/// Mod-log entry for an expired violation
#[must_use]
pub fn expired_audit_notice(violation: &Violation, target: PlatformUserId, forced: bool) -> Notice {
    let how = if forced { "Expired by a moderator" } else { "Expired automatically" };

    Notice::new(
        format!("Violation #{} expired", violation.id),
        format!("<@{target}>: {how}"),
        COLOR_OK,
    )
    .field("Type", violation.violation_type.to_string(), true)
    .field("Severity", violation.severity.to_string(), true)
}

/// Mod-log entry for a suspension
#[must_use]
pub fn suspension_audit_notice(
    target: PlatformUserId,
    guild_id: GuildId,
    standing: &AccountStandingData,
) -> Notice {
    Notice::new(
        "User suspended",
        format!("<@{target}> was banned from guild {guild_id} for reaching {} standing", standing.standing),
        COLOR_DANGER,
    )
    .field("Severity score", standing.severity_score.to_string(), true)
    .field("Active violations", standing.active_violations.to_string(), true)
}
