use crate::warning::notify::{format_expiry, standing_notice};
use crate::warning::{
    to_embed, Actor, Severity, ViolationDraft, ViolationId, ViolationType, WarningError,
};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use poise::{command, CreateReply};
use tracing::error;

const GENERIC_FAILURE: &str = "Something went wrong. The failure has been logged.";

/// Violation categories offered by the issue command
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum TypeChoice {
    Spam,
    Toxicity,
    #[name = "NSFW"]
    Nsfw,
    Illegal,
    Privacy,
    Impersonation,
    Advertising,
    #[name = "Self-harm"]
    SelfHarm,
    Evasion,
    Other,
}

impl From<TypeChoice> for ViolationType {
    fn from(choice: TypeChoice) -> Self {
        match choice {
            TypeChoice::Spam => Self::Spam,
            TypeChoice::Toxicity => Self::Toxicity,
            TypeChoice::Nsfw => Self::Nsfw,
            TypeChoice::Illegal => Self::Illegal,
            TypeChoice::Privacy => Self::Privacy,
            TypeChoice::Impersonation => Self::Impersonation,
            TypeChoice::Advertising => Self::Advertising,
            TypeChoice::SelfHarm => Self::SelfHarm,
            TypeChoice::Evasion => Self::Evasion,
            TypeChoice::Other => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum SeverityChoice {
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityChoice> for Severity {
    fn from(choice: SeverityChoice) -> Self {
        match choice {
            SeverityChoice::Low => Self::Low,
            SeverityChoice::Medium => Self::Medium,
            SeverityChoice::High => Self::High,
            SeverityChoice::Critical => Self::Critical,
        }
    }
}

fn actor(ctx: Context<'_>) -> Actor {
    let author = ctx.author();
    Actor {
        platform_id: author.id.into(),
        display_name: author.global_name.clone().unwrap_or_else(|| author.name.clone()),
    }
}

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Issue or expire violations
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    subcommands("issue", "expire"),
    subcommand_required
)]
pub async fn violation(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Record a violation against a member
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn issue(
    ctx: Context<'_>,
    #[description = "Member who broke the rules"] user: serenity::User,
    #[description = "Kind of violation"] violation_type: TypeChoice,
    #[description = "How serious it was"] severity: SeverityChoice,
    #[description = "Reason shown to the member"] reason: String,
    #[description = "Link or note backing the violation"] evidence: Option<String>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    if user.bot {
        ctx.say("Violations can't be issued to bots.").await?;
        return Ok(());
    }
    ctx.defer_ephemeral().await?;

    let mut draft = ViolationDraft::new(
        user.id.into(),
        guild_id,
        violation_type.into(),
        severity.into(),
        reason,
    );
    if let Some(evidence) = evidence {
        draft = draft.with_evidence(evidence);
    }

    let reply = match ctx.data().warnings().issue_violation(&actor(ctx), draft).await {
        Some(violation) => format!(
            "Issued violation #{} to <@{}>. Expires: {}",
            violation.id,
            user.id,
            format_expiry(violation.expires_at)
        ),
        None => "Failed to issue the violation. The failure has been logged.".to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Expire a violation before its time
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn expire(
    ctx: Context<'_>,
    #[description = "Violation number"] id: i64,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let warnings = ctx.data().warnings();
    let id = ViolationId(id);

    let result = match warnings.internal_id_for(ctx.author().id.into()).await {
        Ok(expired_by) => warnings.expire_violation(id, expired_by, true).await,
        Err(e) => Err(e),
    };

    let reply = match result {
        Ok(true) => format!("Violation #{id} expired."),
        Ok(false) => format!("Violation #{id} was already expired."),
        Err(WarningError::ViolationNotFound(_)) => format!("No active violation #{id} is known."),
        Err(e) => {
            error!(violation_id = %id, "Failed to expire violation: {e}");
            GENERIC_FAILURE.to_string()
        }
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show a member's account standing
#[command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn standing(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let target = user.id.into();
    let reply = match ctx.data().warnings().standing(target, guild_id).await {
        Ok(standing) => CreateReply::default().embed(to_embed(&standing_notice(target, &standing))),
        Err(WarningError::UserNotFound(_)) => {
            CreateReply::default().content(format!("<@{}> has no violation history.", user.id))
        }
        Err(e) => {
            error!(user_id = %target, "Failed to compute standing: {e}");
            CreateReply::default().content(GENERIC_FAILURE)
        }
    };
    ctx.send(reply.ephemeral(true)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use poise::ChoiceParameter;

    #[test]
    fn test_ping_command_definition() {
        let cmd = ping();
        assert_eq!(cmd.name, "ping");
        assert!(cmd.guild_only);
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_violation_subcommands() {
        let cmd = violation();
        let names: Vec<&str> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["issue", "expire"]);
        assert!(cmd.subcommand_required);
        assert!(cmd.required_permissions.contains(serenity::Permissions::MODERATE_MEMBERS));
    }

    #[test]
    fn test_standing_is_moderator_only() {
        let cmd = standing();
        assert!(cmd.guild_only);
        assert!(cmd.required_permissions.contains(serenity::Permissions::MODERATE_MEMBERS));
    }

    #[test]
    fn test_choices_map_onto_domain_enums() {
        assert_eq!(ViolationType::from(TypeChoice::SelfHarm), ViolationType::SelfHarm);
        assert_eq!(ViolationType::from(TypeChoice::Nsfw), ViolationType::Nsfw);
        assert_eq!(Severity::from(SeverityChoice::Critical), Severity::Critical);
        assert_eq!(TypeChoice::list().len(), 10);
    }
}
