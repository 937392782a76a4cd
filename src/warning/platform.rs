//! Moderation platform
//!
//! The Discord actions the warning system takes, behind a trait so the
//! pipeline and interceptors can run against a mock in tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    builder::EditMember, ChannelId, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateMessage, GuildId, Http, InteractionId, Member,
    MessageId, PartialGuild, Permissions, RoleId,
};
use tracing::{debug, info};

use super::ids::PlatformUserId;
use super::notify::Notice;
use super::{WarningError, WarningResult};

/// Actions the warning system can take on the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ModerationPlatform: Send + Sync {
    /// Whether the bot is allowed to ban `user` in `guild_id`
    async fn can_ban(&self, guild_id: GuildId, user: PlatformUserId) -> WarningResult<bool>;

    async fn ban(&self, guild_id: GuildId, user: PlatformUserId, reason: &str) -> WarningResult<()>;

    /// Disable communication until `until`
    async fn timeout(
        &self,
        guild_id: GuildId,
        user: PlatformUserId,
        until: DateTime<Utc>,
    ) -> WarningResult<()>;

    async fn send_dm(&self, user: PlatformUserId, notice: &Notice) -> WarningResult<()>;

    async fn send_channel_notice(&self, channel_id: ChannelId, notice: &Notice) -> WarningResult<()>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> WarningResult<()>;

    async fn set_voice_mute(&self, guild_id: GuildId, user: PlatformUserId, muted: bool) -> WarningResult<()>;

    async fn disconnect_voice(&self, guild_id: GuildId, user: PlatformUserId) -> WarningResult<()>;

    /// Set a member's nickname, `None` clears it
    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user: PlatformUserId,
        nickname: Option<String>,
    ) -> WarningResult<()>;

    /// Answer a component interaction with an ephemeral notice
    async fn reply_ephemeral(
        &self,
        interaction_id: InteractionId,
        token: String,
        notice: &Notice,
    ) -> WarningResult<()>;
}

/// Render a notice as an embed
#[must_use]
pub fn to_embed(notice: &Notice) -> CreateEmbed {
    CreateEmbed::new()
        .title(&notice.title)
        .description(&notice.description)
        .color(notice.color)
        .fields(
            notice
                .fields
                .iter()
                .map(|field| (field.name.clone(), field.value.clone(), field.inline)),
        )
}

/// Effective guild-level permissions of a member
fn member_permissions(guild: &PartialGuild, member: &Member) -> Permissions {
    if member.user.id == guild.owner_id {
        return Permissions::all();
    }

    let everyone = RoleId::new(guild.id.get());
    let permissions = guild
        .roles
        .iter()
        .filter(|(id, _)| **id == everyone || member.roles.contains(id))
        .fold(Permissions::empty(), |acc, (_, role)| acc | role.permissions);

    if permissions.administrator() {
        Permissions::all()
    } else {
        permissions
    }
}

/// Position of a member's highest role
fn top_role_position(guild: &PartialGuild, member: &Member) -> u16 {
    member
        .roles
        .iter()
        .filter_map(|id| guild.roles.get(id))
        .map(|role| role.position)
        .max()
        .unwrap_or(0)
}

/// `ModerationPlatform` backed by serenity's HTTP client
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn http(&self) -> &Http {
        &self.http
    }

    async fn member(&self, guild_id: GuildId, user: PlatformUserId) -> WarningResult<Member> {
        Ok(guild_id.member(self.http(), user.to_user_id()).await?)
    }
}

#[async_trait::async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn can_ban(&self, guild_id: GuildId, user: PlatformUserId) -> WarningResult<bool> {
        let http = self.http();
        let guild = guild_id.to_partial_guild(http).await?;
        let bot_id = http.get_current_user().await?.id;

        if user.to_user_id() == guild.owner_id {
            return Ok(false);
        }

        let bot = guild.member(http, bot_id).await?;
        if !member_permissions(&guild, &bot).ban_members() {
            return Ok(false);
        }

        // Users who already left can still be banned by id
        let Ok(target) = guild.member(http, user.to_user_id()).await else {
            return Ok(true);
        };

        Ok(bot.user.id == guild.owner_id
            || top_role_position(&guild, &bot) > top_role_position(&guild, &target))
    }

    async fn ban(&self, guild_id: GuildId, user: PlatformUserId, reason: &str) -> WarningResult<()> {
        guild_id
            .ban_with_reason(self.http(), user.to_user_id(), 0, reason)
            .await?;
        info!("Banned user {user} in guild {guild_id}");
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: GuildId,
        user: PlatformUserId,
        until: DateTime<Utc>,
    ) -> WarningResult<()> {
        let mut member = self.member(guild_id, user).await?;
        member
            .disable_communication_until_datetime(self.http(), until.into())
            .await?;
        info!("Timed out user {user} in guild {guild_id} until {until}");
        Ok(())
    }

    async fn send_dm(&self, user: PlatformUserId, notice: &Notice) -> WarningResult<()> {
        user.to_user_id()
            .direct_message(self.http(), CreateMessage::new().embed(to_embed(notice)))
            .await?;
        debug!("Sent DM to user {user}");
        Ok(())
    }

    async fn send_channel_notice(&self, channel_id: ChannelId, notice: &Notice) -> WarningResult<()> {
        channel_id
            .send_message(self.http(), CreateMessage::new().embed(to_embed(notice)))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> WarningResult<()> {
        channel_id.delete_message(self.http(), message_id).await?;
        Ok(())
    }

    async fn set_voice_mute(&self, guild_id: GuildId, user: PlatformUserId, muted: bool) -> WarningResult<()> {
        guild_id
            .edit_member(self.http(), user.to_user_id(), EditMember::new().mute(muted))
            .await?;
        info!("Set server mute={muted} for user {user} in guild {guild_id}");
        Ok(())
    }

    async fn disconnect_voice(&self, guild_id: GuildId, user: PlatformUserId) -> WarningResult<()> {
        let member = self.member(guild_id, user).await?;
        member.disconnect_from_voice(self.http()).await?;
        info!("Disconnected user {user} from voice in guild {guild_id}");
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user: PlatformUserId,
        nickname: Option<String>,
    ) -> WarningResult<()> {
        // An empty nickname resets to the account name
        let builder = EditMember::new().nickname(nickname.unwrap_or_default());
        guild_id
            .edit_member(self.http(), user.to_user_id(), builder)
            .await
            .map_err(|e| WarningError::PermissionDenied(format!("cannot set nickname of {user}: {e}")))?;
        Ok(())
    }

    async fn reply_ephemeral(
        &self,
        interaction_id: InteractionId,
        token: String,
        notice: &Notice,
    ) -> WarningResult<()> {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .embed(to_embed(notice))
                .ephemeral(true),
        );
        self.http()
            .create_interaction_response(interaction_id, &token, &response, Vec::new())
            .await?;
        Ok(())
    }
}
