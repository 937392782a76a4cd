use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, GuildMemberUpdateEvent, Interaction, Member,
    Message, Ready, VoiceState,
};
use tracing::{debug, info, warn};

use crate::warning::{InteractionFacts, MessageFacts, NicknameFacts, VoiceFacts};
use crate::{Data, EVENT_TARGET};

/// Routes gateway events to the restriction interceptors
pub struct Handler {
    data: Data,
}

impl Handler {
    #[must_use]
    pub const fn new(data: Data) -> Self {
        Self { data }
    }
}

/// Restriction-relevant parts of a voice state; `None` outside guilds and for bots
fn voice_facts(state: &VoiceState) -> Option<VoiceFacts> {
    let guild_id = state.guild_id?;
    if state.member.as_ref().is_some_and(|member| member.user.bot) {
        return None;
    }

    Some(VoiceFacts {
        guild_id,
        user: state.user_id.into(),
        connected: state.channel_id.is_some(),
        server_muted: state.mute,
        video: state.self_video,
        streaming: state.self_stream.unwrap_or(false),
    })
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(
            restricted_users = self.data.warnings().cache().restricted_user_count(),
            "Cache ready! The bot is in {guild_count} guild(s)"
        );
    }

    async fn message(&self, _ctx: Context, message: Message) {
        if message.guild_id.is_none() {
            return;
        }

        let facts = MessageFacts::from_message(&message);
        if let Some(restriction) = self.data.warnings().interceptors().on_message(&facts).await {
            debug!(
                target: EVENT_TARGET,
                user_id = %facts.author,
                restriction = %restriction,
                "Message intercepted"
            );
        }
    }

    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(facts) = voice_facts(&new) else {
            return;
        };

        let actions = self.data.warnings().interceptors().on_voice_state(&facts).await;
        if !actions.is_empty() {
            debug!(target: EVENT_TARGET, user_id = %facts.user, ?actions, "Voice state intercepted");
        }
    }

    async fn interaction_create(&self, _ctx: Context, interaction: Interaction) {
        let Interaction::Component(component) = interaction else {
            return;
        };

        let facts = InteractionFacts {
            user: component.user.id.into(),
            interaction_id: component.id,
            token: component.token.clone(),
            custom_id: component.data.custom_id.clone(),
        };
        if self.data.warnings().interceptors().on_interaction(&facts).await {
            debug!(target: EVENT_TARGET, user_id = %facts.user, "Interaction intercepted");
        }
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        if event.user.bot {
            return;
        }

        let facts = NicknameFacts {
            guild_id: event.guild_id,
            user: event.user.id.into(),
            previous: old_if_available.map(|member| member.nick),
            current: event.nick.clone(),
        };
        if self.data.warnings().interceptors().on_nickname_change(&facts).await {
            debug!(target: EVENT_TARGET, user_id = %facts.user, "Nickname change intercepted");
        }
    }
}
