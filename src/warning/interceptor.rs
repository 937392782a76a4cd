//! Restriction enforcement interceptors
//!
//! Event-driven checks for messages, voice state, component interactions and
//! nickname changes. They only read the restriction cache; a user missing
//! from it is a no-op that never reaches the backend or the platform.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use poise::serenity_prelude::{ChannelId, GuildId, InteractionId, Message, MessageId};
use regex::Regex;
use tracing::{debug, info, warn};

use super::cache::RestrictionCache;
use super::ids::PlatformUserId;
use super::notify::{interaction_blocked_notice, restriction_notice};
use super::platform::ModerationPlatform;
use super::violation::{Expiry, FeatureRestriction};
use crate::config::RateLimitConfig;
use crate::MODERATION_TARGET;

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+|\bdiscord\.gg/\w+").expect("link regex is valid")
});

/// Whether `content` contains a URL
#[must_use]
pub fn contains_link(content: &str) -> bool {
    LINK_RE.is_match(content)
}

#[derive(Debug, Clone)]
/// Sliding-window message counter per user
pub struct RateLimiter {
    recent: DashMap<PlatformUserId, VecDeque<DateTime<Utc>>>,
    max_messages: usize,
    window: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            recent: DashMap::new(),
            max_messages: usize::try_from(config.max_messages).unwrap_or(usize::MAX),
            window: Duration::seconds(i64::try_from(config.window_secs).unwrap_or(i64::MAX)),
        }
    }

    /// Drop timestamps that fell out of the window ending at `now`
    fn evict(&self, recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while recent.front().is_some_and(|at| now - *at >= self.window) {
            recent.pop_front();
        }
    }

    /// Count a message and report whether the window now holds too many
    pub fn exceeded(&self, user: PlatformUserId, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.entry(user).or_default();
        self.evict(&mut recent, now);
        recent.push_back(now);
        recent.len() > self.max_messages
    }

    /// Forget users with no message inside the window
    pub fn prune(&self, now: DateTime<Utc>) {
        self.recent.retain(|_, recent| {
            self.evict(recent, now);
            !recent.is_empty()
        });
    }
}

/// The parts of a message the interceptor looks at
#[derive(Debug, Clone)]
pub struct MessageFacts {
    pub author: PlatformUserId,
    /// Bots and system messages are never intercepted
    pub automated: bool,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub has_embed: bool,
    pub has_attachment: bool,
    pub has_link: bool,
    pub received_at: DateTime<Utc>,
}

impl MessageFacts {
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            author: message.author.id.into(),
            automated: message.author.bot || message.author.system,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            message_id: message.id,
            has_embed: !message.embeds.is_empty(),
            has_attachment: !message.attachments.is_empty(),
            has_link: contains_link(&message.content),
            received_at: Utc::now(),
        }
    }
}

/// First content restriction the message trips, if any
#[must_use]
pub fn content_violation(
    restrictions: &BTreeSet<FeatureRestriction>,
    facts: &MessageFacts,
) -> Option<FeatureRestriction> {
    [
        (FeatureRestriction::MessageEmbed, facts.has_embed),
        (FeatureRestriction::MessageAttach, facts.has_attachment),
        (FeatureRestriction::MessageLink, facts.has_link),
    ]
    .into_iter()
    .find(|(restriction, present)| *present && restrictions.contains(restriction))
    .map(|(restriction, _)| restriction)
}

/// Voice state as reported by the platform
#[derive(Debug, Clone, Copy)]
pub struct VoiceFacts {
    pub guild_id: GuildId,
    pub user: PlatformUserId,
    pub connected: bool,
    pub server_muted: bool,
    pub video: bool,
    pub streaming: bool,
}

/// Corrective action for a voice state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceAction {
    Mute,
    Disconnect(FeatureRestriction),
}

/// Actions required to bring a voice state in line with restrictions
#[must_use]
pub fn voice_actions(restrictions: &BTreeSet<FeatureRestriction>, facts: &VoiceFacts) -> Vec<VoiceAction> {
    let mut actions = Vec::new();
    if !facts.connected {
        return actions;
    }

    if restrictions.contains(&FeatureRestriction::VoiceSpeak) && !facts.server_muted {
        actions.push(VoiceAction::Mute);
    }

    if restrictions.contains(&FeatureRestriction::VoiceVideo) && facts.video {
        actions.push(VoiceAction::Disconnect(FeatureRestriction::VoiceVideo));
    } else if restrictions.contains(&FeatureRestriction::VoiceStream) && facts.streaming {
        actions.push(VoiceAction::Disconnect(FeatureRestriction::VoiceStream));
    }

    actions
}

/// A component interaction
#[derive(Debug, Clone)]
pub struct InteractionFacts {
    pub user: PlatformUserId,
    pub interaction_id: InteractionId,
    pub token: String,
    pub custom_id: String,
}

/// Whether a component's custom id marks it as adding a reaction
#[must_use]
pub fn is_reaction_component(custom_id: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| custom_id.starts_with(prefix.as_str()))
}

/// A member update that may have changed the nickname
#[derive(Debug, Clone)]
pub struct NicknameFacts {
    pub guild_id: GuildId,
    pub user: PlatformUserId,
    /// `None` when the previous member state was not cached
    pub previous: Option<Option<String>>,
    pub current: Option<String>,
}

/// Applies restrictions to platform events
#[derive(Clone)]
pub struct Interceptors {
    cache: RestrictionCache,
    platform: Arc<dyn ModerationPlatform>,
    rate_limiter: Arc<RateLimiter>,
    reaction_prefixes: Arc<Vec<String>>,
    /// Nicknames we set ourselves, so the resulting update is not reverted again
    pending_reverts: Arc<DashMap<(GuildId, PlatformUserId), Option<String>>>,
}

impl Interceptors {
    pub fn new(
        cache: RestrictionCache,
        platform: Arc<dyn ModerationPlatform>,
        rate_limit: RateLimitConfig,
        reaction_prefixes: Vec<String>,
    ) -> Self {
        Self {
            cache,
            platform,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit)),
            reaction_prefixes: Arc::new(reaction_prefixes),
            pending_reverts: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Check a new message; returns the restriction it was removed for
    pub async fn on_message(&self, facts: &MessageFacts) -> Option<FeatureRestriction> {
        if facts.automated {
            return None;
        }
        let restrictions = self.cache.restrictions_for(facts.author)?;

        let blocked = content_violation(&restrictions, facts).or_else(|| {
            let throttled = restrictions.iter().any(|r| r.is_rate_limit());
            (throttled && self.rate_limiter.exceeded(facts.author, facts.received_at))
                .then_some(FeatureRestriction::RateLimit)
        })?;

        info!(
            target: MODERATION_TARGET,
            user_id = %facts.author,
            channel_id = %facts.channel_id,
            message_id = %facts.message_id,
            restriction = ?blocked,
            "Blocked message from restricted user"
        );

        if let Err(e) = self
            .platform
            .delete_message(facts.channel_id, facts.message_id)
            .await
        {
            warn!("Failed to delete message {} from {}: {e}", facts.message_id, facts.author);
        }

        let (lapses, repeat_offense) = self.restriction_lapse(facts.author, blocked);
        let notice = restriction_notice(blocked, lapses, repeat_offense);
        if let Err(e) = self.platform.send_dm(facts.author, &notice).await {
            debug!("Could not DM {} about blocked message: {e}", facts.author);
        }

        Some(blocked)
    }

    /// When a restriction lapses and whether several violations carry it
    fn restriction_lapse(
        &self,
        user: PlatformUserId,
        restriction: FeatureRestriction,
    ) -> (Option<Expiry>, bool) {
        let carrying = self.cache.active_violations_carrying(user, restriction);
        if carrying.is_empty() {
            return (None, false);
        }

        let lapses = if carrying.iter().any(|v| v.is_permanent()) {
            Expiry::Never
        } else {
            carrying
                .iter()
                .filter_map(|v| v.expires_at)
                .max()
                .map_or(Expiry::Never, Expiry::At)
        };

        (Some(lapses), carrying.len() > 1)
    }

    /// Check a voice state change; returns the actions taken
    pub async fn on_voice_state(&self, facts: &VoiceFacts) -> Vec<VoiceAction> {
        let Some(restrictions) = self.cache.restrictions_for(facts.user) else {
            return Vec::new();
        };

        let actions = voice_actions(&restrictions, facts);
        for action in &actions {
            let result = match action {
                VoiceAction::Mute => self.platform.set_voice_mute(facts.guild_id, facts.user, true).await,
                VoiceAction::Disconnect(_) => self.platform.disconnect_voice(facts.guild_id, facts.user).await,
            };

            match result {
                Ok(()) => info!(
                    target: MODERATION_TARGET,
                    user_id = %facts.user,
                    guild_id = %facts.guild_id,
                    action = ?action,
                    "Enforced voice restriction"
                ),
                Err(e) => warn!("Failed voice enforcement {action:?} for {}: {e}", facts.user),
            }
        }

        actions
    }

    /// Check a component interaction; returns true when it was blocked
    pub async fn on_interaction(&self, facts: &InteractionFacts) -> bool {
        if !self.cache.has_restriction(facts.user, FeatureRestriction::ReactionAdd)
            || !is_reaction_component(&facts.custom_id, &self.reaction_prefixes)
        {
            return false;
        }

        info!(
            target: MODERATION_TARGET,
            user_id = %facts.user,
            custom_id = %facts.custom_id,
            "Blocked reaction interaction"
        );

        if let Err(e) = self
            .platform
            .reply_ephemeral(facts.interaction_id, facts.token.clone(), &interaction_blocked_notice())
            .await
        {
            warn!("Failed to answer blocked interaction from {}: {e}", facts.user);
        }

        true
    }

    /// Check a member update; returns true when the nickname was reverted
    pub async fn on_nickname_change(&self, facts: &NicknameFacts) -> bool {
        let key = (facts.guild_id, facts.user);
        if let Some((_, expected)) = self.pending_reverts.remove(&key) {
            if expected == facts.current {
                return false;
            }
        }

        if !self.cache.has_restriction(facts.user, FeatureRestriction::NicknameChange) {
            return false;
        }

        let Some(previous) = &facts.previous else {
            debug!("No cached nickname for {}, cannot revert", facts.user);
            return false;
        };
        if *previous == facts.current {
            return false;
        }

        self.pending_reverts.insert(key, previous.clone());
        match self
            .platform
            .set_nickname(facts.guild_id, facts.user, previous.clone())
            .await
        {
            Ok(()) => {
                info!(
                    target: MODERATION_TARGET,
                    user_id = %facts.user,
                    guild_id = %facts.guild_id,
                    "Reverted nickname change"
                );
                true
            }
            Err(e) => {
                self.pending_reverts.remove(&key);
                warn!("Failed to revert nickname of {}: {e}", facts.user);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warning::platform::MockModerationPlatform;
    use crate::warning::testing::violation;
    use crate::warning::{Severity, ViolationId, ViolationType, WarningError};

    const USER: PlatformUserId = PlatformUserId(4242);

    fn guild() -> GuildId {
        GuildId::new(77)
    }

    fn message(id: u64, at: DateTime<Utc>) -> MessageFacts {
        MessageFacts {
            author: USER,
            automated: false,
            guild_id: Some(guild()),
            channel_id: ChannelId::new(5),
            message_id: MessageId::new(id),
            has_embed: false,
            has_attachment: false,
            has_link: false,
            received_at: at,
        }
    }

    fn interceptors(cache: RestrictionCache, platform: MockModerationPlatform) -> Interceptors {
        Interceptors::new(
            cache,
            Arc::new(platform),
            RateLimitConfig::default(),
            vec!["react".to_string(), "reaction".to_string()],
        )
    }

    fn restricted(violation_type: ViolationType) -> RestrictionCache {
        let cache = RestrictionCache::new();
        cache.insert_violation(USER, violation(1, violation_type, Severity::Low));
        cache
    }

    #[test]
    fn test_link_detection() {
        assert!(contains_link("see https://example.com/x"));
        assert!(contains_link("WWW.example.org"));
        assert!(contains_link("join discord.gg/abc123"));
        assert!(!contains_link("no links here, just www"));
    }

    #[test]
    fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Utc::now();

        assert!(!limiter.exceeded(USER, start));
        assert!(!limiter.exceeded(USER, start + Duration::seconds(1)));
        assert!(!limiter.exceeded(USER, start + Duration::seconds(2)));
        assert!(limiter.exceeded(USER, start + Duration::seconds(3)));

        // Messages at 1, 2 and 3 are still inside the minute ending at 61
        assert!(limiter.exceeded(USER, start + Duration::seconds(61)));

        limiter.prune(start + Duration::seconds(200));
        assert!(limiter.recent.is_empty());
    }

    #[test]
    fn test_rate_limiter_window_slides() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Utc::now();

        let sent: Vec<bool> = [0, 58, 59, 61, 62]
            .into_iter()
            .map(|secs| limiter.exceeded(USER, start + Duration::seconds(secs)))
            .collect();

        // 58, 59, 61 and 62 are four messages within one minute
        assert_eq!(sent, [false, false, false, false, true]);
    }

    #[test]
    fn test_rate_limiter_prune_keeps_recent_senders() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let start = Utc::now();
        let other = PlatformUserId(77);

        limiter.exceeded(USER, start);
        limiter.exceeded(other, start + Duration::seconds(50));
        limiter.prune(start + Duration::seconds(70));

        assert!(!limiter.recent.contains_key(&USER));
        assert_eq!(limiter.recent.get(&other).map(|r| r.len()), Some(1));
    }

    #[tokio::test]
    async fn test_unrestricted_user_is_untouched() {
        // No expectations: any platform call panics
        let interceptors = interceptors(RestrictionCache::new(), MockModerationPlatform::new());
        let mut facts = message(1, Utc::now());
        facts.has_link = true;

        assert_eq!(interceptors.on_message(&facts).await, None);
    }

    #[tokio::test]
    async fn test_fourth_message_in_window_is_deleted() {
        let mut platform = MockModerationPlatform::new();
        platform
            .expect_delete_message()
            .withf(|_, message_id| *message_id == MessageId::new(4))
            .times(1)
            .returning(|_, _| Ok(()));
        platform.expect_send_dm().times(1).returning(|_, _| Ok(()));

        let interceptors = interceptors(restricted(ViolationType::Toxicity), platform);
        let start = Utc::now();

        for id in 1..=3 {
            let facts = message(id, start + Duration::seconds(i64::try_from(id).unwrap()));
            assert_eq!(interceptors.on_message(&facts).await, None);
        }
        let fourth = message(4, start + Duration::seconds(10));
        assert_eq!(
            interceptors.on_message(&fourth).await,
            Some(FeatureRestriction::RateLimit)
        );
    }

    #[tokio::test]
    async fn test_link_blocked_even_when_dm_fails() {
        let mut platform = MockModerationPlatform::new();
        platform.expect_delete_message().times(1).returning(|_, _| Ok(()));
        platform
            .expect_send_dm()
            .withf(|_, notice| notice.field_value("Restriction") == Some("Links"))
            .times(1)
            .returning(|_, _| Err(WarningError::PermissionDenied("DMs closed".to_string())));

        let interceptors = interceptors(restricted(ViolationType::Spam), platform);
        let mut facts = message(1, Utc::now());
        facts.has_link = true;

        assert_eq!(
            interceptors.on_message(&facts).await,
            Some(FeatureRestriction::MessageLink)
        );
    }

    #[tokio::test]
    async fn test_bot_messages_are_ignored() {
        let interceptors = interceptors(restricted(ViolationType::Spam), MockModerationPlatform::new());
        let mut facts = message(1, Utc::now());
        facts.automated = true;
        facts.has_link = true;

        assert_eq!(interceptors.on_message(&facts).await, None);
    }

    #[tokio::test]
    async fn test_repeat_offense_reported_in_dm() {
        let cache = RestrictionCache::new();
        cache.insert_violation(USER, violation(1, ViolationType::Spam, Severity::Low));
        cache.insert_violation(USER, violation(2, ViolationType::Advertising, Severity::Low));

        let mut platform = MockModerationPlatform::new();
        platform.expect_delete_message().returning(|_, _| Ok(()));
        platform
            .expect_send_dm()
            .withf(|_, notice| notice.description.contains("repeated"))
            .times(1)
            .returning(|_, _| Ok(()));

        let interceptors = interceptors(cache, platform);
        let mut facts = message(1, Utc::now());
        facts.has_link = true;
        interceptors.on_message(&facts).await;

        assert!(interceptors
            .cache
            .active_violations_carrying(USER, FeatureRestriction::MessageLink)
            .iter()
            .any(|v| v.id == ViolationId(2)));
    }

    #[test]
    fn test_voice_actions() {
        let restrictions = BTreeSet::from([FeatureRestriction::VoiceSpeak, FeatureRestriction::VoiceStream]);
        let mut facts = VoiceFacts {
            guild_id: guild(),
            user: USER,
            connected: true,
            server_muted: false,
            video: false,
            streaming: true,
        };

        assert_eq!(
            voice_actions(&restrictions, &facts),
            vec![
                VoiceAction::Mute,
                VoiceAction::Disconnect(FeatureRestriction::VoiceStream)
            ]
        );

        facts.server_muted = true;
        facts.streaming = false;
        facts.video = true;
        assert!(voice_actions(&restrictions, &facts).is_empty());

        facts.connected = false;
        facts.server_muted = false;
        assert!(voice_actions(&restrictions, &facts).is_empty());
    }

    #[tokio::test]
    async fn test_voice_mute_enforced() {
        let cache = RestrictionCache::new();
        let mut record = violation(1, ViolationType::Other, Severity::Low);
        record.restrictions = BTreeSet::from([FeatureRestriction::VoiceSpeak]);
        cache.insert_violation(USER, record);

        let mut platform = MockModerationPlatform::new();
        platform
            .expect_set_voice_mute()
            .withf(|_, _, muted| *muted)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let facts = VoiceFacts {
            guild_id: guild(),
            user: USER,
            connected: true,
            server_muted: false,
            video: true,
            streaming: false,
        };
        assert_eq!(
            interceptors(cache, platform).on_voice_state(&facts).await,
            vec![VoiceAction::Mute]
        );
    }

    #[tokio::test]
    async fn test_reaction_components_blocked() {
        let cache = RestrictionCache::new();
        let mut record = violation(1, ViolationType::Other, Severity::Low);
        record.restrictions = BTreeSet::from([FeatureRestriction::ReactionAdd]);
        cache.insert_violation(USER, record);

        let mut platform = MockModerationPlatform::new();
        platform
            .expect_reply_ephemeral()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let interceptors = interceptors(cache, platform);

        let mut facts = InteractionFacts {
            user: USER,
            interaction_id: InteractionId::new(9),
            token: "token".to_string(),
            custom_id: "reaction:thumbs_up".to_string(),
        };
        assert!(interceptors.on_interaction(&facts).await);

        facts.custom_id = "ticket:open".to_string();
        assert!(!interceptors.on_interaction(&facts).await);
    }

    #[tokio::test]
    async fn test_nickname_reverted_once() {
        let mut platform = MockModerationPlatform::new();
        platform
            .expect_set_nickname()
            .withf(|_, _, nickname| nickname.as_deref() == Some("original"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let interceptors = interceptors(restricted(ViolationType::Impersonation), platform);

        let change = NicknameFacts {
            guild_id: guild(),
            user: USER,
            previous: Some(Some("original".to_string())),
            current: Some("Server Admin".to_string()),
        };
        assert!(interceptors.on_nickname_change(&change).await);

        // The update caused by our own revert is left alone
        let echo = NicknameFacts {
            guild_id: guild(),
            user: USER,
            previous: Some(Some("Server Admin".to_string())),
            current: Some("original".to_string()),
        };
        assert!(!interceptors.on_nickname_change(&echo).await);
    }

    #[tokio::test]
    async fn test_nickname_without_restriction_or_history() {
        let interceptors = interceptors(restricted(ViolationType::Spam), MockModerationPlatform::new());
        let change = NicknameFacts {
            guild_id: guild(),
            user: USER,
            previous: Some(None),
            current: Some("new".to_string()),
        };
        assert!(!interceptors.on_nickname_change(&change).await);

        let interceptors = interceptors_with_nick_restriction();
        let unknown = NicknameFacts {
            previous: None,
            ..change
        };
        assert!(!interceptors.on_nickname_change(&unknown).await);
    }

    fn interceptors_with_nick_restriction() -> Interceptors {
        interceptors(restricted(ViolationType::Impersonation), MockModerationPlatform::new())
    }
}
