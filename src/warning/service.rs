//! Warning system service
//!
//! Owns the restriction cache and funnels every mutation of it through the
//! issuance, expiry and rehydration paths below. Per-user work is serialized
//! with the cache's user lock, taken once at each entry point.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use poise::serenity_prelude::{ChannelId, GuildId};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::backend::{
    ExpireViolationRequest, IssueViolationRequest, ListViolationsQuery, SuspensionRequest,
    UserLookup, ViolationBackend,
};
use super::cache::{CachedViolation, RestrictionCache};
use super::ids::{IdentityMap, InternalUserId, PlatformUserId, ViolationId};
use super::interceptor::Interceptors;
use super::notify::{
    expired_audit_notice, issued_audit_notice, suspension_audit_notice, suspension_notice,
    violation_notice, Notice,
};
use super::persistence::SnapshotStore;
use super::platform::ModerationPlatform;
use super::policy::PolicyTable;
use super::standing::{calculate_standing, AccountStanding, AccountStandingData, StandingRules};
use super::violation::{
    ActionApplied, ActionKind, Actor, FeatureRestriction, Violation, ViolationDraft, ViolationType,
};
use super::{SweepRequest, WarningError, WarningResult};
use crate::config::WarningConfig;
use crate::MODERATION_TARGET;

/// Longest timeout the platform accepts
const MAX_TIMEOUT_DAYS: i64 = 28;

/// Apply the enforcement-mode rules to a restriction set
///
/// Native timeouts and bans replace message throttling, so rate limits are
/// stripped; otherwise toxicity and evasion always get one.
#[must_use]
pub fn resolve_restrictions(
    mut restrictions: BTreeSet<FeatureRestriction>,
    violation_type: ViolationType,
    native: bool,
) -> BTreeSet<FeatureRestriction> {
    if native {
        restrictions.retain(|r| !r.is_rate_limit());
    } else if matches!(violation_type, ViolationType::Toxicity | ViolationType::Evasion) {
        restrictions.insert(FeatureRestriction::RateLimit);
    }
    restrictions
}

/// Native action for a violation expiring at `expires_at`
const fn native_action(expires_at: Option<DateTime<Utc>>) -> ActionKind {
    match expires_at {
        None => ActionKind::Ban,
        Some(_) => ActionKind::Timeout,
    }
}

/// End of a native timeout, capped at the platform ceiling
#[must_use]
pub fn timeout_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    expires_at.min(now + Duration::days(MAX_TIMEOUT_DAYS))
}

/// Steps run after a violation is durably stored, each best-effort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    Enforce,
    Notify,
    Audit,
    Standing,
    Snapshot,
}

impl FollowUp {
    const ORDER: [Self; 5] = [
        Self::Enforce,
        Self::Notify,
        Self::Audit,
        Self::Standing,
        Self::Snapshot,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Notify => "notify",
            Self::Audit => "audit",
            Self::Standing => "standing",
            Self::Snapshot => "snapshot",
        }
    }
}

/// A violation as it moves through the follow-up steps
struct Issued<'a> {
    violation: Violation,
    target: PlatformUserId,
    actor: &'a Actor,
    repeat_offense: bool,
    native: bool,
}

/// Outcome of one expiration sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<ViolationId>,
    pub failed: Vec<ViolationId>,
}

/// Handle to the background sweeper task
pub struct SweeperHandle {
    tx: Sender<SweepRequest>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the sweeper to do something outside its schedule
    ///
    /// # Errors
    /// Returns an error if the sweeper task has stopped.
    pub async fn request(&self, request: SweepRequest) -> WarningResult<()> {
        self.tx.send(request).await.map_err(|e| {
            WarningError::Other(format!("Failed to send sweep request: {e}"))
        })
    }

    /// Stop the sweeper and wait for it to finish
    pub async fn shutdown(self) {
        if self.tx.send(SweepRequest::Shutdown).await.is_err() {
            debug!("Sweeper already stopped");
        }
        if let Err(e) = self.task.await {
            error!("Sweeper task failed: {e}");
        }
    }
}

/// The warning system
#[derive(Clone)]
pub struct WarningSystem {
    backend: Arc<dyn ViolationBackend>,
    platform: Arc<dyn ModerationPlatform>,
    cache: RestrictionCache,
    identities: IdentityMap,
    interceptors: Interceptors,
    policy: Arc<PolicyTable>,
    rules: StandingRules,
    config: Arc<WarningConfig>,
    snapshots: SnapshotStore,
    /// (guild, user) pairs banned for reaching `Suspended`
    suspended: Arc<DashSet<(GuildId, PlatformUserId)>>,
    /// Set once the cache reflects the backend rather than the snapshot
    hydrated: Arc<AtomicBool>,
}

impl WarningSystem {
    pub fn new(
        config: WarningConfig,
        backend: Arc<dyn ViolationBackend>,
        platform: Arc<dyn ModerationPlatform>,
    ) -> Self {
        let cache = RestrictionCache::new();
        let interceptors = Interceptors::new(
            cache.clone(),
            Arc::clone(&platform),
            config.rate_limit,
            config.reaction_component_prefixes.clone(),
        );

        Self {
            backend,
            platform,
            cache,
            identities: IdentityMap::new(),
            interceptors,
            policy: Arc::new(PolicyTable::from_config(&config)),
            rules: StandingRules::from_config(&config),
            snapshots: SnapshotStore::new(&config.snapshot_path),
            suspended: Arc::new(DashSet::new()),
            hydrated: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &RestrictionCache {
        &self.cache
    }

    #[must_use]
    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    #[must_use]
    pub fn config(&self) -> &WarningConfig {
        &self.config
    }

    #[must_use]
    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Whether a rehydration from the backend has succeeded
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::Acquire)
    }

    /// Run a backend call under the configured deadline
    async fn rpc<T>(
        &self,
        procedure: &'static str,
        call: impl Future<Output = WarningResult<T>>,
    ) -> WarningResult<T> {
        let deadline = StdDuration::from_secs(self.config.rpc_timeout_secs);
        tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| WarningError::Timeout(procedure))?
    }

    /// Backend id for a Discord user
    ///
    /// # Errors
    /// Returns an error if the user is unknown to the backend or the lookup fails.
    pub async fn internal_id_for(&self, user: PlatformUserId) -> WarningResult<InternalUserId> {
        if let Some(id) = self.identities.internal_for(user) {
            return Ok(id);
        }

        let record = self
            .rpc("users.get", self.backend.get_user(UserLookup::DiscordId(user)))
            .await?;
        self.identities.insert(record.discord_id, record.id);
        Ok(record.id)
    }

    /// Discord user for a backend id
    ///
    /// # Errors
    /// Returns an error if the user is unknown to the backend or the lookup fails.
    pub async fn platform_id_for(&self, user: InternalUserId) -> WarningResult<PlatformUserId> {
        if let Some(id) = self.identities.platform_for(user) {
            return Ok(id);
        }

        let record = self
            .rpc("users.get", self.backend.get_user(UserLookup::Id(user)))
            .await?;
        self.identities.insert(record.discord_id, record.id);
        Ok(record.discord_id)
    }

    /// Issue a violation
    ///
    /// Returns the stored violation, or `None` if it could not be persisted.
    /// Everything after the backend write is best-effort.
    pub async fn issue_violation(&self, actor: &Actor, draft: ViolationDraft) -> Option<Violation> {
        let target = draft.target;
        let _guard = self.cache.lock_user(target).await;

        match self.try_issue(actor, draft).await {
            Ok(violation) => Some(violation),
            Err(e) => {
                error!(
                    target: MODERATION_TARGET,
                    user_id = %target,
                    issued_by = %actor.platform_id,
                    "Failed to issue violation: {e}"
                );
                None
            }
        }
    }

    async fn try_issue(&self, actor: &Actor, draft: ViolationDraft) -> WarningResult<Violation> {
        let now = Utc::now();
        let target = draft.target;
        let user_id = self.internal_id_for(target).await?;
        let issued_by = self.internal_id_for(actor.platform_id).await?;

        let rule = self.policy.expiration_rule(draft.violation_type, draft.severity);
        let repeat_offense = match draft.expiry {
            None => self.is_repeat_offense(user_id, draft.violation_type, now).await?,
            Some(_) => self
                .is_repeat_offense(user_id, draft.violation_type, now)
                .await
                .unwrap_or_else(|e| {
                    warn!("Repeat-offense check failed for {target}: {e}");
                    false
                }),
        };
        let expires_at = match draft.expiry {
            Some(expiry) => expiry.as_option(),
            None => rule.duration(repeat_offense).map(|duration| now + duration),
        };

        let native = rule.use_discord_timeout;
        let restrictions = resolve_restrictions(
            draft
                .restrictions
                .unwrap_or_else(|| PolicyTable::restrictions_for_type(draft.violation_type)),
            draft.violation_type,
            native,
        );

        let mut actions_applied = Vec::new();
        if !restrictions.is_empty() {
            actions_applied.push(ActionApplied::applied(ActionKind::Restriction, now));
        }
        if native {
            actions_applied.push(ActionApplied::pending(native_action(expires_at)));
        }

        let request = IssueViolationRequest {
            user_id,
            guild_id: draft.guild_id,
            violation_type: draft.violation_type,
            severity: draft.severity,
            policy_violated: draft
                .policy_violated
                .unwrap_or_else(|| PolicyTable::primary_policy(draft.violation_type)),
            reason: draft.reason,
            content_snapshot: draft.content_snapshot,
            context: draft.context,
            evidence: draft.evidence,
            restrictions,
            actions_applied,
            issued_by,
            expires_at,
        };

        let violation = self
            .rpc("violations.issue", self.backend.issue(request))
            .await?;
        self.cache.insert_violation(target, violation.clone());

        info!(
            target: MODERATION_TARGET,
            violation_id = %violation.id,
            user_id = %target,
            guild_id = %violation.guild_id,
            violation_type = %violation.violation_type,
            severity = %violation.severity,
            repeat_offense,
            native,
            "Violation issued"
        );

        let mut issued = Issued {
            violation,
            target,
            actor,
            repeat_offense,
            native,
        };
        for step in FollowUp::ORDER {
            if let Err(e) = self.follow_up(step, &mut issued).await {
                warn!(
                    target: MODERATION_TARGET,
                    violation_id = %issued.violation.id,
                    step = step.name(),
                    "Violation follow-up failed: {e}"
                );
            }
        }

        Ok(issued.violation)
    }

    async fn is_repeat_offense(
        &self,
        user_id: InternalUserId,
        violation_type: ViolationType,
        now: DateTime<Utc>,
    ) -> WarningResult<bool> {
        let window = Duration::days(i64::from(self.config.repeat_offense_window_days));
        let prior = self
            .rpc("violations.list", self.backend.list(ListViolationsQuery::active_for(user_id)))
            .await?;

        Ok(prior.iter().any(|v| {
            v.violation_type == violation_type && v.is_active() && v.issued_at >= now - window
        }))
    }

    async fn follow_up(&self, step: FollowUp, issued: &mut Issued<'_>) -> WarningResult<()> {
        match step {
            FollowUp::Enforce => {
                if !issued.native {
                    return Ok(());
                }
                let kind = self.enforce_native(&issued.violation, issued.target).await?;
                let now = Utc::now();
                for action in issued
                    .violation
                    .actions_applied
                    .iter_mut()
                    .filter(|action| action.kind == kind && !action.applied)
                {
                    *action = ActionApplied::applied(kind, now);
                }
                self.cache.update_violation(issued.violation.clone());
                Ok(())
            }
            FollowUp::Notify => {
                self.platform
                    .send_dm(issued.target, &violation_notice(&issued.violation))
                    .await
            }
            FollowUp::Audit => {
                let notice = issued_audit_notice(
                    &issued.violation,
                    issued.target,
                    issued.actor,
                    issued.repeat_offense,
                );
                self.audit(&notice).await
            }
            FollowUp::Standing => self
                .apply_standing(issued.target, issued.violation.guild_id, issued.violation.user_id)
                .await
                .map(|_| ()),
            FollowUp::Snapshot => self.save_snapshot().await,
        }
    }

    /// Ban for permanent violations, otherwise time out
    async fn enforce_native(&self, violation: &Violation, target: PlatformUserId) -> WarningResult<ActionKind> {
        let guild_id = violation.guild_id;
        match violation.expires_at {
            None => {
                let reason = format!("Violation #{}: {}", violation.id, violation.reason);
                self.platform.ban(guild_id, target, &reason).await?;
                info!(target: MODERATION_TARGET, violation_id = %violation.id, user_id = %target, "Applied ban");
                Ok(ActionKind::Ban)
            }
            Some(expires_at) => {
                let now = Utc::now();
                let until = timeout_until(expires_at, now);
                if until <= now {
                    return Err(WarningError::Other(format!(
                        "violation {} expires before a timeout could apply",
                        violation.id
                    )));
                }
                self.platform.timeout(guild_id, target, until).await?;
                info!(
                    target: MODERATION_TARGET,
                    violation_id = %violation.id,
                    user_id = %target,
                    until = %until,
                    "Applied timeout"
                );
                Ok(ActionKind::Timeout)
            }
        }
    }

    /// Post a notice to the mod-log channel, if one is configured
    async fn audit(&self, notice: &Notice) -> WarningResult<()> {
        let Some(channel) = self.config.modlog_channel_id else {
            return Ok(());
        };
        self.platform
            .send_channel_notice(ChannelId::new(channel), notice)
            .await
    }

    async fn compute_standing(
        &self,
        user_id: InternalUserId,
        guild_id: GuildId,
    ) -> WarningResult<AccountStandingData> {
        let query = ListViolationsQuery {
            user_id: Some(user_id),
            guild_id: Some(guild_id),
            include_expired: true,
        };
        let history = self.rpc("violations.list", self.backend.list(query)).await?;
        Ok(calculate_standing(&history, &self.rules))
    }

    /// Current standing of a user in a guild
    ///
    /// # Errors
    /// Returns an error if the user cannot be resolved or the backend fails.
    pub async fn standing(
        &self,
        user: PlatformUserId,
        guild_id: GuildId,
    ) -> WarningResult<AccountStandingData> {
        let user_id = self.internal_id_for(user).await?;
        self.compute_standing(user_id, guild_id).await
    }

    /// Recompute a user's standing and suspend them if it reached `Suspended`
    ///
    /// # Errors
    /// Returns an error if the history cannot be fetched or the suspension fails.
    pub async fn apply_standing(
        &self,
        target: PlatformUserId,
        guild_id: GuildId,
        user_id: InternalUserId,
    ) -> WarningResult<AccountStandingData> {
        let standing = self.compute_standing(user_id, guild_id).await?;
        info!(
            target: MODERATION_TARGET,
            user_id = %target,
            guild_id = %guild_id,
            standing = %standing.standing,
            severity_score = standing.severity_score,
            "Standing recomputed"
        );

        if standing.standing == AccountStanding::Suspended {
            self.handle_suspension(target, guild_id, user_id, &standing)
                .await?;
        }

        Ok(standing)
    }

    /// Ban a user whose standing reached `Suspended`
    ///
    /// Returns `Ok(false)` if this process already suspended the user in this
    /// guild. A failed attempt is forgotten so a later crossing can try again.
    ///
    /// # Errors
    /// Returns `PermissionDenied` if the bot cannot ban the user, or the
    /// platform error if the ban fails.
    pub async fn handle_suspension(
        &self,
        target: PlatformUserId,
        guild_id: GuildId,
        user_id: InternalUserId,
        standing: &AccountStandingData,
    ) -> WarningResult<bool> {
        let key = (guild_id, target);
        if !self.suspended.insert(key) {
            debug!("User {target} already suspended in guild {guild_id}");
            return Ok(false);
        }

        let result = self.suspend(target, guild_id, user_id, standing).await;
        if result.is_err() {
            self.suspended.remove(&key);
        }
        result.map(|()| true)
    }

    async fn suspend(
        &self,
        target: PlatformUserId,
        guild_id: GuildId,
        user_id: InternalUserId,
        standing: &AccountStandingData,
    ) -> WarningResult<()> {
        if !self.platform.can_ban(guild_id, target).await? {
            return Err(WarningError::PermissionDenied(format!(
                "cannot ban {target} in guild {guild_id}"
            )));
        }

        let appeal_channel = self.config.appeal_channel_id.map(ChannelId::new);
        if let Err(e) = self
            .platform
            .send_dm(target, &suspension_notice(standing, appeal_channel))
            .await
        {
            debug!("Could not DM {target} about suspension: {e}");
        }

        let reason = format!("Account suspended: standing reached {}", standing.standing);
        self.platform.ban(guild_id, target, &reason).await?;
        warn!(
            target: MODERATION_TARGET,
            user_id = %target,
            guild_id = %guild_id,
            severity_score = standing.severity_score,
            "User suspended"
        );

        let request = SuspensionRequest {
            user_id,
            guild_id,
            reason,
            severity_score: standing.severity_score,
            issued_by: self.config.system_actor_id,
        };
        if let Err(e) = self
            .rpc("suspensions.record", self.backend.record_suspension(request))
            .await
        {
            error!("Failed to record suspension of {target}: {e}");
        }

        if let Err(e) = self
            .audit(&suspension_audit_notice(target, guild_id, standing))
            .await
        {
            warn!("Failed to post suspension audit for {target}: {e}");
        }

        Ok(())
    }

    /// Expire a violation now
    ///
    /// Returns `Ok(false)` when it was already expired.
    ///
    /// # Errors
    /// Returns `ViolationNotFound` for unknown ids, `NotYetDue` if not forced
    /// and the violation has not elapsed, or the backend error.
    pub async fn expire_violation(
        &self,
        id: ViolationId,
        expired_by: InternalUserId,
        forced: bool,
    ) -> WarningResult<bool> {
        let cached = self.cache.get(id).ok_or(WarningError::ViolationNotFound(id))?;

        let expired = {
            let _guard = self.cache.lock_user(cached.platform_user).await;
            self.expire_locked(id, expired_by, forced, Utc::now()).await?
        };

        if expired {
            if let Err(e) = self.save_snapshot().await {
                warn!("Failed to save restriction snapshot: {e}");
            }
        }
        Ok(expired)
    }

    /// Expire one violation; the caller holds the user's lock
    async fn expire_locked(
        &self,
        id: ViolationId,
        expired_by: InternalUserId,
        forced: bool,
        now: DateTime<Utc>,
    ) -> WarningResult<bool> {
        let cached = self.cache.get(id).ok_or(WarningError::ViolationNotFound(id))?;
        if !cached.violation.is_active() {
            debug!("Violation {id} already expired");
            return Ok(false);
        }
        if !forced && !cached.violation.is_due_for_expiry(now) {
            return Err(WarningError::NotYetDue(id));
        }

        self.rpc(
            "violations.expire",
            self.backend.expire(ExpireViolationRequest {
                violation_id: id,
                expired_by,
            }),
        )
        .await?;

        let expired = match self.cache.expire_violation(id, now, forced) {
            Ok(expired) => expired,
            Err(WarningError::AlreadyExpired(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let user = expired.platform_user;
        let violation = &expired.violation;

        if violation.restrictions.contains(&FeatureRestriction::VoiceSpeak)
            && !self.cache.has_restriction(user, FeatureRestriction::VoiceSpeak)
        {
            // Fails harmlessly when the user is not in a voice channel
            match self.platform.set_voice_mute(violation.guild_id, user, false).await {
                Ok(()) => info!(target: MODERATION_TARGET, user_id = %user, "Voice mute lifted"),
                Err(e) => debug!("Could not lift voice mute of {user}: {e}"),
            }
        }
        match self.compute_standing(violation.user_id, violation.guild_id).await {
            Ok(standing) => info!(
                target: MODERATION_TARGET,
                user_id = %user,
                standing = %standing.standing,
                severity_score = standing.severity_score,
                "Standing recomputed after expiry"
            ),
            Err(e) => warn!("Failed to recompute standing of {user}: {e}"),
        }

        if let Err(e) = self.audit(&expired_audit_notice(violation, user, forced)).await {
            warn!("Failed to post expiry audit for violation {id}: {e}");
        }

        Ok(true)
    }

    /// Expire every cached violation whose window has elapsed
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep(now, None).await
    }

    /// Expire the elapsed violations of one user
    pub async fn sweep_user(&self, user: PlatformUserId, now: DateTime<Utc>) -> SweepReport {
        self.sweep(now, Some(user)).await
    }

    async fn sweep(&self, now: DateTime<Utc>, only: Option<PlatformUserId>) -> SweepReport {
        let mut report = SweepReport::default();

        for id in self.cache.due_for_expiry(now) {
            let Some(cached) = self.cache.get(id) else {
                continue;
            };
            if only.is_some_and(|user| user != cached.platform_user) {
                continue;
            }

            let result = {
                let _guard = self.cache.lock_user(cached.platform_user).await;
                self.expire_locked(id, self.config.system_actor_id, false, now)
                    .await
            };

            match result {
                Ok(true) => report.expired.push(id),
                Ok(false) => {}
                Err(e) => {
                    error!(violation_id = %id, "Failed to expire violation: {e}");
                    report.failed.push(id);
                }
            }
        }

        if !report.expired.is_empty() {
            if let Err(e) = self.save_snapshot().await {
                warn!("Failed to save restriction snapshot: {e}");
            }
        }

        if report.expired.is_empty() && report.failed.is_empty() {
            debug!("Sweep found nothing to expire");
        } else {
            info!(
                expired = report.expired.len(),
                failed = report.failed.len(),
                "Expiration sweep finished"
            );
        }

        report
    }

    /// Seed the cache from the local snapshot, if there is one
    pub async fn load_snapshot(&self) -> bool {
        match self.snapshots.load().await {
            Some(snapshot) => {
                self.cache.restore(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Persist the restriction cache
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    pub async fn save_snapshot(&self) -> WarningResult<()> {
        self.snapshots.save(&self.cache.snapshot()).await
    }

    /// Replace the cache with the backend's active violations
    ///
    /// On failure the cache is left as it was and the sweeper retries on
    /// its next tick.
    ///
    /// # Errors
    /// Returns an error if the active-violation list cannot be fetched.
    pub async fn rehydrate(&self) -> WarningResult<usize> {
        let violations = self
            .rpc("violations.list", self.backend.list(ListViolationsQuery::all_active()))
            .await?;

        let mut cached = Vec::with_capacity(violations.len());
        for violation in violations {
            match self.platform_id_for(violation.user_id).await {
                Ok(platform_user) => cached.push(CachedViolation {
                    platform_user,
                    violation,
                }),
                Err(e) => warn!(
                    violation_id = %violation.id,
                    "Skipping violation of unresolvable user {}: {e}",
                    violation.user_id
                ),
            }
        }

        let count = cached.len();
        self.cache.rehydrate(cached);
        self.hydrated.store(true, Ordering::Release);
        info!(
            violations = count,
            restricted_users = self.cache.restricted_user_count(),
            "Restriction cache rehydrated"
        );
        Ok(count)
    }

    /// Start the sweeper task
    ///
    /// Sweeps once right away, then every `every`, and on request.
    pub fn start_sweeper(&self, every: StdDuration) -> SweeperHandle {
        let (tx, rx) = mpsc::channel::<SweepRequest>(100);
        let system = self.clone();
        let task = tokio::spawn(async move {
            system.sweeper_task(rx, every).await;
        });

        SweeperHandle { tx, task }
    }

    async fn sweeper_task(&self, mut rx: Receiver<SweepRequest>, every: StdDuration) {
        info!("Starting expiration sweeper with {}s interval", every.as_secs());

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        SweepRequest::SweepNow => {
                            info!("Received request to sweep all violations");
                            self.sweep_expired(Utc::now()).await;
                        }
                        SweepRequest::SweepUser(user) => {
                            debug!("Received request to sweep violations of {user}");
                            self.sweep_user(user, Utc::now()).await;
                        }
                        SweepRequest::Shutdown => {
                            info!("Received shutdown request for sweeper");
                            break;
                        }
                    }
                },

                _ = interval.tick() => self.scheduled_sweep(Utc::now()).await,
            }
        }

        info!("Expiration sweeper shut down");
    }

    /// Work done on every sweeper tick
    ///
    /// Until a rehydration succeeds the cache may hold snapshot restrictions
    /// the backend no longer backs, so each tick retries it first.
    async fn scheduled_sweep(&self, now: DateTime<Utc>) {
        if !self.is_hydrated() {
            match self.rehydrate().await {
                Ok(count) => {
                    info!(violations = count, "Rehydration retry succeeded");
                    if let Err(e) = self.save_snapshot().await {
                        warn!("Failed to save restriction snapshot: {e}");
                    }
                }
                Err(e) => warn!("Rehydration retry failed, still enforcing from snapshot: {e}"),
            }
        }

        self.sweep_expired(now).await;
        self.interceptors.rate_limiter().prune(now);
    }
}
