//! Test fixtures shared by the warning system's unit tests

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use poise::serenity_prelude::GuildId;

use super::backend::{
    ExpireViolationRequest, IssueViolationRequest, ListViolationsQuery, SuspensionRequest,
    UserLookup, UserRecord, ViolationBackend,
};
use super::ids::{InternalUserId, PlatformUserId, ViolationId};
use super::policy::PolicyTable;
use super::violation::{Severity, Violation, ViolationType};
use super::{WarningError, WarningResult};

pub const GUILD: u64 = 900;

/// An active violation issued a day ago that expires in a week
pub fn violation(id: i64, violation_type: ViolationType, severity: Severity) -> Violation {
    let now = Utc::now();
    Violation {
        id: ViolationId(id),
        user_id: InternalUserId(1),
        guild_id: GuildId::new(GUILD),
        violation_type,
        severity,
        policy_violated: PolicyTable::primary_policy(violation_type),
        reason: "test violation".to_string(),
        content_snapshot: None,
        context: None,
        evidence: None,
        restrictions: PolicyTable::restrictions_for_type(violation_type),
        actions_applied: Vec::new(),
        issued_by: InternalUserId(99),
        issued_at: now - Duration::days(1),
        expires_at: Some(now + Duration::days(7)),
        expired_at: None,
        review_requested: false,
        reviewed_by: None,
        reviewed_at: None,
        review_outcome: None,
        review_notes: None,
    }
}

#[derive(Default)]
struct FakeState {
    users: Vec<UserRecord>,
    violations: Vec<Violation>,
    issued: Vec<IssueViolationRequest>,
    expired: Vec<ExpireViolationRequest>,
    suspensions: Vec<SuspensionRequest>,
    fail_expire: HashSet<ViolationId>,
    fail_issue: bool,
    fail_list: bool,
    next_id: i64,
}

/// In-memory backend that behaves like the real one
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, platform: PlatformUserId, internal: InternalUserId) -> Self {
        self.state.lock().unwrap().users.push(UserRecord {
            id: internal,
            discord_id: platform,
        });
        self
    }

    /// Seed an existing violation
    pub fn seed(&self, violation: Violation) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(violation.id.0);
        state.violations.push(violation);
    }

    pub fn fail_expire_of(&self, id: ViolationId) {
        self.state.lock().unwrap().fail_expire.insert(id);
    }

    pub fn fail_issue(&self) {
        self.state.lock().unwrap().fail_issue = true;
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn recover_list(&self) {
        self.state.lock().unwrap().fail_list = false;
    }

    pub fn issued(&self) -> Vec<IssueViolationRequest> {
        self.state.lock().unwrap().issued.clone()
    }

    pub fn expired(&self) -> Vec<ExpireViolationRequest> {
        self.state.lock().unwrap().expired.clone()
    }

    pub fn suspensions(&self) -> Vec<SuspensionRequest> {
        self.state.lock().unwrap().suspensions.clone()
    }

    pub fn stored(&self, id: ViolationId) -> Option<Violation> {
        self.state
            .lock()
            .unwrap()
            .violations
            .iter()
            .find(|v| v.id == id)
            .cloned()
    }
}

fn unavailable() -> WarningError {
    WarningError::BackendStatus {
        status: 503,
        body: "unavailable".to_string(),
    }
}

#[async_trait::async_trait]
impl ViolationBackend for FakeBackend {
    async fn issue(&self, request: IssueViolationRequest) -> WarningResult<Violation> {
        let mut state = self.state.lock().unwrap();
        if state.fail_issue {
            return Err(unavailable());
        }

        state.next_id += 1;
        let violation = Violation {
            id: ViolationId(state.next_id),
            user_id: request.user_id,
            guild_id: request.guild_id,
            violation_type: request.violation_type,
            severity: request.severity,
            policy_violated: request.policy_violated,
            reason: request.reason.clone(),
            content_snapshot: request.content_snapshot.clone(),
            context: request.context.clone(),
            evidence: request.evidence.clone(),
            restrictions: request.restrictions.clone(),
            actions_applied: request.actions_applied.clone(),
            issued_by: request.issued_by,
            issued_at: Utc::now(),
            expires_at: request.expires_at,
            expired_at: None,
            review_requested: false,
            reviewed_by: None,
            reviewed_at: None,
            review_outcome: None,
            review_notes: None,
        };

        state.issued.push(request);
        state.violations.push(violation.clone());
        Ok(violation)
    }

    async fn list(&self, query: ListViolationsQuery) -> WarningResult<Vec<Violation>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(unavailable());
        }

        Ok(state
            .violations
            .iter()
            .filter(|v| query.user_id.is_none_or(|user| v.user_id == user))
            .filter(|v| query.guild_id.is_none_or(|guild| v.guild_id == guild))
            .filter(|v| query.include_expired || v.is_active())
            .cloned()
            .collect())
    }

    async fn expire(&self, request: ExpireViolationRequest) -> WarningResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_expire.contains(&request.violation_id) {
            return Err(unavailable());
        }

        let violation = state
            .violations
            .iter_mut()
            .find(|v| v.id == request.violation_id)
            .ok_or(WarningError::ViolationNotFound(request.violation_id))?;
        violation.expired_at.get_or_insert_with(Utc::now);
        state.expired.push(request);
        Ok(())
    }

    async fn get_user(&self, lookup: UserLookup) -> WarningResult<UserRecord> {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|user| match lookup {
                UserLookup::Id(id) => user.id == id,
                UserLookup::DiscordId(discord_id) => user.discord_id == discord_id,
            })
            .copied()
            .ok_or_else(|| WarningError::UserNotFound(format!("{lookup:?}")))
    }

    async fn record_suspension(&self, request: SuspensionRequest) -> WarningResult<()> {
        self.state.lock().unwrap().suspensions.push(request);
        Ok(())
    }
}
