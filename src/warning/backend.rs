//! Violations backend
//!
//! The backend owns violation records and user identities. This module holds
//! the wire payloads and the `ViolationBackend` seam; `HttpBackend` is a thin
//! JSON-over-HTTP adapter for it.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::GuildId;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ids::{InternalUserId, PlatformUserId, ViolationId};
use super::violation::{ActionApplied, FeatureRestriction, PolicyViolated, Severity, Violation, ViolationType};
use super::{WarningError, WarningResult};

/// Payload for `violations.issue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueViolationRequest {
    pub user_id: InternalUserId,
    pub guild_id: GuildId,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub policy_violated: PolicyViolated,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub restrictions: BTreeSet<FeatureRestriction>,
    pub actions_applied: Vec<ActionApplied>,
    pub issued_by: InternalUserId,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Filter for `violations.list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListViolationsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<InternalUserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    pub include_expired: bool,
}

impl ListViolationsQuery {
    /// Every active violation the backend knows of
    #[must_use]
    pub fn all_active() -> Self {
        Self::default()
    }

    /// Active violations of one user
    #[must_use]
    pub fn active_for(user_id: InternalUserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }
}

/// Payload for `violations.expire`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireViolationRequest {
    pub violation_id: ViolationId,
    pub expired_by: InternalUserId,
}

/// Key for `users.get`, serialized as `{"id": ..}` or `{"discordId": ..}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserLookup {
    Id(InternalUserId),
    DiscordId(PlatformUserId),
}

/// Identity pair returned by `users.get`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: InternalUserId,
    pub discord_id: PlatformUserId,
}

/// Payload for `suspensions.record`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionRequest {
    pub user_id: InternalUserId,
    pub guild_id: GuildId,
    pub reason: String,
    pub severity_score: u32,
    pub issued_by: InternalUserId,
}

/// Remote source of truth for violations and identities
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ViolationBackend: Send + Sync {
    /// Persist a new violation; the backend assigns id and `issuedAt`
    async fn issue(&self, request: IssueViolationRequest) -> WarningResult<Violation>;

    async fn list(&self, query: ListViolationsQuery) -> WarningResult<Vec<Violation>>;

    async fn expire(&self, request: ExpireViolationRequest) -> WarningResult<()>;

    /// Resolve a user by either id
    async fn get_user(&self, lookup: UserLookup) -> WarningResult<UserRecord>;

    async fn record_suspension(&self, request: SuspensionRequest) -> WarningResult<()>;
}

/// `ViolationBackend` over plain JSON POSTs to `{base_url}/{procedure}`
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Build a backend client
    ///
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> WarningResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, procedure: &str) -> String {
        format!("{}/{procedure}", self.base_url)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        procedure: &str,
        body: &B,
    ) -> WarningResult<reqwest::Response> {
        debug!(procedure, "Backend call");

        let mut request = self.client.post(self.url(procedure)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(WarningError::BackendStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn call<B, R>(&self, procedure: &str, body: &B) -> WarningResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.post(procedure, body).await?;
        Ok(response.json::<R>().await?)
    }
}

#[async_trait::async_trait]
impl ViolationBackend for HttpBackend {
    async fn issue(&self, request: IssueViolationRequest) -> WarningResult<Violation> {
        self.call("violations.issue", &request).await
    }

    async fn list(&self, query: ListViolationsQuery) -> WarningResult<Vec<Violation>> {
        self.call("violations.list", &query).await
    }

    async fn expire(&self, request: ExpireViolationRequest) -> WarningResult<()> {
        self.post("violations.expire", &request).await.map(|_| ())
    }

    async fn get_user(&self, lookup: UserLookup) -> WarningResult<UserRecord> {
        match self.call("users.get", &lookup).await {
            Err(WarningError::BackendStatus { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Err(WarningError::UserNotFound(format!("{lookup:?}")))
            }
            other => other,
        }
    }

    async fn record_suspension(&self, request: SuspensionRequest) -> WarningResult<()> {
        self.post("suspensions.record", &request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_lookup_wire_shape() {
        let by_id = serde_json::to_value(UserLookup::Id(InternalUserId(5))).unwrap();
        assert_eq!(by_id, serde_json::json!({ "id": 5 }));

        let by_discord = serde_json::to_value(UserLookup::DiscordId(PlatformUserId(81))).unwrap();
        assert_eq!(by_discord, serde_json::json!({ "discordId": "81" }));
    }

    #[test]
    fn test_list_query_omits_unset_filters() {
        let value = serde_json::to_value(ListViolationsQuery::all_active()).unwrap();
        assert_eq!(value, serde_json::json!({ "includeExpired": false }));

        let value = serde_json::to_value(ListViolationsQuery::active_for(InternalUserId(3))).unwrap();
        assert_eq!(value["userId"], 3);
    }

    #[test]
    fn test_issue_request_field_names() {
        let request = IssueViolationRequest {
            user_id: InternalUserId(1),
            guild_id: GuildId::new(99),
            violation_type: ViolationType::Advertising,
            severity: Severity::High,
            policy_violated: PolicyViolated::AdvertisingPolicy,
            reason: "invite links".to_string(),
            content_snapshot: None,
            context: None,
            evidence: Some("https://example.com/log".to_string()),
            restrictions: BTreeSet::from([FeatureRestriction::MessageLink]),
            actions_applied: Vec::new(),
            issued_by: InternalUserId(2),
            expires_at: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "ADVERTISING");
        assert_eq!(value["policyViolated"], "ADVERTISING_POLICY");
        assert_eq!(value["restrictions"], serde_json::json!(["MESSAGE_LINK"]));
        assert!(value["expiresAt"].is_null());
        assert!(value.get("contentSnapshot").is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let backend = HttpBackend::new("http://localhost:3000/rpc/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(backend.url("violations.list"), "http://localhost:3000/rpc/violations.list");
    }
}
