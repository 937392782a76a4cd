//! Warning system for Warden
//!
//! Issues violations through the backend, keeps a per-user restriction cache,
//! enforces restrictions on platform events and expires violations when their
//! window elapses.

mod backend;
mod cache;
mod error;
mod ids;
mod interceptor;
pub mod notify;
mod persistence;
mod platform;
mod policy;
mod service;
mod standing;
#[cfg(test)]
mod testing;
mod violation;

pub use backend::{
    ExpireViolationRequest, HttpBackend, IssueViolationRequest, ListViolationsQuery,
    SuspensionRequest, UserLookup, UserRecord, ViolationBackend,
};
#[cfg(test)]
pub use backend::MockViolationBackend;
pub use cache::{CachedViolation, RestrictionCache};
pub use error::{WarningError, WarningResult};
pub use ids::{IdentityMap, InternalUserId, PlatformUserId, ViolationId};
pub use interceptor::{
    InteractionFacts, Interceptors, MessageFacts, NicknameFacts, RateLimiter, VoiceAction,
    VoiceFacts,
};
pub use notify::Notice;
pub use persistence::{RestrictionSnapshot, SnapshotStore};
pub use platform::{to_embed, ModerationPlatform, SerenityPlatform};
#[cfg(test)]
pub use platform::MockModerationPlatform;
pub use policy::{ExpirationRule, PolicyTable};
pub use service::{SweepReport, SweeperHandle, WarningSystem};
pub use standing::{calculate_standing, AccountStanding, AccountStandingData, StandingRules};
pub use violation::{
    ActionApplied, ActionKind, Actor, Expiry, FeatureRestriction, PolicyViolated, ReviewOutcome,
    Severity, Violation, ViolationDraft, ViolationType,
};

/// Request type for the sweeper task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Expire everything that is due now
    SweepNow,
    /// Expire what is due for a single user
    SweepUser(PlatformUserId),
    /// Stop the sweeper task
    Shutdown,
}
