//! Restriction cache
//!
//! Process-wide view of who is restricted from what, plus the violations that
//! justify each restriction. Lookups by platform id are O(1); mutations go
//! through the methods here and are serialized per user by the caller holding
//! `lock_user`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::ids::{PlatformUserId, ViolationId};
use super::persistence::RestrictionSnapshot;
use super::violation::{FeatureRestriction, Violation};
use super::{WarningError, WarningResult};

/// A violation together with the platform id it is enforced against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedViolation {
    pub platform_user: PlatformUserId,
    pub violation: Violation,
}

/// Cache of active restrictions and the violations behind them
#[derive(Clone, Default)]
pub struct RestrictionCache {
    /// Active restrictions per platform user
    restrictions: Arc<DashMap<PlatformUserId, BTreeSet<FeatureRestriction>>>,
    /// Known violations by id
    violations: Arc<DashMap<ViolationId, CachedViolation>>,
    /// Per-user serialization of read-modify-write sequences
    locks: Arc<DashMap<PlatformUserId, Arc<Mutex<()>>>>,
}

impl RestrictionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutation lock for one user
    pub async fn lock_user(&self, user: PlatformUserId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Active restrictions for a user, `None` when unrestricted
    #[must_use]
    pub fn restrictions_for(&self, user: PlatformUserId) -> Option<BTreeSet<FeatureRestriction>> {
        self.restrictions.get(&user).map(|entry| entry.value().clone())
    }

    /// Whether a user currently holds `restriction` (legacy alias folded)
    #[must_use]
    pub fn has_restriction(&self, user: PlatformUserId, restriction: FeatureRestriction) -> bool {
        self.restrictions
            .get(&user)
            .is_some_and(|held| held.iter().any(|r| restriction.covers(*r)))
    }

    /// Number of users with at least one restriction
    #[must_use]
    pub fn restricted_user_count(&self) -> usize {
        self.restrictions.len()
    }

    /// Get a cached violation by id
    #[must_use]
    pub fn get(&self, id: ViolationId) -> Option<CachedViolation> {
        self.violations.get(&id).map(|entry| entry.value().clone())
    }

    /// Record a newly issued violation and merge its restrictions into the user's set
    pub fn insert_violation(&self, platform_user: PlatformUserId, violation: Violation) {
        if violation.is_active() && !violation.restrictions.is_empty() {
            self.restrictions
                .entry(platform_user)
                .or_default()
                .extend(violation.restrictions.iter().copied());
        }

        self.violations.insert(
            violation.id,
            CachedViolation {
                platform_user,
                violation,
            },
        );
    }

    /// Replace an already cached violation without touching restrictions
    pub fn update_violation(&self, violation: Violation) {
        if let Some(mut entry) = self.violations.get_mut(&violation.id) {
            entry.violation = violation;
        }
    }

    /// All cached violations for a user
    #[must_use]
    pub fn violations_for(&self, user: PlatformUserId) -> Vec<Violation> {
        let mut found: Vec<Violation> = self
            .violations
            .iter()
            .filter(|entry| entry.value().platform_user == user)
            .map(|entry| entry.value().violation.clone())
            .collect();
        found.sort_by_key(|v| v.id);
        found
    }

    /// Active violations of a user that carry `restriction`
    #[must_use]
    pub fn active_violations_carrying(
        &self,
        user: PlatformUserId,
        restriction: FeatureRestriction,
    ) -> Vec<Violation> {
        self.violations_for(user)
            .into_iter()
            .filter(|v| v.is_active() && v.carries(restriction))
            .collect()
    }

    /// Ids of violations whose window has elapsed but which are not yet expired
    #[must_use]
    pub fn due_for_expiry(&self, now: DateTime<Utc>) -> Vec<ViolationId> {
        let mut due: Vec<ViolationId> = self
            .violations
            .iter()
            .filter(|entry| entry.value().violation.is_due_for_expiry(now))
            .map(|entry| *entry.key())
            .collect();
        due.sort();
        due
    }

    /// Mark a cached violation expired and drop restrictions nothing else needs
    ///
    /// # Errors
    /// Returns `ViolationNotFound` for unknown ids and `AlreadyExpired` if the
    /// violation was already expired, in which case nothing changes.
    pub fn expire_violation(
        &self,
        id: ViolationId,
        now: DateTime<Utc>,
        forced: bool,
    ) -> WarningResult<CachedViolation> {
        let expired = {
            let mut entry = self
                .violations
                .get_mut(&id)
                .ok_or(WarningError::ViolationNotFound(id))?;
            entry.violation.expire(now, forced)?;
            entry.value().clone()
        };

        let user = expired.platform_user;
        let still_required: BTreeSet<FeatureRestriction> = self
            .violations_for(user)
            .iter()
            .filter(|v| v.is_active())
            .flat_map(|v| v.restrictions.iter().copied())
            .collect();

        let now_empty = self.restrictions.get_mut(&user).is_some_and(|mut held| {
            for restriction in &expired.violation.restrictions {
                if !still_required.contains(restriction) {
                    held.remove(restriction);
                }
            }
            held.is_empty()
        });

        if now_empty {
            self.restrictions.remove_if(&user, |_, held| held.is_empty());
        }

        Ok(expired)
    }

    /// Replace everything known about a set of users with backend state
    ///
    /// Users absent from `violations` lose their cached restrictions.
    pub fn rehydrate(&self, violations: Vec<CachedViolation>) {
        self.violations.clear();
        self.restrictions.clear();

        for cached in violations {
            self.insert_violation(cached.platform_user, cached.violation);
        }
    }

    /// Seed restrictions from a disk snapshot
    pub fn restore(&self, snapshot: &RestrictionSnapshot) {
        for (user, restrictions) in &snapshot.restrictions {
            if restrictions.is_empty() {
                continue;
            }
            self.restrictions
                .entry(*user)
                .or_default()
                .extend(restrictions.iter().copied());
        }
    }

    /// Capture the restriction map for persistence
    #[must_use]
    pub fn snapshot(&self) -> RestrictionSnapshot {
        let restrictions: BTreeMap<PlatformUserId, BTreeSet<FeatureRestriction>> = self
            .restrictions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        RestrictionSnapshot::new(restrictions, Utc::now())
    }

    /// Restrictions implied by active violations, per user
    #[must_use]
    pub fn derived_restrictions(&self) -> HashMap<PlatformUserId, BTreeSet<FeatureRestriction>> {
        let mut derived: HashMap<PlatformUserId, BTreeSet<FeatureRestriction>> = HashMap::new();
        for entry in self.violations.iter() {
            let cached = entry.value();
            if cached.violation.is_active() && !cached.violation.restrictions.is_empty() {
                derived
                    .entry(cached.platform_user)
                    .or_default()
                    .extend(cached.violation.restrictions.iter().copied());
            }
        }
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warning::testing::violation;
    use crate::warning::{Severity, ViolationType};
    use chrono::Duration;

    const ALICE: PlatformUserId = PlatformUserId(1001);
    const BOB: PlatformUserId = PlatformUserId(1002);

    fn current_map(cache: &RestrictionCache) -> HashMap<PlatformUserId, BTreeSet<FeatureRestriction>> {
        cache.snapshot().restrictions.into_iter().collect()
    }

    #[test]
    fn test_absent_user_is_unrestricted() {
        let cache = RestrictionCache::new();
        assert!(cache.restrictions_for(ALICE).is_none());
        assert!(!cache.has_restriction(ALICE, FeatureRestriction::MessageLink));
    }

    #[test]
    fn test_insert_merges_restrictions() {
        let cache = RestrictionCache::new();
        cache.insert_violation(ALICE, violation(1, ViolationType::Impersonation, Severity::Low));
        cache.insert_violation(ALICE, violation(2, ViolationType::Toxicity, Severity::Low));

        let held = cache.restrictions_for(ALICE).unwrap();
        assert!(held.contains(&FeatureRestriction::NicknameChange));
        assert!(held.contains(&FeatureRestriction::RateLimit));
        assert!(cache.restrictions_for(BOB).is_none());
    }

    #[test]
    fn test_expiry_keeps_restrictions_other_violations_need() {
        let now = Utc::now();
        let mut spam = violation(1, ViolationType::Spam, Severity::Low);
        spam.expires_at = Some(now - Duration::minutes(1));
        let toxicity = violation(2, ViolationType::Toxicity, Severity::Low);

        let cache = RestrictionCache::new();
        cache.insert_violation(ALICE, spam);
        cache.insert_violation(ALICE, toxicity);

        cache.expire_violation(ViolationId(1), now, false).unwrap();

        // Toxicity still needs the rate limit; spam's link/embed bans go away
        let held = cache.restrictions_for(ALICE).unwrap();
        assert_eq!(held, BTreeSet::from([FeatureRestriction::RateLimit]));
    }

    #[test]
    fn test_expiring_last_violation_clears_user() {
        let now = Utc::now();
        let cache = RestrictionCache::new();
        cache.insert_violation(ALICE, violation(1, ViolationType::Nsfw, Severity::Medium));

        cache.expire_violation(ViolationId(1), now, true).unwrap();
        assert!(cache.restrictions_for(ALICE).is_none());
        assert_eq!(cache.restricted_user_count(), 0);
    }

    #[test]
    fn test_double_expiry_is_rejected_without_side_effects() {
        let now = Utc::now();
        let cache = RestrictionCache::new();
        cache.insert_violation(ALICE, violation(1, ViolationType::Spam, Severity::Low));
        cache.expire_violation(ViolationId(1), now, true).unwrap();

        // Re-add a restriction by an unrelated violation; a second expiry must not strip it
        cache.insert_violation(ALICE, violation(2, ViolationType::Spam, Severity::Low));
        let before = cache.restrictions_for(ALICE);
        assert!(matches!(
            cache.expire_violation(ViolationId(1), now, true),
            Err(WarningError::AlreadyExpired(_))
        ));
        assert_eq!(cache.restrictions_for(ALICE), before);

        assert!(matches!(
            cache.expire_violation(ViolationId(99), now, true),
            Err(WarningError::ViolationNotFound(_))
        ));
    }

    #[test]
    fn test_cache_matches_union_of_active_violations() {
        let now = Utc::now();
        let cache = RestrictionCache::new();
        let types = [
            ViolationType::Spam,
            ViolationType::Nsfw,
            ViolationType::Impersonation,
            ViolationType::Evasion,
            ViolationType::Privacy,
            ViolationType::Advertising,
        ];

        for (i, violation_type) in types.iter().enumerate() {
            let user = if i % 2 == 0 { ALICE } else { BOB };
            cache.insert_violation(user, violation(i as i64, *violation_type, Severity::Low));
            assert_eq!(current_map(&cache), cache.derived_restrictions());
        }

        for id in [0, 3, 4] {
            cache.expire_violation(ViolationId(id), now, true).unwrap();
            assert_eq!(current_map(&cache), cache.derived_restrictions());
        }
    }

    #[test]
    fn test_due_for_expiry() {
        let now = Utc::now();
        let mut due = violation(1, ViolationType::Spam, Severity::Low);
        due.expires_at = Some(now - Duration::seconds(1));
        let mut permanent = violation(2, ViolationType::Spam, Severity::Low);
        permanent.expires_at = None;
        let future = violation(3, ViolationType::Spam, Severity::Low);

        let cache = RestrictionCache::new();
        cache.insert_violation(ALICE, due);
        cache.insert_violation(ALICE, permanent);
        cache.insert_violation(BOB, future);

        assert_eq!(cache.due_for_expiry(now), vec![ViolationId(1)]);
    }

    #[test]
    fn test_rehydrate_replaces_state() {
        let cache = RestrictionCache::new();
        cache.insert_violation(BOB, violation(9, ViolationType::Nsfw, Severity::Low));

        cache.rehydrate(vec![CachedViolation {
            platform_user: ALICE,
            violation: violation(1, ViolationType::Impersonation, Severity::Low),
        }]);

        assert!(cache.restrictions_for(BOB).is_none());
        assert!(cache.get(ViolationId(9)).is_none());
        assert!(cache.has_restriction(ALICE, FeatureRestriction::NicknameChange));
    }

    #[tokio::test]
    async fn test_user_lock_serializes() {
        let cache = RestrictionCache::new();
        let guard = cache.lock_user(ALICE).await;

        // A different user is not blocked
        let other = cache.lock_user(BOB).await;
        drop(other);

        let cache_clone = cache.clone();
        let waiter = tokio::spawn(async move {
            let _guard = cache_clone.lock_user(ALICE).await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
