use std::sync::Arc;

use crate::clock::Clock;
use crate::crypto::codes::{CodeGenerator, CodeIssue, codes_match};
use crate::error::{AppError, Result, SecurityRejection};
use crate::models::security_session::{SecurityCodes, SecuritySession, ValidationOutcome};
use crate::store::session_store::SessionStore;

/// Attempts at drawing an unused session id before giving up.
const MAX_SESSION_ID_ATTEMPTS: usize = 8;

/// Audit fallback when the client does not identify itself.
const UNKNOWN: &str = "unknown";

/// Who asked for a new code pair.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Issues, validates and refreshes time-window security codes.
///
/// The manager is constructed once at start-up and shared by reference; it
/// holds no global state of its own.
pub struct SecurityManager {
    generator: CodeGenerator,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    session_duration: chrono::Duration,
}

impl SecurityManager {
    /// Creates a new `SecurityManager`.
    ///
    /// # Arguments
    ///
    /// * `secret` - The code signing key. Must not be empty.
    /// * `session_duration` - Lifetime of a session. Must be positive.
    /// * `store` - Where sessions live.
    /// * `clock` - The time source.
    pub fn new(
        secret: &[u8],
        session_duration: chrono::Duration,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if session_duration <= chrono::Duration::zero() {
            return Err(AppError::Configuration(
                "Session duration must be positive".to_string(),
            ));
        }

        Ok(Self {
            generator: CodeGenerator::new(secret)?,
            store,
            clock,
            session_duration,
        })
    }

    /// The current time according to the injected clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// The configured session lifetime.
    pub fn session_duration(&self) -> chrono::Duration {
        self.session_duration
    }

    /// Generates a new session and its code pair.
    ///
    /// The new session is stored, then expired sessions are swept.
    pub fn generate(&self, request: GenerateRequest) -> Result<SecurityCodes> {
        let user_id = normalize_user_id(request.user_id);
        let now = self.clock.now();
        let timestamp_ms = now.timestamp_millis();

        for attempt in 1..=MAX_SESSION_ID_ATTEMPTS {
            let session_id = self.generator.session_id(timestamp_ms);
            let pair = self.generator.derive_pair(
                &session_id,
                timestamp_ms,
                user_id.as_deref(),
                CodeIssue::Initial,
            )?;

            let session = SecuritySession {
                session_id,
                forward_code: pair.forward,
                backward_code: pair.backward,
                created_at: now,
                expires_at: now + self.session_duration,
                user_id: user_id.clone(),
                is_used: false,
                ip_address: request.ip_address.clone().unwrap_or_else(|| UNKNOWN.to_string()),
                user_agent: request.user_agent.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            };
            let codes = session.codes();

            if self.store.insert_new(session) {
                tracing::info!("🔑 Security session issued: {}", codes.session_id);
                self.sweep();
                return Ok(codes);
            }

            tracing::warn!(
                "⚠️ Session id collision on attempt {}: {}",
                attempt,
                codes.session_id
            );
        }

        Err(AppError::Internal(
            "Could not allocate a unique session id".to_string(),
        ))
    }

    /// Validates a presented code pair and consumes the session on success.
    ///
    /// Checks run in a fixed order: existence, prior use, expiry (which also
    /// deletes the session), both codes, then the user binding. The user
    /// binding is only compared when both the caller and the session carry a
    /// user id.
    pub fn validate(
        &self,
        session_id: &str,
        forward_code: &str,
        backward_code: &str,
        user_id: Option<&str>,
    ) -> ValidationOutcome {
        let user_id = user_id.filter(|id| !id.is_empty());

        loop {
            let Some(session) = self.store.get(session_id) else {
                return ValidationOutcome::rejected(SecurityRejection::NotFound);
            };

            if session.is_used {
                return ValidationOutcome::rejected(SecurityRejection::AlreadyUsed);
            }

            if session.is_expired(self.clock.now()) {
                if !self.store.remove_if_eq(&session) {
                    // Rewritten since the read; judge the current record.
                    continue;
                }
                tracing::debug!("🧹 Removed expired session on access: {}", session_id);
                return ValidationOutcome::rejected(SecurityRejection::Expired);
            }

            let forward_ok = codes_match(forward_code, &session.forward_code);
            let backward_ok = codes_match(backward_code, &session.backward_code);
            if !(forward_ok && backward_ok) {
                return ValidationOutcome::rejected(SecurityRejection::CodeMismatch);
            }

            match (user_id, session.user_id.as_deref()) {
                (Some(presented), Some(bound)) if presented != bound => {
                    return ValidationOutcome::rejected(SecurityRejection::UserMismatch);
                }
                (None, Some(_)) => {
                    tracing::warn!(
                        "⚠️ User-bound session {} validated without a caller user id",
                        session_id
                    );
                }
                _ => {}
            }

            let mut used = session.clone();
            used.is_used = true;
            if self.store.compare_and_swap(&session, used) {
                tracing::info!("✅ Security codes accepted: {}", session_id);
                return ValidationOutcome::accepted();
            }

            // Another request changed the session between read and write.
            tracing::debug!("🔁 Lost validation race, re-evaluating: {}", session_id);
        }
    }

    /// Reissues the code pair of a live, unused session.
    ///
    /// Returns `None` when the session is missing, used or expired; the caller
    /// should then generate a brand new session.
    pub fn refresh(&self, session_id: &str) -> Result<Option<SecurityCodes>> {
        loop {
            let Some(session) = self.store.get(session_id) else {
                return Ok(None);
            };

            let now = self.clock.now();
            if session.is_used || session.is_expired(now) {
                return Ok(None);
            }

            let timestamp_ms = now.timestamp_millis();
            let pair = self.generator.derive_pair(
                session_id,
                timestamp_ms,
                session.user_id.as_deref(),
                CodeIssue::Refresh,
            )?;

            let refreshed = SecuritySession {
                forward_code: pair.forward,
                backward_code: pair.backward,
                expires_at: now + self.session_duration,
                is_used: false,
                ..session.clone()
            };
            let codes = refreshed.codes();

            if self.store.compare_and_swap(&session, refreshed) {
                tracing::info!("🔄 Security codes refreshed: {}", session_id);
                return Ok(Some(codes));
            }

            tracing::debug!("🔁 Lost refresh race, re-evaluating: {}", session_id);
        }
    }

    /// Removes every expired session. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let removed = self.store.retain(&|session| !session.is_expired(now));
        if removed > 0 {
            tracing::debug!("🧹 Swept {} expired security sessions", removed);
        }
        removed
    }

    /// Sweeps, then counts the live sessions.
    pub fn active_sessions(&self) -> usize {
        self.sweep();
        self.store.len()
    }
}

fn normalize_user_id(user_id: Option<String>) -> Option<String> {
    user_id.filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::InMemorySessionStore;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"unit-test-secret-0123456789abcdef";

    struct Harness {
        manager: SecurityManager,
        store: Arc<InMemorySessionStore>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::default());
        let manager = SecurityManager::new(
            SECRET,
            chrono::Duration::minutes(30),
            store.clone(),
            clock.clone(),
        )
        .unwrap();
        Harness {
            manager,
            store,
            clock,
        }
    }

    /// Reports a collision for the first `collisions` inserts.
    struct CollidingStore {
        inner: InMemorySessionStore,
        collisions: AtomicUsize,
    }

    impl CollidingStore {
        fn new(collisions: usize) -> Self {
            Self {
                inner: InMemorySessionStore::new(),
                collisions: AtomicUsize::new(collisions),
            }
        }
    }

    impl SessionStore for CollidingStore {
        fn get(&self, session_id: &str) -> Option<SecuritySession> {
            self.inner.get(session_id)
        }

        fn insert_new(&self, session: SecuritySession) -> bool {
            let remaining = self.collisions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.collisions.store(remaining - 1, Ordering::SeqCst);
                return false;
            }
            self.inner.insert_new(session)
        }

        fn compare_and_swap(&self, current: &SecuritySession, next: SecuritySession) -> bool {
            self.inner.compare_and_swap(current, next)
        }

        fn remove_if_eq(&self, current: &SecuritySession) -> bool {
            self.inner.remove_if_eq(current)
        }

        fn retain(&self, keep: &dyn Fn(&SecuritySession) -> bool) -> usize {
            self.inner.retain(keep)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    fn manager_over(store: Arc<dyn SessionStore>) -> SecurityManager {
        SecurityManager::new(
            SECRET,
            chrono::Duration::minutes(30),
            store,
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    fn for_user(user_id: &str) -> GenerateRequest {
        GenerateRequest {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_construction_rejects_bad_inputs() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        assert!(
            SecurityManager::new(b"", chrono::Duration::minutes(30), store.clone(), clock.clone())
                .is_err()
        );
        assert!(SecurityManager::new(SECRET, chrono::Duration::zero(), store, clock).is_err());
    }

    #[test]
    fn test_generate_stores_session_with_defaults() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();

        let stored = h.store.get(&codes.session_id).unwrap();
        assert_eq!(stored.forward_code, codes.forward_code);
        assert_eq!(stored.ip_address, "unknown");
        assert_eq!(stored.user_agent, "unknown");
        assert!(stored.user_id.is_none());
        assert!(!stored.is_used);
        assert!(stored.expires_at > stored.created_at);
        assert_eq!(stored.expires_at - stored.created_at, chrono::Duration::minutes(30));
        assert_ne!(codes.forward_code, codes.backward_code);
    }

    #[test]
    fn test_generate_treats_empty_user_as_anonymous() {
        let h = harness();
        let codes = h.manager.generate(for_user("")).unwrap();
        assert!(codes.user_id.is_none());
    }

    #[test]
    fn test_generate_sweeps_expired_sessions() {
        let h = harness();
        h.manager.generate(GenerateRequest::default()).unwrap();
        h.clock.advance(chrono::Duration::minutes(31));

        h.manager.generate(GenerateRequest::default()).unwrap();
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn test_generate_retries_session_id_collisions() {
        let store = Arc::new(CollidingStore::new(MAX_SESSION_ID_ATTEMPTS - 1));
        let manager = manager_over(store.clone());

        let codes = manager.generate(GenerateRequest::default()).unwrap();
        assert!(store.get(&codes.session_id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_generate_gives_up_after_max_collisions() {
        let store = Arc::new(CollidingStore::new(MAX_SESSION_ID_ATTEMPTS));
        let manager = manager_over(store.clone());

        assert!(matches!(
            manager.generate(GenerateRequest::default()),
            Err(AppError::Internal(_))
        ));
        assert!(store.is_empty());

        // The next call draws fresh ids again.
        assert!(manager.generate(GenerateRequest::default()).is_ok());
    }

    #[test]
    fn test_now_follows_injected_clock() {
        let h = harness();
        let before = h.manager.now();
        h.clock.advance(chrono::Duration::hours(2));
        assert_eq!(h.manager.now() - before, chrono::Duration::hours(2));
    }

    #[test]
    fn test_validate_accepts_once() {
        let h = harness();
        let codes = h.manager.generate(for_user("u1")).unwrap();

        let first = h.manager.validate(
            &codes.session_id,
            &codes.forward_code,
            &codes.backward_code,
            Some("u1"),
        );
        assert_eq!(first, ValidationOutcome::accepted());
        assert!(h.store.get(&codes.session_id).unwrap().is_used);

        let replay = h.manager.validate(
            &codes.session_id,
            &codes.forward_code,
            &codes.backward_code,
            Some("u1"),
        );
        assert_eq!(
            replay,
            ValidationOutcome::rejected(SecurityRejection::AlreadyUsed)
        );
    }

    #[test]
    fn test_validate_unknown_session() {
        let h = harness();
        assert_eq!(
            h.manager.validate("bogus-id", "x", "y", None),
            ValidationOutcome::rejected(SecurityRejection::NotFound)
        );
    }

    #[test]
    fn test_validate_expired_then_not_found() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();
        h.clock.advance(chrono::Duration::minutes(30) + chrono::Duration::seconds(1));

        let expired =
            h.manager
                .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None);
        assert_eq!(expired, ValidationOutcome::rejected(SecurityRejection::Expired));

        let gone =
            h.manager
                .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None);
        assert_eq!(gone, ValidationOutcome::rejected(SecurityRejection::NotFound));
    }

    #[test]
    fn test_validate_at_exact_expiry_is_still_valid() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();
        h.clock.advance(chrono::Duration::minutes(30));

        assert!(
            h.manager
                .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None)
                .valid
        );
    }

    #[test]
    fn test_validate_code_mismatch_does_not_consume() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();

        let swapped =
            h.manager
                .validate(&codes.session_id, &codes.backward_code, &codes.forward_code, None);
        assert_eq!(
            swapped,
            ValidationOutcome::rejected(SecurityRejection::CodeMismatch)
        );

        let half = h
            .manager
            .validate(&codes.session_id, &codes.forward_code, "nope", None);
        assert_eq!(half, ValidationOutcome::rejected(SecurityRejection::CodeMismatch));

        assert!(
            h.manager
                .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None)
                .valid
        );
    }

    #[test]
    fn test_used_check_precedes_expiry() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();
        h.manager
            .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None);
        h.clock.advance(chrono::Duration::hours(1));

        assert_eq!(
            h.manager
                .validate(&codes.session_id, &codes.forward_code, &codes.backward_code, None),
            ValidationOutcome::rejected(SecurityRejection::AlreadyUsed)
        );
    }

    #[test]
    fn test_user_binding() {
        let h = harness();
        let codes = h.manager.generate(for_user("u1")).unwrap();

        let other = h.manager.validate(
            &codes.session_id,
            &codes.forward_code,
            &codes.backward_code,
            Some("u2"),
        );
        assert_eq!(other, ValidationOutcome::rejected(SecurityRejection::UserMismatch));
        assert!(!h.store.get(&codes.session_id).unwrap().is_used);
    }

    #[test]
    fn test_user_binding_is_skipped_when_either_side_is_anonymous() {
        let h = harness();

        let bound = h.manager.generate(for_user("u1")).unwrap();
        assert!(
            h.manager
                .validate(&bound.session_id, &bound.forward_code, &bound.backward_code, None)
                .valid
        );

        let anonymous = h.manager.generate(GenerateRequest::default()).unwrap();
        assert!(
            h.manager
                .validate(
                    &anonymous.session_id,
                    &anonymous.forward_code,
                    &anonymous.backward_code,
                    Some("anyone"),
                )
                .valid
        );
    }

    #[test]
    fn test_refresh_reissues_codes() {
        let h = harness();
        let original = h.manager.generate(for_user("u1")).unwrap();
        h.clock.advance(chrono::Duration::minutes(10));

        let refreshed = h.manager.refresh(&original.session_id).unwrap().unwrap();
        assert_eq!(refreshed.session_id, original.session_id);
        assert_eq!(refreshed.user_id.as_deref(), Some("u1"));
        assert_ne!(refreshed.forward_code, original.forward_code);
        assert_ne!(refreshed.backward_code, original.backward_code);
        assert_eq!(
            refreshed.expires_at - original.expires_at,
            chrono::Duration::minutes(10)
        );

        let stored = h.store.get(&original.session_id).unwrap();
        assert!(!stored.is_used);
        assert_eq!(stored.expires_at, refreshed.expires_at);

        assert_eq!(
            h.manager.validate(
                &original.session_id,
                &original.forward_code,
                &original.backward_code,
                None
            ),
            ValidationOutcome::rejected(SecurityRejection::CodeMismatch)
        );
        assert!(
            h.manager
                .validate(
                    &refreshed.session_id,
                    &refreshed.forward_code,
                    &refreshed.backward_code,
                    Some("u1"),
                )
                .valid
        );
    }

    #[test]
    fn test_refresh_extends_past_original_expiry() {
        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();
        h.clock.advance(chrono::Duration::minutes(25));
        let refreshed = h.manager.refresh(&codes.session_id).unwrap().unwrap();

        h.clock.advance(chrono::Duration::minutes(25));
        assert!(
            h.manager
                .validate(&codes.session_id, &refreshed.forward_code, &refreshed.backward_code, None)
                .valid
        );
    }

    #[test]
    fn test_refresh_preconditions() {
        let h = harness();
        assert!(h.manager.refresh("missing").unwrap().is_none());

        let used = h.manager.generate(GenerateRequest::default()).unwrap();
        h.manager
            .validate(&used.session_id, &used.forward_code, &used.backward_code, None);
        assert!(h.manager.refresh(&used.session_id).unwrap().is_none());

        let stale = h.manager.generate(GenerateRequest::default()).unwrap();
        h.clock.advance(chrono::Duration::minutes(31));
        assert!(h.manager.refresh(&stale.session_id).unwrap().is_none());
    }

    #[test]
    fn test_active_sessions_sweeps_first() {
        let h = harness();
        h.manager.generate(GenerateRequest::default()).unwrap();
        h.manager.generate(GenerateRequest::default()).unwrap();
        assert_eq!(h.manager.active_sessions(), 2);

        h.clock.advance(chrono::Duration::minutes(31));
        assert_eq!(h.store.len(), 2);
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(h.manager.sweep(), 0);
    }

    #[test]
    fn test_concurrent_validation_accepts_exactly_once() {
        const ATTEMPTS: usize = 32;

        let h = harness();
        let codes = h.manager.generate(GenerateRequest::default()).unwrap();
        let barrier = std::sync::Barrier::new(ATTEMPTS);

        let outcomes: Vec<ValidationOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..ATTEMPTS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        h.manager.validate(
                            &codes.session_id,
                            &codes.forward_code,
                            &codes.backward_code,
                            None,
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let accepted = outcomes.iter().filter(|o| o.valid).count();
        let replayed = outcomes
            .iter()
            .filter(|o| o.reason == Some(SecurityRejection::AlreadyUsed))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(replayed, ATTEMPTS - 1);
    }

    #[test]
    fn test_consecutive_generations_have_unique_ids() {
        let h = harness();
        let ids: HashSet<String> = (0..500)
            .map(|_| h.manager.generate(GenerateRequest::default()).unwrap().session_id)
            .collect();
        assert_eq!(ids.len(), 500);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_generated_pairs_are_distinct(user_id in proptest::option::of("[a-z0-9_-]{0,16}")) {
            let h = harness();
            let first = h.manager.generate(GenerateRequest { user_id: user_id.clone(), ..Default::default() }).unwrap();
            let second = h.manager.generate(GenerateRequest { user_id, ..Default::default() }).unwrap();

            prop_assert_ne!(&first.forward_code, &first.backward_code);
            prop_assert_ne!(&first.session_id, &second.session_id);
            prop_assert_ne!(&first.forward_code, &second.forward_code);
        }
    }
}
