use crate::models::security_session::SecuritySession;

/// Storage for security sessions, keyed by session id.
///
/// Implementations must serialize mutations per session id. Every write that
/// depends on a previous read goes through [`SessionStore::compare_and_swap`],
/// so a backend only needs an atomic conditional replace to keep the
/// single-use guarantee.
pub trait SessionStore: Send + Sync {
    /// Returns a snapshot of the session, if present.
    fn get(&self, session_id: &str) -> Option<SecuritySession>;

    /// Inserts `session` unless its id is already taken.
    ///
    /// Returns `false` on collision, leaving the existing session untouched.
    fn insert_new(&self, session: SecuritySession) -> bool;

    /// Replaces the stored session with `next` only if it still equals `current`.
    fn compare_and_swap(&self, current: &SecuritySession, next: SecuritySession) -> bool;

    /// Removes the session only if it still equals `current`.
    fn remove_if_eq(&self, current: &SecuritySession) -> bool;

    /// Keeps only the sessions for which `keep` returns `true`.
    ///
    /// Returns the number of removed sessions.
    fn retain(&self, keep: &dyn Fn(&SecuritySession) -> bool) -> usize;

    /// The number of stored sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
