use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::models::security_session::SecuritySession;
use crate::store::session_store::SessionStore;

/// An in-process session store backed by a sharded concurrent map.
///
/// Each shard has its own lock, so operations on one session id are
/// serialized while unrelated ids proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SecuritySession>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, session_id: &str) -> Option<SecuritySession> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn insert_new(&self, session: SecuritySession) -> bool {
        match self.sessions.entry(session.session_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    fn compare_and_swap(&self, current: &SecuritySession, next: SecuritySession) -> bool {
        match self.sessions.get_mut(&current.session_id) {
            Some(mut entry) if *entry == *current => {
                *entry = next;
                true
            }
            _ => false,
        }
    }

    fn remove_if_eq(&self, current: &SecuritySession) -> bool {
        self.sessions
            .remove_if(&current.session_id, |_, stored| stored == current)
            .is_some()
    }

    fn retain(&self, keep: &dyn Fn(&SecuritySession) -> bool) -> usize {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let kept = keep(session);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}
