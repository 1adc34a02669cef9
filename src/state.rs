use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::services::security::SecurityManager;
use crate::store::memory::InMemorySessionStore;
use crate::store::session_store::SessionStore;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The security-code service shared by every handler.
    pub security: Arc<SecurityManager>,
}

impl AppState {
    /// Creates a new `AppState` with an in-memory store and the system clock.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let store = Arc::new(InMemorySessionStore::new());
        tracing::info!("✅ In-memory session store initialized");

        Self::with_parts(config, store, Arc::new(SystemClock))
    }

    /// Creates a new `AppState` around an explicit store and clock.
    pub fn with_parts(
        config: &Config,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let security = SecurityManager::new(
            &config.secret_key,
            config.session_duration(),
            store,
            clock,
        )?;
        tracing::info!(
            "✅ Security manager initialized (session duration: {}s)",
            config.session_duration_secs
        );

        Ok(AppState {
            config: config.clone(),
            security: Arc::new(security),
        })
    }
}
