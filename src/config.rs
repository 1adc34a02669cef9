use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// Default lifetime of a security session (30 minutes).
pub const DEFAULT_SESSION_DURATION_SECS: i64 = 30 * 60;
/// Default period of the background sweeper.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// Default per-client quota on the security endpoints.
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 10;
/// Default window of the per-client quota (15 minutes).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The key used to derive the security codes.
    pub secret_key: Zeroizing<Vec<u8>>,
    /// The lifetime of a security session in seconds.
    pub session_duration_secs: i64,
    /// How often the background sweeper runs, in seconds.
    pub sweep_interval_secs: u64,
    /// The address the server listens on.
    pub bind_addr: SocketAddr,
    /// Requests allowed per client within one rate limit window.
    pub rate_limit_max_requests: u32,
    /// The rate limit window in seconds.
    pub rate_limit_window_secs: u64,
    /// Origins allowed by the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("secret_key", &"<redacted>")
            .field("session_duration_secs", &self.session_duration_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("bind_addr", &self.bind_addr)
            .field("rate_limit_max_requests", &self.rate_limit_max_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`. Fails when `SECURITY_SECRET_KEY`
    /// is missing or empty.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a `Config` from an arbitrary key lookup.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the raw value for a variable name, if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = Zeroizing::new(
            lookup("SECURITY_SECRET_KEY")
                .context("SECURITY_SECRET_KEY must be set (generate with: openssl rand -hex 32)")?,
        );

        if secret.trim().is_empty() {
            anyhow::bail!("SECURITY_SECRET_KEY must not be empty");
        }

        if secret.len() < 32 {
            tracing::warn!("⚠️ SECURITY_SECRET_KEY is shorter than 32 bytes");
        }

        let session_duration_secs: i64 = parse_or(
            &lookup,
            "SESSION_DURATION_SECS",
            DEFAULT_SESSION_DURATION_SECS,
        )?;
        if session_duration_secs <= 0 {
            anyhow::bail!("SESSION_DURATION_SECS must be greater than zero");
        }
        chrono::Duration::try_seconds(session_duration_secs)
            .and_then(|duration| chrono::Utc::now().checked_add_signed(duration))
            .context("SESSION_DURATION_SECS is out of range")?;

        let sweep_interval_secs: u64 =
            parse_or(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_interval_secs == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECS must be greater than zero");
        }

        let rate_limit_max_requests: u32 = parse_or(
            &lookup,
            "RATE_LIMIT_MAX_REQUESTS",
            DEFAULT_RATE_LIMIT_MAX_REQUESTS,
        )?;
        let rate_limit_window_secs: u64 = parse_or(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            DEFAULT_RATE_LIMIT_WINDOW_SECS,
        )?;
        if rate_limit_max_requests == 0 || rate_limit_window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_MAX_REQUESTS and RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("Invalid BIND_ADDR")?;

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            secret_key: Zeroizing::new(secret.as_bytes().to_vec()),
            session_duration_secs,
            sweep_interval_secs,
            bind_addr,
            rate_limit_max_requests,
            rate_limit_window_secs,
            allowed_origins,
        })
    }

    /// The session lifetime as a `chrono::Duration`.
    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_duration_secs)
    }

    /// The background sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Time for one unit of rate limit quota to replenish.
    pub fn rate_limit_replenish_period(&self) -> Duration {
        let window_ms = self.rate_limit_window_secs.saturating_mul(1000);
        Duration::from_millis((window_ms / u64::from(self.rate_limit_max_requests)).max(1))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}
