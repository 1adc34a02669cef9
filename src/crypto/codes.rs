use crate::error::{AppError, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes in the tail of a session id.
const SESSION_ID_RANDOM_BYTES: usize = 8;

/// Which half of a code pair is being derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDirection {
    Forward,
    Backward,
}

impl CodeDirection {
    fn as_str(self) -> &'static str {
        match self {
            CodeDirection::Forward => "forward",
            CodeDirection::Backward => "backward",
        }
    }
}

/// Whether codes are issued with a new session or reissued for an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeIssue {
    Initial,
    Refresh,
}

/// A freshly derived forward/backward pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePair {
    pub forward: String,
    pub backward: String,
}

/// Derives session ids and keyed one-time codes.
#[derive(Clone)]
pub struct CodeGenerator {
    secret: Zeroizing<Vec<u8>>,
}

impl CodeGenerator {
    /// Creates a new `CodeGenerator`.
    ///
    /// # Arguments
    ///
    /// * `secret` - The signing key. An empty key is refused, since every
    ///   code derived from it would be forgeable.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(AppError::Configuration(
                "Security secret key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    /// Generates a new session id: `<unix-millis>-<random hex>`.
    pub fn session_id(&self, timestamp_ms: i64) -> String {
        let mut random = [0u8; SESSION_ID_RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);

        format!("{}-{}", timestamp_ms, hex::encode(random))
    }

    /// Derives both codes for a session.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session the codes belong to.
    /// * `timestamp_ms` - Issue time in unix milliseconds.
    /// * `user_id` - The bound user, `None` for anonymous sessions.
    /// * `issue` - Initial issue or refresh; refreshed codes use distinct seeds.
    pub fn derive_pair(
        &self,
        session_id: &str,
        timestamp_ms: i64,
        user_id: Option<&str>,
        issue: CodeIssue,
    ) -> Result<CodePair> {
        Ok(CodePair {
            forward: self.derive(session_id, timestamp_ms, user_id, CodeDirection::Forward, issue)?,
            backward: self.derive(session_id, timestamp_ms, user_id, CodeDirection::Backward, issue)?,
        })
    }

    fn derive(
        &self,
        session_id: &str,
        timestamp_ms: i64,
        user_id: Option<&str>,
        direction: CodeDirection,
        issue: CodeIssue,
    ) -> Result<String> {
        let mut seed = format!(
            "{}-{}-{}-{}",
            session_id,
            timestamp_ms,
            user_id.unwrap_or("anonymous"),
            direction.as_str()
        );
        if issue == CodeIssue::Refresh {
            seed.push_str("-refresh");
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("HMAC key error: {}", e)))?;
        mac.update(seed.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Compares a presented code with the stored one in constant time.
pub fn codes_match(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}
