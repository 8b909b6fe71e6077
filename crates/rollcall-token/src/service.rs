//! Session-bound, rotating check-in tokens.
//!
//! Two keys per live session:
//!
//! ```text
//! qr_token:{token}      → QrTokenRecord (JSON), TTL = rotation + grace
//! qr_session:{session}  → current token
//! ```
//!
//! Rotation deletes the old `qr_token:` entry *before* writing the new one,
//! so a captured token dies the moment the display moves on, not when its
//! TTL runs out. All writes for one session are serialized through a
//! [`KeyedLocks`] slot, so a validate call never observes two live tokens
//! for the same session.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use rollcall_protocol::{AttendanceSessionId, ClassId, SessionRef, TokenBinding};
use rollcall_tick::SharedClock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{KeyedLocks, TokenError, TokenStore};

const TOKEN_PREFIX: &str = "qr_token:";
const SESSION_PREFIX: &str = "qr_session:";

/// What the store keeps for one issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrTokenRecord {
    pub attendance_session_id: AttendanceSessionId,
    pub class_id: ClassId,
    pub session_ref: SessionRef,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QrTokenRecord {
    pub fn binding(&self) -> TokenBinding {
        TokenBinding {
            attendance_session_id: self.attendance_session_id,
            class_id: self.class_id.clone(),
            session_ref: self.session_ref.clone(),
        }
    }
}

/// Issues and checks check-in tokens.
pub struct QrTokenService {
    store: Arc<dyn TokenStore>,
    clock: SharedClock,
    /// Extra store TTL beyond the logical expiry, so a scan that lands
    /// right at rotation time still finds the entry to reject it cleanly.
    grace: Duration,
    locks: KeyedLocks<AttendanceSessionId>,
}

impl QrTokenService {
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(store: Arc<dyn TokenStore>, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            grace: Self::DEFAULT_GRACE,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Issues a new token for `binding`'s session and makes it current.
    ///
    /// Does not revoke a previous token; use [`rotate`](Self::rotate) for
    /// that.
    pub async fn generate(
        &self,
        binding: &TokenBinding,
        rotation_secs: u32,
    ) -> Result<String, TokenError> {
        let _guard = self.locks.write(&binding.attendance_session_id).await;
        self.generate_locked(binding, rotation_secs).await
    }

    /// Revokes the session's current token, then issues a new one.
    pub async fn rotate(
        &self,
        binding: &TokenBinding,
        rotation_secs: u32,
    ) -> Result<String, TokenError> {
        let _guard = self.locks.write(&binding.attendance_session_id).await;
        self.revoke_current_locked(binding.attendance_session_id).await?;
        self.generate_locked(binding, rotation_secs).await
    }

    /// Resolves `token` to the session it was issued for.
    ///
    /// `Ok(None)` when the token is unknown, revoked, or past `expires_at`.
    pub async fn validate(&self, token: &str) -> Result<Option<TokenBinding>, TokenError> {
        let Some(raw) = self.store.get(&token_key(token)).await? else {
            return Ok(None);
        };
        let record: QrTokenRecord = serde_json::from_str(&raw)?;
        if self.clock.now() > record.expires_at {
            return Ok(None);
        }
        Ok(Some(record.binding()))
    }

    /// Removes the session's current token and its pointer. Called when the
    /// session closes or is cancelled.
    pub async fn invalidate_session(&self, id: AttendanceSessionId) -> Result<(), TokenError> {
        {
            let _guard = self.locks.write(&id).await;
            self.revoke_current_locked(id).await?;
            self.store.del(&session_key(id)).await?;
        }
        self.locks.forget(&id);
        debug!(session_id = %id, "session tokens invalidated");
        Ok(())
    }

    /// The session's current token, for clients that missed a push.
    pub async fn current_token(&self, id: AttendanceSessionId) -> Result<Option<String>, TokenError> {
        self.store.get(&session_key(id)).await
    }

    async fn generate_locked(
        &self,
        binding: &TokenBinding,
        rotation_secs: u32,
    ) -> Result<String, TokenError> {
        let token = generate_token();
        let now = self.clock.now();
        let record = QrTokenRecord {
            attendance_session_id: binding.attendance_session_id,
            class_id: binding.class_id.clone(),
            session_ref: binding.session_ref.clone(),
            created_at: now,
            expires_at: now + TimeDelta::seconds(i64::from(rotation_secs)),
        };
        let ttl = Duration::from_secs(u64::from(rotation_secs)) + self.grace;

        self.store
            .set_ex(&token_key(&token), serde_json::to_string(&record)?, ttl)
            .await?;
        self.store
            .set(&session_key(binding.attendance_session_id), token.clone())
            .await?;

        debug!(session_id = %binding.attendance_session_id, "token issued");
        Ok(token)
    }

    async fn revoke_current_locked(&self, id: AttendanceSessionId) -> Result<(), TokenError> {
        if let Some(current) = self.store.get(&session_key(id)).await? {
            self.store.del(&token_key(&current)).await?;
        }
        Ok(())
    }
}

fn token_key(token: &str) -> String {
    format!("{TOKEN_PREFIX}{token}")
}

fn session_key(id: AttendanceSessionId) -> String {
    format!("{SESSION_PREFIX}{id}")
}

/// Generates a random 128-bit token as a 32-character lowercase hex string.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_32_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_token_is_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn test_keys_are_prefixed() {
        let id = AttendanceSessionId::new();
        assert_eq!(token_key("abc"), "qr_token:abc");
        assert_eq!(session_key(id), format!("qr_session:{id}"));
    }
}
