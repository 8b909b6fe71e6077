//! Authentication hook for identifying callers.
//!
//! Rollcall does not issue or verify credentials itself. The gateway calls
//! an [`Authenticator`] during the handshake with whatever bearer token
//! the client sent, and trusts the [`Caller`] it returns for the rest of
//! the connection.

use rollcall_protocol::{Caller, Role, UserId};

/// Why a handshake token was refused.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Validates a client's bearer token and returns who they are.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the lifetime of the server.
///
/// # Example
///
/// ```rust
/// use rollcall::{AuthError, Authenticator};
/// use rollcall_protocol::{Caller, Role};
///
/// /// Every token is a student id. Development only.
/// struct StudentsOnly;
///
/// impl Authenticator for StudentsOnly {
///     async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
///         if token.is_empty() {
///             return Err(AuthError::MissingToken);
///         }
///         Ok(Caller { user_id: token.into(), role: Role::Student })
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Called once per connection, with the handshake's token (empty when
    /// the client sent none).
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Caller, AuthError>> + Send;
}

/// Reads tokens of the form `role:user_id`, e.g. `teacher:t-1`.
///
/// Performs no verification at all. Meant for demos and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let (role, user) = token
            .split_once(':')
            .ok_or_else(|| AuthError::Rejected("expected role:user_id".into()))?;
        let role = match role {
            "student" => Role::Student,
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            other => return Err(AuthError::Rejected(format!("unknown role {other:?}"))),
        };
        if user.is_empty() {
            return Err(AuthError::Rejected("empty user id".into()));
        }
        Ok(Caller {
            user_id: UserId::from(user),
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dev_authenticator_parses_role_and_user() {
        let caller = DevAuthenticator.authenticate("teacher:t-1").await.unwrap();
        assert_eq!(caller.role, Role::Teacher);
        assert_eq!(caller.user_id, UserId::from("t-1"));
    }

    #[tokio::test]
    async fn test_dev_authenticator_empty_token_missing() {
        let err = DevAuthenticator.authenticate("").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[tokio::test]
    async fn test_dev_authenticator_unknown_role_rejected() {
        let err = DevAuthenticator.authenticate("janitor:j-1").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert!(DevAuthenticator.authenticate("student:").await.is_err());
        assert!(DevAuthenticator.authenticate("student").await.is_err());
    }
}
