use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::engine::EngineError;

/// Request-scoped identity, resolved by the auth layer and handed to every
/// engine operation explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    user_id: Option<Ulid>,
}

impl Session {
    pub fn authenticated(user_id: Ulid) -> Self {
        Self { user_id: Some(user_id) }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    /// Session for a wire login. The login name is the user's id as issued by
    /// the external auth provider; anything else is unauthenticated.
    pub fn from_login(user: Option<&str>) -> Self {
        Self {
            user_id: user.and_then(|u| Ulid::from_string(u.trim()).ok()),
        }
    }

    pub fn user_id(&self) -> Option<Ulid> {
        self.user_id
    }

    pub fn require_user(&self) -> Result<Ulid, EngineError> {
        self.user_id.ok_or(EngineError::Unauthorized)
    }
}

/// Shared-secret password check for the wire startup handshake.
#[derive(Debug)]
pub struct TentShiftAuthSource {
    password: String,
}

impl TentShiftAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for TentShiftAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
