use crate::error::{AppError, AppResult};
use crate::security;
use crate::store::SharedStore;
use crate::tprintln;

use super::principal::Principal;
use super::session::{Session, SessionManager};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Login, request-principal resolution and logout. The HTTP layer talks
/// to this trait only; it never inspects the user store directly.
pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
    fn resolve(&self, token: &str) -> AppResult<Option<Principal>>;
    fn logout(&self, token: &str) -> bool;
}

/// Provider backed by the local user store and an in-memory session map.
#[derive(Clone)]
pub struct LocalAuthProvider {
    store: SharedStore,
    sessions: SessionManager,
}

impl LocalAuthProvider {
    pub fn new(store: SharedStore, sessions: SessionManager) -> Self {
        Self { store, sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

impl AuthProvider for LocalAuthProvider {
    /// Look up the user by exact username and verify the password. On
    /// success the principal is snapshotted (id, username, role) and a
    /// session is issued. Unknown users and wrong passwords are not
    /// distinguishable from the outside.
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let Some(user) = security::authenticate(&self.store, &req.username, &req.password)? else {
            return Err(AppError::auth("invalid_credentials", "Invalid username or password."));
        };
        let principal = Principal { user_id: user.id, username: user.username, role: user.role };
        let session = self.sessions.issue(principal);
        tprintln!("auth.login user={}", req.username);
        Ok(LoginResponse { session })
    }

    /// Reconstruct the principal for a request. Returns `None` when there
    /// is no live session or the referenced user no longer exists in the
    /// store; both read as logged-out, never as an error. The role comes
    /// from the login-time snapshot.
    fn resolve(&self, token: &str) -> AppResult<Option<Principal>> {
        let Some(principal) = self.sessions.validate(token) else {
            return Ok(None);
        };
        if security::find_user_by_id(&self.store, &principal.user_id)?.is_none() {
            // User vanished since login: tear the session down
            self.sessions.logout(token);
            return Ok(None);
        }
        Ok(Some(principal))
    }

    fn logout(&self, token: &str) -> bool {
        self.sessions.logout(token)
    }
}
