use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;

use crate::tprintln;

use super::principal::Principal;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub principal: Principal,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

fn gen_token() -> String {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Issues and resolves session tokens. Each manager owns its token map;
/// handlers share one manager through the application state rather than a
/// process-wide static.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    sessions: Arc<RwLock<HashMap<SessionToken, Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(60 * 60), sessions: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl SessionManager {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, ..Default::default() }
    }

    pub fn issue(&self, principal: Principal) -> Session {
        let now = Instant::now();
        let token = gen_token();
        let sess = Session {
            token: token.clone(),
            principal: principal.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions.write().insert(token, sess.clone());
        tprintln!("session.issue user={} ttl_secs={}", principal.username, self.ttl.as_secs());
        sess
    }

    /// Resolve a token into its principal snapshot. Expired entries are
    /// dropped on the way out.
    pub fn validate(&self, token: &str) -> Option<Principal> {
        let now = Instant::now();
        let mut expired = false;
        let out = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(sess) if sess.expires_at > now => Some(sess.principal.clone()),
                Some(_) => {
                    expired = true;
                    None
                }
                None => None,
            }
        };
        if expired {
            self.sessions.write().remove(token);
        }
        out
    }

    /// Destroy a session. Idempotent: an unknown or already-destroyed
    /// token is a no-op returning false.
    pub fn logout(&self, token: &str) -> bool {
        let removed = self.sessions.write().remove(token);
        if let Some(sess) = &removed {
            tprintln!("session.logout user={}", sess.principal.username);
        }
        removed.is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::store::DocId;

    fn principal(name: &str, role: Role) -> Principal {
        Principal { user_id: DocId::generate(), username: name.to_string(), role }
    }

    #[test]
    fn issue_then_validate_returns_snapshot() {
        let sm = SessionManager::default();
        let sess = sm.issue(principal("admin", Role::Admin));
        let p = sm.validate(&sess.token).expect("fresh session should resolve");
        assert_eq!(p.username, "admin");
        assert_eq!(p.role, Role::Admin);
    }

    #[test]
    fn unknown_token_does_not_resolve() {
        let sm = SessionManager::default();
        assert!(sm.validate("no-such-token").is_none());
    }

    #[test]
    fn expired_session_is_dropped() {
        let sm = SessionManager::with_ttl(Duration::from_secs(0));
        let sess = sm.issue(principal("viewer", Role::Viewer));
        assert!(sm.validate(&sess.token).is_none());
        // The expired entry is pruned, not just hidden
        assert_eq!(sm.active_sessions(), 0);
    }

    #[test]
    fn logout_is_idempotent() {
        let sm = SessionManager::default();
        let sess = sm.issue(principal("editor", Role::Editor));
        assert!(sm.logout(&sess.token));
        assert!(!sm.logout(&sess.token));
        assert!(sm.validate(&sess.token).is_none());
    }

    #[test]
    fn tokens_are_unique_and_opaque() {
        let sm = SessionManager::default();
        let a = sm.issue(principal("a", Role::Viewer));
        let b = sm.issue(principal("b", Role::Viewer));
        assert_ne!(a.token, b.token);
        assert!(a.token.len() >= 40);
    }
}
