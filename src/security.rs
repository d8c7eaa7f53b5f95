//! Credential management and user records.
//! Passwords are stored only as salted Argon2 PHC strings; plaintext never
//! touches the store. Username uniqueness is enforced by a pre-check at
//! registration time, not by a store-level constraint, so two concurrent
//! registrations of the same name can race (last-write-wins).

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::identity::Role;
use crate::store::{DocId, Document, Filter, SharedStore, USERS};

/// Hash a password into an Argon2 PHC string with a fresh random salt.
/// Empty passwords are accepted; no strength policy is applied here.
pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("hash_error", e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("hash_error", e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_error", e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Verify a password against a stored PHC string. A malformed hash
/// verifies false rather than erroring.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

/// A registered user as persisted in the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: DocId,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

impl User {
    /// Decode a stored document. Documents missing required fields or
    /// carrying an unknown role read as `None`.
    pub fn from_doc(doc: &Document) -> Option<User> {
        let id = doc.get("_id").and_then(Value::as_str).and_then(DocId::parse)?;
        let username = doc.get("username").and_then(Value::as_str)?.to_string();
        let password_hash = doc.get("password_hash").and_then(Value::as_str)?.to_string();
        let role = doc.get("role").and_then(Value::as_str).and_then(|r| r.parse::<Role>().ok())?;
        Some(User { id, username, password_hash, role })
    }

    /// Encode the mutable field set for insertion; the store assigns `_id`.
    fn to_doc(username: &str, password_hash: &str, role: Role) -> Document {
        let mut doc = Document::new();
        doc.insert("username".into(), Value::String(username.to_string()));
        doc.insert("password_hash".into(), Value::String(password_hash.to_string()));
        doc.insert("role".into(), Value::String(role.as_str().to_string()));
        doc
    }
}

/// Look up a user by exact, case-sensitive username.
pub fn find_user_by_username(store: &SharedStore, username: &str) -> AppResult<Option<User>> {
    let doc = store.find_one(USERS, &Filter::by("username", username))?;
    Ok(doc.as_ref().and_then(User::from_doc))
}

/// Look up a user by id. Missing users read as `None`.
pub fn find_user_by_id(store: &SharedStore, id: &DocId) -> AppResult<Option<User>> {
    let doc = store.find_by_id(USERS, id)?;
    Ok(doc.as_ref().and_then(User::from_doc))
}

/// Register a new user. Uniqueness is a check-then-insert; the duplicate
/// case surfaces as a recoverable conflict.
pub fn register_user(store: &SharedStore, username: &str, password: &str, role: Role) -> AppResult<User> {
    if find_user_by_username(store, username)?.is_some() {
        return Err(AppError::conflict("user_exists", "User already exists."));
    }
    let password_hash = hash_password(password)?;
    let id = store.insert(USERS, User::to_doc(username, &password_hash, role))?;
    tracing::info!(username = username, role = role.as_str(), "user.register");
    Ok(User { id, username: username.to_string(), password_hash, role })
}

/// Verify a username/password pair against the store. Returns the matching
/// user on success, `None` for unknown names or wrong passwords.
pub fn authenticate(store: &SharedStore, username: &str, password: &str) -> AppResult<Option<User>> {
    let Some(user) = find_user_by_username(store, username)? else {
        return Ok(None);
    };
    if verify_password(&user.password_hash, password) {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

/// First-run seeding: create the three well-known accounts when the users
/// collection is empty. Subsequent startups leave existing users alone.
pub fn ensure_seed_users(store: &SharedStore) -> AppResult<()> {
    if store.count(USERS)? > 0 {
        return Ok(());
    }
    for (username, password, role) in [
        ("admin", "admin123", Role::Admin),
        ("editor", "editor123", Role::Editor),
        ("viewer", "viewer123", Role::Viewer),
    ] {
        register_user(store, username, password, role)?;
    }
    tracing::info!("seeded default users: admin, editor, viewer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let phc = hash_password("viewer123").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "viewer123"));
        assert!(!verify_password(&phc, "viewer124"));
        assert!(!verify_password(&phc, ""));
    }

    #[test]
    fn distinct_passwords_never_cross_verify() {
        let a = hash_password("alpha").unwrap();
        let b = hash_password("beta").unwrap();
        assert!(!verify_password(&a, "beta"));
        assert!(!verify_password(&b, "alpha"));
    }

    #[test]
    fn empty_password_is_accepted() {
        let phc = hash_password("").unwrap();
        assert!(verify_password(&phc, ""));
        assert!(!verify_password(&phc, "x"));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("not-a-phc-string", "anything"));
        assert!(!verify_password("", "anything"));
    }

    #[test]
    fn register_rejects_duplicate_username() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path()).unwrap();
        register_user(&store, "alice", "pw1", Role::Editor).unwrap();
        let err = register_user(&store, "alice", "pw2", Role::Viewer).unwrap_err();
        assert_eq!(err.code_str(), "user_exists");
        // Exactly one stored user remains
        assert_eq!(store.count(USERS).unwrap(), 1);
    }

    #[test]
    fn authenticate_unknown_and_wrong_password() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path()).unwrap();
        register_user(&store, "bob", "secret", Role::Viewer).unwrap();
        assert!(authenticate(&store, "bob", "secret").unwrap().is_some());
        assert!(authenticate(&store, "bob", "wrong").unwrap().is_none());
        assert!(authenticate(&store, "nobody", "secret").unwrap().is_none());
        // Lookup is case-sensitive
        assert!(authenticate(&store, "Bob", "secret").unwrap().is_none());
    }

    #[test]
    fn seed_users_only_on_empty_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path()).unwrap();
        ensure_seed_users(&store).unwrap();
        assert_eq!(store.count(USERS).unwrap(), 3);
        // Second run leaves the collection untouched
        ensure_seed_users(&store).unwrap();
        assert_eq!(store.count(USERS).unwrap(), 3);
        let admin = find_user_by_username(&store, "admin").unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(verify_password(&admin.password_hash, "admin123"));
    }
}
