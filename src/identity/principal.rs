use serde::{Deserialize, Serialize};

use crate::store::DocId;

use super::authorizer::Role;

/// The authenticated identity attached to a session. Snapshotted at login
/// time: the role is not re-read from the store on later requests, so a
/// role change takes effect at the next login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: DocId,
    pub username: String,
    pub role: Role,
}
