use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::principal::Principal;

/// Role attached to every user. Determines mutation rights; any
/// authenticated role may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(AppError::validation("bad_type", format!("unknown role: {}", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single mutation gate: add/edit/delete on books and authors all go
/// through here. Admins and editors may mutate; viewers may not.
pub fn can_mutate(principal: &Principal) -> bool {
    matches!(principal.role, Role::Admin | Role::Editor)
}
