use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workspace membership roles.
///
/// Roles are strictly ordered: `Viewer < Editor < Admin < Owner`. A role
/// satisfies every requirement at or below its own rank. Tenant isolation
/// itself never looks at the role; it only asks whether a membership exists.
/// Role checks are layered on top by the domain operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Admin,
    Owner,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Viewer => 10,
            Role::Editor => 20,
            Role::Admin => 30,
            Role::Owner => 40,
        }
    }

    pub fn can(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}
