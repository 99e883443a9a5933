use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// User models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserDto {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// The user view returned on the wire — never carries the password digest.
#[derive(Debug, Clone, Serialize)]
pub struct UserDto {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            email: user.email,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Machine models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub has_git: bool,
    #[serde(default)]
    pub has_node: bool,
    #[serde(default)]
    pub has_rust: bool,
    #[serde(default)]
    pub has_python: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct Machine {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub capabilities: Json<Capabilities>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    pub created_at: DateTime<Utc>,
}

/// Row shape returned to clients over `list_machines` / `machine_registered`.
#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    pub id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub capabilities: Capabilities,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "isOwn")]
    pub is_own: bool,
}

impl MachineInfo {
    pub fn from_owned(machine: Machine) -> Self {
        MachineInfo {
            id: machine.id,
            name: machine.name,
            platform: machine.platform,
            capabilities: machine.capabilities.0,
            is_online: machine.is_online,
            is_own: true,
        }
    }
}

// ============================================================================
// Session models
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub machine_id: Option<Uuid>,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
