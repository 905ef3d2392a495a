use chrono::{DateTime, Utc};
use mongodb::bson;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Closed role set. A user is a teacher, a student, both, or neither —
/// every dispatch over roles must match all four arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Teacher,
    Student,
    Both,
    Neither,
}

impl Role {
    pub fn can_teach(&self) -> bool {
        match self {
            Role::Teacher | Role::Both => true,
            Role::Student | Role::Neither => false,
        }
    }

    pub fn can_learn(&self) -> bool {
        match self {
            Role::Student | Role::Both => true,
            Role::Teacher | Role::Neither => false,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Neither
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub username: String,
    /// Canonical M-Pesa number (2547XXXXXXXX / 2541XXXXXXXX) when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub phone: Option<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            username: user.username.clone(),
            role: user.role,
            phone: user.phone.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_role_teaches_and_learns() {
        assert!(Role::Both.can_teach());
        assert!(Role::Both.can_learn());
    }

    #[test]
    fn neither_role_does_nothing() {
        assert!(!Role::Neither.can_teach());
        assert!(!Role::Neither.can_learn());
    }

    #[test]
    fn single_roles_are_exclusive() {
        assert!(Role::Teacher.can_teach());
        assert!(!Role::Teacher.can_learn());
        assert!(Role::Student.can_learn());
        assert!(!Role::Student.can_teach());
    }
}
