//! Identity model and resolution.
//!
//! Every person who can sign in is one row in the `identities` table with
//! exactly one [`Role`]. Callers hand a raw identifier (admission number,
//! phone number, staff number or email) to [`IdentityResolver`], which
//! classifies it by shape and queries the matching lookup on an
//! [`IdentityStore`].

mod identifier;
mod resolver;

pub use identifier::{normalize_phone, Identifier, IdentifierKind};
pub use resolver::{IdentityResolver, IdentityStore, Resolution};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Portal roles. Each identity has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Teacher, Role::Parent, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Student => "student",
        }
    }

    /// Staff roles sign in with a staff number or email
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }

    /// Kind of secret this role logs in with
    pub fn credential(&self) -> CredentialKind {
        match self {
            Role::Student => CredentialKind::Pin,
            _ => CredentialKind::Password,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "parent" => Ok(Role::Parent),
            "student" => Ok(Role::Student),
            _ => Err(IdentityError::UnknownRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Pin,
    Password,
}

/// Canonical identity record with a verified role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub admission_number: Option<String>,
    pub staff_number: Option<String>,
    pub school_id: Option<String>,
    pub parent_id: Option<String>,
    pub fee_balance_cents: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identifier is empty")]
    EmptyIdentifier,
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("identity store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" student ".parse::<Role>().unwrap(), Role::Student);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = "superuser".parse::<Role>().unwrap_err();
        assert!(matches!(err, IdentityError::UnknownRole(ref r) if r == "superuser"));
    }

    #[test]
    fn test_role_display_roundtrips() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_credentials() {
        assert_eq!(Role::Student.credential(), CredentialKind::Pin);
        assert_eq!(Role::Parent.credential(), CredentialKind::Password);
        assert!(Role::Teacher.is_staff());
        assert!(!Role::Parent.is_staff());
    }
}
