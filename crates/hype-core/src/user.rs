//! User identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum display name length.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 32;

/// Stable user identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier.
    pub id: UserId,
    /// Unique display name, used on the wire to address the user.
    pub name: String,
}

impl User {
    /// Create a new user value.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            name: name.into(),
        }
    }
}

/// Credentials presented in the `connect` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Display name.
    pub username: String,
    /// Opaque access token.
    pub token: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }
}

/// Validate a display name.
///
/// # Errors
///
/// Returns an error message if the name is invalid.
pub fn validate_display_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Display name cannot be empty");
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err("Display name too long");
    }
    if name.trim() != name {
        return Err("Display name cannot start or end with whitespace");
    }
    if name.chars().any(char::is_control) {
        return Err("Display name contains invalid characters");
    }
    Ok(())
}
