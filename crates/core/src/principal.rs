//! Principals: the opaque ownership key handed to the core by authentication.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length of a principal identifier.
pub const MAX_PRINCIPAL_LEN: usize = 128;

/// An authenticated principal.
///
/// The core never interprets the value. It is compared for equality to decide
/// ownership and stored verbatim as the owner of each record.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Create a principal, rejecting empty, oversized, or control-character values.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidPrincipal(
                "principal must not be empty".to_string(),
            ));
        }
        if id.len() > MAX_PRINCIPAL_LEN {
            return Err(crate::Error::InvalidPrincipal(format!(
                "principal exceeds {MAX_PRINCIPAL_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(crate::Error::InvalidPrincipal(
                "principal contains control characters".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Principal {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
