//! Coarse authorization labels.

use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Role assigned to a CaveMaster user.
///
/// Known roles parse case-insensitively; anything else is kept verbatim so
/// routes can still declare roles this crate does not know about. Equality
/// ignores ASCII case for every role, `Other` names included.
#[derive(Debug, Clone)]
pub enum Role {
    Admin,
    Manager,
    Waitress,
    Client,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Waitress => "waitress",
            Self::Client => "client",
            Self::Other(name) => name,
        }
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq_ignore_ascii_case(other.as_str())
    }
}

impl Eq for Role {}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.as_str().bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl FromStr for Role {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "waitress" => Self::Waitress,
            "client" => Self::Client,
            _ => Self::Other(trimmed.to_string()),
        })
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(role) => role,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Role::from(raw.as_str()))
    }
}
