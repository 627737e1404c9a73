//! Network participant roles.
//!
//! Historical tooling spells roles many ways (`"OSS"`, `"Deoss"`, `"sminer"`,
//! `"bucket"`...). All of them are normalized here, once, into [`Role`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Error returned when a role string matches no known alias.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
#[snafu(display("Unknown role '{input}'"))]
pub struct UnknownRoleError {
    /// The rejected input.
    pub input: String,
}

/// A participant role that can be registered on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Storage miner.
    Storage,
    /// Object storage gateway.
    Oss,
    /// Trusted execution validator.
    Validator,
}

impl Role {
    /// Chain module that owns registration for this role.
    pub const fn module(self) -> &'static str {
        match self {
            Self::Storage => "Sminer",
            Self::Oss => "Oss",
            Self::Validator => "TeeWorker",
        }
    }

    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Oss => "oss",
            Self::Validator => "validator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storage" | "sminer" | "miner" | "storageminer" => Ok(Self::Storage),
            "oss" | "deoss" | "gateway" | "bucket" => Ok(Self::Oss),
            "validator" | "tee" | "teeworker" => Ok(Self::Validator),
            _ => UnknownRoleSnafu { input: s }.fail(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn legacy_aliases_normalize() {
        for alias in ["oss", "OSS", "Deoss", "deoss", "DeOSS", "bucket"] {
            assert_eq!(alias.parse::<Role>().unwrap(), Role::Oss, "alias {alias}");
        }
        for alias in ["sminer", "SMINER", "storage", "Storage", " miner "] {
            assert_eq!(alias.parse::<Role>().unwrap(), Role::Storage, "alias {alias}");
        }
        for alias in ["tee", "TEE", "validator", "TeeWorker"] {
            assert_eq!(alias.parse::<Role>().unwrap(), Role::Validator, "alias {alias}");
        }
    }

    #[test]
    fn unknown_role_keeps_input() {
        let err = "farmer".parse::<Role>().unwrap_err();
        assert_eq!(err.input, "farmer");
        assert_eq!(err.to_string(), "Unknown role 'farmer'");
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(Role::Oss.to_string(), "oss");
        assert_eq!("Deoss".parse::<Role>().unwrap().to_string(), "oss");
        assert_eq!(Role::Storage.module(), "Sminer");
    }
}
