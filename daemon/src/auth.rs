//! Credential table

use crate::config::CredentialConfig;
use matte_crypto::constant_time_eq;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Credential key is empty")]
    EmptyKey,

    #[error("Duplicate credential key")]
    DuplicateKey,
}

/// Behavior selected by a presented API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Genuine background removal
    Legitimate,
    /// Carrier decode and tunnelled fetch
    Covert,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legitimate => "legitimate",
            Self::Covert => "covert",
        }
    }
}

/// Immutable mapping from API key to role
pub struct CredentialTable {
    entries: Vec<(Vec<u8>, Role)>,
}

impl CredentialTable {
    pub fn new<K: AsRef<[u8]>>(
        entries: impl IntoIterator<Item = (K, Role)>,
    ) -> Result<Self, AuthError> {
        let mut table: Vec<(Vec<u8>, Role)> = Vec::new();
        for (key, role) in entries {
            let key = key.as_ref();
            if key.is_empty() {
                return Err(AuthError::EmptyKey);
            }
            if table.iter().any(|(k, _)| k.as_slice() == key) {
                return Err(AuthError::DuplicateKey);
            }
            table.push((key.to_vec(), role));
        }
        Ok(Self { entries: table })
    }

    pub fn from_config(credentials: &[CredentialConfig]) -> Result<Self, AuthError> {
        Self::new(credentials.iter().map(|c| (c.key.as_bytes(), c.role)))
    }

    /// Resolve a presented key.
    ///
    /// Every entry is compared in constant time, with no early exit, so
    /// timing does not depend on which entry matched.
    pub fn lookup(&self, presented: &str) -> Option<Role> {
        let mut found = None;
        for (key, role) in &self.entries {
            if constant_time_eq(key, presented.as_bytes()) {
                found = Some(*role);
            }
        }
        found
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.entries.iter().any(|(_, r)| *r == role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
