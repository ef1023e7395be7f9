//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dialable contact taken from a campaign's contact list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub number: String,
}

impl Contact {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.number)
    }
}

/// Provider sub-account credentials for a workspace.
///
/// A snapshot is taken when a run starts and carried in the campaign cache,
/// so every provider call of that run uses the same account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("account_sid", &self.account_sid)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}
