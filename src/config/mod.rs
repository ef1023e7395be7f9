//! Configuration management
//!
//! Layered as: built-in defaults, then an optional TOML file
//! (`config/powerdial.toml` or the path in `POWERDIAL_CONFIG`), then
//! `POWERDIAL__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub rpc: RpcConfig,
    pub dialer: DialerConfig,
    pub billing: BillingConfig,
    pub metrics: MetricsConfig,
}

/// `Debug` masks the password in `url`
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider REST API
    pub api_base_url: String,
    /// Public base URL the provider posts webhooks to
    pub webhook_base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub billing_url: String,
    pub foundation_url: String,
    pub request_timeout_secs: u64,
}

/// Dial loop timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialerConfig {
    pub queue_name: String,
    /// Settle time between terminating a bridge and dialing the next contact
    pub next_dial_delay_secs: u64,
    /// Grace window before a completed campaign is ended
    pub end_grace_secs: u64,
    pub finalize_delay_secs: u64,
    pub stat_delay_secs: u64,
    /// How long a finished leg stays resolvable in the cache
    pub leg_cache_ttl_secs: u64,
    /// How long a completed job id keeps suppressing redeliveries
    pub job_marker_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub first_charge_delay_secs: u64,
    pub recharge_interval_secs: u64,
    /// Credit must be strictly above this to place or keep a call
    pub credit_threshold: f64,
    /// Workspace feature gating the dialer
    pub feature_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://postgres@localhost/powerdial".to_string(),
                max_connections: 10,
            },
            provider: ProviderConfig {
                api_base_url: "https://api.twilio.com/2010-04-01".to_string(),
                webhook_base_url: "http://localhost:8080".to_string(),
                request_timeout_secs: 10,
            },
            rpc: RpcConfig {
                billing_url: "http://localhost:9101".to_string(),
                foundation_url: "http://localhost:9102".to_string(),
                request_timeout_secs: 5,
            },
            dialer: DialerConfig::default(),
            billing: BillingConfig::default(),
            metrics: MetricsConfig {
                enabled: true,
                listen: "0.0.0.0:9000".to_string(),
            },
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            queue_name: "pd_queue".to_string(),
            next_dial_delay_secs: 8,
            end_grace_secs: 60,
            finalize_delay_secs: 1,
            stat_delay_secs: 1,
            leg_cache_ttl_secs: 500,
            job_marker_ttl_secs: 86_400,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            first_charge_delay_secs: 60,
            recharge_interval_secs: 60,
            credit_threshold: 0.05,
            feature_name: "power_dialer".to_string(),
        }
    }
}

impl Config {
    /// Load the layered configuration
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("POWERDIAL_CONFIG")
            .unwrap_or_else(|_| "config/powerdial".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("POWERDIAL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

impl DatabaseConfig {
    /// Connection URL with the password replaced, for logging
    pub fn masked_url(&self) -> String {
        mask_password(&self.url)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.masked_url())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // "postgres://user@host" has only the scheme colon before '@'
            if !url[colon_pos..].starts_with("://") {
                let mut masked = url.to_string();
                masked.replace_range(colon_pos + 1..at_pos, "****");
                return masked;
            }
        }
    }
    url.to_string()
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
