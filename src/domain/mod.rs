//! Domain layer - Campaign dialing model and the ports it depends on
//!
//! This layer contains:
//! - Aggregates and entities: campaigns, conversations, call legs, stats
//! - The in-flight dial state kept in the shared cache
//! - Ports: repositories, cache, job queue, provider, billing and workspace RPC

pub mod billing;
pub mod cache;
pub mod callback_token;
pub mod campaign;
pub mod conversation;
pub mod dial_state;
pub mod foundation;
pub mod jobs;
pub mod participant;
pub mod provider;
pub mod shared;
pub mod stats;

// Re-export commonly used types
pub use shared::{DomainError, Result};
