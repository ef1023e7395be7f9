//! Powerdial - A power-dialer campaign engine built with Rust
//!
//! This is a Domain-Driven Design (DDD) implementation of a sequential
//! outbound dialer: it walks a campaign's contact list one call at a time,
//! bridging an agent with each contact through a telephony provider.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
