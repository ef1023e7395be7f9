//! Interface layer - External interfaces
//!
//! This layer handles:
//! - Provider webhook payloads
//! - The Prometheus metrics endpoint

pub mod metrics_exporter;
pub mod webhook;

pub use webhook::WebhookIngress;
