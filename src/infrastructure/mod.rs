//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Repository implementations (PostgreSQL and in-memory)
//! - The process-local cache store and job queue
//! - Provider REST and service RPC clients

pub mod cache;
pub mod persistence;
pub mod provider;
pub mod queue;
pub mod rpc;
