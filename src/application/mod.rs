//! Application layer - Dialer use cases
//!
//! This layer orchestrates the domain ports to run campaigns:
//! - Operator control commands and the dial primitive
//! - Bridge webhook handling and pointer advancement
//! - Billing, statistics and background job execution

pub mod advance;
pub mod billing_meter;
pub mod bridge_events;
pub mod dialer;
pub mod engine;
pub mod jobs;
pub mod operator;
pub mod state_cache;
pub mod stats;

pub use advance::Advancer;
pub use billing_meter::BillingMeter;
pub use bridge_events::{BridgeEvent, BridgeEventDispatcher, BridgeEventKind};
pub use dialer::{DialerControlLoop, DialerDeps};
pub use engine::{DialerEngine, Ports};
pub use jobs::{JobPublisher, JobRunner};
pub use operator::ConversationOperator;
pub use state_cache::CampaignStateCache;
pub use stats::StatsAccumulator;
