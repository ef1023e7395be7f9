//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod campaign_repository;
#[cfg(feature = "postgres")]
pub mod conversation_repository;
#[cfg(feature = "postgres")]
pub mod participant_repository;
#[cfg(feature = "postgres")]
pub mod stats_repository;

pub use memory::{
    InMemoryCampaignRepository, InMemoryConversationRepository, InMemoryParticipantRepository,
    InMemoryStatsRepository,
};
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations};
#[cfg(feature = "postgres")]
pub use campaign_repository::PgCampaignRepository;
#[cfg(feature = "postgres")]
pub use conversation_repository::PgConversationRepository;
#[cfg(feature = "postgres")]
pub use participant_repository::PgParticipantRepository;
#[cfg(feature = "postgres")]
pub use stats_repository::PgStatsRepository;
