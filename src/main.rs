use powerdial::application::{DialerEngine, Ports};
use powerdial::config::Config;
use powerdial::domain::cache::CacheStore;
use powerdial::domain::campaign::CampaignRepository;
use powerdial::domain::conversation::ConversationLedger;
use powerdial::domain::participant::ParticipantLedger;
use powerdial::domain::stats::CampaignStatsRepository;
use powerdial::infrastructure::cache::InMemoryCacheStore;
use powerdial::infrastructure::provider::RestBridgeProvider;
use powerdial::infrastructure::queue::{JobWorker, TokioJobScheduler};
use powerdial::infrastructure::rpc::{JsonRpcBillingGateway, JsonRpcFoundation};
use powerdial::interface::metrics_exporter::init_metrics;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use powerdial::infrastructure::persistence::{
    create_pool, run_migrations, PgCampaignRepository, PgConversationRepository,
    PgParticipantRepository, PgStatsRepository,
};
#[cfg(not(feature = "postgres"))]
use powerdial::infrastructure::persistence::{
    InMemoryCampaignRepository, InMemoryConversationRepository, InMemoryParticipantRepository,
    InMemoryStatsRepository,
};

type Repositories = (
    Arc<dyn CampaignRepository>,
    Arc<dyn ConversationLedger>,
    Arc<dyn ParticipantLedger>,
    Arc<dyn CampaignStatsRepository>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Powerdial campaign engine");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config);

    if config.metrics.enabled {
        init_metrics(&config.metrics)?;
    }

    let (campaigns, conversations, participants, stats) = repositories(&config).await?;

    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
    let (scheduler, receiver) = TokioJobScheduler::channel();

    let engine = DialerEngine::assemble(
        Ports {
            campaigns,
            conversations,
            participants,
            stats,
            cache,
            provider: Arc::new(RestBridgeProvider::new(&config.provider)?),
            billing: Arc::new(JsonRpcBillingGateway::new(&config.rpc)?),
            foundation: Arc::new(JsonRpcFoundation::new(&config.rpc)?),
            scheduler: Arc::new(scheduler),
        },
        &config.dialer,
        &config.billing,
    );

    let worker = JobWorker::new(receiver, engine.runner.clone(), config.dialer.queue_name.clone());
    info!("Powerdial initialized successfully");

    worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    info!("Powerdial stopped");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn repositories(config: &Config) -> anyhow::Result<Repositories> {
    info!("Initializing database connection...");
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    Ok((
        Arc::new(PgCampaignRepository::new(pool.clone())),
        Arc::new(PgConversationRepository::new(pool.clone())),
        Arc::new(PgParticipantRepository::new(pool.clone())),
        Arc::new(PgStatsRepository::new(pool)),
    ))
}

#[cfg(not(feature = "postgres"))]
async fn repositories(_config: &Config) -> anyhow::Result<Repositories> {
    warn!("Built without postgres, campaign data lives in memory");
    Ok((
        Arc::new(InMemoryCampaignRepository::new()),
        Arc::new(InMemoryConversationRepository::new()),
        Arc::new(InMemoryParticipantRepository::new()),
        Arc::new(InMemoryStatsRepository::new()),
    ))
}
