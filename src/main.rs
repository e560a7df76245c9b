use ledger_engine::api::{create_router, AppState};
use ledger_engine::config::Settings;
use ledger_engine::events::{
    EventConsumer, EventProducer, EventPublisher, ProducerConfig, ProjectorConfig, WalletProjector,
};
use ledger_engine::idempotency::KeyGenerator;
use ledger_engine::observability::{init_logging, init_metrics, HealthChecker, LogConfig, LogFormat};
use ledger_engine::saga::{RecoveryService, RedisHeartbeatStore, SagaCoordinator};
use ledger_engine::services::{
    AccountService, FeePolicy, HttpPermissionOracle, LedgerService, OperationDeps,
    OperationService, PermissionOracle, StaticPermissionOracle, WalletService,
};
use rskafka::client::ClientBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new()?;

    let log_config = LogConfig {
        level: settings.application.log_level.clone(),
        format: LogFormat::from(
            std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()).as_str(),
        ),
        include_target: true,
    };
    init_logging(&log_config);

    let metrics_handle = init_metrics();
    info!("configuration loaded, metrics initialized");

    // PostgreSQL: the ledger store.
    info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("database connection established");

    info!("running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("migrations applied");

    // Redis: the saga heartbeat store.
    info!("connecting to redis...");
    let redis_client = redis::Client::open(settings.redis.url.clone())?;
    {
        let mut con = redis_client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut con).await?;
    }
    info!("redis connection established");

    // Kafka: the event bus. Optional; the engine runs without it and the
    // wallet projection falls back to inline syncs only.
    let kafka_client = if settings.kafka.enabled {
        let brokers = vec![settings.kafka.brokers.clone()];
        match tokio::time::timeout(Duration::from_secs(3), ClientBuilder::new(brokers).build()).await
        {
            Ok(Ok(client)) => {
                info!("kafka client created");
                Some(Arc::new(client))
            }
            Ok(Err(e)) => {
                warn!("kafka connection failed: {}. continuing without event bus", e);
                None
            }
            Err(_) => {
                warn!("kafka connection timed out. continuing without event bus");
                None
            }
        }
    } else {
        None
    };

    let events = match &kafka_client {
        Some(client) => EventPublisher::new(Arc::new(EventProducer::new(
            client.clone(),
            ProducerConfig::default(),
        ))),
        None => EventPublisher::disabled(),
    };

    // Core services. Everything is wired here; no process-wide singletons.
    let ledger = Arc::new(LedgerService::new(pool.clone(), events.clone()));
    let accounts = Arc::new(AccountService::new(pool.clone()));
    let wallets = Arc::new(WalletService::new(pool.clone()));

    let permissions: Arc<dyn PermissionOracle> = match std::env::var("AUTH_SERVICE_URL") {
        Ok(url) => Arc::new(HttpPermissionOracle::new(url, Duration::from_secs(2))),
        Err(_) => {
            warn!("AUTH_SERVICE_URL not set, denying all overdraft capabilities");
            Arc::new(StaticPermissionOracle::denying())
        }
    };

    let heartbeat_store = Arc::new(RedisHeartbeatStore::new(redis_client.clone()));
    let coordinator = Arc::new(SagaCoordinator::new(
        heartbeat_store.clone(),
        pool.clone(),
        settings.saga.clone(),
    ));

    let deps = Arc::new(OperationDeps::new(
        pool.clone(),
        ledger.clone(),
        accounts.clone(),
        wallets.clone(),
        permissions,
        FeePolicy::from_settings(&settings.fees),
        KeyGenerator::new(settings.idempotency.window_ms),
        events.clone(),
    ));
    let operations = Arc::new(OperationService::new(deps, coordinator));

    // Recovery: compensates sagas whose worker died.
    let recovery = Arc::new(RecoveryService::new(
        heartbeat_store,
        ledger.clone(),
        wallets.clone(),
        pool.clone(),
        settings.saga.clone(),
    ));
    {
        let recovery = recovery.clone();
        tokio::spawn(async move { recovery.run().await });
    }

    // Event-driven wallet projection.
    if let Some(client) = &kafka_client {
        let consumer = EventConsumer::new(client.clone(), ProjectorConfig::default());
        let projector = Arc::new(WalletProjector::new(wallets.clone()));
        tokio::spawn(async move { consumer.run(projector).await });
    }

    let health_checker = Arc::new(HealthChecker::new(
        pool.clone(),
        redis_client.clone(),
        kafka_client.clone(),
    ));

    let state = AppState::new(
        pool,
        redis_client,
        kafka_client,
        ledger,
        accounts,
        wallets,
        operations,
    )
    .with_metrics(metrics_handle)
    .with_health_checker(health_checker);

    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", settings.application.port);
    info!("starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            recovery.stop();
        })
        .await?;

    Ok(())
}
