use anyhow::Context;
use dotenv::dotenv;
use mobcash_reconciliation::api::{self, AppState};
use mobcash_reconciliation::config::AppConfig;
use mobcash_reconciliation::database::memory::InMemoryStore;
use mobcash_reconciliation::database::repository::TransactionStore;
use mobcash_reconciliation::health::HealthChecker;
use mobcash_reconciliation::logging::init_tracing;
use mobcash_reconciliation::payments::factory::PaymentProviderFactory;
use mobcash_reconciliation::services::identity::StaticIdentityLookup;
use mobcash_reconciliation::services::notification::TracingNotifier;
use mobcash_reconciliation::services::orchestrator::ReconciliationOrchestrator;
use mobcash_reconciliation::services::task_queue::ChannelTaskQueue;
use mobcash_reconciliation::services::webhook_intake::WebhookIntake;
use mobcash_reconciliation::workers::follow_up::FollowUpWorker;
use mobcash_reconciliation::workers::pending_poller::{PendingPoller, PendingPollerConfig};
use mobcash_reconciliation::workers::webhook_retry::WebhookRetryWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const FOLLOW_UP_QUEUE_CAPACITY: usize = 1024;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[cfg(feature = "database")]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TransactionStore>> {
    use mobcash_reconciliation::database::{connect, postgres::PgTransactionStore};

    match &config.database {
        Some(database) => {
            let pool = connect(database)
                .await
                .context("failed to connect to the database")?;
            let store = PgTransactionStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("failed to apply the reconciliation schema")?;
            info!("using postgres transaction store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "database"))]
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TransactionStore>> {
    if config.database.is_some() {
        warn!("built without the database feature, DATABASE_URL is ignored");
    }
    Ok(Arc::new(InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting reconciliation service"
    );

    let store = build_store(&config).await?;

    let factory = PaymentProviderFactory::from_config(
        &config.providers,
        &config.timeouts,
        config.settings.callback_url("/webhooks/connect"),
    )
    .context("failed to build payment gateways")?;
    let available = factory.list_available_providers();
    info!(gateways = ?available, "payment gateways configured");

    let (task_queue, task_rx) = ChannelTaskQueue::new(FOLLOW_UP_QUEUE_CAPACITY);
    let orchestrator = Arc::new(ReconciliationOrchestrator::new(
        store.clone(),
        Arc::new(factory),
        Arc::new(task_queue),
        Arc::new(TracingNotifier),
        Arc::new(StaticIdentityLookup::new()),
        config.settings.clone(),
    ));
    let intake = Arc::new(WebhookIntake::new(store.clone(), orchestrator.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let follow_up = tokio::spawn(
        FollowUpWorker::new(orchestrator.clone(), task_rx).run(shutdown_rx.clone()),
    );

    let poller = PendingPoller::new(
        store.clone(),
        orchestrator.clone(),
        PendingPollerConfig {
            poll_interval: config.workers.poll_interval,
            batch_size: config.workers.poll_batch_size,
            follow_up_grace: config.workers.follow_up_grace,
        },
    );
    let poller_handle = tokio::spawn(poller.run(shutdown_rx.clone()));

    let webhook_retry = WebhookRetryWorker::new(
        store.clone(),
        intake.clone(),
        config.workers.webhook_retry_interval,
        config.workers.webhook_max_retries,
    );
    let retry_handle = tokio::spawn(webhook_retry.run(shutdown_rx.clone()));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        intake,
        health: HealthChecker::new(store, available),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await
        .context("server error")?;

    for (name, handle) in [
        ("pending poller", poller_handle),
        ("webhook retry", retry_handle),
        ("follow-up", follow_up),
    ] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "worker task failed");
        }
    }

    info!("shutdown complete");
    Ok(())
}
