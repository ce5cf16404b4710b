//! Gateway entry point.

use std::error::Error;
use std::sync::Arc;

use clients::{HttpCatalogClient, HttpRatingClient, HttpReservationClient, http_client};
use gateway::AppState;
use gateway::config::{Config, LogFormat};
use resilience::BreakerRegistry;
use saga::{
    AmqpTransport, InMemoryTransport, RetrySupervisor, RetryTransport, Shutdown, StepReplayer,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Downstream clients sharing one breaker registry
    let breakers = Arc::new(BreakerRegistry::new(config.breaker));
    let http = http_client(config.http_timeout)?;
    let catalog = HttpCatalogClient::new(config.catalog_url.as_str(), http.clone(), &breakers);
    let reservations =
        HttpReservationClient::new(config.reservation_url.as_str(), http.clone(), &breakers);
    let rating = HttpRatingClient::new(config.rating_url.as_str(), http, &breakers);

    // 4. Retry queue transport
    let transport: Arc<dyn RetryTransport> = match &config.rabbitmq_url {
        Some(url) => Arc::new(AmqpTransport::connect(url).await?),
        None => {
            tracing::warn!("RABBITMQ_URL not set, retry queues are kept in memory");
            Arc::new(InMemoryTransport::new())
        }
    };

    // 5. Application state and retry workers
    let state = Arc::new(AppState::new(
        Arc::new(catalog),
        Arc::new(reservations),
        Arc::new(rating),
        Arc::clone(&transport),
        breakers,
    ));
    let replayer: Arc<dyn StepReplayer> = state.orchestrator.clone();
    let shutdown = Shutdown::new();
    let workers = RetrySupervisor::new(transport, replayer, config.retry_backoff).spawn(&shutdown);

    // 6. Start server
    let app = gateway::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting gateway");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop the retry workers
    shutdown.trigger();
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "retry worker panicked");
        }
    }

    tracing::info!("gateway shut down gracefully");
    Ok(())
}
