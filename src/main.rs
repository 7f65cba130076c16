//! Resale fulfillment service

use anyhow::Result;
use resale_fulfillment::config::Settings;
use resale_fulfillment::domain::ports::EventPublisher;
use resale_fulfillment::infrastructure::{LogPublisher, MemoryStore, NatsPublisher, PgStore};
use resale_fulfillment::services::{Fulfillment, Ports};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer()).init();

    let settings = Settings::from_env()?;

    let events: Arc<dyn EventPublisher> = match &settings.nats_url {
        Some(url) => match NatsPublisher::connect(url).await {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => { tracing::warn!(error = %e, "NATS unavailable, events will only be logged"); Arc::new(LogPublisher) }
        },
        None => Arc::new(LogPublisher),
    };

    let ports = match &settings.database_url {
        Some(url) => {
            let store = PgStore::connect(url, 10).await?;
            store.migrate().await?;
            Ports::from_store(Arc::new(store), events)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory store");
            Ports::from_store(Arc::new(MemoryStore::new()), events)
        }
    };
    let app = Fulfillment::new(ports, settings.engine.clone());

    let shutdown = CancellationToken::new();
    if settings.reconcile_interval_secs > 0 {
        tokio::spawn(reconcile_loop(app.clone(), Duration::from_secs(settings.reconcile_interval_secs), shutdown.clone()));
    }

    let router = resale_fulfillment::api::router(app);
    let addr = format!("0.0.0.0:{}", settings.port);
    tracing::info!("Resale fulfillment service listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            token.cancel();
        })
        .await?;
    shutdown.cancel();
    Ok(())
}

async fn reconcile_loop(app: Fulfillment, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = app.reconciliation.run_all(&shutdown).await {
                    tracing::error!(error = %e, "reconciliation run failed");
                }
            }
        }
    }
    tracing::info!("reconciliation loop stopped");
}
