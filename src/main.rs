//! Subscription checkout service

use anyhow::Result;
use std::sync::Arc;
use subscription_checkout::{
    config::Config,
    gateway::{PaymentGateway, ZarinpalGateway},
    http::{self, AppState},
    notify::{LogSink, NatsSink, NotificationSink, Notifier},
    services::PaymentSettings,
    store::{MemoryStore, PgStore, Store},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url, config.database_max_connections).await?;
            pg.migrate().await?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let sink: Arc<dyn NotificationSink> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsSink::new(client, config.nats_subject.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, logging notifications instead");
                Arc::new(LogSink)
            }
        },
        None => Arc::new(LogSink),
    };
    let (notifier, _worker) = Notifier::spawn(sink);

    let gateway: Arc<dyn PaymentGateway> = Arc::new(ZarinpalGateway::new(&config.gateway)?);
    let state = AppState::new(store, gateway, notifier, PaymentSettings::from(&config.gateway), config.currency_scale);
    let app = http::router(state);

    tracing::info!("🚀 Subscription checkout listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
