//! OpenSASE Fulfillment - order fulfillment and carrier webhook service

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_fulfillment::bus::{EventSink, NatsEventSink, NullEventSink};
use opensase_fulfillment::carrier::CarrierClient;
use opensase_fulfillment::config::Config;
use opensase_fulfillment::http::{router, AppState};
use opensase_fulfillment::notify::{NotificationDispatcher, ResendMailer};
use opensase_fulfillment::store::{OrderStore, PgOrderStore};
use opensase_fulfillment::{FulfillmentService, WebhookReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let pg = PgOrderStore::connect(&config.database_url, 10).await?;
    pg.migrate().await?;
    let store: Arc<dyn OrderStore> = Arc::new(pg);

    let events: Arc<dyn EventSink> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsEventSink::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events will not be published");
                Arc::new(NullEventSink)
            }
        },
        None => Arc::new(NullEventSink),
    };

    let mailer = ResendMailer::new(&config.email.api_url, &config.email.api_key, &config.email.from, config.email.reply_to.clone())?;
    let notifier = Arc::new(NotificationDispatcher::new(Arc::new(mailer), store.clone(), &config.email.store_name));
    let carrier = CarrierClient::new(&config.carrier)?;

    let fulfillment = Arc::new(FulfillmentService::new(store.clone(), carrier, notifier.clone(), events.clone(), config.fulfillment.clone()));
    let reconciler = Arc::new(WebhookReconciler::new(store, notifier, events));
    tokio::spawn(retry_failed_webhooks(reconciler.clone()));
    if config.webhook_secret.is_none() {
        tracing::warn!("CARRIER_WEBHOOK_SECRET not set, carrier webhooks are accepted without a signature");
    }
    let state = AppState { fulfillment, reconciler, webhook_secret: config.webhook_secret.as_deref().map(Arc::from) };

    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 OpenSASE Fulfillment listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

/// Picks up webhooks whose processing failed after they were logged.
async fn retry_failed_webhooks(reconciler: Arc<WebhookReconciler>) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    loop {
        tick.tick().await;
        match reconciler.retry_failed(50).await {
            Ok(outcomes) if !outcomes.is_empty() => tracing::info!(retried = outcomes.len(), "failed webhooks retried"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "webhook retry pass failed"),
        }
    }
}
