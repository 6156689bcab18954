//! Occupancy Poller
//!
//! Main entry point.

use occupancy_poller::{
    alert_notifier::WebhookNotifier,
    camera_rebooter::HttpRebooter,
    camera_registry::{CameraRegistry, JsonFileSource},
    camera_state::CameraStateStore,
    frame_sampler::HttpFrameSampler,
    metric_sink::InfluxSink,
    occupancy_estimator::DetectorClient,
    polling_orchestrator::PollingOrchestrator,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occupancy_poller=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting occupancy poller v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;
    tracing::info!(
        camera_list_file = %config.camera_list_file.display(),
        influxdb_url = %config.influxdb_url,
        influxdb_bucket = %config.influxdb_bucket,
        detector_url = %config.detector_url,
        alerts = config.alert_webhook_url.is_some(),
        "Configuration loaded"
    );

    // Initialize components
    let registry = Arc::new(CameraRegistry::new(Arc::new(JsonFileSource::new(
        config.camera_list_file.clone(),
    ))));
    let sampler = Arc::new(HttpFrameSampler::new()?);
    let detector = Arc::new(DetectorClient::new(
        config.detector_url.clone(),
        config.detector_class.clone(),
        config.detector_min_confidence,
    )?);
    if !detector.health_check().await {
        tracing::warn!(detector_url = %config.detector_url, "Detector not reachable yet");
    }
    let sink = Arc::new(InfluxSink::new(
        &config.influxdb_url,
        &config.influxdb_org,
        &config.influxdb_bucket,
        config.influxdb_token.clone(),
    )?);
    let rebooter = Arc::new(HttpRebooter::new(
        config.reboot_query.clone(),
        Duration::from_secs(config.fetch_timeout_sec),
    )?);
    let states = Arc::new(CameraStateStore::new());

    let mut polling = PollingOrchestrator::new(
        config.polling_config(),
        registry,
        sampler,
        detector.clone(),
        sink,
        rebooter,
        states,
    );
    if let Some(url) = &config.alert_webhook_url {
        polling = polling.with_notifier(Arc::new(WebhookNotifier::new(url.clone())?));
        tracing::info!("Escalation alerts enabled");
    }
    let polling = Arc::new(polling);

    let poll_handle = polling.start();
    tracing::info!("PollingOrchestrator started");

    if config.status_api_enabled {
        let app = web_api::create_router(AppState::new(polling.clone(), detector))
            .layer(TraceLayer::new_for_http());

        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Status API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    polling.stop();
    poll_handle.await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
