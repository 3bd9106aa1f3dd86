use axum::{routing::get, Router};
use hub_monitor::config::{Config, StoreBackend};
use hub_monitor::dispatch::spawn_dispatcher;
use hub_monitor::errors::Result;
use hub_monitor::memory::MemoryStore;
use hub_monitor::notify::{
    ChannelKind, Channels, EmailChannel, HttpGatewayChannel, MessageChannel, NotificationRouter,
    SmtpEmailChannel,
};
use hub_monitor::pipeline::IngestionPipeline;
use hub_monitor::store::Store;
use hub_monitor::{db, metrics, mqtt, rest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting hub monitor");
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Thresholds: temperature > {:.2}°C, humidity > {:.2}%",
        config.thresholds.temperature, config.thresholds.humidity
    );

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let store = match build_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialise store: {}", e);
            std::process::exit(1);
        }
    };

    let router = NotificationRouter::new(store.clone(), build_channels(&config));
    let (queue, dispatcher_handle) = spawn_dispatcher(
        router,
        config.dispatch_queue_capacity,
        config.dispatch_workers,
    );
    info!(
        "Dispatch queue capacity: {}, workers: {}",
        config.dispatch_queue_capacity, config.dispatch_workers
    );

    let pipeline = IngestionPipeline::new(store.clone(), config.thresholds, queue);

    let mqtt_handle = if config.mqtt_enabled {
        info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
        let client_id = format!("hub-monitor-{}", uuid::Uuid::new_v4());
        let broker = config.mqtt_broker.clone();
        let port = config.mqtt_port;
        let mqtt_pipeline = pipeline.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, mqtt_pipeline).await {
                error!("MQTT task failed: {}", e);
            }
        }))
    } else {
        info!("MQTT ingestion disabled");
        None
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(pipeline, store));

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", config.http_addr);

    // The server owns the last pipeline clones; once it returns the dispatch
    // queue has no senders left and the dispatcher starts draining.
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    if let Some(handle) = mqtt_handle {
        handle.abort();
        let _ = handle.await;
    }

    info!("Waiting for pending notifications");
    match tokio::time::timeout(DRAIN_TIMEOUT, dispatcher_handle).await {
        Ok(Ok(stats)) => info!(
            "Dispatcher drained: {} alerts, {} deliveries, {} crashed jobs",
            stats.jobs, stats.delivered, stats.crashed
        ),
        Ok(Err(e)) => error!("Dispatcher task failed: {}", e),
        Err(_) => warn!(
            "Dispatcher did not drain within {}s, abandoning pending notifications",
            DRAIN_TIMEOUT.as_secs()
        ),
    }

    info!("Shutting down");
}

async fn build_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            info!("Database: {}", config.redacted_database_url());
            let pool = db::make_pool(&config.database_url).await?;
            Ok(Arc::new(db::PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_channels(config: &Config) -> Channels {
    let mut channels = Channels::default();

    if let Some(smtp) = &config.smtp {
        match SmtpEmailChannel::new(smtp) {
            Ok(channel) => {
                info!("Email notifications via {}:{}", smtp.host, smtp.port);
                channels.email = Some(Arc::new(channel) as Arc<dyn EmailChannel>);
            }
            Err(e) => error!("Email channel disabled: {}", e),
        }
    }

    channels.whatsapp = gateway(ChannelKind::WhatsApp, config.whatsapp.clone());
    channels.sms = gateway(ChannelKind::Sms, config.sms.clone());
    channels
}

fn gateway(
    kind: ChannelKind,
    config: Option<hub_monitor::config::GatewayConfig>,
) -> Option<Arc<dyn MessageChannel>> {
    let config = config?;
    match HttpGatewayChannel::new(kind, config) {
        Ok(channel) => {
            info!("{} notifications enabled", kind);
            Some(Arc::new(channel))
        }
        Err(e) => {
            error!("{} channel disabled: {}", kind, e);
            None
        }
    }
}

/// Resolves on ctrl-c or SIGTERM. A listener that cannot be installed is
/// logged and never fires, so the server keeps running.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
