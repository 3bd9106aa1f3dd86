use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MQTT_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_mqtt_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_readings_total",
        "Total readings persisted"
    ))
    .unwrap();
    pub static ref INVALID_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_invalid_readings_total",
        "Total readings rejected by validation"
    ))
    .unwrap();
    pub static ref ALERTS_CREATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_alerts_created_total",
        "Total alerts opened"
    ))
    .unwrap();
    pub static ref ALERTS_DEDUPLICATED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_alerts_deduplicated_total",
        "Violating readings absorbed by an already open alert"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_db_failures_total",
        "Total database write failures"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "hub_monitor_ingest_latency_seconds",
            "Time taken to ingest one reading"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref DISPATCH_QUEUE_DEPTH: Gauge = Gauge::with_opts(Opts::new(
        "hub_monitor_dispatch_queue_depth",
        "Notification jobs waiting for a worker"
    ))
    .unwrap();
    pub static ref DISPATCH_QUEUE_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "hub_monitor_dispatch_queue_full_total",
        "Total number of times the dispatch queue was full (backpressure events)"
    ))
    .unwrap();
    pub static ref NOTIFICATIONS_SENT_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "hub_monitor_notifications_sent_total",
            "Notifications delivered, by channel"
        ),
        &["channel"]
    )
    .unwrap();
    pub static ref NOTIFICATION_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "hub_monitor_notification_failures_total",
            "Notification deliveries that failed, by channel"
        ),
        &["channel"]
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MQTT_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_DEDUPLICATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(DISPATCH_QUEUE_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATIONS_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATION_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
