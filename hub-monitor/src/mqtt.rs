use crate::errors::{Error, Result};
use crate::metrics::{INVALID_READINGS_TOTAL, MQTT_MESSAGES_TOTAL};
use crate::model::CreateReadingRequest;
use crate::pipeline::{IngestFailure, IngestionPipeline};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

/// Hubs publish to `hubs/{hub_id}/readings`.
pub const READINGS_TOPIC: &str = "hubs/+/readings";

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    pipeline: IngestionPipeline,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(READINGS_TOPIC, QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", READINGS_TOPIC);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MQTT_MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    // One task per reading so a slow store does not stall the event loop
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            process_message_with_retry(&publish.topic, &publish.payload, &pipeline)
                                .await
                        {
                            error!("Failed to process message after retries: {}", e);
                        }
                    });
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Process a message with exponential backoff retry
async fn process_message_with_retry(
    topic: &str,
    payload: &[u8],
    pipeline: &IngestionPipeline,
) -> Result<()> {
    let request = parse_reading(topic, payload).inspect_err(|_| INVALID_READINGS_TOTAL.inc())?;

    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match pipeline.ingest(request.clone()).await {
            Ok(result) => {
                if attempt > 1 {
                    info!("Reading ingested successfully on attempt {}", attempt);
                }
                if result.alert_triggered {
                    debug!(hub_id = %result.reading.hub_id, "Reading exceeded thresholds");
                }
                return Ok(());
            }
            Err(failure) => {
                if attempt >= MAX_RETRIES || !is_retryable(&failure) {
                    return Err(failure.source);
                }

                warn!(
                    "Reading ingest failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, failure, backoff_ms
                );

                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

/// Parse a payload; the hub id falls back to the topic segment.
fn parse_reading(topic: &str, payload: &[u8]) -> Result<CreateReadingRequest> {
    let mut request: CreateReadingRequest = serde_json::from_slice(payload)?;

    if request.hub_id.trim().is_empty() {
        if let Some(hub_id) = hub_id_from_topic(topic) {
            request.hub_id = hub_id.to_string();
        }
    }
    Ok(request)
}

fn hub_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("hubs"), Some(hub_id), Some("readings"), None) if !hub_id.is_empty() => Some(hub_id),
        _ => None,
    }
}

/// Only failures that happened before the reading was stored are retried;
/// retrying later ones would store the reading twice.
fn is_retryable(failure: &IngestFailure) -> bool {
    failure.reading.is_none() && is_retryable_error(&failure.source)
}

/// Only a database error may clear up on retry; bad data never does.
fn is_retryable_error(error: &Error) -> bool {
    matches!(error, Error::Database(_))
}
