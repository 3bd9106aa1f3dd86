mod reading;

use clap::Parser;
use reading::HubReading;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publishes synthetic storage-hub readings to the MQTT broker.
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Readings per second across all hubs.
    #[arg(long, env = "RATE", default_value_t = 10)]
    rate: u64,

    #[arg(long, env = "HUBS", default_value_t = 5)]
    hubs: usize,

    /// Share of readings that exceed a threshold.
    #[arg(long, env = "EXCURSION_RATE", default_value_t = 0.05)]
    excursion_rate: f64,

    /// Stop after this many readings; runs forever when unset.
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting hub simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Hubs: {}, Excursions: {:.0}%",
        args.broker,
        args.port,
        args.rate,
        args.hubs,
        args.excursion_rate * 100.0
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;

    let hubs = args.hubs.max(1);
    let interval = Duration::from_micros(1_000_000 / args.rate.max(1));
    let mut ticker = tokio::time::interval(interval);
    let mut rng = rand::thread_rng();
    let mut published = 0u64;

    loop {
        if args.count.is_some_and(|limit| published >= limit) {
            break;
        }
        ticker.tick().await;

        let hub_id = format!("hub-{}", published as usize % hubs + 1);
        let reading = HubReading::generate(&mut rng, hub_id, args.excursion_rate);
        let payload = match serde_json::to_vec(&reading) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize reading: {}", e);
                continue;
            }
        };

        match client
            .publish(reading.topic(), QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => published += 1,
            Err(e) => warn!("Failed to publish: {}", e),
        }

        if published > 0 && published % 1000 == 0 {
            info!("Published {} readings", published);
        }
    }

    // Let the event loop flush in-flight publishes.
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("Done, published {} readings", published);
}
