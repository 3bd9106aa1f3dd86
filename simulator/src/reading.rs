use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Body published to `hubs/{hub_id}/readings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubReading {
    pub hub_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub recorded_at: DateTime<Utc>,
}

impl HubReading {
    /// A plausible cold-store reading; with probability `excursion_rate` one
    /// of the two values is pushed past its alert threshold.
    pub fn generate(rng: &mut impl Rng, hub_id: String, excursion_rate: f64) -> Self {
        let mut temperature = rng.gen_range(16.0..23.5);
        let mut humidity = rng.gen_range(40.0..64.0);

        if rng.gen_bool(excursion_rate.clamp(0.0, 1.0)) {
            if rng.gen_bool(0.5) {
                temperature = rng.gen_range(24.5..32.0);
            } else {
                humidity = rng.gen_range(66.0..90.0);
            }
        }

        Self {
            hub_id,
            temperature: round2(temperature),
            humidity: round2(humidity),
            recorded_at: Utc::now(),
        }
    }

    pub fn topic(&self) -> String {
        format!("hubs/{}/readings", self.hub_id)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
