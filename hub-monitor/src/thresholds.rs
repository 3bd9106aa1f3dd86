//! Safety threshold evaluation for hub readings.
//!
//! A value strictly greater than its limit counts as exceeded; equality is
//! still safe. Temperature and humidity are judged independently.

use crate::model::AlertType;

pub const TEMP_THRESHOLD: f64 = 24.0;
pub const HUMIDITY_THRESHOLD: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature: TEMP_THRESHOLD,
            humidity: HUMIDITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    None,
    Temperature,
    Humidity,
    Both,
}

impl Violation {
    pub fn alert_type(&self) -> Option<AlertType> {
        match self {
            Violation::None => None,
            Violation::Temperature => Some(AlertType::Temperature),
            Violation::Humidity => Some(AlertType::Humidity),
            Violation::Both => Some(AlertType::Both),
        }
    }
}

impl Thresholds {
    pub fn evaluate(&self, temperature: f64, humidity: f64) -> Violation {
        let temp_exceeded = temperature > self.temperature;
        let humidity_exceeded = humidity > self.humidity;

        match (temp_exceeded, humidity_exceeded) {
            (true, true) => Violation::Both,
            (true, false) => Violation::Temperature,
            (false, true) => Violation::Humidity,
            (false, false) => Violation::None,
        }
    }

    /// Human readable alert text for a violation, values to two decimals.
    pub fn render_message(
        &self,
        violation: Violation,
        temperature: f64,
        humidity: f64,
    ) -> Option<String> {
        let message = match violation {
            Violation::None => return None,
            Violation::Both => format!(
                "ALERT: Both temperature ({:.2}°C) and humidity ({:.2}%) have exceeded safe thresholds!",
                temperature, humidity
            ),
            Violation::Temperature => format!(
                "ALERT: Temperature ({:.2}°C) has exceeded the safe threshold of {:.2}°C!",
                temperature, self.temperature
            ),
            Violation::Humidity => format!(
                "ALERT: Humidity ({:.2}%) has exceeded the safe threshold of {:.2}%!",
                humidity, self.humidity
            ),
        };
        Some(message)
    }
}

/// Evaluate against the default process thresholds.
pub fn evaluate(temperature: f64, humidity: f64) -> Violation {
    Thresholds::default().evaluate(temperature, humidity)
}
