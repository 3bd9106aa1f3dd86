use crate::errors::{Error, Result};
use crate::model::CreateReadingRequest;

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;

/// Validates an inbound hub reading before it is persisted
pub fn validate(reading: &CreateReadingRequest) -> Result<()> {
    // Validate hub_id
    if reading.hub_id.trim().is_empty() {
        return Err(Error::Validation("Hub ID cannot be empty".to_string()));
    }

    // Validate temperature
    if !reading.temperature.is_finite()
        || reading.temperature < TEMP_MIN
        || reading.temperature > TEMP_MAX
    {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            reading.temperature, TEMP_MIN, TEMP_MAX
        )));
    }

    // Validate humidity
    if !reading.humidity.is_finite()
        || reading.humidity < HUMIDITY_MIN
        || reading.humidity > HUMIDITY_MAX
    {
        return Err(Error::Validation(format!(
            "Humidity {} out of range [{}, {}]",
            reading.humidity, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    Ok(())
}
