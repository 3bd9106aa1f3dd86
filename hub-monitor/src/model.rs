use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One temperature/humidity sample from a hub, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub id: String,
    pub hub_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub recorded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Inbound reading as posted by a hub (HTTP body or MQTT payload).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateReadingRequest {
    #[serde(default)]
    pub hub_id: String,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// A reading that has been accepted for persistence but has no id yet.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub hub_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Temperature,
    Humidity,
    Both,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Temperature => "temperature",
            AlertType::Humidity => "humidity",
            AlertType::Both => "both",
        }
    }
}

impl FromStr for AlertType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "temperature" => Ok(AlertType::Temperature),
            "humidity" => Ok(AlertType::Humidity),
            "both" => Ok(AlertType::Both),
            other => Err(Error::Validation(format!("unknown alert type '{}'", other))),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub hub_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub hub_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Physical storage location with one responsible operator.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Hub {
    pub id: String,
    pub name: String,
    pub location: String,
    pub manager_id: Option<String>,
    pub description: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreference {
    pub user_id: String,
    pub sms_enabled: bool,
    pub whatsapp_enabled: bool,
    pub email_enabled: bool,
    pub phone_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingFilter {
    pub hub_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub hub_id: Option<String>,
    pub alert_type: Option<AlertType>,
    pub resolved: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Outcome of a successful ingest call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub reading: Reading,
    pub alert_triggered: bool,
}

/// REST API response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}
