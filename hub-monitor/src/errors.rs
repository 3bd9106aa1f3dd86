use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Hub {0} already has an unresolved alert")]
    AlertAlreadyOpen(String),

    #[error("Delivery via {channel} failed: {reason}")]
    Delivery {
        channel: &'static str,
        reason: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    EmailAddress(#[from] lettre::address::AddressError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dispatch queue closed")]
    DispatchQueueClosed,
}

impl Error {
    pub fn delivery(channel: &'static str, reason: impl ToString) -> Self {
        Error::Delivery {
            channel,
            reason: reason.to_string(),
        }
    }

    /// Persistence unavailable or a constraint violation.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Migration(_) | Error::AlertAlreadyOpen(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_classification() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_storage());
        assert!(Error::AlertAlreadyOpen("hub-1".to_string()).is_storage());
        assert!(!Error::NotFound("hub hub-1".to_string()).is_storage());
        assert!(!Error::delivery("email", "smtp down").is_storage());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::delivery("sms", "HTTP 502").to_string(),
            "Delivery via sms failed: HTTP 502"
        );
        assert_eq!(
            Error::NotFound("hub hub-9".to_string()).to_string(),
            "hub hub-9 not found"
        );
    }
}
