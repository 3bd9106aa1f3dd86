//! Persistence boundary used by the alerting core.
//!
//! Record storage is owned elsewhere; the core only needs these operations.
//! Two implementations exist: [`crate::db::PgStore`] for PostgreSQL and
//! [`crate::memory::MemoryStore`] for development and tests.
//!
//! Implementations must reject a second unresolved alert for the same hub
//! with [`Error::AlertAlreadyOpen`](crate::errors::Error::AlertAlreadyOpen).

use crate::errors::Result;
use crate::model::{
    Alert, AlertFilter, Hub, NewAlert, NewReading, NotificationPreference, Profile, Reading,
    ReadingFilter,
};
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_reading(&self, reading: NewReading) -> Result<Reading>;

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>>;

    async fn create_alert(&self, alert: NewAlert) -> Result<Alert>;

    /// Newest first.
    async fn list_unresolved_alerts(&self, hub_id: &str, limit: usize) -> Result<Vec<Alert>>;

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    async fn get_alert(&self, id: &str) -> Result<Alert>;

    /// Marks the alert resolved and stamps `resolved_at`. Resolving an
    /// already resolved alert keeps the original timestamp.
    async fn resolve_alert(&self, id: &str) -> Result<Alert>;

    async fn get_hub(&self, hub_id: &str) -> Result<Hub>;

    async fn get_notification_preference(&self, user_id: &str) -> Result<NotificationPreference>;

    async fn get_profile(&self, user_id: &str) -> Result<Profile>;
}
