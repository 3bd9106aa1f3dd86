use crate::errors::{Error, Result};
use crate::model::{
    page_limit, Alert, AlertFilter, Hub, NewAlert, NewReading, NotificationPreference, Profile,
    Reading, ReadingFilter,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    readings: Vec<Reading>,
    alerts: Vec<Alert>,
    hubs: HashMap<String, Hub>,
    profiles: HashMap<String, Profile>,
    preferences: HashMap<String, NotificationPreference>,
}

/// Process-local store. The unresolved-alert check and the insert happen
/// under one lock, so at most one open alert per hub ever exists.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_readings: AtomicBool,
    fail_alerts: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_hub(&self, hub: Hub) {
        self.lock().hubs.insert(hub.id.clone(), hub);
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.id.clone(), profile);
    }

    pub fn insert_preference(&self, preference: NotificationPreference) {
        self.lock()
            .preferences
            .insert(preference.user_id.clone(), preference);
    }

    /// Make subsequent reading inserts fail as if the pool timed out.
    pub fn fail_reading_inserts(&self, fail: bool) {
        self.fail_readings.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent alert inserts fail as if the pool timed out.
    pub fn fail_alert_inserts(&self, fail: bool) {
        self.fail_alerts.store(fail, Ordering::SeqCst);
    }

    /// Make the unresolved-alert lookup fail as if the pool timed out.
    pub fn fail_alert_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn reading_count(&self) -> usize {
        self.lock().readings.len()
    }

    pub fn alert_count(&self) -> usize {
        self.lock().alerts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock only means another test thread panicked mid-insert.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_reading(&self, reading: NewReading) -> Result<Reading> {
        if self.fail_readings.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let reading = Reading {
            id: Uuid::new_v4().to_string(),
            hub_id: reading.hub_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            recorded_at: reading.recorded_at,
            created_at: Utc::now(),
        };
        self.lock().readings.push(reading.clone());
        Ok(reading)
    }

    async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
        let tables = self.lock();
        let mut readings: Vec<Reading> = tables
            .readings
            .iter()
            .filter(|r| filter.hub_id.as_ref().map_or(true, |h| &r.hub_id == h))
            .filter(|r| filter.start.map_or(true, |s| r.recorded_at >= s))
            .filter(|r| filter.end.map_or(true, |e| r.recorded_at <= e))
            .cloned()
            .collect();
        readings.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(readings
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(page_limit(filter.limit))
            .collect())
    }

    async fn create_alert(&self, alert: NewAlert) -> Result<Alert> {
        if self.fail_alerts.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let mut tables = self.lock();
        if tables
            .alerts
            .iter()
            .any(|a| a.hub_id == alert.hub_id && !a.resolved)
        {
            return Err(Error::AlertAlreadyOpen(alert.hub_id));
        }
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            hub_id: alert.hub_id,
            alert_type: alert.alert_type,
            message: alert.message,
            temperature: alert.temperature,
            humidity: alert.humidity,
            resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        };
        tables.alerts.push(alert.clone());
        Ok(alert)
    }

    async fn list_unresolved_alerts(&self, hub_id: &str, limit: usize) -> Result<Vec<Alert>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let filter = AlertFilter {
            hub_id: Some(hub_id.to_string()),
            resolved: Some(false),
            limit: Some(limit),
            ..Default::default()
        };
        self.list_alerts(&filter).await
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let tables = self.lock();
        let mut alerts: Vec<Alert> = tables
            .alerts
            .iter()
            .filter(|a| filter.hub_id.as_ref().map_or(true, |h| &a.hub_id == h))
            .filter(|a| filter.alert_type.map_or(true, |t| a.alert_type == t))
            .filter(|a| filter.resolved.map_or(true, |r| a.resolved == r))
            .filter(|a| filter.start.map_or(true, |s| a.created_at >= s))
            .filter(|a| filter.end.map_or(true, |e| a.created_at <= e))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts
            .into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(page_limit(filter.limit))
            .collect())
    }

    async fn get_alert(&self, id: &str) -> Result<Alert> {
        self.lock()
            .alerts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("alert {}", id)))
    }

    async fn resolve_alert(&self, id: &str) -> Result<Alert> {
        let mut tables = self.lock();
        let alert = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(format!("alert {}", id)))?;
        if !alert.resolved {
            alert.resolved = true;
            alert.resolved_at = Some(Utc::now());
        }
        Ok(alert.clone())
    }

    async fn get_hub(&self, hub_id: &str) -> Result<Hub> {
        self.lock()
            .hubs
            .get(hub_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("hub {}", hub_id)))
    }

    async fn get_notification_preference(&self, user_id: &str) -> Result<NotificationPreference> {
        self.lock()
            .preferences
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("notification preferences for {}", user_id)))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile> {
        self.lock()
            .profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("profile {}", user_id)))
    }
}
