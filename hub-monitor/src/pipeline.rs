//! Reading ingestion: persist, evaluate, deduplicate, open alert, dispatch.
//!
//! Within one call the steps run strictly in that order. Anything that goes
//! wrong before the alert exists fails the call; anything after it (the
//! notification fan-out) is only logged.

use crate::dedup::AlertDeduplicator;
use crate::dispatch::DispatchQueue;
use crate::errors::Error;
use crate::metrics::{
    ALERTS_CREATED_TOTAL, ALERTS_DEDUPLICATED_TOTAL, INGEST_LATENCY_SECONDS,
    INVALID_READINGS_TOTAL, READINGS_TOTAL,
};
use crate::model::{CreateReadingRequest, IngestResult, NewAlert, NewReading, Reading};
use crate::store::Store;
use crate::thresholds::{Thresholds, Violation};
use crate::validate::validate;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A failed ingest, with whatever was already known when it failed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct IngestFailure {
    /// Present when the reading was stored before the failure.
    pub reading: Option<Reading>,
    pub alert_triggered: bool,
    pub source: Error,
}

impl IngestFailure {
    fn before_persist(source: Error) -> Self {
        Self {
            reading: None,
            alert_triggered: false,
            source,
        }
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn Store>,
    dedup: AlertDeduplicator,
    thresholds: Thresholds,
    dispatch: DispatchQueue,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn Store>, thresholds: Thresholds, dispatch: DispatchQueue) -> Self {
        Self {
            dedup: AlertDeduplicator::new(store.clone()),
            store,
            thresholds,
            dispatch,
        }
    }

    pub async fn ingest(
        &self,
        request: CreateReadingRequest,
    ) -> std::result::Result<IngestResult, IngestFailure> {
        let start = Instant::now();
        let result = self.ingest_inner(request).await;
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        result
    }

    async fn ingest_inner(
        &self,
        request: CreateReadingRequest,
    ) -> std::result::Result<IngestResult, IngestFailure> {
        if let Err(e) = validate(&request) {
            INVALID_READINGS_TOTAL.inc();
            return Err(IngestFailure::before_persist(e));
        }

        let new_reading = NewReading {
            hub_id: request.hub_id,
            temperature: request.temperature,
            humidity: request.humidity,
            recorded_at: request.recorded_at.unwrap_or_else(Utc::now),
        };

        let reading = match self.store.create_reading(new_reading).await {
            Ok(reading) => reading,
            Err(e) => {
                error!("Failed to store reading: {}", e);
                return Err(IngestFailure::before_persist(e));
            }
        };
        READINGS_TOTAL.inc();

        let violation = self
            .thresholds
            .evaluate(reading.temperature, reading.humidity);
        let Some(alert_type) = violation.alert_type() else {
            return Ok(IngestResult {
                reading,
                alert_triggered: false,
            });
        };

        match self.dedup.has_unresolved_alert(&reading.hub_id).await {
            Ok(false) => {}
            Ok(true) => {
                ALERTS_DEDUPLICATED_TOTAL.inc();
                debug!(hub_id = %reading.hub_id, "Unresolved alert already open, skipping alert creation");
                return Ok(IngestResult {
                    reading,
                    alert_triggered: true,
                });
            }
            Err(e) => {
                error!(hub_id = %reading.hub_id, "Failed to check existing alerts: {}", e);
                return Err(IngestFailure {
                    reading: Some(reading),
                    alert_triggered: true,
                    source: e,
                });
            }
        }

        let new_alert = NewAlert {
            hub_id: reading.hub_id.clone(),
            alert_type,
            message: self.render_message(violation, &reading),
            temperature: Some(reading.temperature),
            humidity: Some(reading.humidity),
        };

        let alert = match self.store.create_alert(new_alert).await {
            Ok(alert) => alert,
            Err(Error::AlertAlreadyOpen(hub_id)) => {
                // Lost the race against a concurrent ingest for this hub.
                ALERTS_DEDUPLICATED_TOTAL.inc();
                debug!(hub_id = %hub_id, "Concurrent alert already opened for hub");
                return Ok(IngestResult {
                    reading,
                    alert_triggered: true,
                });
            }
            Err(e) => {
                error!(hub_id = %reading.hub_id, "Failed to create alert: {}", e);
                return Err(IngestFailure {
                    reading: Some(reading),
                    alert_triggered: true,
                    source: e,
                });
            }
        };

        ALERTS_CREATED_TOTAL.inc();
        info!(
            hub_id = %alert.hub_id,
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            "Alert opened"
        );

        let alert_id = alert.id.clone();
        if let Err(e) = self.dispatch.enqueue(alert) {
            warn!(alert_id = %alert_id, "Notifications not dispatched: {}", e);
        }

        Ok(IngestResult {
            reading,
            alert_triggered: true,
        })
    }

    fn render_message(&self, violation: Violation, reading: &Reading) -> String {
        self.thresholds
            .render_message(violation, reading.temperature, reading.humidity)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch_queue;
    use crate::memory::MemoryStore;
    use crate::model::{
        Alert, AlertFilter, AlertType, Hub, NotificationPreference, Profile, ReadingFilter,
    };
    use crate::errors::Result;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Reports no open alerts, so the insert is the only guard left. This is
    /// what a concurrent ingest sees when it checks before the winner commits.
    struct StaleLookup(Arc<MemoryStore>);

    #[async_trait]
    impl Store for StaleLookup {
        async fn create_reading(&self, reading: NewReading) -> Result<Reading> {
            self.0.create_reading(reading).await
        }
        async fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>> {
            self.0.list_readings(filter).await
        }
        async fn create_alert(&self, alert: NewAlert) -> Result<Alert> {
            self.0.create_alert(alert).await
        }
        async fn list_unresolved_alerts(&self, _hub: &str, _limit: usize) -> Result<Vec<Alert>> {
            Ok(Vec::new())
        }
        async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
            self.0.list_alerts(filter).await
        }
        async fn get_alert(&self, id: &str) -> Result<Alert> {
            self.0.get_alert(id).await
        }
        async fn resolve_alert(&self, id: &str) -> Result<Alert> {
            self.0.resolve_alert(id).await
        }
        async fn get_hub(&self, hub_id: &str) -> Result<Hub> {
            self.0.get_hub(hub_id).await
        }
        async fn get_notification_preference(
            &self,
            user_id: &str,
        ) -> Result<NotificationPreference> {
            self.0.get_notification_preference(user_id).await
        }
        async fn get_profile(&self, user_id: &str) -> Result<Profile> {
            self.0.get_profile(user_id).await
        }
    }

    fn setup() -> (IngestionPipeline, Arc<MemoryStore>, mpsc::Receiver<Alert>) {
        let store = Arc::new(MemoryStore::new());
        let (queue, rx) = dispatch_queue(64);
        let pipeline = IngestionPipeline::new(store.clone(), Thresholds::default(), queue);
        (pipeline, store, rx)
    }

    fn request(hub_id: &str, temperature: f64, humidity: f64) -> CreateReadingRequest {
        CreateReadingRequest {
            hub_id: hub_id.to_string(),
            temperature,
            humidity,
            recorded_at: None,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Alert>) -> Vec<Alert> {
        let mut jobs = Vec::new();
        while let Ok(alert) = rx.try_recv() {
            jobs.push(alert);
        }
        jobs
    }

    #[tokio::test]
    async fn test_temperature_violation_opens_alert() {
        let (pipeline, store, mut rx) = setup();

        let result = pipeline.ingest(request("H1", 26.5, 40.0)).await.unwrap();

        assert!(result.alert_triggered);
        assert_eq!(result.reading.hub_id, "H1");
        assert_eq!(store.reading_count(), 1);

        let alerts = store.list_unresolved_alerts("H1", 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Temperature);
        assert!(alerts[0].message.contains("26.50"));
        assert!(alerts[0].message.contains("24.00"));
        assert_eq!(alerts[0].temperature, Some(26.5));
        assert_eq!(alerts[0].humidity, Some(40.0));

        let jobs = drain(&mut rx);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, alerts[0].id);
    }

    #[tokio::test]
    async fn test_repeat_violation_is_absorbed() {
        let (pipeline, store, mut rx) = setup();
        pipeline.ingest(request("H1", 26.5, 40.0)).await.unwrap();

        let result = pipeline.ingest(request("H1", 27.0, 41.0)).await.unwrap();

        assert!(result.alert_triggered);
        assert_eq!(store.alert_count(), 1);
        assert_eq!(store.reading_count(), 2);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_safe_reading_does_nothing() {
        let (pipeline, store, mut rx) = setup();

        let result = pipeline.ingest(request("H1", 20.0, 50.0)).await.unwrap();

        assert!(!result.alert_triggered);
        assert_eq!(store.reading_count(), 1);
        assert_eq!(store.alert_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_threshold_equality_is_safe() {
        let (pipeline, store, _rx) = setup();
        let result = pipeline.ingest(request("H1", 24.0, 65.0)).await.unwrap();
        assert!(!result.alert_triggered);
        assert_eq!(store.alert_count(), 0);
    }

    #[tokio::test]
    async fn test_streak_produces_one_alert_until_resolved() {
        let (pipeline, store, mut rx) = setup();

        for i in 0..10 {
            let result = pipeline
                .ingest(request("H1", 25.0 + i as f64, 70.0))
                .await
                .unwrap();
            assert!(result.alert_triggered);
        }
        assert_eq!(store.alert_count(), 1);
        let first = drain(&mut rx);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].alert_type, AlertType::Both);

        store.resolve_alert(&first[0].id).await.unwrap();

        pipeline.ingest(request("H1", 20.0, 80.0)).await.unwrap();
        pipeline.ingest(request("H1", 20.0, 81.0)).await.unwrap();

        assert_eq!(store.alert_count(), 2);
        let second = drain(&mut rx);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].alert_type, AlertType::Humidity);
    }

    #[tokio::test]
    async fn test_hubs_are_deduplicated_independently() {
        let (pipeline, store, mut rx) = setup();
        pipeline.ingest(request("H1", 30.0, 40.0)).await.unwrap();
        pipeline.ingest(request("H2", 30.0, 40.0)).await.unwrap();
        assert_eq!(store.alert_count(), 2);
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn test_reading_store_failure_aborts() {
        let (pipeline, store, mut rx) = setup();
        store.fail_reading_inserts(true);

        let failure = pipeline.ingest(request("H1", 30.0, 40.0)).await.unwrap_err();

        assert!(failure.reading.is_none());
        assert!(!failure.alert_triggered);
        assert!(failure.source.is_storage());
        assert_eq!(store.alert_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_alert_store_failure_still_reports_trigger() {
        let (pipeline, store, mut rx) = setup();
        store.fail_alert_inserts(true);

        let failure = pipeline.ingest(request("H1", 30.0, 40.0)).await.unwrap_err();

        assert!(failure.alert_triggered);
        assert!(failure.source.is_storage());
        assert_eq!(failure.reading.unwrap().hub_id, "H1");
        assert_eq!(store.reading_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_dedup_lookup_failure_keeps_reading_and_trigger() {
        let (pipeline, store, mut rx) = setup();
        store.fail_alert_lookups(true);

        let failure = pipeline.ingest(request("H1", 30.0, 40.0)).await.unwrap_err();

        assert!(failure.alert_triggered);
        assert!(failure.source.is_storage());
        assert_eq!(failure.reading.unwrap().hub_id, "H1");
        assert_eq!(store.reading_count(), 1);
        assert_eq!(store.alert_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_losing_alert_insert_counts_as_dedup_hit() {
        let memory = Arc::new(MemoryStore::new());
        memory
            .create_alert(NewAlert {
                hub_id: "H1".to_string(),
                alert_type: AlertType::Temperature,
                message: "already open".to_string(),
                temperature: Some(30.0),
                humidity: Some(40.0),
            })
            .await
            .unwrap();
        let (queue, mut rx) = dispatch_queue(4);
        let pipeline = IngestionPipeline::new(
            Arc::new(StaleLookup(memory.clone())),
            Thresholds::default(),
            queue,
        );

        let result = pipeline.ingest(request("H1", 31.0, 40.0)).await.unwrap();

        assert!(result.alert_triggered);
        assert_eq!(memory.alert_count(), 1);
        assert_eq!(memory.reading_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_does_not_hold_up_ingest() {
        let store = Arc::new(MemoryStore::new());
        let (queue, mut rx) = dispatch_queue(1);
        let pipeline = IngestionPipeline::new(store.clone(), Thresholds::default(), queue);

        // Fill the only slot with another hub's job.
        pipeline.ingest(request("other", 30.0, 40.0)).await.unwrap();

        let first = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.ingest(request("H1", 30.0, 40.0)),
        )
        .await;
        assert!(first.is_ok(), "ingest must not wait on a full queue");

        assert_eq!(rx.recv().await.unwrap().hub_id, "other");
        let queued = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.hub_id, "H1");

        // Later violations are absorbed by the alert that was dispatched.
        let again = pipeline.ingest(request("H1", 31.0, 40.0)).await.unwrap();
        assert!(again.alert_triggered);
        assert_eq!(store.alert_count(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_reading_is_not_stored() {
        let (pipeline, store, _rx) = setup();
        let failure = pipeline.ingest(request("", 30.0, 40.0)).await.unwrap_err();
        assert!(matches!(failure.source, Error::Validation(_)));
        assert_eq!(store.reading_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_dispatch_queue_does_not_fail_ingest() {
        let store = Arc::new(MemoryStore::new());
        let (queue, rx) = dispatch_queue(4);
        drop(rx);
        let pipeline = IngestionPipeline::new(store.clone(), Thresholds::default(), queue);

        let result = pipeline.ingest(request("H1", 30.0, 40.0)).await.unwrap();

        assert!(result.alert_triggered);
        assert_eq!(store.alert_count(), 1);
    }

    #[tokio::test]
    async fn test_recorded_at_is_kept_or_defaulted() {
        let (pipeline, _store, _rx) = setup();
        let stamp = Utc::now() - chrono::Duration::minutes(5);
        let mut req = request("H1", 20.0, 50.0);
        req.recorded_at = Some(stamp);
        assert_eq!(pipeline.ingest(req).await.unwrap().reading.recorded_at, stamp);

        let before = Utc::now();
        let defaulted = pipeline.ingest(request("H1", 20.0, 50.0)).await.unwrap();
        assert!(defaulted.reading.recorded_at >= before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_violations_open_one_alert() {
        let (pipeline, store, mut rx) = setup();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.ingest(request("H1", 30.0, 80.0)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().alert_triggered);
        }

        assert_eq!(store.alert_count(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_custom_thresholds_are_used() {
        let store = Arc::new(MemoryStore::new());
        let (queue, _rx) = dispatch_queue(4);
        let strict = Thresholds {
            temperature: 18.0,
            humidity: 50.0,
        };
        let pipeline = IngestionPipeline::new(store.clone(), strict, queue);

        let result = pipeline.ingest(request("H1", 20.0, 40.0)).await.unwrap();
        assert!(result.alert_triggered);
        let alerts = store.list_unresolved_alerts("H1", 1).await.unwrap();
        assert!(alerts[0].message.contains("18.00"));
    }
}
