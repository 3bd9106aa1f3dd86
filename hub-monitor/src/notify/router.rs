use super::{ChannelKind, EmailChannel, EmailPayload, MessageChannel};
use crate::errors::Result;
use crate::metrics::{NOTIFICATIONS_SENT_TOTAL, NOTIFICATION_FAILURES_TOTAL};
use crate::model::{Alert, Hub, NotificationPreference, Profile};
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Channel adapters available to the router. A `None` slot means the
/// channel is not configured for this deployment.
#[derive(Clone, Default)]
pub struct Channels {
    pub whatsapp: Option<Arc<dyn MessageChannel>>,
    pub sms: Option<Arc<dyn MessageChannel>>,
    pub email: Option<Arc<dyn EmailChannel>>,
}

#[derive(Clone)]
enum Adapter {
    Message(Arc<dyn MessageChannel>),
    Email(Arc<dyn EmailChannel>),
}

/// One row of the fan-out plan. Every channel is evaluated the same way:
/// enabled, then recipient, then adapter.
struct ChannelPlan {
    kind: ChannelKind,
    enabled: bool,
    recipient: Option<String>,
    adapter: Option<Adapter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NoRecipient,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub alert_id: String,
    /// Set when dispatch stopped before any channel was considered.
    pub aborted: Option<String>,
    pub outcomes: Vec<(ChannelKind, DeliveryStatus)>,
}

impl DispatchReport {
    fn aborted(alert_id: &str, reason: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            aborted: Some(reason.into()),
            outcomes: Vec::new(),
        }
    }

    pub fn status(&self, kind: ChannelKind) -> Option<&DeliveryStatus> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, status)| status)
    }

    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, s)| *s == DeliveryStatus::Delivered)
            .count()
    }
}

/// Fans an alert out to the hub manager's enabled channels.
#[derive(Clone)]
pub struct NotificationRouter {
    store: Arc<dyn Store>,
    channels: Channels,
}

impl NotificationRouter {
    pub fn new(store: Arc<dyn Store>, channels: Channels) -> Self {
        Self { store, channels }
    }

    /// Never fails: every problem is logged and recorded in the report.
    pub async fn dispatch(&self, alert: &Alert, hub: &Hub) -> DispatchReport {
        let Some(manager_id) = hub.manager_id.as_deref() else {
            info!(hub_id = %hub.id, alert_id = %alert.id, "Hub has no manager, skipping notifications");
            return DispatchReport::aborted(&alert.id, "hub has no manager");
        };

        let (preference, profile) = tokio::join!(
            self.store.get_notification_preference(manager_id),
            self.store.get_profile(manager_id),
        );

        let preference = match preference {
            Ok(p) => p,
            Err(e) => {
                warn!(manager_id, alert_id = %alert.id, error = %e, "Cannot load notification preferences");
                return DispatchReport::aborted(&alert.id, e.to_string());
            }
        };
        let profile = match profile {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(manager_id, error = %e, "Cannot load manager profile, email disabled for this alert");
                None
            }
        };

        let mut report = DispatchReport {
            alert_id: alert.id.clone(),
            ..Default::default()
        };

        for plan in self.plan(&preference, profile.as_ref()) {
            let status = self.execute(&plan, alert, hub).await;
            report.outcomes.push((plan.kind, status));
        }

        debug!(
            alert_id = %alert.id,
            delivered = report.delivered(),
            "Dispatch finished"
        );
        report
    }

    /// Load the hub and dispatch. Used when only the alert is at hand.
    pub async fn dispatch_for_alert(&self, alert: &Alert) -> DispatchReport {
        match self.store.get_hub(&alert.hub_id).await {
            Ok(hub) => self.dispatch(alert, &hub).await,
            Err(e) => {
                warn!(hub_id = %alert.hub_id, alert_id = %alert.id, error = %e, "Cannot load hub for dispatch");
                DispatchReport::aborted(&alert.id, e.to_string())
            }
        }
    }

    /// Fixed order: WhatsApp, SMS, email.
    fn plan(
        &self,
        preference: &NotificationPreference,
        profile: Option<&Profile>,
    ) -> Vec<ChannelPlan> {
        let phone = non_empty(preference.phone_number.as_deref());
        let email = non_empty(profile.and_then(|p| p.email.as_deref()));

        vec![
            ChannelPlan {
                kind: ChannelKind::WhatsApp,
                enabled: preference.whatsapp_enabled,
                recipient: phone.clone(),
                adapter: self.channels.whatsapp.clone().map(Adapter::Message),
            },
            ChannelPlan {
                kind: ChannelKind::Sms,
                enabled: preference.sms_enabled,
                recipient: phone,
                adapter: self.channels.sms.clone().map(Adapter::Message),
            },
            ChannelPlan {
                kind: ChannelKind::Email,
                enabled: preference.email_enabled,
                recipient: email,
                adapter: self.channels.email.clone().map(Adapter::Email),
            },
        ]
    }

    async fn execute(&self, plan: &ChannelPlan, alert: &Alert, hub: &Hub) -> DeliveryStatus {
        if !plan.enabled {
            return DeliveryStatus::Skipped(SkipReason::Disabled);
        }
        let Some(recipient) = plan.recipient.as_deref() else {
            debug!(channel = %plan.kind, alert_id = %alert.id, "Channel enabled but no recipient on file");
            return DeliveryStatus::Skipped(SkipReason::NoRecipient);
        };
        let Some(adapter) = &plan.adapter else {
            debug!(channel = %plan.kind, "Channel enabled but not configured");
            return DeliveryStatus::Skipped(SkipReason::NotConfigured);
        };

        match deliver(adapter, recipient, alert, hub).await {
            Ok(()) => {
                NOTIFICATIONS_SENT_TOTAL
                    .with_label_values(&[plan.kind.as_str()])
                    .inc();
                DeliveryStatus::Delivered
            }
            Err(e) => {
                NOTIFICATION_FAILURES_TOTAL
                    .with_label_values(&[plan.kind.as_str()])
                    .inc();
                warn!(channel = %plan.kind, alert_id = %alert.id, error = %e, "Notification delivery failed");
                DeliveryStatus::Failed(e.to_string())
            }
        }
    }
}

async fn deliver(adapter: &Adapter, recipient: &str, alert: &Alert, hub: &Hub) -> Result<()> {
    match adapter {
        Adapter::Message(channel) => channel.send_message(recipient, &alert.message).await,
        Adapter::Email(channel) => channel.send_email(&email_payload(recipient, alert, hub)).await,
    }
}

fn email_payload(recipient: &str, alert: &Alert, hub: &Hub) -> EmailPayload {
    EmailPayload {
        to: vec![recipient.to_string()],
        subject: format!("Alert: {}", hub.name),
        body: alert.message.clone(),
        html: false,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::memory::MemoryStore;
    use crate::model::AlertType;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMessages {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageChannel for RecordingMessages {
        async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string()));
            if self.fail {
                return Err(Error::delivery("test", "gateway down"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEmail {
        sent: Mutex<Vec<EmailPayload>>,
    }

    #[async_trait]
    impl EmailChannel for RecordingEmail {
        async fn send_email(&self, email: &EmailPayload) -> Result<()> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn hub(manager: Option<&str>) -> Hub {
        Hub {
            id: "hub-1".to_string(),
            name: "North Store".to_string(),
            location: "Nakuru".to_string(),
            manager_id: manager.map(str::to_string),
            description: None,
            contact_phone: None,
            created_at: Utc::now(),
        }
    }

    fn alert() -> Alert {
        Alert {
            id: "alert-1".to_string(),
            hub_id: "hub-1".to_string(),
            alert_type: AlertType::Temperature,
            message: "ALERT: Temperature (26.50°C) has exceeded the safe threshold of 24.00°C!"
                .to_string(),
            temperature: Some(26.5),
            humidity: Some(40.0),
            resolved: false,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    fn seeded_store(preference: NotificationPreference, email: Option<&str>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_profile(Profile {
            id: "op-1".to_string(),
            full_name: "Jane Operator".to_string(),
            email: email.map(str::to_string),
            phone: None,
        });
        store.insert_preference(preference);
        store
    }

    #[tokio::test]
    async fn test_no_manager_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let email = Arc::new(RecordingEmail::default());
        let router = NotificationRouter::new(
            store,
            Channels {
                email: Some(email.clone()),
                ..Default::default()
            },
        );
        let report = router.dispatch(&alert(), &hub(None)).await;
        assert!(report.aborted.is_some());
        assert!(report.outcomes.is_empty());
        assert!(email.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_preferences_abort_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let router = NotificationRouter::new(store, Channels::default());
        let report = router.dispatch(&alert(), &hub(Some("ghost"))).await;
        assert!(report.aborted.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_whatsapp_without_phone_only_email_sent() {
        let store = seeded_store(
            NotificationPreference {
                user_id: "op-1".to_string(),
                whatsapp_enabled: true,
                email_enabled: true,
                ..Default::default()
            },
            Some("jane@example.com"),
        );
        let whatsapp = Arc::new(RecordingMessages::default());
        let email = Arc::new(RecordingEmail::default());
        let router = NotificationRouter::new(
            store,
            Channels {
                whatsapp: Some(whatsapp.clone()),
                sms: None,
                email: Some(email.clone()),
            },
        );

        let report = router.dispatch(&alert(), &hub(Some("op-1"))).await;

        assert!(whatsapp.sent.lock().unwrap().is_empty());
        assert_eq!(
            report.status(ChannelKind::WhatsApp),
            Some(&DeliveryStatus::Skipped(SkipReason::NoRecipient))
        );
        let sent = email.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["jane@example.com".to_string()]);
        assert_eq!(sent[0].subject, "Alert: North Store");
        assert_eq!(sent[0].body, alert().message);
        assert!(!sent[0].html);
    }

    #[tokio::test]
    async fn test_failed_channel_does_not_stop_others() {
        let store = seeded_store(
            NotificationPreference {
                user_id: "op-1".to_string(),
                whatsapp_enabled: true,
                sms_enabled: true,
                email_enabled: true,
                phone_number: Some("+254700000001".to_string()),
                email: None,
            },
            Some("jane@example.com"),
        );
        let whatsapp = Arc::new(RecordingMessages {
            fail: true,
            ..Default::default()
        });
        let sms = Arc::new(RecordingMessages::default());
        let email = Arc::new(RecordingEmail::default());
        let router = NotificationRouter::new(
            store,
            Channels {
                whatsapp: Some(whatsapp.clone()),
                sms: Some(sms.clone()),
                email: Some(email.clone()),
            },
        );

        let report = router.dispatch(&alert(), &hub(Some("op-1"))).await;

        let kinds: Vec<ChannelKind> = report.outcomes.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![ChannelKind::WhatsApp, ChannelKind::Sms, ChannelKind::Email]
        );
        assert!(matches!(
            report.status(ChannelKind::WhatsApp),
            Some(DeliveryStatus::Failed(_))
        ));
        assert_eq!(report.delivered(), 2);
        assert_eq!(
            sms.sent.lock().unwrap()[0],
            ("+254700000001".to_string(), alert().message)
        );
        assert_eq!(email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_unconfigured_channels_are_skipped() {
        let store = seeded_store(
            NotificationPreference {
                user_id: "op-1".to_string(),
                sms_enabled: true,
                phone_number: Some("+254700000001".to_string()),
                ..Default::default()
            },
            None,
        );
        let router = NotificationRouter::new(store, Channels::default());
        let report = router.dispatch(&alert(), &hub(Some("op-1"))).await;

        assert_eq!(
            report.status(ChannelKind::WhatsApp),
            Some(&DeliveryStatus::Skipped(SkipReason::Disabled))
        );
        assert_eq!(
            report.status(ChannelKind::Sms),
            Some(&DeliveryStatus::Skipped(SkipReason::NotConfigured))
        );
        assert_eq!(
            report.status(ChannelKind::Email),
            Some(&DeliveryStatus::Skipped(SkipReason::Disabled))
        );
    }

    #[tokio::test]
    async fn test_dispatch_for_alert_with_unknown_hub() {
        let router = NotificationRouter::new(Arc::new(MemoryStore::new()), Channels::default());
        let report = router.dispatch_for_alert(&alert()).await;
        assert!(report.aborted.is_some());
    }

    #[test]
    fn test_blank_recipients_count_as_missing() {
        assert_eq!(non_empty(Some("  ")), None);
        assert_eq!(non_empty(Some(" a@b.c ")), Some("a@b.c".to_string()));
    }
}
