use crate::errors::Result;
use crate::store::Store;
use std::sync::Arc;

/// Decides whether a violating reading should open a new alert.
///
/// This is a check-then-act against shared storage: two concurrent ingests
/// for one hub can both see "no open alert". The storage layer rejects the
/// losing insert with `AlertAlreadyOpen`.
#[derive(Clone)]
pub struct AlertDeduplicator {
    store: Arc<dyn Store>,
}

impl AlertDeduplicator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn has_unresolved_alert(&self, hub_id: &str) -> Result<bool> {
        let open = self.store.list_unresolved_alerts(hub_id, 1).await?;
        Ok(!open.is_empty())
    }
}
