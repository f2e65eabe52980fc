//! Ordered listener registry.
//!
//! Notification works on a snapshot: the lock is held only to copy the
//! current listener list, never while callbacks run. Listeners registered
//! mid-notification are not retroactively notified for that pass.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::hold::types::HoldListener;

pub type ListenerId = String;

struct ListenerEntry {
    id: ListenerId,
    listener: Arc<dyn HoldListener>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener at the end of the notification order.
    pub async fn register(&self, listener: Arc<dyn HoldListener>) -> ListenerId {
        let id = uuid::Uuid::new_v4().to_string();
        self.entries.write().await.push(ListenerEntry {
            id: id.clone(),
            listener,
        });
        log::debug!("[ListenerRegistry] Registered listener {}", id);
        id
    }

    /// Remove a listener. Returns false when the id was never registered or
    /// was already removed.
    pub async fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Copy of the current listeners in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<dyn HoldListener>> {
        self.entries
            .read()
            .await
            .iter()
            .map(|entry| entry.listener.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
