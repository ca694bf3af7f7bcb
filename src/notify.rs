// Notification feed: a live view of one user's notifications with a derived
// unread count. Mark-as-read calls are fire-and-forget; failures are logged
// and the next push reconciles local state, so the UI never blocks on them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::store::{Document, DocumentEvent, DocumentStore, Filter, OrderBy, StoreError, WatchKey};

pub const NOTIFICATIONS_COLLECTION: &str = "notifications";

/// A message delivered to a user by backend events. The read flag only moves
/// one way: unread to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub user_id: String,
    pub read: bool,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut notification: Notification = serde_json::from_value(doc.data.clone())?;
        notification.id = doc.id.clone();
        Ok(notification)
    }
}

#[derive(Default)]
struct FeedState {
    notifications: Vec<Notification>,
}

impl FeedState {
    /// Inserts or replaces by id, keeping newest-first order.
    fn upsert(&mut self, notification: Notification) {
        self.notifications.retain(|n| n.id != notification.id);
        let at = self
            .notifications
            .iter()
            .position(|n| n.created_at <= notification.created_at)
            .unwrap_or(self.notifications.len());
        self.notifications.insert(at, notification);
    }

    fn remove(&mut self, id: &str) {
        self.notifications.retain(|n| n.id != id);
    }
}

/// Live subscription to one user's notifications.
pub struct NotificationFeed {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    state: Arc<RwLock<FeedState>>,
    task: tokio::task::JoinHandle<()>,
}

impl NotificationFeed {
    /// Loads the user's current notifications and starts following pushes.
    pub async fn subscribe(
        store: Arc<dyn DocumentStore>,
        user_id: &str,
    ) -> Result<Self, StoreError> {
        // Subscribe before the initial query so nothing slips between them;
        // upserts make duplicate deliveries harmless.
        let mut subscription = store.subscribe(WatchKey::collection(NOTIFICATIONS_COLLECTION));

        let docs = store
            .query(
                NOTIFICATIONS_COLLECTION,
                &[Filter::eq("user_id", user_id)],
                Some(&OrderBy::desc("created_at")),
            )
            .await?;
        let notifications = docs
            .iter()
            .map(Notification::from_document)
            .collect::<Result<Vec<_>, _>>()?;

        let state = Arc::new(RwLock::new(FeedState { notifications }));
        let task_state = Arc::clone(&state);
        let task_user = user_id.to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                match event {
                    DocumentEvent::Changed(doc) => match Notification::from_document(&doc) {
                        Ok(notification) if notification.user_id == task_user => {
                            task_state.write().upsert(notification);
                        }
                        Ok(_) => {} // someone else's notification
                        Err(err) => {
                            warn!(doc_id = %doc.id, error = %err, "dropping malformed notification");
                        }
                    },
                    DocumentEvent::Removed { id } => {
                        task_state.write().remove(&id);
                    }
                }
            }
        });

        Ok(Self {
            store,
            user_id: user_id.to_string(),
            state,
            task,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current notifications, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.read().notifications.clone()
    }

    /// Derived count; never stored separately.
    pub fn unread_count(&self) -> usize {
        self.state
            .read()
            .notifications
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    /// Marks one notification read. Fire-and-forget: errors are logged and
    /// local state catches up from the resulting push.
    pub fn mark_as_read(&self, id: &str) {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store
                .update(NOTIFICATIONS_COLLECTION, &id, json!({ "read": true }))
                .await
            {
                warn!(notification_id = %id, error = %err, "mark-as-read failed");
            }
        });
    }

    /// Marks every unread notification read with one update call each; there
    /// is no batch endpoint. Fire-and-forget like [`mark_as_read`].
    pub fn mark_all_as_read(&self) {
        let unread: Vec<String> = self
            .state
            .read()
            .notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        if unread.is_empty() {
            return;
        }
        debug!(count = unread.len(), "marking all notifications read");
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let updates = unread.iter().map(|id| {
                let store = Arc::clone(&store);
                async move {
                    (
                        id.clone(),
                        store
                            .update(NOTIFICATIONS_COLLECTION, id, json!({ "read": true }))
                            .await,
                    )
                }
            });
            for (id, result) in join_all(updates).await {
                if let Err(err) = result {
                    warn!(notification_id = %id, error = %err, "mark-all-as-read failed");
                }
            }
        });
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
