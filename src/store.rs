// Document store abstraction.
// Booking, availability and notification code never talks to a concrete
// backend; everything goes through the `DocumentStore` seam so the same logic
// runs against any push-capable document store and can be driven by the
// in-process `MemoryStore` in tests.

use std::cmp::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by a document store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored document: backend-assigned id plus a JSON payload.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Field filter for queries. Comparisons follow the backend convention:
/// numbers compare numerically, ISO-8601 timestamps chronologically and any
/// other strings lexicographically.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(String, Value),
    Gte(String, Value),
    Lte(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Sort key applied after filtering.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// What a subscription watches: a single document or a whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    Document { collection: String, id: String },
    Collection { collection: String },
}

impl WatchKey {
    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WatchKey::Document {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(collection: impl Into<String>) -> Self {
        WatchKey::Collection {
            collection: collection.into(),
        }
    }

    fn channel_key(&self) -> String {
        match self {
            WatchKey::Document { collection, id } => format!("{collection}/{id}"),
            WatchKey::Collection { collection } => collection.clone(),
        }
    }
}

/// Push event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    Changed(Document),
    Removed { id: String },
}

/// Live subscription handle. Dropping it detaches from the store.
pub struct Subscription {
    rx: broadcast::Receiver<DocumentEvent>,
}

impl Subscription {
    /// Waits for the next push event. Returns `None` once the store side of
    /// the channel is gone. A lagged receiver skips to the newest events
    /// rather than erroring; latest state is what watchers care about.
    pub async fn next(&mut self) -> Option<DocumentEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscription lagged, resuming from latest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Generic document store: create/read/update/delete by id, query by field
/// and subscribe to push updates.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document with a backend-assigned id.
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError>;

    /// Creates or replaces a document under a caller-chosen id.
    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merges the fields of `patch` into an existing document.
    /// Fails with `NotFound` when the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Document, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError>;

    fn subscribe(&self, key: WatchKey) -> Subscription;
}

const AUTO_ID_LEN: usize = 20;
const CHANNEL_CAPACITY: usize = 64;

/// In-process implementation backed by concurrent hash maps, with broadcast
/// channels providing the push primitive. Serves as the reference backend for
/// tests and as the manual event emitter for watcher scenarios.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, DashMap<String, Value>>,
    channels: DashMap<String, broadcast::Sender<DocumentEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn auto_id() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(AUTO_ID_LEN)
            .map(char::from)
            .collect()
    }

    fn publish(&self, collection: &str, id: &str, event: DocumentEvent) {
        let doc_key = format!("{collection}/{id}");
        if let Some(tx) = self.channels.get(&doc_key) {
            let _ = tx.send(event.clone());
        }
        if let Some(tx) = self.channels.get(collection) {
            let _ = tx.send(event);
        }
    }
}

/// Compares two JSON values the way query filters and sort keys expect.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            // Timestamps with differing sub-second precision do not sort
            // lexicographically, so try chronological comparison first.
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn matches(data: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, want) => data.get(field) == Some(want),
        Filter::Gte(field, want) => data
            .get(field)
            .map_or(false, |have| compare_values(have, want) != Ordering::Less),
        Filter::Lte(field, want) => data
            .get(field)
            .map_or(false, |have| compare_values(have, want) != Ordering::Greater),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError> {
        let id = Self::auto_id();
        self.put(collection, &id, data).await
    }

    async fn put(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        let doc = Document {
            id: id.to_string(),
            data,
        };
        self.publish(collection, id, DocumentEvent::Changed(doc.clone()));
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.collections.get(collection).and_then(|coll| {
            coll.get(id).map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            })
        }))
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Document, StoreError> {
        let coll = self
            .collections
            .entry(collection.to_string())
            .or_default();
        let merged = {
            let mut entry = coll.get_mut(id).ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            match (entry.value_mut(), &patch) {
                (Value::Object(existing), Value::Object(fields)) => {
                    for (key, value) in fields {
                        existing.insert(key.clone(), value.clone());
                    }
                }
                (existing, _) => *existing = patch.clone(),
            }
            entry.value().clone()
        };
        drop(coll);
        let doc = Document {
            id: id.to_string(),
            data: merged,
        };
        self.publish(collection, id, DocumentEvent::Changed(doc.clone()));
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let removed = self
            .collections
            .get(collection)
            .and_then(|coll| coll.remove(id));
        if removed.is_some() {
            self.publish(collection, id, DocumentEvent::Removed { id: id.to_string() });
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut results: Vec<Document> = match self.collections.get(collection) {
            Some(coll) => coll
                .iter()
                .filter(|entry| filters.iter().all(|f| matches(entry.value(), f)))
                .map(|entry| Document {
                    id: entry.key().clone(),
                    data: entry.value().clone(),
                })
                .collect(),
            None => Vec::new(),
        };
        if let Some(order) = order {
            results.sort_by(|a, b| {
                let ord = match (a.data.get(&order.field), b.data.get(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        Ok(results)
    }

    fn subscribe(&self, key: WatchKey) -> Subscription {
        let rx = self
            .channels
            .entry(key.channel_key())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_assigns_id_and_roundtrips() {
        let store = MemoryStore::new();
        let doc = store
            .create("bookings", json!({"user_id": "u1"}))
            .await
            .unwrap();
        assert_eq!(doc.id.len(), AUTO_ID_LEN);

        let fetched = store.get("bookings", &doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.data["user_id"], "u1");
    }

    #[tokio::test]
    async fn update_merges_fields_and_reports_missing() {
        let store = MemoryStore::new();
        store
            .put("bookings", "b1", json!({"status": "pending", "rooms": 2}))
            .await
            .unwrap();

        let doc = store
            .update("bookings", "b1", json!({"status": "cancelled"}))
            .await
            .unwrap();
        assert_eq!(doc.data["status"], "cancelled");
        assert_eq!(doc.data["rooms"], 2);

        let err = store
            .update("bookings", "missing", json!({"status": "cancelled"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = MemoryStore::new();
        for (id, user, date) in [
            ("a", "u1", "2025-06-01"),
            ("b", "u1", "2025-06-03"),
            ("c", "u2", "2025-06-02"),
            ("d", "u1", "2025-06-02"),
        ] {
            store
                .put("slots", id, json!({"user_id": user, "date": date}))
                .await
                .unwrap();
        }

        let docs = store
            .query(
                "slots",
                &[
                    Filter::eq("user_id", "u1"),
                    Filter::gte("date", "2025-06-02"),
                ],
                Some(&OrderBy::desc("date")),
            )
            .await
            .unwrap();
        let dates: Vec<&str> = docs
            .iter()
            .map(|d| d.data["date"].as_str().unwrap())
            .collect();
        assert_eq!(dates, vec!["2025-06-03", "2025-06-02"]);
    }

    #[tokio::test]
    async fn document_subscription_sees_changes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(WatchKey::document("slots", "T1_2025-06-01"));

        store
            .put("slots", "T1_2025-06-01", json!({"spots_available": 10}))
            .await
            .unwrap();
        match sub.next().await.unwrap() {
            DocumentEvent::Changed(doc) => assert_eq!(doc.data["spots_available"], 10),
            other => panic!("unexpected event: {other:?}"),
        }

        store.delete("slots", "T1_2025-06-01").await.unwrap();
        assert!(matches!(
            sub.next().await.unwrap(),
            DocumentEvent::Removed { .. }
        ));
    }

    #[tokio::test]
    async fn collection_subscription_sees_all_documents() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(WatchKey::collection("notifications"));

        store
            .put("notifications", "n1", json!({"user_id": "u1"}))
            .await
            .unwrap();
        store
            .put("notifications", "n2", json!({"user_id": "u2"}))
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        let second = sub.next().await.unwrap();
        let ids: Vec<String> = [first, second]
            .into_iter()
            .map(|ev| match ev {
                DocumentEvent::Changed(doc) => doc.id,
                DocumentEvent::Removed { id } => id,
            })
            .collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn timestamps_order_chronologically_across_precision() {
        let store = MemoryStore::new();
        store
            .put("events", "x", json!({"created_at": "2025-06-01T10:00:00Z"}))
            .await
            .unwrap();
        store
            .put("events", "y", json!({"created_at": "2025-06-01T10:00:00.500Z"}))
            .await
            .unwrap();

        let docs = store
            .query("events", &[], Some(&OrderBy::asc("created_at")))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
