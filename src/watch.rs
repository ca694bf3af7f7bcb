// Real-time availability watchers. Each watcher owns one subscription per
// (resource, date) key, pumps push events into a caller-supplied callback and
// tracks its own lifecycle so transport failures are distinguishable from
// "no data yet".

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::availability::{
    slot_doc_id, AvailabilitySlot, LiveSpots, ResourceKind, SlotError, SpotThresholds,
};
use crate::store::{DocumentEvent, DocumentStore, Filter, OrderBy, StoreError, WatchKey};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Watcher lifecycle. `Error` is entered on transport or decode failure and
/// is terminal for that watcher; `Detached` means no live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Detached,
    Subscribing,
    Live,
    Error,
}

/// Handle to a live watcher. Dropping it (or calling `unsubscribe`) detaches
/// the subscription and stops callback delivery.
pub struct WatcherHandle {
    state: Arc<RwLock<WatcherState>>,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    pub fn state(&self) -> WatcherState {
        *self.state.read()
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
        *self.state.write() = WatcherState::Detached;
    }
}

/// Opens a live subscription for one tour's capacity on one date. The
/// callback fires with the latest snapshot on every upstream change.
pub fn subscribe_to_tour_availability<F>(
    store: Arc<dyn DocumentStore>,
    tour_id: &str,
    date: NaiveDate,
    callback: F,
) -> WatcherHandle
where
    F: FnMut(AvailabilitySlot) + Send + 'static,
{
    watch_slot(store, ResourceKind::Tour, tour_id, date, callback)
}

/// Driver-capacity counterpart of [`subscribe_to_tour_availability`].
pub fn subscribe_to_driver_availability<F>(
    store: Arc<dyn DocumentStore>,
    driver_id: &str,
    date: NaiveDate,
    callback: F,
) -> WatcherHandle
where
    F: FnMut(AvailabilitySlot) + Send + 'static,
{
    watch_slot(store, ResourceKind::Driver, driver_id, date, callback)
}

fn watch_slot<F>(
    store: Arc<dyn DocumentStore>,
    kind: ResourceKind,
    resource_id: &str,
    date: NaiveDate,
    mut callback: F,
) -> WatcherHandle
where
    F: FnMut(AvailabilitySlot) + Send + 'static,
{
    let collection = kind.collection();
    let doc_id = slot_doc_id(resource_id, date);
    let state = Arc::new(RwLock::new(WatcherState::Subscribing));
    let task_state = Arc::clone(&state);

    let task = tokio::spawn(async move {
        // Subscribe before the initial read so no change slips between them.
        let mut subscription = store.subscribe(WatchKey::document(collection, doc_id.clone()));

        match store.get(collection, &doc_id).await {
            Ok(Some(doc)) => match AvailabilitySlot::from_document(&doc) {
                Ok(slot) => {
                    *task_state.write() = WatcherState::Live;
                    callback(slot);
                }
                Err(err) => {
                    error!(%doc_id, error = %err, "availability snapshot rejected");
                    *task_state.write() = WatcherState::Error;
                    return;
                }
            },
            Ok(None) => {
                debug!(%doc_id, "no availability document yet, waiting for pushes");
            }
            Err(err) => {
                error!(%doc_id, error = %err, "availability fetch failed");
                *task_state.write() = WatcherState::Error;
                return;
            }
        }

        while let Some(event) = subscription.next().await {
            match event {
                DocumentEvent::Changed(doc) => match AvailabilitySlot::from_document(&doc) {
                    Ok(slot) => {
                        *task_state.write() = WatcherState::Live;
                        callback(slot);
                    }
                    Err(err) => {
                        error!(%doc_id, error = %err, "availability push rejected");
                        *task_state.write() = WatcherState::Error;
                        return;
                    }
                },
                DocumentEvent::Removed { .. } => {
                    // Slot deleted upstream; wait for it to reappear.
                    debug!(%doc_id, "availability document removed");
                    *task_state.write() = WatcherState::Subscribing;
                }
            }
        }
        *task_state.write() = WatcherState::Detached;
    });

    WatcherHandle { state, task }
}

/// Live spot counts for a tour date, exposed as a watch channel so the UI
/// can read the latest view model at any time.
pub struct LiveSpotsHandle {
    rx: watch::Receiver<LiveSpots>,
    watcher: WatcherHandle,
}

impl LiveSpotsHandle {
    pub fn current(&self) -> LiveSpots {
        self.rx.borrow().clone()
    }

    /// Waits for the next view-model change. Returns `false` once the
    /// watcher is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    pub fn state(&self) -> WatcherState {
        self.watcher.state()
    }
}

pub fn live_spots(
    store: Arc<dyn DocumentStore>,
    tour_id: &str,
    date: NaiveDate,
    thresholds: SpotThresholds,
) -> LiveSpotsHandle {
    let (tx, rx) = watch::channel(LiveSpots::pending());
    let watcher = subscribe_to_tour_availability(store, tour_id, date, move |slot| {
        let _ = tx.send(LiveSpots::from_slot(&slot, thresholds));
    });
    LiveSpotsHandle { rx, watcher }
}

/// One-shot fetch of per-date capacity across a date range, for calendar
/// rendering. Not a subscription.
pub async fn check_availability_range(
    store: &dyn DocumentStore,
    kind: ResourceKind,
    resource_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AvailabilitySlot>, WatchError> {
    let docs = store
        .query(
            kind.collection(),
            &[
                Filter::eq("resource_id", resource_id),
                Filter::gte("date", start.to_string()),
                Filter::lte("date", end.to_string()),
            ],
            Some(&OrderBy::asc("date")),
        )
        .await?;
    docs.iter()
        .map(|doc| AvailabilitySlot::from_document(doc).map_err(WatchError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::SlotStatus;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const DAY: &str = "2025-06-01";

    fn day() -> NaiveDate {
        DAY.parse().unwrap()
    }

    async fn put_slot(store: &MemoryStore, tour_id: &str, total: u32, left: u32) {
        store
            .put(
                ResourceKind::Tour.collection(),
                &slot_doc_id(tour_id, day()),
                json!({
                    "resource_id": tour_id,
                    "date": DAY,
                    "total_spots": total,
                    "spots_available": left,
                }),
            )
            .await
            .unwrap();
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn push_reducing_spots_updates_live_view() {
        let store = Arc::new(MemoryStore::new());
        put_slot(&store, "T1", 10, 10).await;

        let handle = live_spots(
            store.clone() as Arc<dyn DocumentStore>,
            "T1",
            day(),
            SpotThresholds::default(),
        );

        wait_until(|| !handle.current().loading).await;
        assert_eq!(handle.current().spots_left, 10);

        put_slot(&store, "T1", 10, 3).await;
        wait_until(|| handle.current().spots_left == 3).await;

        let view = handle.current();
        assert!(view.is_limited);
        assert!(!view.is_full);
        assert_eq!(view.percentage_filled, 70);
        assert_eq!(view.status, SlotStatus::Limited);
    }

    #[tokio::test]
    async fn watcher_stays_subscribing_until_first_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let handle = live_spots(
            store.clone() as Arc<dyn DocumentStore>,
            "T9",
            day(),
            SpotThresholds::default(),
        );

        // Nothing written yet: still waiting, marked as loading.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), WatcherState::Subscribing);
        assert!(handle.current().loading);

        put_slot(&store, "T9", 5, 5).await;
        wait_until(|| handle.state() == WatcherState::Live).await;
        assert_eq!(handle.current().spots_left, 5);
    }

    #[tokio::test]
    async fn poisoned_payload_moves_watcher_to_error() {
        let store = Arc::new(MemoryStore::new());
        put_slot(&store, "T1", 10, 10).await;

        let handle = live_spots(
            store.clone() as Arc<dyn DocumentStore>,
            "T1",
            day(),
            SpotThresholds::default(),
        );
        wait_until(|| handle.state() == WatcherState::Live).await;

        // remaining > total violates the slot invariant.
        store
            .put(
                ResourceKind::Tour.collection(),
                &slot_doc_id("T1", day()),
                json!({
                    "resource_id": "T1",
                    "date": DAY,
                    "total_spots": 10,
                    "spots_available": 25,
                }),
            )
            .await
            .unwrap();

        wait_until(|| handle.state() == WatcherState::Error).await;
    }

    #[tokio::test]
    async fn unsubscribe_detaches_and_stops_delivery() {
        let store = Arc::new(MemoryStore::new());
        put_slot(&store, "T1", 10, 10).await;

        let seen = Arc::new(RwLock::new(0u32));
        let seen_by_cb = Arc::clone(&seen);
        let handle = subscribe_to_tour_availability(
            store.clone() as Arc<dyn DocumentStore>,
            "T1",
            day(),
            move |_slot| {
                *seen_by_cb.write() += 1;
            },
        );

        wait_until(|| *seen.read() == 1).await;
        let state = Arc::clone(&handle.state);
        handle.unsubscribe();
        assert_eq!(*state.read(), WatcherState::Detached);

        put_slot(&store, "T1", 10, 4).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.read(), 1);
    }

    #[tokio::test]
    async fn driver_watcher_reads_driver_collection() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                ResourceKind::Driver.collection(),
                &slot_doc_id("D1", day()),
                json!({
                    "resource_id": "D1",
                    "date": DAY,
                    "total_spots": 2,
                    "spots_available": 1,
                }),
            )
            .await
            .unwrap();

        let seen = Arc::new(RwLock::new(None));
        let seen_by_cb = Arc::clone(&seen);
        let _handle = subscribe_to_driver_availability(
            store.clone() as Arc<dyn DocumentStore>,
            "D1",
            day(),
            move |slot| {
                *seen_by_cb.write() = Some(slot);
            },
        );

        wait_until(|| seen.read().is_some()).await;
        let slot = seen.read().clone().unwrap();
        assert_eq!(slot.spots_available, 1);
    }

    #[tokio::test]
    async fn range_check_returns_ordered_per_date_slots() {
        let store = Arc::new(MemoryStore::new());
        for (date, left) in [("2025-06-03", 2), ("2025-06-01", 10), ("2025-06-02", 0)] {
            store
                .put(
                    ResourceKind::Tour.collection(),
                    &format!("T1_{date}"),
                    json!({
                        "resource_id": "T1",
                        "date": date,
                        "total_spots": 10,
                        "spots_available": left,
                    }),
                )
                .await
                .unwrap();
        }
        // A different tour must not appear in the range.
        store
            .put(
                ResourceKind::Tour.collection(),
                "T2_2025-06-02",
                json!({
                    "resource_id": "T2",
                    "date": "2025-06-02",
                    "total_spots": 10,
                    "spots_available": 5,
                }),
            )
            .await
            .unwrap();

        let slots = check_availability_range(
            store.as_ref(),
            ResourceKind::Tour,
            "T1",
            "2025-06-01".parse().unwrap(),
            "2025-06-02".parse().unwrap(),
        )
        .await
        .unwrap();

        let got: Vec<(String, u32)> = slots
            .iter()
            .map(|s| (s.date.to_string(), s.spots_available))
            .collect();
        assert_eq!(
            got,
            vec![("2025-06-01".to_string(), 10), ("2025-06-02".to_string(), 0)]
        );
    }
}
