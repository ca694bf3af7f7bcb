// Per-resource, per-date capacity records and the derived view models the UI
// consumes. Capacity is mutated only by the reservation backend; this side
// observes and derives, never writes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::Document;

pub const TOUR_AVAILABILITY_COLLECTION: &str = "tour_availability";
pub const DRIVER_AVAILABILITY_COLLECTION: &str = "driver_availability";

/// Which capacity collection a watcher or range check targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Tour,
    Driver,
}

impl ResourceKind {
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Tour => TOUR_AVAILABILITY_COLLECTION,
            ResourceKind::Driver => DRIVER_AVAILABILITY_COLLECTION,
        }
    }
}

/// Derived capacity status. Never stored as an independent source of truth;
/// always recomputed from the counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Limited,
    Full,
}

/// Ratio of remaining capacity at or below which a slot reads as limited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotThresholds {
    pub limited_ratio: f64,
}

impl Default for SpotThresholds {
    fn default() -> Self {
        Self { limited_ratio: 0.3 }
    }
}

#[derive(Error, Debug)]
pub enum SlotError {
    #[error("remaining spots {remaining} exceed total {total}")]
    RemainingExceedsTotal { remaining: u32, total: u32 },

    #[error("malformed availability payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remaining capacity for one resource on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub resource_id: String,
    pub date: NaiveDate,
    pub total_spots: u32,
    pub spots_available: u32,
}

/// Availability documents are keyed by `{resource_id}_{date}` so one document
/// covers one resource-day.
pub fn slot_doc_id(resource_id: &str, date: NaiveDate) -> String {
    format!("{resource_id}_{date}")
}

impl AvailabilitySlot {
    pub fn from_document(doc: &Document) -> Result<Self, SlotError> {
        let slot: AvailabilitySlot = serde_json::from_value(doc.data.clone())?;
        if slot.spots_available > slot.total_spots {
            return Err(SlotError::RemainingExceedsTotal {
                remaining: slot.spots_available,
                total: slot.total_spots,
            });
        }
        Ok(slot)
    }

    pub fn status(&self, thresholds: SpotThresholds) -> SlotStatus {
        if self.spots_available == 0 {
            SlotStatus::Full
        } else if f64::from(self.spots_available)
            <= f64::from(self.total_spots) * thresholds.limited_ratio
        {
            SlotStatus::Limited
        } else {
            SlotStatus::Available
        }
    }
}

/// Read-side view model over the latest availability snapshot. Pure
/// computation; no network calls of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSpots {
    pub spots_left: u32,
    pub total_spots: u32,
    pub status: SlotStatus,
    pub is_limited: bool,
    pub is_full: bool,
    pub percentage_filled: u32,
    pub loading: bool,
}

impl LiveSpots {
    /// State before the first snapshot arrives.
    pub fn pending() -> Self {
        Self {
            spots_left: 0,
            total_spots: 0,
            status: SlotStatus::Available,
            is_limited: false,
            is_full: false,
            percentage_filled: 0,
            loading: true,
        }
    }

    pub fn from_slot(slot: &AvailabilitySlot, thresholds: SpotThresholds) -> Self {
        let status = slot.status(thresholds);
        let percentage_filled = if slot.total_spots == 0 {
            0
        } else {
            let taken = f64::from(slot.total_spots - slot.spots_available);
            ((taken / f64::from(slot.total_spots)) * 100.0).round() as u32
        };
        Self {
            spots_left: slot.spots_available,
            total_spots: slot.total_spots,
            status,
            is_limited: status == SlotStatus::Limited,
            is_full: status == SlotStatus::Full,
            percentage_filled,
            loading: false,
        }
    }
}
