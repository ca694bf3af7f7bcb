// Slot-level driver scheduling: per-day morning/afternoon/evening slots,
// blocked periods and per-driver booking rules. Complements the capacity
// counts in `availability`: that module answers "how many seats are left",
// this one answers "which parts of the day can this driver take".

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::{Document, DocumentStore, Filter, OrderBy, StoreError};

pub const SCHEDULE_COLLECTION: &str = "driver_schedule";
pub const BLOCKED_PERIODS_COLLECTION: &str = "driver_blocked_periods";
pub const SCHEDULE_SETTINGS_COLLECTION: &str = "driver_schedule_settings";

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid calendar month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
}

impl From<serde_json::Error> for ScheduleError {
    fn from(err: serde_json::Error) -> Self {
        ScheduleError::Store(StoreError::from(err))
    }
}

/// Part of the day a booking occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySlot {
    Morning,
    Afternoon,
    Evening,
    FullDay,
}

/// State of a single slot on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Booked,
    Unavailable,
    Tentative,
}

/// The three bookable parts of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlots {
    pub morning: SlotState,
    pub afternoon: SlotState,
    pub evening: SlotState,
}

impl Default for TimeSlots {
    fn default() -> Self {
        Self::all(SlotState::Available)
    }
}

impl TimeSlots {
    pub fn all(state: SlotState) -> Self {
        Self {
            morning: state,
            afternoon: state,
            evening: state,
        }
    }

    fn states(&self) -> [SlotState; 3] {
        [self.morning, self.afternoon, self.evening]
    }

    /// Collapses the three slots into a whole-day status: fully booked or
    /// fully unavailable win outright, any single booking reads tentative.
    pub fn full_day(&self) -> SlotState {
        let states = self.states();
        if states.iter().all(|s| *s == SlotState::Booked) {
            SlotState::Booked
        } else if states.iter().all(|s| *s == SlotState::Unavailable) {
            SlotState::Unavailable
        } else if states.contains(&SlotState::Booked) {
            SlotState::Tentative
        } else {
            SlotState::Available
        }
    }

    pub fn get(&self, slot: DaySlot) -> SlotState {
        match slot {
            DaySlot::Morning => self.morning,
            DaySlot::Afternoon => self.afternoon,
            DaySlot::Evening => self.evening,
            DaySlot::FullDay => self.full_day(),
        }
    }

    fn apply(&mut self, slots: &[DaySlot], state: SlotState) {
        if slots.contains(&DaySlot::FullDay) {
            *self = Self::all(state);
            return;
        }
        for slot in slots {
            match slot {
                DaySlot::Morning => self.morning = state,
                DaySlot::Afternoon => self.afternoon = state,
                DaySlot::Evening => self.evening = state,
                DaySlot::FullDay => unreachable!("handled above"),
            }
        }
    }
}

/// Requested slot changes for one day; unset slots keep their current state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotChanges {
    pub morning: Option<SlotState>,
    pub afternoon: Option<SlotState>,
    pub evening: Option<SlotState>,
}

/// One driver-day as stored. Keyed by `{driver_id}_{date}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayEntry {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub driver_id: String,
    pub date: NaiveDate,
    pub time_slots: TimeSlots,
    pub full_day_status: SlotState,
    pub booking_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DayEntry {
    fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut entry: DayEntry = serde_json::from_value(doc.data.clone())?;
        entry.id = doc.id.clone();
        Ok(entry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Vacation,
    Maintenance,
    Personal,
    Medical,
    Other,
}

/// A contiguous range of days a driver is off the road.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedPeriod {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub driver_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: BlockReason,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BlockedPeriod {
    fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut block: BlockedPeriod = serde_json::from_value(doc.data.clone())?;
        block.id = doc.id.clone();
        Ok(block)
    }
}

/// Per-driver booking rules. Working days use 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub driver_id: String,
    pub default_available: bool,
    pub working_days: Vec<u32>,
    pub max_bookings_per_day: u32,
    pub advance_booking_days: i64,
    pub minimum_notice_hours: i64,
    pub auto_confirm: bool,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSettings {
    /// Defaults: Monday through Saturday, 24h notice, bookable 60 days out.
    pub fn defaults(driver_id: &str) -> Self {
        Self {
            driver_id: driver_id.to_string(),
            default_available: true,
            working_days: vec![1, 2, 3, 4, 5, 6],
            max_bookings_per_day: 2,
            advance_booking_days: 60,
            minimum_notice_hours: 24,
            auto_confirm: false,
            updated_at: Utc::now(),
        }
    }

    fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_days
            .contains(&date.weekday().num_days_from_sunday())
    }
}

/// Merged per-day view for calendar rendering: explicit entries win over
/// blocks, blocks win over working-day defaults.
#[derive(Debug, Clone)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub status: SlotState,
    pub slots: TimeSlots,
    pub booking_id: Option<String>,
    pub is_blocked: bool,
    pub block_reason: Option<BlockReason>,
}

/// Outcome of a pre-booking check, naming the slots that clash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub available: bool,
    pub conflicts: Vec<DaySlot>,
}

impl CheckOutcome {
    fn ok() -> Self {
        Self {
            available: true,
            conflicts: Vec::new(),
        }
    }

    fn rejected(conflicts: Vec<DaySlot>) -> Self {
        Self {
            available: false,
            conflicts,
        }
    }
}

pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += Duration::days(1);
    }
    dates
}

fn doc_id(driver_id: &str, date: NaiveDate) -> String {
    format!("{driver_id}_{date}")
}

/// Driver schedule service over the document-store seam.
pub struct DriverSchedule {
    store: Arc<dyn DocumentStore>,
}

impl DriverSchedule {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn day(
        &self,
        driver_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DayEntry>, ScheduleError> {
        let doc = self
            .store
            .get(SCHEDULE_COLLECTION, &doc_id(driver_id, date))
            .await?;
        doc.as_ref()
            .map(DayEntry::from_document)
            .transpose()
            .map_err(ScheduleError::from)
    }

    pub async fn range(
        &self,
        driver_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayEntry>, ScheduleError> {
        let docs = self
            .store
            .query(
                SCHEDULE_COLLECTION,
                &[
                    Filter::eq("driver_id", driver_id),
                    Filter::gte("date", start.to_string()),
                    Filter::lte("date", end.to_string()),
                ],
                Some(&OrderBy::asc("date")),
            )
            .await?;
        docs.iter()
            .map(|doc| DayEntry::from_document(doc).map_err(ScheduleError::from))
            .collect()
    }

    /// Applies slot changes for one day, merging with whatever is already
    /// stored and rederiving the full-day status.
    pub async fn set_availability(
        &self,
        driver_id: &str,
        date: NaiveDate,
        changes: SlotChanges,
        notes: Option<&str>,
    ) -> Result<DayEntry, ScheduleError> {
        let existing = self.day(driver_id, date).await?;
        let now = Utc::now();

        let mut time_slots = existing
            .as_ref()
            .map(|e| e.time_slots)
            .unwrap_or_default();
        if let Some(state) = changes.morning {
            time_slots.morning = state;
        }
        if let Some(state) = changes.afternoon {
            time_slots.afternoon = state;
        }
        if let Some(state) = changes.evening {
            time_slots.evening = state;
        }

        let entry = DayEntry {
            id: doc_id(driver_id, date),
            driver_id: driver_id.to_string(),
            date,
            full_day_status: time_slots.full_day(),
            time_slots,
            booking_id: existing.as_ref().and_then(|e| e.booking_id.clone()),
            notes: notes
                .map(String::from)
                .or_else(|| existing.as_ref().and_then(|e| e.notes.clone())),
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
        };
        self.put_entry(&entry).await?;
        Ok(entry)
    }

    pub async fn set_full_day(
        &self,
        driver_id: &str,
        date: NaiveDate,
        state: SlotState,
        notes: Option<&str>,
    ) -> Result<DayEntry, ScheduleError> {
        self.set_availability(
            driver_id,
            date,
            SlotChanges {
                morning: Some(state),
                afternoon: Some(state),
                evening: Some(state),
            },
            notes,
        )
        .await
    }

    /// Sets whole days across a list of dates, replacing any existing slot
    /// state for those days.
    pub async fn set_range(
        &self,
        driver_id: &str,
        dates: &[NaiveDate],
        state: SlotState,
        notes: Option<&str>,
    ) -> Result<(), ScheduleError> {
        let now = Utc::now();
        for &date in dates {
            let time_slots = TimeSlots::all(state);
            let entry = DayEntry {
                id: doc_id(driver_id, date),
                driver_id: driver_id.to_string(),
                date,
                full_day_status: time_slots.full_day(),
                time_slots,
                booking_id: None,
                notes: notes.map(String::from),
                created_at: now,
                updated_at: now,
            };
            self.put_entry(&entry).await?;
        }
        Ok(())
    }

    /// Marks the requested slots booked and pins the booking id to the day.
    pub async fn mark_booked(
        &self,
        driver_id: &str,
        date: NaiveDate,
        booking_id: &str,
        slots: &[DaySlot],
    ) -> Result<DayEntry, ScheduleError> {
        let existing = self.day(driver_id, date).await?;
        let now = Utc::now();

        let mut time_slots = existing
            .as_ref()
            .map(|e| e.time_slots)
            .unwrap_or_default();
        time_slots.apply(slots, SlotState::Booked);

        let entry = DayEntry {
            id: doc_id(driver_id, date),
            driver_id: driver_id.to_string(),
            date,
            full_day_status: time_slots.full_day(),
            time_slots,
            booking_id: Some(booking_id.to_string()),
            notes: existing.as_ref().and_then(|e| e.notes.clone()),
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: now,
        };
        self.put_entry(&entry).await?;
        debug!(driver_id, %date, booking_id, "slots marked booked");
        Ok(entry)
    }

    /// Frees the slots a cancelled booking occupied. A missing day entry is
    /// a no-op; there is nothing to free.
    pub async fn release_booking(
        &self,
        driver_id: &str,
        date: NaiveDate,
        slots: &[DaySlot],
    ) -> Result<(), ScheduleError> {
        let Some(existing) = self.day(driver_id, date).await? else {
            return Ok(());
        };
        let mut time_slots = existing.time_slots;
        time_slots.apply(slots, SlotState::Available);

        let entry = DayEntry {
            full_day_status: time_slots.full_day(),
            time_slots,
            booking_id: None,
            updated_at: Utc::now(),
            ..existing
        };
        self.put_entry(&entry).await?;
        debug!(driver_id, %date, "booked slots released");
        Ok(())
    }

    /// Blocks a date range and marks every day in it unavailable.
    pub async fn block_period(
        &self,
        driver_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        reason: BlockReason,
        description: Option<&str>,
    ) -> Result<BlockedPeriod, ScheduleError> {
        let mut block = BlockedPeriod {
            id: String::new(),
            driver_id: driver_id.to_string(),
            start_date: start,
            end_date: end,
            reason,
            description: description.map(String::from),
            created_at: Utc::now(),
        };
        let doc = self
            .store
            .create(BLOCKED_PERIODS_COLLECTION, serde_json::to_value(&block)?)
            .await?;
        block.id = doc.id;

        let dates = dates_between(start, end);
        self.set_range(driver_id, &dates, SlotState::Unavailable, Some("blocked"))
            .await?;
        debug!(driver_id, %start, %end, ?reason, "period blocked");
        Ok(block)
    }

    pub async fn blocked_periods(
        &self,
        driver_id: &str,
    ) -> Result<Vec<BlockedPeriod>, ScheduleError> {
        let docs = self
            .store
            .query(
                BLOCKED_PERIODS_COLLECTION,
                &[Filter::eq("driver_id", driver_id)],
                Some(&OrderBy::desc("start_date")),
            )
            .await?;
        docs.iter()
            .map(|doc| BlockedPeriod::from_document(doc).map_err(ScheduleError::from))
            .collect()
    }

    /// Removes a block and restores the covered days to available. Removing
    /// an unknown block is a no-op.
    pub async fn remove_block(&self, block_id: &str) -> Result<(), ScheduleError> {
        let Some(doc) = self.store.get(BLOCKED_PERIODS_COLLECTION, block_id).await? else {
            return Ok(());
        };
        let block = BlockedPeriod::from_document(&doc)?;

        let dates = dates_between(block.start_date, block.end_date);
        self.set_range(&block.driver_id, &dates, SlotState::Available, None)
            .await?;
        self.store.delete(BLOCKED_PERIODS_COLLECTION, block_id).await?;
        Ok(())
    }

    /// The driver's rules, falling back to defaults when never saved.
    pub async fn settings(&self, driver_id: &str) -> Result<ScheduleSettings, ScheduleError> {
        match self
            .store
            .get(SCHEDULE_SETTINGS_COLLECTION, driver_id)
            .await?
        {
            Some(doc) => Ok(serde_json::from_value(doc.data)?),
            None => Ok(ScheduleSettings::defaults(driver_id)),
        }
    }

    pub async fn save_settings(
        &self,
        driver_id: &str,
        mut settings: ScheduleSettings,
    ) -> Result<(), ScheduleError> {
        settings.driver_id = driver_id.to_string();
        settings.updated_at = Utc::now();
        self.store
            .put(
                SCHEDULE_SETTINGS_COLLECTION,
                driver_id,
                serde_json::to_value(&settings)?,
            )
            .await?;
        Ok(())
    }

    /// Per-day calendar for a month, merging explicit entries, blocks and
    /// working-day defaults.
    pub async fn month_calendar(
        &self,
        driver_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayAvailability>, ScheduleError> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(ScheduleError::InvalidMonth { year, month })?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or(ScheduleError::InvalidMonth { year, month })?;
        let end = next_month - Duration::days(1);

        let entries = self.range(driver_id, start, end).await?;
        let blocks = self.blocked_periods(driver_id).await?;
        let settings = self.settings(driver_id).await?;

        let mut calendar = Vec::new();
        for date in dates_between(start, end) {
            let block = blocks
                .iter()
                .find(|b| date >= b.start_date && date <= b.end_date);
            let entry = entries.iter().find(|e| e.date == date);

            let (status, slots) = if block.is_some() {
                (SlotState::Unavailable, TimeSlots::all(SlotState::Unavailable))
            } else if let Some(entry) = entry {
                (entry.full_day_status, entry.time_slots)
            } else if !settings.is_working_day(date) || !settings.default_available {
                (SlotState::Unavailable, TimeSlots::all(SlotState::Unavailable))
            } else {
                (SlotState::Available, TimeSlots::default())
            };

            calendar.push(DayAvailability {
                date,
                status,
                slots,
                booking_id: entry.and_then(|e| e.booking_id.clone()),
                is_blocked: block.is_some(),
                block_reason: block.map(|b| b.reason),
            });
        }
        Ok(calendar)
    }

    /// Answers whether a driver can take a booking for the given slots,
    /// applying notice, advance-window and working-day rules before slot
    /// conflicts. `now` is passed in so callers and tests share one clock.
    pub async fn check_booking(
        &self,
        driver_id: &str,
        date: NaiveDate,
        slots: &[DaySlot],
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, ScheduleError> {
        let settings = self.settings(driver_id).await?;

        let booking_start = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let hours_until = (booking_start - now).num_hours();
        if hours_until < settings.minimum_notice_hours {
            return Ok(CheckOutcome::rejected(slots.to_vec()));
        }
        if hours_until > settings.advance_booking_days * 24 {
            return Ok(CheckOutcome::rejected(slots.to_vec()));
        }
        if !settings.is_working_day(date) {
            return Ok(CheckOutcome::rejected(slots.to_vec()));
        }

        let Some(entry) = self.day(driver_id, date).await? else {
            return Ok(if settings.default_available {
                CheckOutcome::ok()
            } else {
                CheckOutcome::rejected(slots.to_vec())
            });
        };

        let mut conflicts = Vec::new();
        if slots.contains(&DaySlot::FullDay) {
            if entry.full_day_status != SlotState::Available {
                for slot in [DaySlot::Morning, DaySlot::Afternoon, DaySlot::Evening] {
                    if entry.time_slots.get(slot) != SlotState::Available {
                        conflicts.push(slot);
                    }
                }
            }
        } else {
            for &slot in slots {
                if entry.time_slots.get(slot) != SlotState::Available {
                    conflicts.push(slot);
                }
            }
        }

        Ok(if conflicts.is_empty() {
            CheckOutcome::ok()
        } else {
            CheckOutcome::rejected(conflicts)
        })
    }

    /// Drivers with every requested slot free on the date. Only drivers with
    /// an explicit entry for the day are considered.
    pub async fn find_available_drivers(
        &self,
        date: NaiveDate,
        slots: &[DaySlot],
    ) -> Result<Vec<String>, ScheduleError> {
        let docs = self
            .store
            .query(
                SCHEDULE_COLLECTION,
                &[Filter::eq("date", date.to_string())],
                Some(&OrderBy::asc("driver_id")),
            )
            .await?;

        let mut drivers = Vec::new();
        for doc in &docs {
            let entry = DayEntry::from_document(doc)?;
            let free = if slots.contains(&DaySlot::FullDay) {
                entry.full_day_status == SlotState::Available
            } else {
                slots
                    .iter()
                    .all(|&slot| entry.time_slots.get(slot) == SlotState::Available)
            };
            if free {
                drivers.push(entry.driver_id);
            }
        }
        Ok(drivers)
    }

    async fn put_entry(&self, entry: &DayEntry) -> Result<(), ScheduleError> {
        self.store
            .put(
                SCHEDULE_COLLECTION,
                &doc_id(&entry.driver_id, entry.date),
                serde_json::to_value(entry)?,
            )
            .await?;
        Ok(())
    }
}
