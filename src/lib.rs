// Booking-state synchronization layer for the Recharge Travels backends.

// Storage seam and the in-process store used by tests and local runs
pub mod store;

// Booking records, lifecycle operations and the session-facing state
pub mod booking;
pub mod manager;
pub mod session;

// Real-time capacity: records, watchers and derived view models
pub mod availability;
pub mod watch;

// Driver day-level scheduling
pub mod schedule;

// Notification feed and attempt limiting
pub mod limiter;
pub mod notify;

// Re-export key types for convenience
pub use availability::{
    AvailabilitySlot, LiveSpots, ResourceKind, SlotStatus, SpotThresholds,
};
pub use booking::{Booking, BookingDraft, BookingKind, BookingStatus, PaymentStatus};
pub use limiter::{FailurePolicy, LimiterConfig, RateLimiter};
pub use manager::{AvailabilityCheck, BookingError, BookingManager};
pub use notify::{Notification, NotificationFeed};
pub use schedule::{DaySlot, DriverSchedule, ScheduleSettings, SlotState};
pub use session::BookingSession;
pub use store::{Document, DocumentEvent, DocumentStore, Filter, MemoryStore, OrderBy, WatchKey};
pub use watch::{LiveSpotsHandle, WatcherHandle, WatcherState};
