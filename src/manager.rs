// Booking Manager: the single point of truth for booking CRUD from the
// client's perspective. Every operation resolves to a typed error instead of
// panicking, and nothing here retries or caches writes locally; the store is
// authoritative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::booking::{
    generate_confirmation_number, Booking, BookingDraft, BookingKind, BookingStatus, PaymentStatus,
    ValidationError, BOOKINGS_COLLECTION,
};
use crate::store::{DocumentStore, Filter, OrderBy, StoreError};

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("booking not found: {0}")]
    NotFound(String),

    #[error("invalid booking draft: {0}")]
    Validation(#[from] ValidationError),

    #[error("store failure: {0}")]
    Transport(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id, .. } => BookingError::NotFound(id),
            other => BookingError::Transport(other.to_string()),
        }
    }
}

/// An availability question posed before or during a booking flow.
#[derive(Debug, Clone)]
pub struct AvailabilityRequest {
    pub kind: BookingKind,
    pub resource_id: String,
    pub date: NaiveDate,
    pub party_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityAnswer {
    pub available: bool,
    pub message: Option<String>,
}

/// Seam for pre-booking availability checks so callers can swap the probe
/// without touching the manager.
#[async_trait]
pub trait AvailabilityCheck: Send + Sync {
    async fn check(&self, request: &AvailabilityRequest) -> Result<AvailabilityAnswer, BookingError>;
}

/// Placeholder probe that reports every request as available. This mirrors
/// the current production behavior, which never blocks a booking on
/// availability; the real decision happens on the reservation backend.
// TODO: back this with the availability collections once the reservation
// backend starts decrementing slots at booking time.
pub struct StubAvailability;

#[async_trait]
impl AvailabilityCheck for StubAvailability {
    async fn check(
        &self,
        _request: &AvailabilityRequest,
    ) -> Result<AvailabilityAnswer, BookingError> {
        Ok(AvailabilityAnswer {
            available: true,
            message: None,
        })
    }
}

pub struct BookingManager {
    store: Arc<dyn DocumentStore>,
    availability: Arc<dyn AvailabilityCheck>,
}

impl BookingManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_availability_check(store, Arc::new(StubAvailability))
    }

    pub fn with_availability_check(
        store: Arc<dyn DocumentStore>,
        availability: Arc<dyn AvailabilityCheck>,
    ) -> Self {
        Self {
            store,
            availability,
        }
    }

    /// Persists a new booking for the authenticated user. The draft is
    /// validated first; nothing is written on failure. The stored record
    /// starts life as pending/pending with a fresh confirmation number.
    pub async fn create_booking(
        &self,
        draft: BookingDraft,
        user: Option<&str>,
    ) -> Result<Booking, BookingError> {
        let user = user.ok_or(BookingError::Unauthenticated)?;
        draft.validate()?;

        let now = Utc::now();
        let mut booking = Booking {
            id: String::new(),
            confirmation_number: generate_confirmation_number(),
            user_id: user.to_string(),
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            cancellation_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
            details: draft,
        };
        let data = serde_json::to_value(&booking).map_err(StoreError::from)?;
        let doc = self.store.create(BOOKINGS_COLLECTION, data).await?;
        booking.id = doc.id;
        debug!(
            booking_id = %booking.id,
            confirmation = %booking.confirmation_number,
            user_id = %booking.user_id,
            "booking created"
        );
        Ok(booking)
    }

    pub async fn get_booking(&self, id: &str) -> Result<Booking, BookingError> {
        let doc = self
            .store
            .get(BOOKINGS_COLLECTION, id)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;
        Ok(Booking::from_document(&doc)?)
    }

    /// All bookings owned by a user, most recent first.
    pub async fn get_user_bookings(&self, user_id: &str) -> Result<Vec<Booking>, BookingError> {
        let docs = self
            .store
            .query(
                BOOKINGS_COLLECTION,
                &[Filter::eq("user_id", user_id)],
                Some(&OrderBy::desc("created_at")),
            )
            .await?;
        docs.iter()
            .map(|doc| Booking::from_document(doc).map_err(BookingError::from))
            .collect()
    }

    /// Ensures the booking is cancelled. Cancelling an already-cancelled
    /// booking succeeds without touching the record, so a retry after a
    /// network failure is harmless and the first recorded reason wins.
    pub async fn cancel_booking(&self, id: &str, reason: Option<&str>) -> Result<(), BookingError> {
        let booking = self.get_booking(id).await?;
        if booking.status == BookingStatus::Cancelled {
            debug!(booking_id = %id, "booking already cancelled");
            return Ok(());
        }
        let now = Utc::now();
        self.store
            .update(
                BOOKINGS_COLLECTION,
                id,
                json!({
                    "status": BookingStatus::Cancelled,
                    "cancellation_reason": reason,
                    "cancelled_at": now,
                    "updated_at": now,
                }),
            )
            .await?;
        debug!(booking_id = %id, reason = reason.unwrap_or(""), "booking cancelled");
        Ok(())
    }

    /// Sets the payment status directly. Transition legality is the
    /// caller's/backend's responsibility; this layer does not validate it.
    pub async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
    ) -> Result<(), BookingError> {
        self.store
            .update(
                BOOKINGS_COLLECTION,
                id,
                json!({
                    "payment_status": status,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        debug!(booking_id = %id, ?status, "payment status updated");
        Ok(())
    }

    pub async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityAnswer, BookingError> {
        let answer = self.availability.check(request).await?;
        if !answer.available {
            warn!(resource_id = %request.resource_id, "availability check rejected request");
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::sample_hotel_draft;
    use crate::store::MemoryStore;

    fn manager() -> BookingManager {
        BookingManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn create_requires_authentication() {
        let err = manager()
            .create_booking(sample_hotel_draft(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Unauthenticated));
    }

    #[tokio::test]
    async fn created_booking_starts_pending_with_confirmation() -> anyhow::Result<()> {
        let manager = manager();
        let mut draft = sample_hotel_draft();
        draft.rooms = 2;
        draft.adults = 3;

        let booking = manager.create_booking(draft, Some("u1")).await?;
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert!(!booking.confirmation_number.is_empty());
        assert_ne!(booking.confirmation_number, booking.id);

        let stored = manager.get_booking(&booking.id).await?;
        assert_eq!(stored.confirmation_number, booking.confirmation_number);
        assert_eq!(stored.details.rooms, 2);
        assert_eq!(stored.details.adults, 3);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_draft_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let manager = BookingManager::new(store.clone());
        let mut draft = sample_hotel_draft();
        draft.hotel_id = None;

        let err = manager
            .create_booking(draft, Some("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let docs = store.query(BOOKINGS_COLLECTION, &[], None).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn user_bookings_come_back_newest_first() {
        let manager = manager();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let booking = manager
                .create_booking(sample_hotel_draft(), Some("u1"))
                .await
                .unwrap();
            ids.push(booking.id);
        }
        manager
            .create_booking(sample_hotel_draft(), Some("someone-else"))
            .await
            .unwrap();

        let bookings = manager.get_user_bookings("u1").await.unwrap();
        let got: Vec<&str> = bookings.iter().map(|b| b.id.as_str()).collect();
        let want: Vec<&str> = ids.iter().rev().map(String::as_str).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_keeps_first_reason() {
        let manager = manager();
        let booking = manager
            .create_booking(sample_hotel_draft(), Some("u1"))
            .await
            .unwrap();

        manager
            .cancel_booking(&booking.id, Some("change of plans"))
            .await
            .unwrap();
        manager
            .cancel_booking(&booking.id, Some("double submit"))
            .await
            .unwrap();

        let stored = manager.get_booking(&booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("change of plans"));
        assert!(stored.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn cancel_of_missing_booking_reports_not_found_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let manager = BookingManager::new(store.clone());

        let err = manager.cancel_booking("nope", None).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));

        let docs = store.query(BOOKINGS_COLLECTION, &[], None).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn payment_status_is_set_without_transition_checks() {
        let manager = manager();
        let booking = manager
            .create_booking(sample_hotel_draft(), Some("u1"))
            .await
            .unwrap();

        manager
            .update_payment_status(&booking.id, PaymentStatus::Refunded)
            .await
            .unwrap();
        manager
            .update_payment_status(&booking.id, PaymentStatus::Paid)
            .await
            .unwrap();

        let stored = manager.get_booking(&booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        // Booking status is untouched by payment updates.
        assert_eq!(stored.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn stub_availability_always_answers_available() {
        let manager = manager();
        let answer = manager
            .check_availability(&AvailabilityRequest {
                kind: BookingKind::TourOnly,
                resource_id: "T1".into(),
                date: chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                party_size: 4,
            })
            .await
            .unwrap();
        assert!(answer.available);
    }
}
