// Booking record model: reservation shape, status lifecycles and draft
// validation. The remote store is authoritative; this module only defines the
// wire shape and the invariants checked before a draft is persisted.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Document, StoreError};

pub const BOOKINGS_COLLECTION: &str = "bookings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    HotelOnly,
    TourOnly,
    Package,
}

/// Reservation lifecycle. Transitions to `Confirmed`/`Completed` are driven
/// by external processes (admin action, payment webhook); the client only
/// causes `Pending` on create and `Cancelled` on cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// Payment lifecycle, tracked independently of `BookingStatus`. A booking can
/// be confirmed while payment is pending (pay-on-arrival) or paid while still
/// awaiting manual confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Caller-supplied reservation details, validated before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    pub kind: BookingKind,
    pub hotel_id: Option<String>,
    pub tour_id: Option<String>,
    pub package_id: Option<String>,
    pub room_type_id: Option<String>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub adults: u32,
    pub children: u32,
    pub rooms: u32,
    pub currency: String,
    pub total_price: f64,
    pub add_ons: Vec<String>,
    pub special_requests: Option<String>,
    pub personal_info: PersonalInfo,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("hotel-only bookings must reference a hotel and nothing else")]
    HotelReference,

    #[error("tour-only bookings must reference a tour and nothing else")]
    TourReference,

    #[error("package bookings must reference a package and nothing else")]
    PackageReference,

    #[error("hotel bookings require at least one room")]
    NoRooms,

    #[error("at least one adult is required")]
    NoAdults,

    #[error("check-out cannot precede check-in")]
    DateOrder,

    #[error("a contact email is required")]
    MissingEmail,
}

impl BookingDraft {
    /// Checks the structural invariants: exactly one resource reference
    /// consistent with the kind, at least one room for hotel stays, sane
    /// dates and party, and a contact email.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let refs = (
            self.hotel_id.is_some(),
            self.tour_id.is_some(),
            self.package_id.is_some(),
        );
        match self.kind {
            BookingKind::HotelOnly => {
                if refs != (true, false, false) {
                    return Err(ValidationError::HotelReference);
                }
                if self.rooms < 1 {
                    return Err(ValidationError::NoRooms);
                }
            }
            BookingKind::TourOnly => {
                if refs != (false, true, false) {
                    return Err(ValidationError::TourReference);
                }
            }
            BookingKind::Package => {
                if refs != (false, false, true) {
                    return Err(ValidationError::PackageReference);
                }
            }
        }
        if self.adults < 1 {
            return Err(ValidationError::NoAdults);
        }
        if self.check_out < self.check_in {
            return Err(ValidationError::DateOrder);
        }
        if self.personal_info.email.trim().is_empty() {
            return Err(ValidationError::MissingEmail);
        }
        Ok(())
    }
}

/// A persisted reservation. `id` lives outside the document payload and is
/// filled in from the store on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    #[serde(default, skip_serializing)]
    pub id: String,
    pub confirmation_number: String,
    pub user_id: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: BookingDraft,
}

impl Booking {
    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        let mut booking: Booking = serde_json::from_value(doc.data.clone())?;
        booking.id = doc.id.clone();
        Ok(booking)
    }
}

// Skips lookalike characters so the code survives being read over the phone.
const CONFIRMATION_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CONFIRMATION_LEN: usize = 6;

/// Generates a human-facing confirmation number, distinct from the record id.
pub fn generate_confirmation_number() -> String {
    let mut rng = rand::thread_rng();
    let code: String = (0..CONFIRMATION_LEN)
        .map(|_| CONFIRMATION_ALPHABET[rng.gen_range(0..CONFIRMATION_ALPHABET.len())] as char)
        .collect();
    format!("RT{code}")
}

/// Baseline valid hotel draft shared by tests across the crate.
#[cfg(test)]
pub(crate) fn sample_hotel_draft() -> BookingDraft {
    BookingDraft {
        kind: BookingKind::HotelOnly,
        hotel_id: Some("H1".into()),
        tour_id: None,
        package_id: None,
        room_type_id: Some("deluxe".into()),
        check_in: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
        adults: 2,
        children: 0,
        rooms: 1,
        currency: "USD".into(),
        total_price: 640.0,
        add_ons: vec![],
        special_requests: None,
        personal_info: PersonalInfo {
            name: "Asha Perera".into(),
            email: "asha@example.com".into(),
            phone: "+94 77 123 4567".into(),
        },
    }
}
