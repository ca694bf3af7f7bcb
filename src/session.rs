// Process-wide booking session state. Replaces ambient context state with an
// explicit container: identity changes drive list refreshes, and signing out
// resets everything so one user's bookings never leak into the next session.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::booking::{Booking, BookingDraft, PaymentStatus};
use crate::manager::{AvailabilityAnswer, AvailabilityRequest, BookingError, BookingManager};

#[derive(Default)]
struct SessionState {
    user: Option<String>,
    current_booking: Option<Booking>,
    user_bookings: Vec<Booking>,
}

/// Holds the authenticated user's current booking and booking list, kept
/// consistent with the store through eager re-fetch after every successful
/// mutation. No optimistic local patching.
pub struct BookingSession {
    manager: Arc<BookingManager>,
    state: RwLock<SessionState>,
}

impl BookingSession {
    pub fn new(manager: Arc<BookingManager>) -> Self {
        Self {
            manager,
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn user(&self) -> Option<String> {
        self.state.read().user.clone()
    }

    pub fn current_booking(&self) -> Option<Booking> {
        self.state.read().current_booking.clone()
    }

    pub fn user_bookings(&self) -> Vec<Booking> {
        self.state.read().user_bookings.clone()
    }

    /// Marks a booking as the one the UI is focused on ("view this
    /// confirmation" flows). Purely local.
    pub fn set_current_booking(&self, booking: Option<Booking>) {
        self.state.write().current_booking = booking;
    }

    /// Switches the session to a new identity and loads that user's bookings.
    pub async fn sign_in(&self, user_id: &str) -> Result<(), BookingError> {
        {
            let mut state = self.state.write();
            state.user = Some(user_id.to_string());
            state.current_booking = None;
            state.user_bookings.clear();
        }
        debug!(user_id, "session signed in");
        self.refresh().await
    }

    /// Clears all session state. Called on logout so stale bookings cannot
    /// survive an account switch within the same process.
    pub fn sign_out(&self) {
        *self.state.write() = SessionState::default();
        debug!("session reset");
    }

    /// Re-fetches the booking list for the signed-in user. A session without
    /// a user has nothing to refresh.
    pub async fn refresh(&self) -> Result<(), BookingError> {
        let Some(user) = self.user() else {
            return Ok(());
        };
        let bookings = self.manager.get_user_bookings(&user).await?;
        self.state.write().user_bookings = bookings;
        Ok(())
    }

    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, BookingError> {
        let user = self.user();
        let booking = self.manager.create_booking(draft, user.as_deref()).await?;
        self.state.write().current_booking = Some(booking.clone());
        self.refresh().await?;
        Ok(booking)
    }

    pub async fn cancel_booking(&self, id: &str, reason: Option<&str>) -> Result<(), BookingError> {
        self.manager.cancel_booking(id, reason).await?;
        self.refresh().await
    }

    pub async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
    ) -> Result<(), BookingError> {
        self.manager.update_payment_status(id, status).await?;
        self.refresh().await
    }

    pub async fn check_availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityAnswer, BookingError> {
        self.manager.check_availability(request).await
    }
}
