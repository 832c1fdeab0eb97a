//! Guest registration on top of the stay store.

use async_trait::async_trait;
use frontdesk_sync_core::event::{DepartureRecord, GuestPayload};
use frontdesk_sync_core::model::{LocalStay, StayDraft, StayStatus};
use frontdesk_sync_core::service::{
    ErrorCode, GuestService, Registration, ReservationDetails, ServiceError, ServiceResult,
};
use frontdesk_sync_core::store::{StayStore, StoreError};
use std::sync::Arc;

/// [`GuestService`] that registers guests and stays through the upsert primitive.
///
/// Re-registering a known reservation refreshes the guest already linked to its stay
/// instead of creating a new guest, so repeated deliveries never fan out into
/// duplicate guest rows.
#[derive(Clone)]
pub struct StayService {
    stays: Arc<dyn StayStore>,
}

impl StayService {
    /// Create a service over `stays`.
    #[must_use]
    pub fn new(stays: Arc<dyn StayStore>) -> Self {
        Self { stays }
    }
}

#[async_trait]
impl GuestService for StayService {
    async fn register_guest_from_reservation(
        &self,
        guest: &GuestPayload,
        reservation: &ReservationDetails,
    ) -> ServiceResult<Registration> {
        if reservation.reservation_id.trim().is_empty() {
            return Err(ServiceError::new(
                ErrorCode::ValidationFailed,
                "reservation_id is required",
            ));
        }
        if guest.name.trim().is_empty() {
            return Err(ServiceError::new(
                ErrorCode::ValidationFailed,
                "guest name is required",
            ));
        }

        let profile = guest.profile();
        let guest_id = match self
            .stays
            .find_active_stay(&reservation.reservation_id)
            .await?
        {
            Some(stay) => {
                match self.stays.update_guest(stay.guest_id, &profile).await {
                    Ok(()) => {}
                    // The new email belongs to another guest; keep the stay's guest as is.
                    Err(StoreError::Conflict(reason)) => tracing::warn!(
                        reservation_id = %reservation.reservation_id,
                        guest_id = stay.guest_id,
                        reason = %reason,
                        "Guest profile not refreshed"
                    ),
                    Err(e) => return Err(e.into()),
                }
                stay.guest_id
            }
            None => self.stays.upsert_guest(&profile).await?.id,
        };

        let draft = StayDraft {
            reservation_id: reservation.reservation_id.clone(),
            guest_id,
            room_number: reservation.room_number.clone(),
            planned_check_in: reservation.check_in,
            planned_check_out: reservation.check_out,
            total_amount: reservation.total_amount,
        };
        let outcome = self.stays.upsert_stay_for_reservation(&draft).await?;

        Ok(Registration {
            guest_id,
            stay_id: outcome.stay.id,
            action: outcome.action,
        })
    }

    async fn update_guest_departure(
        &self,
        reservation_id: &str,
        departure: &DepartureRecord,
    ) -> ServiceResult<LocalStay> {
        let stay = self
            .stays
            .find_active_stay(reservation_id)
            .await?
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::NotFound,
                    format!("no active stay for reservation {reservation_id}"),
                )
            })?;

        match stay.status {
            StayStatus::CheckedOut => Ok(stay),
            StayStatus::Cancelled => Err(ServiceError::new(
                ErrorCode::InvalidTransition,
                format!("reservation {reservation_id} is cancelled"),
            )),
            StayStatus::Confirmed | StayStatus::CheckedIn => Ok(self
                .stays
                .set_stay_status(stay.id, StayStatus::CheckedOut, departure.final_amount)
                .await?),
        }
    }
}
