//! The dispatch table shared by every inbound path.
//!
//! The listener, the relay and the reconciler all hand decoded [`InboundEvent`]s to one
//! [`Dispatcher`], so a reservation is treated the same whether it was pushed, relayed
//! or pulled.
//!
//! | Event | Effect |
//! |---|---|
//! | arrival | register guest and upsert the stay |
//! | departure | check the stay out, schedule a checkout clean |
//! | cancellation | cancel the stay; unknown reservation is skipped |
//! | modification | patch dates, room, amount or guest |
//! | extension | move check-out later (never earlier) |
//! | system alert | log and count |

use chrono::{DateTime, Utc};
use frontdesk_sync_core::environment::Clock;
use frontdesk_sync_core::event::{
    AlertLevel, ArrivalRecord, ChangeKind, DepartureRecord, InboundEvent, ReservationChange,
    RoomStatusRecord, SystemAlert,
};
use frontdesk_sync_core::model::{
    LocalStay, RoomStatus, StayDraft, StayStatus, TaskPriority, TaskType, UpsertAction,
};
use frontdesk_sync_core::service::{
    ErrorCode, GuestService, HousekeepingService, ReservationDetails, ServiceError, ServiceResult,
};
use frontdesk_sync_core::store::StayStore;
use serde::Serialize;
use std::sync::Arc;

/// What handling one event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HandlerOutcome {
    /// Effect on local state
    pub action: UpsertAction,
    /// Stay touched, if any
    pub stay_id: Option<i64>,
}

impl HandlerOutcome {
    const fn skipped() -> Self {
        Self {
            action: UpsertAction::Skipped,
            stay_id: None,
        }
    }

    const fn on_stay(action: UpsertAction, stay_id: i64) -> Self {
        Self {
            action,
            stay_id: Some(stay_id),
        }
    }

    /// Whether local state changed.
    #[must_use]
    pub const fn changed(&self) -> bool {
        !matches!(self.action, UpsertAction::Skipped)
    }
}

/// Routes inbound events to the collaborator services.
pub struct Dispatcher {
    guests: Arc<dyn GuestService>,
    stays: Arc<dyn StayStore>,
    housekeeping: Arc<dyn HousekeepingService>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        guests: Arc<dyn GuestService>,
        stays: Arc<dyn StayStore>,
        housekeeping: Arc<dyn HousekeepingService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            guests,
            stays,
            housekeeping,
            clock,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] for business-rule failures (unknown stay on departure,
    /// invalid extension, ...) and storage failures.
    pub async fn dispatch(&self, event: &InboundEvent) -> ServiceResult<HandlerOutcome> {
        let outcome = match event {
            InboundEvent::GuestArrival(arrival) => self.on_arrival(arrival).await,
            InboundEvent::GuestDeparture(departure) => self.on_departure(departure).await,
            InboundEvent::ReservationUpdate { kind, change } => {
                self.on_reservation_update(*kind, change).await
            }
            InboundEvent::SystemAlert(alert) => Ok(Self::on_alert(alert)),
        };

        match &outcome {
            Ok(handled) => tracing::debug!(
                kind = event.kind_name(),
                reservation_id = event.reservation_id(),
                action = handled.action.as_str(),
                "Event applied"
            ),
            Err(e) => tracing::warn!(
                kind = event.kind_name(),
                reservation_id = event.reservation_id(),
                error_code = e.code.as_str(),
                error = %e.message,
                "Event rejected"
            ),
        }
        outcome
    }

    /// Record one room-status snapshot entry; a room turning dirty gets a cleaning task.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if the status cannot be stored.
    pub async fn apply_room_status(&self, record: &RoomStatusRecord) -> ServiceResult<HandlerOutcome> {
        let previous = self
            .stays
            .set_room_status(&record.room_number, record.status)
            .await?;

        if previous == Some(record.status) {
            return Ok(HandlerOutcome::skipped());
        }

        if record.status == RoomStatus::Dirty {
            self.schedule_cleaning(&record.room_number, TaskType::StandardClean, TaskPriority::Normal)
                .await;
        }

        Ok(HandlerOutcome {
            action: if previous.is_some() {
                UpsertAction::Updated
            } else {
                UpsertAction::Created
            },
            stay_id: None,
        })
    }

    async fn on_arrival(&self, arrival: &ArrivalRecord) -> ServiceResult<HandlerOutcome> {
        let registration = self
            .guests
            .register_guest_from_reservation(&arrival.guest, &arrival.reservation_details())
            .await?;
        Ok(HandlerOutcome::on_stay(
            registration.action,
            registration.stay_id,
        ))
    }

    async fn on_departure(&self, departure: &DepartureRecord) -> ServiceResult<HandlerOutcome> {
        let current = self.stays.find_active_stay(&departure.reservation_id).await?;
        if let Some(stay) = &current {
            if stay.status == StayStatus::CheckedOut {
                return Ok(HandlerOutcome::on_stay(UpsertAction::Skipped, stay.id));
            }
        }

        let stay = self
            .guests
            .update_guest_departure(&departure.reservation_id, departure)
            .await?;

        let room = departure
            .room_number
            .as_deref()
            .or(stay.room_number.as_deref());
        if let Some(room) = room {
            self.schedule_cleaning(room, TaskType::CheckoutClean, TaskPriority::High)
                .await;
        }

        Ok(HandlerOutcome::on_stay(UpsertAction::Updated, stay.id))
    }

    async fn on_reservation_update(
        &self,
        kind: ChangeKind,
        change: &ReservationChange,
    ) -> ServiceResult<HandlerOutcome> {
        let Some(stay) = self.stays.find_active_stay(&change.reservation_id).await? else {
            return self.on_unknown_reservation(kind, change).await;
        };

        match kind {
            ChangeKind::Cancelled => {
                if stay.status == StayStatus::CheckedOut {
                    return Err(ServiceError::new(
                        ErrorCode::InvalidTransition,
                        format!(
                            "reservation {} is already checked out",
                            change.reservation_id
                        ),
                    ));
                }
                let cancelled = self
                    .stays
                    .set_stay_status(stay.id, StayStatus::Cancelled, None)
                    .await?;
                Ok(HandlerOutcome::on_stay(UpsertAction::Updated, cancelled.id))
            }
            ChangeKind::Modified => self.patch_stay(&stay, change).await,
            ChangeKind::Extended => {
                let new_check_out = change.check_out.ok_or_else(|| {
                    ServiceError::new(
                        ErrorCode::ValidationFailed,
                        "extension without a check_out date",
                    )
                })?;
                let current = stay.planned_check_out.unwrap_or(stay.planned_check_in);
                if new_check_out <= current {
                    return Err(ServiceError::new(
                        ErrorCode::InvalidExtension,
                        format!(
                            "new check-out {new_check_out} is not after current check-out {current}"
                        ),
                    ));
                }
                self.patch_stay(&stay, change).await
            }
        }
    }

    /// A cancellation or edit for a reservation with no local stay. Cancelling is a
    /// no-op; an edit that carries a full booking is registered like an arrival.
    async fn on_unknown_reservation(
        &self,
        kind: ChangeKind,
        change: &ReservationChange,
    ) -> ServiceResult<HandlerOutcome> {
        match (kind, &change.guest, change.check_in) {
            (ChangeKind::Modified | ChangeKind::Extended, Some(guest), Some(check_in)) => {
                let details = ReservationDetails {
                    reservation_id: change.reservation_id.clone(),
                    room_number: change.room_number.clone(),
                    check_in,
                    check_out: change.check_out,
                    total_amount: change.total_amount.unwrap_or(0.0),
                };
                let registration = self
                    .guests
                    .register_guest_from_reservation(guest, &details)
                    .await?;
                Ok(HandlerOutcome::on_stay(
                    registration.action,
                    registration.stay_id,
                ))
            }
            _ => Ok(HandlerOutcome::skipped()),
        }
    }

    async fn patch_stay(
        &self,
        stay: &LocalStay,
        change: &ReservationChange,
    ) -> ServiceResult<HandlerOutcome> {
        if stay.status.is_final() {
            return Err(ServiceError::new(
                ErrorCode::InvalidTransition,
                format!("stay {} can no longer be changed", stay.id),
            ));
        }

        if let Some(guest) = &change.guest {
            self.stays.update_guest(stay.guest_id, &guest.profile()).await?;
        }

        let mut draft = StayDraft::from_stay(&change.reservation_id, stay);
        if let Some(check_in) = change.check_in {
            draft.planned_check_in = check_in;
        }
        if change.check_out.is_some() {
            draft.planned_check_out = change.check_out;
        }
        if change.room_number.is_some() {
            draft.room_number.clone_from(&change.room_number);
        }
        if let Some(total) = change.total_amount {
            draft.total_amount = total;
        }

        let outcome = self.stays.upsert_stay_for_reservation(&draft).await?;
        Ok(HandlerOutcome::on_stay(outcome.action, outcome.stay.id))
    }

    fn on_alert(alert: &SystemAlert) -> HandlerOutcome {
        let code = alert.code.as_deref().unwrap_or("none");
        match alert.level {
            AlertLevel::Info => tracing::info!(code, message = %alert.message, "System alert"),
            AlertLevel::Warning => tracing::warn!(code, message = %alert.message, "System alert"),
            AlertLevel::Critical => tracing::error!(code, message = %alert.message, "System alert"),
        }
        metrics::counter!("frontdesk_sync.alerts.received").increment(1);
        HandlerOutcome::skipped()
    }

    /// Housekeeping failures never fail the event that caused them.
    async fn schedule_cleaning(&self, room: &str, task_type: TaskType, priority: TaskPriority) {
        let scheduled_for: DateTime<Utc> = self.clock.now();
        if let Err(e) = self
            .housekeeping
            .create_cleaning_task(room, task_type, scheduled_for, priority)
            .await
        {
            tracing::warn!(
                room_number = room,
                task_type = task_type.as_str(),
                error = %e,
                "Failed to schedule cleaning task"
            );
        }
    }
}
