//! Appointment lifecycle: booking, edits and status transitions.
//!
//! Every mutation follows the same shape: load, change, save through the
//! [`AppointmentStore`], then tell the notifier and the audit trail. Neither of
//! those two can fail an operation once the save has happened.
//!
//! Writes are conditional on the row still being what was loaded. Status changes
//! only touch the status column; edits fail with [`AppointmentError::Conflict`]
//! when someone else changed the appointment first.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SubsecRound, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDetail, AppointmentFilter, AppointmentStatus, AppointmentType,
    AuditAction, NewAuditEntry,
};
use crate::services::audit::{AuditTrail, record_best_effort};
use crate::services::ledger::{BlockchainService, LedgerError};
use crate::services::notifier::{AppointmentEvent, Notifier};
use crate::store::{AppointmentStore, SaveOutcome, SlotGuard, StoreError};

const ENTITY: &str = "Appointment";
const MAX_DURATION_MINUTES: i32 = 24 * 60;
const TRANSITION_ATTEMPTS: usize = 3;

/// Who asked for a change, as written to the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

impl Actor {
    fn stamp(&self, entry: NewAuditEntry) -> NewAuditEntry {
        let mut entry = entry.by(self.user_id);
        entry.ip_address = self.ip_address.clone();
        entry
    }
}

/// Microsecond precision, matching what Postgres stores.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("appointment {0} not found")]
    NotFound(Uuid),
    #[error("path id {path} does not match body id {body}")]
    IdMismatch { path: Uuid, body: Uuid },
    #[error("cannot {action} an appointment that is {from}")]
    InvalidTransition {
        from: AppointmentStatus,
        action: &'static str,
    },
    #[error("provider is already booked at that time (appointment {0})")]
    SlotTaken(Uuid),
    #[error("appointment {0} was changed by another request; reload and retry")]
    Conflict(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("blockchain collaborator failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AppointmentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SlotTaken(existing) => AppointmentError::SlotTaken(existing),
            other => AppointmentError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub facility_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
}

/// Replacement values for the mutable fields. Participants never change.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointment {
    pub appointment_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Confirm,
    Cancel,
    Complete,
    NoShow,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
            Transition::NoShow => "mark as no-show",
        }
    }

    fn target(self) -> AppointmentStatus {
        match self {
            Transition::Confirm => AppointmentStatus::Confirmed,
            Transition::Cancel => AppointmentStatus::Canceled,
            Transition::Complete => AppointmentStatus::Completed,
            Transition::NoShow => AppointmentStatus::NoShow,
        }
    }

    fn allowed_from(self, from: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Transition::Confirm => from == Scheduled,
            Transition::Cancel | Transition::NoShow => matches!(from, Scheduled | Confirmed),
            Transition::Complete => from == Confirmed,
        }
    }

    fn event(self) -> AppointmentEvent {
        match self {
            Transition::Confirm => AppointmentEvent::Confirmed,
            Transition::Cancel => AppointmentEvent::Cancelled,
            Transition::Complete => AppointmentEvent::Completed,
            Transition::NoShow => AppointmentEvent::NoShow,
        }
    }
}

fn validate_duration(minutes: i32) -> Result<(), AppointmentError> {
    if !(1..=MAX_DURATION_MINUTES).contains(&minutes) {
        return Err(AppointmentError::Validation(format!(
            "duration_minutes must be between 1 and {MAX_DURATION_MINUTES}"
        )));
    }
    Ok(())
}

fn clean_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

#[derive(Clone)]
pub struct AppointmentService {
    store: Arc<dyn AppointmentStore>,
    ledger: Arc<dyn BlockchainService>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditTrail>,
    guard: SlotGuard,
}

impl AppointmentService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        ledger: Arc<dyn BlockchainService>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditTrail>,
        prevent_double_booking: bool,
    ) -> Self {
        let guard = if prevent_double_booking {
            SlotGuard::Enforce
        } else {
            SlotGuard::Skip
        };
        Self {
            store,
            ledger,
            notifier,
            audit,
            guard,
        }
    }

    pub async fn list_all(&self) -> Result<Vec<AppointmentDetail>, AppointmentError> {
        Ok(self.store.list(AppointmentFilter::All).await?)
    }

    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<AppointmentDetail>, AppointmentError> {
        Ok(self.store.list(AppointmentFilter::Patient(patient_id)).await?)
    }

    pub async fn list_for_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<AppointmentDetail>, AppointmentError> {
        Ok(self.store.list(AppointmentFilter::Provider(provider_id)).await?)
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<AppointmentDetail, AppointmentError> {
        self.store
            .find_detail(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    /// Intervals that already hold a slot on the provider's calendar for `date` (UTC).
    pub async fn booked_on(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, AppointmentError> {
        let from = date.and_time(NaiveTime::MIN).and_utc();
        let to = from
            .checked_add_signed(Duration::days(1))
            .ok_or_else(|| AppointmentError::Validation(format!("date {date} is out of range")))?;
        let booked = self.store.booked_between(provider_id, from, to).await?;
        Ok(booked
            .iter()
            .map(|a| (a.scheduled_at, a.ends_at()))
            .collect())
    }

    #[tracing::instrument(skip(self, req), fields(provider_id = %req.provider_id, patient_id = %req.patient_id))]
    pub async fn create(
        &self,
        actor: &Actor,
        req: NewAppointment,
    ) -> Result<AppointmentDetail, AppointmentError> {
        validate_duration(req.duration_minutes)?;

        let mut appointment = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: req.patient_id,
            provider_id: req.provider_id,
            facility_id: req.facility_id,
            scheduled_at: req.scheduled_at,
            duration_minutes: req.duration_minutes,
            status: AppointmentStatus::Scheduled,
            appointment_type: req.appointment_type,
            notes: clean_notes(req.notes),
            blockchain_tx_hash: None,
            created_at: now(),
            updated_at: None,
        };

        let handle = self
            .ledger
            .create_appointment_contract(&appointment)
            .await?;
        if handle.trim().is_empty() {
            return Err(LedgerError::EmptyHandle.into());
        }
        appointment.blockchain_tx_hash = Some(handle);

        if let Err(e) = self.store.insert(&appointment, self.guard).await {
            warn!(
                appointment_id = %appointment.appointment_id,
                handle = ?appointment.blockchain_tx_hash,
                "booking not persisted; ledger handle is orphaned"
            );
            return Err(e.into());
        }

        info!(appointment_id = %appointment.appointment_id, "appointment scheduled");
        self.announce(AppointmentEvent::Created, &appointment).await;
        record_best_effort(
            &*self.audit,
            actor.stamp(
                NewAuditEntry::new(ENTITY, appointment.appointment_id, AuditAction::Create)
                    .after(&appointment),
            ),
        )
        .await;

        // the booking exists from here on; a failed read must not report otherwise
        match self.store.find_detail(appointment.appointment_id).await {
            Ok(Some(detail)) => Ok(detail),
            Ok(None) => Ok(AppointmentDetail::bare(appointment)),
            Err(e) => {
                warn!(appointment_id = %appointment.appointment_id, "detail reload failed: {e}");
                Ok(AppointmentDetail::bare(appointment))
            }
        }
    }

    #[tracing::instrument(skip(self, req))]
    pub async fn update(
        &self,
        actor: &Actor,
        path_id: Uuid,
        req: UpdateAppointment,
    ) -> Result<Appointment, AppointmentError> {
        if path_id != req.appointment_id {
            return Err(AppointmentError::IdMismatch {
                path: path_id,
                body: req.appointment_id,
            });
        }
        validate_duration(req.duration_minutes)?;

        let before = self.load(path_id).await?;
        let mut after = before.clone();
        after.scheduled_at = req.scheduled_at;
        after.duration_minutes = req.duration_minutes;
        after.appointment_type = req.appointment_type;
        after.notes = clean_notes(req.notes);
        after.updated_at = Some(now());

        self.persist(&after, &before).await?;
        record_best_effort(
            &*self.audit,
            actor.stamp(
                NewAuditEntry::new(ENTITY, path_id, AuditAction::Update)
                    .before(&before)
                    .after(&after),
            ),
        )
        .await;
        Ok(after)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, actor: &Actor, appointment_id: Uuid) -> Result<(), AppointmentError> {
        let before = self.load(appointment_id).await?;
        if !self.store.delete(appointment_id).await? {
            return Err(AppointmentError::NotFound(appointment_id));
        }

        info!(%appointment_id, "appointment deleted");
        record_best_effort(
            &*self.audit,
            actor.stamp(
                NewAuditEntry::new(ENTITY, appointment_id, AuditAction::Delete).before(&before),
            ),
        )
        .await;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn reschedule(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        new_time: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let before = self.load(appointment_id).await?;
        if before.status.is_terminal() {
            return Err(AppointmentError::InvalidTransition {
                from: before.status,
                action: "reschedule",
            });
        }

        let mut after = before.clone();
        after.scheduled_at = new_time;
        after.updated_at = Some(now());

        self.persist(&after, &before).await?;
        info!(%appointment_id, %new_time, "appointment rescheduled");
        self.announce(AppointmentEvent::Rescheduled, &after).await;
        record_best_effort(
            &*self.audit,
            actor.stamp(
                NewAuditEntry::new(ENTITY, appointment_id, AuditAction::Update)
                    .before(&before)
                    .after(&after),
            ),
        )
        .await;
        Ok(after)
    }

    pub async fn confirm(&self, actor: &Actor, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(actor, id, Transition::Confirm).await
    }

    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(actor, id, Transition::Cancel).await
    }

    pub async fn complete(&self, actor: &Actor, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(actor, id, Transition::Complete).await
    }

    pub async fn mark_no_show(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(actor, id, Transition::NoShow).await
    }

    /// Status-only change, applied with a compare-and-set on the current status.
    /// Losing a race re-reads the row and re-judges the step against it.
    #[tracing::instrument(skip(self))]
    async fn transition(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        step: Transition,
    ) -> Result<Appointment, AppointmentError> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let before = self.load(appointment_id).await?;

            // re-confirming is a no-op
            if step == Transition::Confirm && before.status == AppointmentStatus::Confirmed {
                return Ok(before);
            }
            if !step.allowed_from(before.status) {
                warn!(%appointment_id, from = %before.status, action = step.verb(), "rejected status change");
                return Err(AppointmentError::InvalidTransition {
                    from: before.status,
                    action: step.verb(),
                });
            }

            let Some(after) = self
                .store
                .set_status(appointment_id, before.status, step.target(), now())
                .await?
            else {
                warn!(%appointment_id, action = step.verb(), "status moved underneath, re-reading");
                continue;
            };

            info!(%appointment_id, from = %before.status, to = %after.status, "appointment status changed");
            self.announce(step.event(), &after).await;
            record_best_effort(
                &*self.audit,
                actor.stamp(
                    NewAuditEntry::new(ENTITY, appointment_id, AuditAction::Update)
                        .before(&before)
                        .after(&after),
                ),
            )
            .await;
            return Ok(after);
        }
        Err(AppointmentError::Conflict(appointment_id))
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .find(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    async fn persist(&self, appointment: &Appointment, seen: &Appointment) -> Result<(), AppointmentError> {
        let id = appointment.appointment_id;
        match self.store.save(appointment, seen, self.guard).await? {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Missing => Err(AppointmentError::NotFound(id)),
            SaveOutcome::Stale => {
                warn!(appointment_id = %id, "write lost to a concurrent change");
                Err(AppointmentError::Conflict(id))
            }
        }
    }

    async fn announce(&self, event: AppointmentEvent, appointment: &Appointment) {
        if let Err(e) = self.notifier.notify(event, appointment).await {
            warn!(
                appointment_id = %appointment.appointment_id,
                kind = event.kind(),
                "notification dropped: {e}"
            );
        }
    }
}
