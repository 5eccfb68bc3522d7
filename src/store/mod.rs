//! Persistence gateway for appointments.
//!
//! The service layer talks to [`AppointmentStore`]; Postgres is the production
//! backend. Other entities are queried directly from their route modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDetail, AppointmentFilter, AppointmentStatus, UnknownVariant,
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgAppointmentStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value could not be decoded: {0}")]
    Decode(#[from] UnknownVariant),
    #[error("provider is already booked by appointment {0}")]
    SlotTaken(Uuid),
}

/// Whether a write must first prove the provider's time range is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGuard {
    Enforce,
    Skip,
}

/// What a conditional [`AppointmentStore::save`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Missing,
    /// The row changed after `seen` was read; nothing was written.
    Stale,
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: &Appointment, guard: SlotGuard) -> Result<(), StoreError>;

    async fn find(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Loads the appointment together with patient, provider and payment briefs.
    async fn find_detail(&self, appointment_id: Uuid)
    -> Result<Option<AppointmentDetail>, StoreError>;

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentDetail>, StoreError>;

    /// Writes every mutable column, provided the row still carries the status
    /// and `updated_at` of `seen`.
    async fn save(
        &self,
        appointment: &Appointment,
        seen: &Appointment,
        guard: SlotGuard,
    ) -> Result<SaveOutcome, StoreError>;

    /// Moves the row from `from` to `to` and stamps `updated_at`. `None` when the
    /// row is gone or no longer in `from`.
    async fn set_status(
        &self,
        appointment_id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn delete(&self, appointment_id: Uuid) -> Result<bool, StoreError>;

    /// Slot-holding appointments of a provider intersecting `[from, to)`.
    async fn booked_between(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;
}
