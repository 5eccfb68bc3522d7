use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AppointmentStore, SaveOutcome, SlotGuard, StoreError};
use crate::models::{
    Appointment, AppointmentDetail, AppointmentFilter, AppointmentStatus, PatientBrief,
    ProviderBrief,
};

/// Process-local store with the same slot semantics as Postgres.
#[derive(Default)]
pub struct MemoryAppointmentStore {
    rows: Mutex<HashMap<Uuid, Appointment>>,
    patients: Mutex<HashMap<Uuid, PatientBrief>>,
    providers: Mutex<HashMap<Uuid, ProviderBrief>>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patient(self, brief: PatientBrief) -> Self {
        self.patients
            .lock()
            .unwrap()
            .insert(brief.patient_id, brief);
        self
    }

    pub fn with_provider(self, brief: ProviderBrief) -> Self {
        self.providers
            .lock()
            .unwrap()
            .insert(brief.provider_id, brief);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn detail(&self, appointment: Appointment) -> AppointmentDetail {
        let patient = self
            .patients
            .lock()
            .unwrap()
            .get(&appointment.patient_id)
            .cloned();
        let provider = self
            .providers
            .lock()
            .unwrap()
            .get(&appointment.provider_id)
            .cloned();
        AppointmentDetail {
            appointment,
            patient,
            provider,
            payment: None,
        }
    }

    fn clash(rows: &HashMap<Uuid, Appointment>, candidate: &Appointment) -> Option<Uuid> {
        rows.values()
            .filter(|a| a.provider_id == candidate.provider_id)
            .filter(|a| a.appointment_id != candidate.appointment_id)
            .filter(|a| a.status.occupies_slot())
            .find(|a| a.overlaps(candidate.scheduled_at, candidate.ends_at()))
            .map(|a| a.appointment_id)
    }
}

#[async_trait]
impl AppointmentStore for MemoryAppointmentStore {
    async fn insert(&self, a: &Appointment, guard: SlotGuard) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if guard == SlotGuard::Enforce && a.status.occupies_slot() {
            if let Some(existing) = Self::clash(&rows, a) {
                return Err(StoreError::SlotTaken(existing));
            }
        }
        rows.insert(a.appointment_id, a.clone());
        Ok(())
    }

    async fn find(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows.lock().unwrap().get(&appointment_id).cloned())
    }

    async fn find_detail(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentDetail>, StoreError> {
        let found = self.rows.lock().unwrap().get(&appointment_id).cloned();
        Ok(found.map(|a| self.detail(a)))
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentDetail>, StoreError> {
        let mut matching: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.scheduled_at);
        Ok(matching.into_iter().map(|a| self.detail(a)).collect())
    }

    async fn save(
        &self,
        a: &Appointment,
        seen: &Appointment,
        guard: SlotGuard,
    ) -> Result<SaveOutcome, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(current) = rows.get(&a.appointment_id) else {
            return Ok(SaveOutcome::Missing);
        };
        if current.status != seen.status || current.updated_at != seen.updated_at {
            return Ok(SaveOutcome::Stale);
        }
        if guard == SlotGuard::Enforce && a.status.occupies_slot() {
            if let Some(existing) = Self::clash(&rows, a) {
                return Err(StoreError::SlotTaken(existing));
            }
        }
        rows.insert(a.appointment_id, a.clone());
        Ok(SaveOutcome::Saved)
    }

    async fn set_status(
        &self,
        appointment_id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&appointment_id) {
            Some(row) if row.status == from => {
                row.status = to;
                row.updated_at = Some(updated_at);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, appointment_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rows.lock().unwrap().remove(&appointment_id).is_some())
    }

    async fn booked_between(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut booked: Vec<Appointment> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.provider_id == provider_id && a.status.occupies_slot())
            .filter(|a| a.overlaps(from, to))
            .cloned()
            .collect();
        booked.sort_by_key(|a| a.scheduled_at);
        Ok(booked)
    }
}
