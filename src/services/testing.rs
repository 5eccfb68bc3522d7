//! Recording collaborators and a ready-wired service for unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::middleware::auth_context::AuthContext;
use crate::models::{
    AppState, Appointment, NewAuditEntry, PatientBrief, PermissionType, ProviderBrief, UserType,
};
use crate::services::appointment::AppointmentService;
use crate::services::audit::AuditTrail;
use crate::services::ledger::{BlockchainService, DigestLedger, LedgerError};
use crate::services::notifier::{AppointmentEvent, Notifier, NotifyError};
use crate::store::memory::MemoryAppointmentStore;

/// A fixed test day at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2030, 3, 4)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .map(|dt| dt.and_utc())
        .expect("valid test time")
}

#[derive(Default)]
pub struct CountingLedger {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingLedger {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockchainService for CountingLedger {
    async fn create_appointment_contract(
        &self,
        appointment: &Appointment,
    ) -> Result<String, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LedgerError::EmptyHandle);
        }
        Ok(DigestLedger::handle_for(appointment))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(AppointmentEvent, Uuid)>>,
    fail_next: AtomicBool,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(AppointmentEvent, Uuid)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event: AppointmentEvent,
        appointment: &Appointment,
    ) -> Result<(), NotifyError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NotifyError::Database(sqlx::Error::PoolTimedOut));
        }
        self.sent
            .lock()
            .unwrap()
            .push((event, appointment.appointment_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<NewAuditEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<NewAuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditTrail for RecordingAudit {
    async fn record(&self, entry: NewAuditEntry) -> Result<(), sqlx::Error> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

pub struct Harness {
    pub service: AppointmentService,
    pub store: Arc<MemoryAppointmentStore>,
    pub ledger: Arc<CountingLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub facility_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(CountingLedger::default(), true)
    }

    pub fn with_failing_ledger() -> Self {
        Self::build(CountingLedger::failing(), true)
    }

    pub fn without_slot_guard() -> Self {
        Self::build(CountingLedger::default(), false)
    }

    fn build(ledger: CountingLedger, prevent_double_booking: bool) -> Self {
        let patient_id = Uuid::new_v4();
        let provider_id = Uuid::new_v4();
        let store = Arc::new(
            MemoryAppointmentStore::new()
                .with_patient(PatientBrief {
                    patient_id,
                    name: "Ada Patient".into(),
                    email: "ada@example.org".into(),
                    phone: None,
                })
                .with_provider(ProviderBrief {
                    provider_id,
                    name: "Dr. Grace Provider".into(),
                    specialization: "General Practice".into(),
                }),
        );
        let ledger = Arc::new(ledger);
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = Arc::new(RecordingAudit::default());
        let service = AppointmentService::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            audit.clone(),
            prevent_double_booking,
        );
        Self {
            service,
            store,
            ledger,
            notifier,
            audit,
            patient_id,
            provider_id,
            facility_id: Uuid::new_v4(),
        }
    }
}

impl Harness {
    /// Router state around the harness service. The pool never connects, so only
    /// handlers that stay inside the appointment service are usable.
    pub fn app_state(&self) -> AppState {
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://test@127.0.0.1:1/unused")
            .expect("lazy pool");
        AppState {
            db,
            session_ttl_hours: 24,
            refresh_ttl_hours: 720,
            appointments: self.service.clone(),
            audit: self.audit.clone(),
        }
    }
}

/// A non-patient caller holding exactly `grants`.
pub fn staff(grants: &[(&str, PermissionType)]) -> AuthContext {
    AuthContext {
        user_id: Uuid::new_v4(),
        user_type: UserType::Provider,
        session_id: Uuid::new_v4(),
        grants: grants.iter().map(|(m, k)| (*m, *k)).collect(),
        ip_address: None,
    }
}
