use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{AppointmentStatus, AppointmentType, PaymentMethod, PaymentStatus};

/// A scheduled encounter between one patient and one provider at one facility.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub facility_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    #[sqlx(try_from = "String")]
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
    pub blockchain_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const APPOINTMENT_COLUMNS: &str = "appointment_id, patient_id, provider_id, facility_id, \
     scheduled_at, duration_minutes, status, appointment_type, notes, blockchain_tx_hash, \
     created_at, updated_at";

impl Appointment {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Half-open interval overlap: back-to-back bookings do not clash.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_at < end && start < self.ends_at()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientBrief {
    pub patient_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProviderBrief {
    pub provider_id: Uuid,
    pub name: String,
    pub specialization: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PaymentBrief {
    pub payment_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
}

/// An appointment with its patient, provider and payment loaded alongside.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<PatientBrief>,
    pub provider: Option<ProviderBrief>,
    pub payment: Option<PaymentBrief>,
}

impl AppointmentDetail {
    /// Without the joined participants, for when they could not be loaded.
    pub fn bare(appointment: Appointment) -> Self {
        Self {
            appointment,
            patient: None,
            provider: None,
            payment: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentFilter {
    All,
    Patient(Uuid),
    Provider(Uuid),
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        match self {
            AppointmentFilter::All => true,
            AppointmentFilter::Patient(id) => appointment.patient_id == *id,
            AppointmentFilter::Provider(id) => appointment.provider_id == *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, h, m, 0).unwrap()
    }

    fn appointment(start: DateTime<Utc>, minutes: i32) -> Appointment {
        Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            scheduled_at: start,
            duration_minutes: minutes,
            status: AppointmentStatus::Scheduled,
            appointment_type: AppointmentType::Consultation,
            notes: None,
            blockchain_tx_hash: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn overlap_is_half_open() {
        let a = appointment(at(9, 0), 30);
        assert_eq!(a.ends_at(), at(9, 30));
        assert!(a.overlaps(at(9, 15), at(9, 45)));
        assert!(a.overlaps(at(8, 0), at(10, 0)));
        assert!(!a.overlaps(at(9, 30), at(10, 0)));
        assert!(!a.overlaps(at(8, 30), at(9, 0)));
    }

    #[test]
    fn filter_matches_foreign_keys() {
        let a = appointment(at(9, 0), 30);
        assert!(AppointmentFilter::All.matches(&a));
        assert!(AppointmentFilter::Patient(a.patient_id).matches(&a));
        assert!(!AppointmentFilter::Patient(a.provider_id).matches(&a));
        assert!(AppointmentFilter::Provider(a.provider_id).matches(&a));
    }

    #[test]
    fn detail_flattens_appointment_fields() {
        let detail = AppointmentDetail::bare(appointment(at(9, 0), 30));
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "Scheduled");
        assert_eq!(json["duration_minutes"], 30);
        assert!(json["payment"].is_null());
    }
}
