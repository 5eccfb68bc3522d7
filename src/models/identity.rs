use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Gender, SessionStatus, UserType};

/// Channel and reminder settings stored as JSON on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub appointment_reminders: bool,
    pub payment_notifications: bool,
    pub system_updates: bool,
    pub reminder_hours_before: i32,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_enabled: true,
            sms_enabled: false,
            push_enabled: false,
            appointment_reminders: true,
            payment_notifications: true,
            system_updates: false,
            reminder_hours_before: 24,
        }
    }
}

/// Shared identity record behind every patient and provider.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    #[sqlx(try_from = "String")]
    pub gender: Gender,
    pub address: Option<String>,
    pub profile_picture: Option<String>,
    pub notification_preferences: sqlx::types::Json<NotificationPreferences>,
    pub blockchain_wallet_address: Option<String>,
    #[sqlx(try_from = "String")]
    pub user_type: UserType,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "user_id, email, phone, password_hash, name, date_of_birth, gender, \
     address, profile_picture, notification_preferences, blockchain_wallet_address, user_type, \
     is_active, last_login_at, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Patient {
    pub patient_id: Uuid,
    pub user_id: Uuid,
    pub medical_history: Option<String>,
    pub emergency_contact: Option<String>,
    pub insurance_information: Option<String>,
    pub preferred_language: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
}

pub const PATIENT_COLUMNS: &str = "patient_id, user_id, medical_history, emergency_contact, \
     insurance_information, preferred_language, allergies, chronic_conditions";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Provider {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub specialization: String,
    pub qualifications: Option<String>,
    pub license_number: String,
    pub years_of_experience: i32,
    pub biography: Option<String>,
    pub consultation_fee_cents: i64,
    pub average_rating: f64,
}

pub const PROVIDER_COLUMNS: &str = "provider_id, user_id, specialization, qualifications, \
     license_number, years_of_experience, biography, consultation_fee_cents, average_rating";

/// The specialization half of an account. Exactly one per user.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "user_type", content = "profile")]
pub enum UserProfile {
    Patient(Patient),
    Provider(Provider),
}

impl UserProfile {
    pub fn user_type(&self) -> UserType {
        match self {
            UserProfile::Patient(_) => UserType::Patient,
            UserProfile::Provider(_) => UserType::Provider,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    pub user: User,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub device_info: Option<String>,
    pub browser: Option<String>,
    pub operating_system: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
}

pub const SESSION_COLUMNS: &str = "session_id, user_id, ip_address, device_info, browser, \
     operating_system, created_at, expires_at, refresh_expires_at, revoked_at, status";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Notification {
    pub notification_id: Uuid,
    pub user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub kind: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
