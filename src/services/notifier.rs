use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentEvent {
    Created,
    Confirmed,
    Cancelled,
    Rescheduled,
    Completed,
    NoShow,
}

impl AppointmentEvent {
    pub fn kind(self) -> &'static str {
        match self {
            AppointmentEvent::Created => "appointment.created",
            AppointmentEvent::Confirmed => "appointment.confirmed",
            AppointmentEvent::Cancelled => "appointment.cancelled",
            AppointmentEvent::Rescheduled => "appointment.rescheduled",
            AppointmentEvent::Completed => "appointment.completed",
            AppointmentEvent::NoShow => "appointment.no_show",
        }
    }

    pub fn message(self, appointment: &Appointment) -> String {
        let when = appointment.scheduled_at.format("%Y-%m-%d %H:%M UTC");
        match self {
            AppointmentEvent::Created => format!("Appointment booked for {when}"),
            AppointmentEvent::Confirmed => format!("Appointment on {when} is confirmed"),
            AppointmentEvent::Cancelled => format!("Appointment on {when} was cancelled"),
            AppointmentEvent::Rescheduled => format!("Appointment moved to {when}"),
            AppointmentEvent::Completed => format!("Appointment on {when} is completed"),
            AppointmentEvent::NoShow => format!("Appointment on {when} was marked as missed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification could not be stored: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event: AppointmentEvent,
        appointment: &Appointment,
    ) -> Result<(), NotifyError>;
}

/// Writes one inbox row for the patient's account and one for the provider's.
#[derive(Clone)]
pub struct PgNotifier {
    db: PgPool,
}

impl PgNotifier {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(
        &self,
        event: AppointmentEvent,
        appointment: &Appointment,
    ) -> Result<(), NotifyError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO notification (notification_id, user_id, appointment_id, kind, message)
            SELECT gen_random_uuid(), recipients.user_id, $1, $2, $3
            FROM (
              SELECT user_id FROM patient WHERE patient_id = $4
              UNION
              SELECT user_id FROM provider WHERE provider_id = $5
            ) AS recipients
            "#,
        )
        .bind(appointment.appointment_id)
        .bind(event.kind())
        .bind(event.message(appointment))
        .bind(appointment.patient_id)
        .bind(appointment.provider_id)
        .execute(&self.db)
        .await?;

        tracing::info!(
            appointment_id = %appointment.appointment_id,
            kind = event.kind(),
            recipients = inserted.rows_affected(),
            "notification queued"
        );
        Ok(())
    }
}
