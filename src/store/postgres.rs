use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AppointmentStore, SaveOutcome, SlotGuard, StoreError};
use crate::models::{
    APPOINTMENT_COLUMNS, Appointment, AppointmentDetail, AppointmentFilter, AppointmentStatus,
    PatientBrief, PaymentBrief, ProviderBrief,
};

#[derive(Clone)]
pub struct PgAppointmentStore {
    db: PgPool,
}

impl PgAppointmentStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const DETAIL_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      a.provider_id,
      a.facility_id,
      a.scheduled_at,
      a.duration_minutes,
      a.status,
      a.appointment_type,
      a.notes,
      a.blockchain_tx_hash,
      a.created_at,
      a.updated_at,

      pu.name  AS patient_name,
      pu.email AS patient_email,
      pu.phone AS patient_phone,

      ru.name           AS provider_name,
      pr.specialization AS provider_specialization,

      pay.payment_id,
      pay.amount_cents   AS payment_amount_cents,
      pay.currency       AS payment_currency,
      pay.status         AS payment_status,
      pay.payment_method AS payment_method,
      pay.transaction_id AS payment_transaction_id

    FROM appointment a
    LEFT JOIN patient p    ON p.patient_id = a.patient_id
    LEFT JOIN app_user pu  ON pu.user_id = p.user_id
    LEFT JOIN provider pr  ON pr.provider_id = a.provider_id
    LEFT JOIN app_user ru  ON ru.user_id = pr.user_id
    LEFT JOIN payment pay  ON pay.appointment_id = a.appointment_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct DetailRow {
    #[sqlx(flatten)]
    appointment: Appointment,
    patient_name: Option<String>,
    patient_email: Option<String>,
    patient_phone: Option<String>,
    provider_name: Option<String>,
    provider_specialization: Option<String>,
    payment_id: Option<Uuid>,
    payment_amount_cents: Option<i64>,
    payment_currency: Option<String>,
    payment_status: Option<String>,
    payment_method: Option<String>,
    payment_transaction_id: Option<String>,
}

impl TryFrom<DetailRow> for AppointmentDetail {
    type Error = StoreError;

    fn try_from(r: DetailRow) -> Result<Self, Self::Error> {
        let patient = match (r.patient_name, r.patient_email) {
            (Some(name), Some(email)) => Some(PatientBrief {
                patient_id: r.appointment.patient_id,
                name,
                email,
                phone: r.patient_phone,
            }),
            _ => None,
        };

        let provider = match (r.provider_name, r.provider_specialization) {
            (Some(name), Some(specialization)) => Some(ProviderBrief {
                provider_id: r.appointment.provider_id,
                name,
                specialization,
            }),
            _ => None,
        };

        let payment = match (
            r.payment_id,
            r.payment_amount_cents,
            r.payment_currency,
            r.payment_status,
            r.payment_method,
        ) {
            (Some(payment_id), Some(amount_cents), Some(currency), Some(status), Some(method)) => {
                Some(PaymentBrief {
                    payment_id,
                    amount_cents,
                    currency,
                    status: status.parse()?,
                    payment_method: method.parse()?,
                    transaction_id: r.payment_transaction_id,
                })
            }
            _ => None,
        };

        Ok(AppointmentDetail {
            appointment: r.appointment,
            patient,
            provider,
            payment,
        })
    }
}

/// Serializes bookings per provider for the rest of the transaction, then
/// rejects the write if another slot-holding appointment overlaps.
async fn ensure_slot_free(
    tx: &mut Transaction<'_, Postgres>,
    appointment: &Appointment,
) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(appointment.provider_id.to_string())
        .execute(&mut **tx)
        .await?;

    let clash: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT appointment_id
        FROM appointment
        WHERE provider_id = $1
          AND appointment_id <> $2
          AND status IN ('Scheduled', 'Confirmed')
          AND scheduled_at < $4
          AND scheduled_at + make_interval(mins => duration_minutes) > $3
        ORDER BY scheduled_at ASC
        LIMIT 1
        "#,
    )
    .bind(appointment.provider_id)
    .bind(appointment.appointment_id)
    .bind(appointment.scheduled_at)
    .bind(appointment.ends_at())
    .fetch_optional(&mut **tx)
    .await?;

    match clash {
        Some(existing) => Err(StoreError::SlotTaken(existing)),
        None => Ok(()),
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn insert(&self, a: &Appointment, guard: SlotGuard) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        if guard == SlotGuard::Enforce && a.status.occupies_slot() {
            ensure_slot_free(&mut tx, a).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO appointment (
              appointment_id,
              patient_id,
              provider_id,
              facility_id,
              scheduled_at,
              duration_minutes,
              status,
              appointment_type,
              notes,
              blockchain_tx_hash,
              created_at,
              updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(a.appointment_id)
        .bind(a.patient_id)
        .bind(a.provider_id)
        .bind(a.facility_id)
        .bind(a.scheduled_at)
        .bind(a.duration_minutes)
        .bind(a.status.as_str())
        .bind(a.appointment_type.as_str())
        .bind(a.notes.as_deref())
        .bind(a.blockchain_tx_hash.as_deref())
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1");
        let row = sqlx::query_as::<_, Appointment>(&sql)
            .bind(appointment_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn find_detail(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<AppointmentDetail>, StoreError> {
        let sql = format!("{DETAIL_SELECT} WHERE a.appointment_id = $1");
        sqlx::query_as::<_, DetailRow>(&sql)
            .bind(appointment_id)
            .fetch_optional(&self.db)
            .await?
            .map(AppointmentDetail::try_from)
            .transpose()
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentDetail>, StoreError> {
        let rows = match filter {
            AppointmentFilter::All => {
                let sql = format!("{DETAIL_SELECT} ORDER BY a.scheduled_at ASC");
                sqlx::query_as::<_, DetailRow>(&sql).fetch_all(&self.db).await?
            }
            AppointmentFilter::Patient(patient_id) => {
                let sql =
                    format!("{DETAIL_SELECT} WHERE a.patient_id = $1 ORDER BY a.scheduled_at ASC");
                sqlx::query_as::<_, DetailRow>(&sql)
                    .bind(patient_id)
                    .fetch_all(&self.db)
                    .await?
            }
            AppointmentFilter::Provider(provider_id) => {
                let sql =
                    format!("{DETAIL_SELECT} WHERE a.provider_id = $1 ORDER BY a.scheduled_at ASC");
                sqlx::query_as::<_, DetailRow>(&sql)
                    .bind(provider_id)
                    .fetch_all(&self.db)
                    .await?
            }
        };

        rows.into_iter().map(AppointmentDetail::try_from).collect()
    }

    async fn save(
        &self,
        a: &Appointment,
        seen: &Appointment,
        guard: SlotGuard,
    ) -> Result<SaveOutcome, StoreError> {
        let mut tx = self.db.begin().await?;

        // row lock first, so nothing moves between the comparison and the write
        let current: Option<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, updated_at FROM appointment WHERE appointment_id = $1 FOR UPDATE",
        )
        .bind(a.appointment_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, updated_at)) = current else {
            return Ok(SaveOutcome::Missing);
        };
        if AppointmentStatus::try_from(status)? != seen.status || updated_at != seen.updated_at {
            return Ok(SaveOutcome::Stale);
        }

        if guard == SlotGuard::Enforce && a.status.occupies_slot() {
            ensure_slot_free(&mut tx, a).await?;
        }

        sqlx::query(
            r#"
            UPDATE appointment
            SET
              scheduled_at = $2,
              duration_minutes = $3,
              status = $4,
              appointment_type = $5,
              notes = $6,
              blockchain_tx_hash = $7,
              updated_at = $8
            WHERE appointment_id = $1
            "#,
        )
        .bind(a.appointment_id)
        .bind(a.scheduled_at)
        .bind(a.duration_minutes)
        .bind(a.status.as_str())
        .bind(a.appointment_type.as_str())
        .bind(a.notes.as_deref())
        .bind(a.blockchain_tx_hash.as_deref())
        .bind(a.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SaveOutcome::Saved)
    }

    async fn set_status(
        &self,
        appointment_id: Uuid,
        from: AppointmentStatus,
        to: AppointmentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let sql = format!(
            r#"
            UPDATE appointment
            SET status = $3, updated_at = $4
            WHERE appointment_id = $1 AND status = $2
            RETURNING {APPOINTMENT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, Appointment>(&sql)
            .bind(appointment_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(updated_at)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn delete(&self, appointment_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM appointment WHERE appointment_id = $1")
            .bind(appointment_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn booked_between(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointment
            WHERE provider_id = $1
              AND status IN ('Scheduled', 'Confirmed')
              AND scheduled_at < $3
              AND scheduled_at + make_interval(mins => duration_minutes) > $2
            ORDER BY scheduled_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, Appointment>(&sql)
            .bind(provider_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}
