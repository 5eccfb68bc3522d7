// src/routes/payment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::{ApiOk, appointment_routes::own_patient_id},
    services::access::modules,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/appointments/{appointment_id}/payment",
            get(get_payment).post(record_payment),
        )
        .route("/appointments/{appointment_id}/payment/refund", post(refund_payment))
}

async fn load_payment(state: &AppState, appointment_id: Uuid) -> Result<Option<Payment>, ApiError> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payment WHERE appointment_id = $1"
    ))
    .bind(appointment_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)
}

pub async fn get_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Payment>>, ApiError> {
    auth.require(modules::PAYMENTS, PermissionType::View)?;

    let appointment = state.appointments.get(appointment_id).await?.appointment;
    if let Some(own) = own_patient_id(&state, &auth).await? {
        if appointment.patient_id != own {
            return Err(ApiError::not_found("appointment", appointment_id));
        }
    }

    let data = load_payment(&state, appointment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("payment for appointment", appointment_id))?;
    Ok(Json(ApiOk { data }))
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: Option<PaymentStatus>,
    pub transaction_id: Option<String>,
    pub blockchain_tx_hash: Option<String>,
}

impl RecordPaymentRequest {
    /// Returns the normalized currency and the initial status.
    fn validate(&self) -> Result<(String, PaymentStatus), PaymentError> {
        if self.amount_cents <= 0 {
            return Err(PaymentError::NonPositiveAmount);
        }
        let currency = normalize_currency(&self.currency)?;
        Ok((currency, self.status.unwrap_or(PaymentStatus::Completed)))
    }
}

pub async fn record_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<ApiOk<Payment>>), ApiError> {
    auth.require(modules::PAYMENTS, PermissionType::Create)?;
    let (currency, status) = req.validate()?;
    if matches!(status, PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded) {
        return Err(ApiError::validation("use the refund endpoint to refund a payment"));
    }

    // 404 for a missing appointment rather than a foreign key error
    state.appointments.get(appointment_id).await?;

    let row: Payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        INSERT INTO payment
          (payment_id, appointment_id, amount_cents, currency, payment_method, status,
           transaction_id, blockchain_tx_hash)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {PAYMENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(appointment_id)
    .bind(req.amount_cents)
    .bind(&currency)
    .bind(req.payment_method.as_str())
    .bind(status.as_str())
    .bind(req.transaction_id.as_deref())
    .bind(req.blockchain_tx_hash.as_deref())
    .fetch_one(&state.db)
    .await
    .map_err(|e| match ApiError::db(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "PAYMENT_EXISTS",
            "appointment already has a payment".into(),
        ),
        other => other,
    })?;

    tracing::info!(%appointment_id, payment_id = %row.payment_id, status = %row.status, "payment recorded");
    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Payment", row.payment_id, AuditAction::Create)
            .by(Some(auth.user_id))
            .after(&row),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount_cents: i64,
    pub reason: String,
}

pub async fn refund_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<ApiOk<Payment>>, ApiError> {
    auth.require(modules::PAYMENTS, PermissionType::Approve)?;

    let before = load_payment(&state, appointment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("payment for appointment", appointment_id))?;
    let mut after = before.clone();
    after.apply_refund(req.amount_cents, &req.reason)?;

    // guarded on the old status so two concurrent refunds cannot both apply
    let updated = sqlx::query(
        r#"
        UPDATE payment
        SET status = $2, refund_amount_cents = $3, refund_reason = $4
        WHERE payment_id = $1 AND status = $5
        "#,
    )
    .bind(after.payment_id)
    .bind(after.status.as_str())
    .bind(after.refund_amount_cents)
    .bind(after.refund_reason.as_deref())
    .bind(before.status.as_str())
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "NOT_REFUNDABLE",
            "payment changed while refunding".into(),
        ));
    }

    tracing::info!(%appointment_id, refund_cents = req.amount_cents, status = %after.status, "payment refunded");
    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Payment", after.payment_id, AuditAction::Update)
            .by(Some(auth.user_id))
            .before(&before)
            .after(&after),
    )
    .await;

    Ok(Json(ApiOk { data: after }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn body(amount_cents: i64, currency: &str) -> RecordPaymentRequest {
        RecordPaymentRequest {
            amount_cents,
            currency: currency.into(),
            payment_method: PaymentMethod::Card,
            status: None,
            transaction_id: Some("ch_123".into()),
            blockchain_tx_hash: None,
        }
    }

    #[test]
    fn new_payment_defaults_to_completed() {
        let (currency, status) = body(4_500, " usd ").validate().unwrap();
        assert_eq!(currency, "USD");
        assert_eq!(status, PaymentStatus::Completed);
    }

    #[test]
    fn new_payment_rejects_bad_amount_or_currency() {
        assert_matches!(body(0, "USD").validate(), Err(PaymentError::NonPositiveAmount));
        assert_matches!(body(100, "dollars").validate(), Err(PaymentError::Currency));
    }
}
