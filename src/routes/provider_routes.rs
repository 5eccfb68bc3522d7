// src/routes/provider_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::{ApiOk, user_routes},
    services::access::modules,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/providers", get(list_providers).post(create_provider))
        .route("/providers/{provider_id}", get(get_provider))
        .route("/providers/{provider_id}/appointments", get(list_provider_appointments))
        .route("/providers/{provider_id}/facilities", get(list_provider_facilities))
        .route(
            "/providers/{provider_id}/facilities/{facility_id}",
            post(link_facility).delete(unlink_facility),
        )
        .route(
            "/providers/{provider_id}/availability",
            get(list_availability).post(create_availability),
        )
        .route(
            "/providers/{provider_id}/availability/{availability_id}/status",
            put(set_availability_status),
        )
        .route("/providers/{provider_id}/slots", get(get_open_slots))
}

/* ============================================================
   Scoping
   ============================================================ */

/// Provider accounts manage only their own calendar unless they administer.
async fn ensure_provider_write(
    state: &AppState,
    auth: &AuthContext,
    provider_id: Uuid,
) -> Result<(), ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::Edit)?;
    if auth.user_type != UserType::Provider
        || auth.grants.allows(modules::ADMINISTRATION, PermissionType::Edit)
    {
        return Ok(());
    }

    let own: Option<Uuid> = sqlx::query_scalar("SELECT provider_id FROM provider WHERE user_id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;
    if own == Some(provider_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Providers can only manage their own schedule".into(),
        ))
    }
}

async fn provider_exists(state: &AppState, provider_id: Uuid) -> Result<(), ApiError> {
    let found: Option<Uuid> =
        sqlx::query_scalar("SELECT provider_id FROM provider WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?;
    found
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("provider", provider_id))
}

/* ============================================================
   Registration + reads
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RegisterProviderRequest {
    #[serde(flatten)]
    pub user: user_routes::NewUser,
    pub specialization: String,
    pub qualifications: Option<String>,
    pub license_number: String,
    pub years_of_experience: Option<i32>,
    pub biography: Option<String>,
    pub consultation_fee_cents: Option<i64>,
}

impl RegisterProviderRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.specialization.trim().is_empty() || self.license_number.trim().is_empty() {
            return Err(ApiError::validation(
                "specialization and license_number are required",
            ));
        }
        if self.years_of_experience.is_some_and(|y| y < 0) {
            return Err(ApiError::validation("years_of_experience must be >= 0"));
        }
        if self.consultation_fee_cents.is_some_and(|f| f < 0) {
            return Err(ApiError::validation("consultation_fee_cents must be >= 0"));
        }
        Ok(())
    }
}

pub async fn create_provider(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RegisterProviderRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserAccount>>), ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::Create)?;
    req.validate()?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let user = user_routes::insert_user(&mut tx, &req.user, UserType::Provider).await?;

    let provider: Provider = sqlx::query_as::<_, Provider>(&format!(
        r#"
        INSERT INTO provider
          (provider_id, user_id, specialization, qualifications, license_number,
           years_of_experience, biography, consultation_fee_cents)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {PROVIDER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(req.specialization.trim())
    .bind(req.qualifications.as_deref())
    .bind(req.license_number.trim())
    .bind(req.years_of_experience.unwrap_or(0))
    .bind(req.biography.as_deref())
    .bind(req.consultation_fee_cents.unwrap_or(0))
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(provider_id = %provider.provider_id, "provider registered");
    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Provider", provider.provider_id, AuditAction::Create)
            .by(Some(auth.user_id))
            .after(&provider),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: UserAccount {
                user,
                profile: UserProfile::Provider(provider),
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    pub specialization: Option<String>,
    pub facility_id: Option<Uuid>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProviderListItem {
    pub provider_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub specialization: String,
    pub years_of_experience: i32,
    pub consultation_fee_cents: i64,
    pub average_rating: f64,
}

pub async fn list_providers(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ProviderQuery>,
) -> Result<Json<ApiOk<Vec<ProviderListItem>>>, ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::View)?;

    let specialization = q
        .specialization
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let rows: Vec<ProviderListItem> = sqlx::query_as::<_, ProviderListItem>(
        r#"
        SELECT pr.provider_id, pr.user_id, u.name, pr.specialization, pr.years_of_experience,
               pr.consultation_fee_cents, pr.average_rating
        FROM provider pr
        JOIN app_user u ON u.user_id = pr.user_id
        WHERE u.is_active
          AND ($1::text IS NULL OR pr.specialization ILIKE $1)
          AND ($2::uuid IS NULL OR EXISTS (
                SELECT 1 FROM provider_facility pf
                WHERE pf.provider_id = pr.provider_id AND pf.facility_id = $2))
        ORDER BY u.name
        "#,
    )
    .bind(specialization.as_deref())
    .bind(q.facility_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_provider(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserAccount>>, ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::View)?;

    let user_id: Uuid = sqlx::query_scalar("SELECT user_id FROM provider WHERE provider_id = $1")
        .bind(provider_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("provider", provider_id))?;

    let data = user_routes::load_account(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("provider", provider_id))?;
    Ok(Json(ApiOk { data }))
}

/// Staff only; patients see their side through /patients/{id}/appointments.
pub async fn list_provider_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::View)?;
    if auth.user_type == UserType::Patient {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Patients cannot list a provider's calendar".into(),
        ));
    }
    let data = state.appointments.list_for_provider(provider_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Facility links
   ============================================================ */

pub async fn list_provider_facilities(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<Facility>>>, ApiError> {
    auth.require(modules::FACILITIES, PermissionType::View)?;

    let rows: Vec<Facility> = sqlx::query_as::<_, Facility>(
        r#"
        SELECT f.facility_id, f.name, f.address, f.contact_information, f.operating_hours,
               f.services, f.amenities
        FROM provider_facility pf
        JOIN facility f ON f.facility_id = pf.facility_id
        WHERE pf.provider_id = $1
        ORDER BY f.name
        "#,
    )
    .bind(provider_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn link_facility(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((provider_id, facility_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    ensure_provider_write(&state, &auth, provider_id).await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO provider_facility (provider_id, facility_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(provider_id)
    .bind(facility_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if inserted.rows_affected() == 0 {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::CREATED)
    }
}

pub async fn unlink_facility(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((provider_id, facility_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    ensure_provider_write(&state, &auth, provider_id).await?;

    let deleted = sqlx::query(
        "DELETE FROM provider_facility WHERE provider_id = $1 AND facility_id = $2",
    )
    .bind(provider_id)
    .bind(facility_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound(
            "NOT_FOUND",
            "provider is not linked to that facility".into(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

/* ============================================================
   Availability
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub facility_id: Uuid,
    #[serde(default)]
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    #[serde(default = "default_true")]
    pub is_recurring: bool,
    pub specific_date: Option<NaiveDate>,
}

fn default_true() -> bool {
    true
}

impl CreateAvailabilityRequest {
    fn window(&self) -> WindowSpec {
        WindowSpec {
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            slot_duration_minutes: self.slot_duration_minutes,
            is_recurring: self.is_recurring,
            specific_date: self.specific_date,
        }
    }
}

pub async fn create_availability(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
    Json(req): Json<CreateAvailabilityRequest>,
) -> Result<(StatusCode, Json<ApiOk<Availability>>), ApiError> {
    let window = req.window().validate()?;
    ensure_provider_write(&state, &auth, provider_id).await?;

    let linked: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1 FROM provider_facility WHERE provider_id = $1 AND facility_id = $2
        )
        "#,
    )
    .bind(provider_id)
    .bind(req.facility_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;
    if !linked {
        return Err(ApiError::BadRequest(
            "NOT_LINKED",
            "provider does not practice at that facility".into(),
        ));
    }

    let row: Availability = sqlx::query_as::<_, Availability>(&format!(
        r#"
        INSERT INTO availability
          (availability_id, provider_id, facility_id, day_of_week, start_time, end_time,
           slot_duration_minutes, is_recurring, specific_date, status)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        RETURNING {AVAILABILITY_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(provider_id)
    .bind(req.facility_id)
    .bind(window.day_of_week)
    .bind(window.start_time)
    .bind(window.end_time)
    .bind(window.slot_duration_minutes)
    .bind(window.is_recurring)
    .bind(if window.is_recurring { None } else { window.specific_date })
    .bind(AvailabilityStatus::Active.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

pub async fn list_availability(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<Availability>>>, ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::View)?;

    let rows: Vec<Availability> = sqlx::query_as::<_, Availability>(&format!(
        r#"
        SELECT {AVAILABILITY_COLUMNS}
        FROM availability
        WHERE provider_id = $1
        ORDER BY is_recurring DESC, specific_date, day_of_week, start_time
        "#
    ))
    .bind(provider_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: AvailabilityStatus,
}

pub async fn set_availability_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((provider_id, availability_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<ApiOk<Availability>>, ApiError> {
    ensure_provider_write(&state, &auth, provider_id).await?;

    let row: Availability = sqlx::query_as::<_, Availability>(&format!(
        r#"
        UPDATE availability
        SET status = $3, updated_at = now()
        WHERE availability_id = $1 AND provider_id = $2
        RETURNING {AVAILABILITY_COLUMNS}
        "#
    ))
    .bind(availability_id)
    .bind(provider_id)
    .bind(req.status.as_str())
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("availability", availability_id))?;

    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   GET /providers/{id}/slots?date=YYYY-MM-DD
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

pub async fn get_open_slots(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(provider_id): Path<Uuid>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<ApiOk<Vec<OpenSlot>>>, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::View)?;

    let date = NaiveDate::parse_from_str(q.date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("date must be YYYY-MM-DD"))?;
    provider_exists(&state, provider_id).await?;

    let windows: Vec<Availability> = sqlx::query_as::<_, Availability>(&format!(
        r#"
        SELECT {AVAILABILITY_COLUMNS}
        FROM availability
        WHERE provider_id = $1
          AND ((is_recurring AND day_of_week = $2) OR specific_date = $3)
        "#
    ))
    .bind(provider_id)
    .bind(day_of_week(date))
    .bind(date)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let booked = state.appointments.booked_on(provider_id, date).await?;
    Ok(Json(ApiOk {
        data: open_slots(&windows, &booked, date),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn availability_body_defaults_to_recurring() {
        let req: CreateAvailabilityRequest = serde_json::from_str(
            r#"{
                "facility_id": "6f1c2b7e-2a53-4a0e-9f5e-1b2f3c4d5e6f",
                "day_of_week": 1,
                "start_time": "09:00:00",
                "end_time": "12:00:00",
                "slot_duration_minutes": 30
            }"#,
        )
        .unwrap();
        assert!(req.is_recurring);
        let window = req.window().validate().unwrap();
        assert_eq!(window.day_of_week, 1);
    }

    #[test]
    fn date_override_takes_weekday_from_date() {
        let req: CreateAvailabilityRequest = serde_json::from_str(
            r#"{
                "facility_id": "6f1c2b7e-2a53-4a0e-9f5e-1b2f3c4d5e6f",
                "start_time": "13:00:00",
                "end_time": "15:00:00",
                "slot_duration_minutes": 20,
                "is_recurring": false,
                "specific_date": "2030-03-04"
            }"#,
        )
        .unwrap();
        let window = req.window().validate().unwrap();
        // 2030-03-04 is a Monday
        assert_eq!(window.day_of_week, 1);
    }

    #[test]
    fn provider_registration_requires_license() {
        let req: RegisterProviderRequest = serde_json::from_str(
            r#"{
                "email": "grace@example.org",
                "password": "long enough",
                "name": "Dr. Grace",
                "specialization": "Cardiology",
                "license_number": "  "
            }"#,
        )
        .unwrap();
        assert_matches!(req.validate(), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));
    }
}
