// src/routes/patient_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::{ApiOk, appointment_routes::own_patient_id, deserialize_double_option, user_routes},
    services::access::modules,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients).post(create_patient))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
        .route("/patients/{patient_id}/appointments", get(list_patient_appointments))
}

#[derive(Debug, Deserialize)]
pub struct RegisterPatientRequest {
    #[serde(flatten)]
    pub user: user_routes::NewUser,
    pub medical_history: Option<String>,
    pub emergency_contact: Option<String>,
    pub insurance_information: Option<String>,
    pub preferred_language: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientListItem {
    pub patient_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub is_active: bool,
}

/// Creates the account and its patient row in one transaction.
pub async fn register_patient(
    state: &AppState,
    actor: Option<Uuid>,
    req: RegisterPatientRequest,
) -> Result<UserAccount, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let user = user_routes::insert_user(&mut tx, &req.user, UserType::Patient).await?;

    let patient: Patient = sqlx::query_as::<_, Patient>(&format!(
        r#"
        INSERT INTO patient
          (patient_id, user_id, medical_history, emergency_contact, insurance_information,
           preferred_language, allergies, chronic_conditions)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(req.medical_history.as_deref())
    .bind(req.emergency_contact.as_deref())
    .bind(req.insurance_information.as_deref())
    .bind(req.preferred_language.as_deref())
    .bind(req.allergies.as_deref())
    .bind(req.chronic_conditions.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(user_id = %user.user_id, patient_id = %patient.patient_id, "patient registered");
    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Patient", patient.patient_id, AuditAction::Create)
            .by(actor.or(Some(user.user_id)))
            .after(&patient),
    )
    .await;

    Ok(UserAccount {
        user,
        profile: UserProfile::Patient(patient),
    })
}

/// Staff can read any patient; a patient only themselves.
async fn ensure_patient_access(
    state: &AppState,
    auth: &AuthContext,
    patient_id: Uuid,
    kind: PermissionType,
) -> Result<(), ApiError> {
    match own_patient_id(state, auth).await? {
        Some(own) if own == patient_id => Ok(()),
        Some(_) => Err(ApiError::not_found("patient", patient_id)),
        None => auth.require(modules::PATIENTS, kind),
    }
}

/* ============================================================
   POST /patients
   ============================================================ */

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserAccount>>), ApiError> {
    auth.require(modules::PATIENTS, PermissionType::Create)?;
    let account = register_patient(&state, Some(auth.user_id), req).await?;
    Ok((StatusCode::CREATED, Json(ApiOk { data: account })))
}

/* ============================================================
   Reads
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<PatientListItem>>>, ApiError> {
    auth.require(modules::PATIENTS, PermissionType::View)?;

    let query = q.query.unwrap_or_default().trim().to_string();
    let like = format!("%{query}%");

    let rows: Vec<PatientListItem> = sqlx::query_as::<_, PatientListItem>(
        r#"
        SELECT p.patient_id, p.user_id, u.name, u.email, u.phone, u.date_of_birth, u.is_active
        FROM patient p
        JOIN app_user u ON u.user_id = p.user_id
        WHERE $1 = '' OR u.name ILIKE $2 OR u.email ILIKE $2 OR u.phone ILIKE $2
        ORDER BY u.created_at DESC
        LIMIT 50
        "#,
    )
    .bind(&query)
    .bind(&like)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserAccount>>, ApiError> {
    ensure_patient_access(&state, &auth, patient_id, PermissionType::View).await?;

    let user_id: Uuid = sqlx::query_scalar("SELECT user_id FROM patient WHERE patient_id = $1")
        .bind(patient_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("patient", patient_id))?;

    let data = user_routes::load_account(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("patient", patient_id))?;
    Ok(Json(ApiOk { data }))
}

pub async fn list_patient_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::View)?;
    if let Some(own) = own_patient_id(&state, &auth).await? {
        if own != patient_id {
            return Err(ApiError::not_found("patient", patient_id));
        }
    }
    let data = state.appointments.list_for_patient(patient_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   PATCH /patients/{id}
   ============================================================ */

/// Absent fields are left alone; `null` clears a field.
#[derive(Debug, Default, Deserialize)]
pub struct PatchPatientRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub medical_history: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub emergency_contact: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub insurance_information: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub preferred_language: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub allergies: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub chronic_conditions: Option<Option<String>>,
}

impl PatchPatientRequest {
    pub fn apply(self, patient: &mut Patient) {
        fn set(slot: &mut Option<String>, change: Option<Option<String>>) {
            if let Some(value) = change {
                *slot = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
            }
        }
        set(&mut patient.medical_history, self.medical_history);
        set(&mut patient.emergency_contact, self.emergency_contact);
        set(&mut patient.insurance_information, self.insurance_information);
        set(&mut patient.preferred_language, self.preferred_language);
        set(&mut patient.allergies, self.allergies);
        set(&mut patient.chronic_conditions, self.chronic_conditions);
    }
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<PatchPatientRequest>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    ensure_patient_access(&state, &auth, patient_id, PermissionType::Edit).await?;

    let before: Patient = sqlx::query_as::<_, Patient>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patient WHERE patient_id = $1"
    ))
    .bind(patient_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("patient", patient_id))?;

    let mut after = before.clone();
    req.apply(&mut after);

    sqlx::query(
        r#"
        UPDATE patient
        SET medical_history = $2,
            emergency_contact = $3,
            insurance_information = $4,
            preferred_language = $5,
            allergies = $6,
            chronic_conditions = $7
        WHERE patient_id = $1
        "#,
    )
    .bind(patient_id)
    .bind(after.medical_history.as_deref())
    .bind(after.emergency_contact.as_deref())
    .bind(after.insurance_information.as_deref())
    .bind(after.preferred_language.as_deref())
    .bind(after.allergies.as_deref())
    .bind(after.chronic_conditions.as_deref())
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Patient", patient_id, AuditAction::Update)
            .by(Some(auth.user_id))
            .before(&before)
            .after(&after),
    )
    .await;

    Ok(Json(ApiOk { data: after }))
}
