// src/routes/user_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    auth::{MIN_PASSWORD_LEN, hash_password, normalize_email},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::ApiOk,
    services::access::modules,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/me/notifications", get(list_my_notifications))
        .route("/users/me/notifications/{notification_id}/read", post(mark_notification_read))
        .route("/users/{user_id}", get(get_user))
        .route("/users/{user_id}/notification_preferences", put(put_notification_preferences))
        .route("/users/{user_id}/active", put(put_user_active))
}

/* ============================================================
   Account creation (shared by patient/provider registration)
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub address: Option<String>,
    pub blockchain_wallet_address: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), ApiError> {
        let email = normalize_email(&self.email);
        let Some((local, domain)) = email.split_once('@') else {
            return Err(ApiError::validation("email is invalid"));
        };
        if local.is_empty() || !domain.contains('.') {
            return Err(ApiError::validation("email is invalid"));
        }
        if self.name.trim().is_empty() {
            return Err(ApiError::validation("name is required"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// Inserts the identity row and grants the default role named after the user type.
pub async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    req: &NewUser,
    user_type: UserType,
) -> Result<User, ApiError> {
    req.validate()?;
    let password_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let user: User = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO app_user
          (user_id, email, phone, password_hash, name, date_of_birth, gender, address,
           notification_preferences, blockchain_wallet_address, user_type)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(normalize_email(&req.email))
    .bind(req.phone.as_deref())
    .bind(&password_hash)
    .bind(req.name.trim())
    .bind(req.date_of_birth)
    .bind(req.gender.unwrap_or(Gender::Unspecified).as_str())
    .bind(req.address.as_deref())
    .bind(sqlx::types::Json(NotificationPreferences::default()))
    .bind(req.blockchain_wallet_address.as_deref())
    .bind(user_type.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| match ApiError::db(e) {
        ApiError::Conflict(code, _) => ApiError::Conflict(code, "email is already registered".into()),
        other => other,
    })?;

    sqlx::query(
        r#"
        INSERT INTO user_role (user_id, role_id)
        SELECT $1, role_id FROM role WHERE name = $2 AND is_active
        "#,
    )
    .bind(user.user_id)
    .bind(user_type.as_str())
    .execute(&mut **tx)
    .await
    .map_err(ApiError::db)?;

    Ok(user)
}

/// Identity plus whichever specialization the user has.
pub async fn load_account(db: &sqlx::PgPool, user_id: Uuid) -> Result<Option<UserAccount>, ApiError> {
    let user: Option<User> =
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(db)
            .await
            .map_err(ApiError::db)?;
    let Some(user) = user else {
        return Ok(None);
    };

    let profile = match user.user_type {
        UserType::Patient => sqlx::query_as::<_, Patient>(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patient WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .map(UserProfile::Patient),
        UserType::Provider => sqlx::query_as::<_, Provider>(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM provider WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)?
        .map(UserProfile::Provider),
    };

    // the specialization row is written in the same transaction as the user
    let profile = profile.ok_or_else(|| {
        tracing::error!(%user_id, user_type = %user.user_type, "account without specialization row");
        ApiError::Internal("account profile missing".into())
    })?;

    Ok(Some(UserAccount { user, profile }))
}

fn ensure_self_or(auth: &AuthContext, user_id: Uuid, kind: PermissionType) -> Result<(), ApiError> {
    if auth.user_id == user_id {
        Ok(())
    } else {
        auth.require(modules::ADMINISTRATION, kind)
    }
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserAccount>>, ApiError> {
    let data = load_account(&state.db, auth.user_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;
    Ok(Json(ApiOk { data }))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<UserAccount>>, ApiError> {
    ensure_self_or(&auth, user_id, PermissionType::View)?;
    let data = load_account(&state.db, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user", user_id))?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Settings
   ============================================================ */

pub async fn put_notification_preferences(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(prefs): Json<NotificationPreferences>,
) -> Result<Json<ApiOk<NotificationPreferences>>, ApiError> {
    ensure_self_or(&auth, user_id, PermissionType::Edit)?;
    if !(0..=24 * 7).contains(&prefs.reminder_hours_before) {
        return Err(ApiError::validation(
            "reminder_hours_before must be between 0 and 168",
        ));
    }

    let updated = sqlx::query(
        r#"
        UPDATE app_user
        SET notification_preferences = $2,
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(sqlx::types::Json(&prefs))
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("user", user_id));
    }
    Ok(Json(ApiOk { data: prefs }))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct SetActiveData {
    pub user_id: Uuid,
    pub is_active: bool,
    pub revoked_sessions: u64,
}

/// Deactivating an account also revokes its live sessions.
pub async fn put_user_active(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<ApiOk<SetActiveData>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::Edit)?;
    if user_id == auth.user_id && !req.is_active {
        return Err(ApiError::validation("cannot deactivate your own account"));
    }

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let updated = sqlx::query(
        "UPDATE app_user SET is_active = $2, updated_at = now() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(req.is_active)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("user", user_id));
    }

    let revoked_sessions = if req.is_active {
        0
    } else {
        sqlx::query(
            r#"
            UPDATE user_session
            SET revoked_at = now(), status = 'Revoked'
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?
        .rows_affected()
    };

    tx.commit().await.map_err(ApiError::db)?;

    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("User", user_id, AuditAction::Update)
            .by(Some(auth.user_id))
            .after(&serde_json::json!({ "is_active": req.is_active })),
    )
    .await;

    Ok(Json(ApiOk {
        data: SetActiveData {
            user_id,
            is_active: req.is_active,
            revoked_sessions,
        },
    }))
}

/* ============================================================
   Notifications inbox
   ============================================================ */

pub async fn list_my_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<Notification>>>, ApiError> {
    let rows: Vec<Notification> = sqlx::query_as::<_, Notification>(
        r#"
        SELECT notification_id, user_id, appointment_id, kind, message, is_read, created_at
        FROM notification
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 100
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    let updated = sqlx::query(
        "UPDATE notification SET is_read = true WHERE notification_id = $1 AND user_id = $2",
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("notification", notification_id));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn new_user() -> NewUser {
        NewUser {
            email: " Ada@Example.org ".into(),
            password: "long enough".into(),
            name: "Ada".into(),
            phone: None,
            date_of_birth: None,
            gender: None,
            address: None,
            blockchain_wallet_address: None,
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(new_user().validate().is_ok());
    }

    #[test]
    fn registration_rejects_bad_fields() {
        let mut bad_email = new_user();
        bad_email.email = "ada.example.org".into();
        assert_matches!(bad_email.validate(), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));

        let mut no_domain = new_user();
        no_domain.email = "ada@localhost".into();
        assert!(no_domain.validate().is_err());

        let mut short = new_user();
        short.password = "short".into();
        assert_matches!(short.validate(), Err(ApiError::BadRequest(_, msg)) if msg.contains("password"));

        let mut blank = new_user();
        blank.name = "   ".into();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn self_access_skips_permission_check() {
        let auth = crate::services::testing::staff(&[]);
        assert!(ensure_self_or(&auth, auth.user_id, PermissionType::Edit).is_ok());
        assert_matches!(
            ensure_self_or(&auth, Uuid::new_v4(), PermissionType::Edit),
            Err(ApiError::Forbidden(..))
        );
    }
}
