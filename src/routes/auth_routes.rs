// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::{delete, get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{MIN_PASSWORD_LEN, generate_token, hash_password, hash_token, normalize_email, verify_password},
    error::ApiError,
    middleware::auth_context::{AuthContext, client_ip},
    models::*,
    routes::{ApiOk, patient_routes, user_routes},
    services::audit::record_best_effort,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_id}", delete(revoke_session))
}

/* ============================================================
   Request / response DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_info: Option<String>,
}

impl LoginRequest {
    fn email(&self) -> Result<String, ApiError> {
        let email = normalize_email(&self.email);
        if email.is_empty() || self.password.is_empty() {
            return Err(ApiError::validation("email and password are required"));
        }
        Ok(email)
    }
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub session_id: Uuid,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub account: UserAccount,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub account: UserAccount,
    pub session: UserSession,
}

/// Coarse browser / OS names from a User-Agent string.
pub fn describe_user_agent(ua: &str) -> (Option<&'static str>, Option<&'static str>) {
    let browser = if ua.contains("Edg/") {
        Some("Edge")
    } else if ua.contains("Chrome/") {
        Some("Chrome")
    } else if ua.contains("Firefox/") {
        Some("Firefox")
    } else if ua.contains("Safari/") {
        Some("Safari")
    } else {
        None
    };
    let os = if ua.contains("Windows") {
        Some("Windows")
    } else if ua.contains("Android") {
        Some("Android")
    } else if ua.contains("iPhone") || ua.contains("iPad") {
        Some("iOS")
    } else if ua.contains("Mac OS X") {
        Some("macOS")
    } else if ua.contains("Linux") {
        Some("Linux")
    } else {
        None
    };
    (browser, os)
}

/* ============================================================
   Sessions
   ============================================================ */

async fn open_session(
    state: &AppState,
    user_id: Uuid,
    headers: &HeaderMap,
    device_info: Option<&str>,
) -> Result<TokenPair, ApiError> {
    let access_token = generate_token();
    let refresh_token = generate_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(state.session_ttl_hours);
    let refresh_expires_at = now + Duration::hours(state.refresh_ttl_hours);

    let ua = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (browser, os) = describe_user_agent(ua);

    let session_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO user_session
          (session_id, user_id, token_hash, refresh_token_hash, ip_address, device_info,
           browser, operating_system, expires_at, refresh_expires_at, status)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        RETURNING session_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(hash_token(&access_token))
    .bind(hash_token(&refresh_token))
    .bind(client_ip(headers))
    .bind(device_info)
    .bind(browser)
    .bind(os)
    .bind(expires_at)
    .bind(refresh_expires_at)
    .bind(SessionStatus::Active.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(TokenPair {
        session_id,
        access_token,
        expires_at,
        refresh_token,
        refresh_expires_at,
    })
}

/* ============================================================
   POST /auth/login
   ============================================================ */

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    user_id: Uuid,
    password_hash: String,
    is_active: bool,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let email = req.email()?;

    let user: CredentialRow = sqlx::query_as::<_, CredentialRow>(
        "SELECT user_id, password_hash, is_active FROM app_user WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        tracing::info!(user_id = %user.user_id, "login rejected: bad password");
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    let tokens = open_session(&state, user.user_id, &headers, req.device_info.as_deref()).await?;

    sqlx::query("UPDATE app_user SET last_login_at = now() WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    let account = user_routes::load_account(&state.db, user.user_id)
        .await?
        .ok_or_else(ApiError::invalid_credentials)?;

    tracing::info!(user_id = %user.user_id, session_id = %tokens.session_id, "login");
    let mut entry = NewAuditEntry::new("UserSession", tokens.session_id, AuditAction::Login)
        .by(Some(user.user_id));
    entry.ip_address = client_ip(&headers);
    record_best_effort(&*state.audit, entry).await;

    Ok(Json(ApiOk {
        data: LoginData { tokens, account },
    }))
}

/// Patient self-registration; signs the new account in.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<patient_routes::RegisterPatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<LoginData>>), ApiError> {
    let account = patient_routes::register_patient(&state, None, req).await?;
    let tokens = open_session(&state, account.user.user_id, &headers, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk {
            data: LoginData { tokens, account },
        }),
    ))
}

/* ============================================================
   POST /auth/refresh
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Rotates both tokens of the session the refresh token belongs to.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<ApiOk<TokenPair>>, ApiError> {
    if req.refresh_token.trim().is_empty() {
        return Err(ApiError::validation("refresh_token is required"));
    }

    let access_token = generate_token();
    let refresh_token = generate_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(state.session_ttl_hours);
    let refresh_expires_at = now + Duration::hours(state.refresh_ttl_hours);

    let session_id: Uuid = sqlx::query_scalar(
        r#"
        UPDATE user_session s
        SET token_hash = $2,
            refresh_token_hash = $3,
            expires_at = $4,
            refresh_expires_at = $5
        FROM app_user u
        WHERE s.refresh_token_hash = $1
          AND u.user_id = s.user_id
          AND u.is_active
          AND s.status = 'Active'
          AND s.revoked_at IS NULL
          AND s.refresh_expires_at > now()
        RETURNING s.session_id
        "#,
    )
    .bind(hash_token(req.refresh_token.trim()))
    .bind(hash_token(&access_token))
    .bind(hash_token(&refresh_token))
    .bind(expires_at)
    .bind(refresh_expires_at)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk {
        data: TokenPair {
            session_id,
            access_token,
            expires_at,
            refresh_token,
            refresh_expires_at,
        },
    }))
}

/* ============================================================
   Authenticated
   ============================================================ */

async fn load_session(state: &AppState, session_id: Uuid, user_id: Uuid) -> Result<UserSession, ApiError> {
    sqlx::query_as::<_, UserSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM user_session WHERE session_id = $1 AND user_id = $2"
    ))
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let account = user_routes::load_account(&state.db, auth.user_id)
        .await?
        .ok_or_else(ApiError::session_expired)?;
    let session = load_session(&state, auth.session_id, auth.user_id).await?;
    Ok(Json(ApiOk {
        data: MeData { account, session },
    }))
}

async fn revoke(state: &AppState, session_id: Uuid, user_id: Uuid) -> Result<bool, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE user_session
        SET revoked_at = now(), status = 'Revoked'
        WHERE session_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(session_id)
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(rows.rows_affected() > 0)
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<StatusCode, ApiError> {
    if !revoke(&state, auth.session_id, auth.user_id).await? {
        return Err(ApiError::session_expired());
    }

    let mut entry = NewAuditEntry::new("UserSession", auth.session_id, AuditAction::Logout)
        .by(Some(auth.user_id));
    entry.ip_address = auth.ip_address.clone();
    record_best_effort(&*state.audit, entry).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<UserSession>>>, ApiError> {
    let rows: Vec<UserSession> = sqlx::query_as::<_, UserSession>(&format!(
        r#"
        SELECT {SESSION_COLUMNS}
        FROM user_session
        WHERE user_id = $1
          AND status = 'Active'
          AND revoked_at IS NULL
          AND expires_at > now()
        ORDER BY created_at DESC
        "#
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(Json(ApiOk { data: rows }))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !revoke(&state, session_id, auth.user_id).await? {
        return Err(ApiError::not_found("session", session_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Also revokes every other session of the user.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    if req.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "new_password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if req.new_password == req.current_password {
        return Err(ApiError::validation("new_password must differ from the current one"));
    }

    let stored: String = sqlx::query_scalar("SELECT password_hash FROM app_user WHERE user_id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(ApiError::session_expired)?;
    if !verify_password(&req.current_password, &stored) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    sqlx::query("UPDATE app_user SET password_hash = $2, updated_at = now() WHERE user_id = $1")
        .bind(auth.user_id)
        .bind(&new_hash)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    sqlx::query(
        r#"
        UPDATE user_session
        SET revoked_at = now(), status = 'Revoked'
        WHERE user_id = $1 AND session_id <> $2 AND revoked_at IS NULL
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;

    let mut entry = NewAuditEntry::new("User", auth.user_id, AuditAction::PasswordChange)
        .by(Some(auth.user_id));
    entry.ip_address = auth.ip_address.clone();
    record_best_effort(&*state.audit, entry).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn login_requires_both_fields() {
        let req = LoginRequest {
            email: "  ".into(),
            password: "pw".into(),
            device_info: None,
        };
        assert_matches!(req.email(), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));

        let req = LoginRequest {
            email: "Ada@Example.org".into(),
            password: "secret-pw".into(),
            device_info: None,
        };
        assert_eq!(req.email().unwrap(), "ada@example.org");
    }

    #[test]
    fn user_agent_is_summarized() {
        let chrome_mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
        assert_eq!(describe_user_agent(chrome_mac), (Some("Chrome"), Some("macOS")));

        let firefox_linux = "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
        assert_eq!(describe_user_agent(firefox_linux), (Some("Firefox"), Some("Linux")));

        let edge_win = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/124.0 Safari/537.36 Edg/124.0";
        assert_eq!(describe_user_agent(edge_win), (Some("Edge"), Some("Windows")));

        assert_eq!(describe_user_agent("curl/8.5.0"), (None, None));
    }
}
