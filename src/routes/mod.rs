use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;
use crate::models::AppState;

pub mod appointment_routes;
pub mod audit_routes;
pub mod auth_routes;
pub mod facility_routes;
pub mod patient_routes;
pub mod payment_routes;
pub mod provider_routes;
pub mod rbac_routes;
pub mod user_routes;

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

/// For PATCH bodies: absent field => `None`, `null` => `Some(None)`.
/// Pair with `#[serde(default)]`.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .nest("/api/v1", patient_routes::router())
        .nest("/api/v1", provider_routes::router())
        .nest("/api/v1", facility_routes::router())
        .nest("/api/v1", payment_routes::router())
        .nest("/api/v1", user_routes::router())
        .nest("/api/v1", rbac_routes::router())
        .nest("/api/v1", audit_routes::router())
        .route("/health", get(health))
        .with_state(state)
}

pub async fn health(State(state): State<AppState>) -> Result<Json<ApiOk<HealthData>>, ApiError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
    Ok(Json(ApiOk {
        data: HealthData { status: "ok" },
    }))
}
