// src/routes/audit_routes.rs

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::ApiOk,
    services::access::modules,
};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new().route("/audit_logs", get(list_audit_logs))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_name: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<i64>,
}

impl AuditQuery {
    fn limit(&self) -> Result<i64, ApiError> {
        match self.limit {
            None => Ok(DEFAULT_LIMIT),
            Some(n) if (1..=MAX_LIMIT).contains(&n) => Ok(n),
            Some(_) => Err(ApiError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            ))),
        }
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Newest first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AuditQuery>,
) -> Result<Json<ApiOk<Vec<AuditLog>>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::View)?;
    let limit = q.limit()?;

    let rows: Vec<AuditLog> = sqlx::query_as::<_, AuditLog>(&format!(
        r#"
        SELECT {AUDIT_COLUMNS}
        FROM audit_log
        WHERE ($1::text IS NULL OR entity_name = $1)
          AND ($2::text IS NULL OR entity_id = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#
    ))
    .bind(non_blank(&q.entity_name))
    .bind(non_blank(&q.entity_id))
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn limit_defaults_and_bounds() {
        assert_eq!(AuditQuery::default().limit().unwrap(), DEFAULT_LIMIT);

        let q = AuditQuery { limit: Some(500), ..Default::default() };
        assert_eq!(q.limit().unwrap(), 500);

        for bad in [0, 501, -3] {
            let q = AuditQuery { limit: Some(bad), ..Default::default() };
            assert_matches!(q.limit(), Err(ApiError::BadRequest(..)));
        }
    }

    #[test]
    fn blank_filters_are_ignored() {
        assert_eq!(non_blank(&Some("  ".into())), None);
        assert_eq!(non_blank(&Some(" Appointment ".into())), Some("Appointment"));
        assert_eq!(non_blank(&None), None);
    }
}
