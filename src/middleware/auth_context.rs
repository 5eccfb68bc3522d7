use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_token;
use crate::error::ApiError;
use crate::models::{AppState, PermissionType, UserType};
use crate::services::access::{Grants, load_grants};
use crate::services::appointment::Actor;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub user_type: UserType,
    pub session_id: Uuid,
    pub grants: Grants,
    pub ip_address: Option<String>,
}

impl AuthContext {
    pub fn require(&self, module: &str, kind: PermissionType) -> Result<(), ApiError> {
        if self.grants.allows(module, kind) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                format!("missing permission {kind} on {module}"),
            ))
        }
    }

    /// The caller as the audit trail records it.
    pub fn actor(&self) -> Actor {
        Actor {
            user_id: Some(self.user_id),
            ip_address: self.ip_address.clone(),
        }
    }
}

/// First hop of X-Forwarded-For, if a proxy set it.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_id: Uuid,
    user_id: Uuid,
    user_type: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_token(authz.token());

            // Validate session + ensure the account is active
            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT s.session_id, s.user_id, u.user_type
                FROM user_session s
                JOIN app_user u ON u.user_id = s.user_id
                WHERE s.token_hash = $1
                  AND s.status = 'Active'
                  AND s.revoked_at IS NULL
                  AND s.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            let user_type: UserType = row
                .user_type
                .parse()
                .map_err(|e| ApiError::Internal(format!("account decode error: {e}")))?;
            let grants = load_grants(&state.db, row.user_id)
                .await
                .map_err(ApiError::db)?;

            Ok(AuthContext {
                user_id: row.user_id,
                user_type,
                session_id: row.session_id,
                grants,
                ip_address: client_ip(&parts.headers),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::access::modules;
    use assert_matches::assert_matches;

    #[test]
    fn require_checks_module_and_kind() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            user_type: UserType::Provider,
            session_id: Uuid::new_v4(),
            grants: [(modules::APPOINTMENTS, PermissionType::View)].into_iter().collect(),
            ip_address: None,
        };
        assert!(ctx.require(modules::APPOINTMENTS, PermissionType::View).is_ok());
        assert_matches!(
            ctx.require(modules::APPOINTMENTS, PermissionType::Delete),
            Err(ApiError::Forbidden("FORBIDDEN", msg)) if msg.contains("Delete")
        );
    }

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }
}
