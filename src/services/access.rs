//! Role-based access checks.
//!
//! Permissions are resolved once per request into a [`Grants`] set of
//! (module code, permission type) pairs.

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::PermissionType;

/// Module codes seeded by the migrations.
pub mod modules {
    pub const APPOINTMENTS: &str = "APPOINTMENTS";
    pub const PATIENTS: &str = "PATIENTS";
    pub const PROVIDERS: &str = "PROVIDERS";
    pub const FACILITIES: &str = "FACILITIES";
    pub const PAYMENTS: &str = "PAYMENTS";
    pub const ADMINISTRATION: &str = "ADMINISTRATION";
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants(HashSet<(String, PermissionType)>);

impl Grants {
    pub fn allows(&self, module: &str, kind: PermissionType) -> bool {
        self.0.contains(&(module.to_string(), kind))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, PermissionType)> for Grants {
    fn from_iter<I: IntoIterator<Item = (S, PermissionType)>>(iter: I) -> Self {
        Grants(iter.into_iter().map(|(m, k)| (m.into(), k)).collect())
    }
}

/// Active permissions reachable through the user's active roles.
///
/// Rows with an unrecognized permission type are skipped.
pub async fn load_grants(db: &PgPool, user_id: Uuid) -> Result<Grants, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT m.code, p.permission_type
        FROM user_role ur
        JOIN role r             ON r.role_id = ur.role_id AND r.is_active
        JOIN role_permission rp ON rp.role_id = r.role_id
        JOIN permission p       ON p.permission_id = rp.permission_id AND p.is_active
        JOIN module m           ON m.module_id = p.module_id AND m.is_active
        WHERE ur.user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(module, kind)| match kind.parse::<PermissionType>() {
            Ok(kind) => Some((module, kind)),
            Err(e) => {
                tracing::warn!(module = %module, "ignoring permission row: {e}");
                None
            }
        })
        .collect())
}

/// Permission ids held by the user, used to gate menus.
pub async fn held_permission_ids(db: &PgPool, user_id: Uuid) -> Result<HashSet<Uuid>, sqlx::Error> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT rp.permission_id
        FROM user_role ur
        JOIN role r             ON r.role_id = ur.role_id AND r.is_active
        JOIN role_permission rp ON rp.role_id = r.role_id
        WHERE ur.user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;
    Ok(ids.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_match_module_and_kind() {
        let grants: Grants = [
            (modules::APPOINTMENTS, PermissionType::View),
            (modules::APPOINTMENTS, PermissionType::Create),
            (modules::PAYMENTS, PermissionType::View),
        ]
        .into_iter()
        .collect();

        assert_eq!(grants.len(), 3);
        assert!(grants.allows(modules::APPOINTMENTS, PermissionType::Create));
        assert!(!grants.allows(modules::APPOINTMENTS, PermissionType::Delete));
        assert!(!grants.allows(modules::PATIENTS, PermissionType::View));
        assert!(Grants::default().is_empty());
    }
}
