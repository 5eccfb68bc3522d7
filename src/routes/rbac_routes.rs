// src/routes/rbac_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::ApiOk,
    services::access::{held_permission_ids, modules},
    services::audit::record_best_effort,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rbac/modules", get(list_modules))
        .route("/rbac/roles", get(list_roles).post(create_role))
        .route(
            "/rbac/roles/{role_id}/permissions",
            get(get_role_permissions).put(put_role_permissions),
        )
        .route("/rbac/users/{user_id}/roles", get(list_user_roles))
        .route(
            "/rbac/users/{user_id}/roles/{role_id}",
            post(assign_role).delete(revoke_role),
        )
        .route("/rbac/menu", get(get_my_menu))
}

/* ============================================================
   Modules + permissions
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct ModuleWithPermissions {
    #[serde(flatten)]
    pub module: Module,
    pub permissions: Vec<Permission>,
}

pub async fn list_modules(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ModuleWithPermissions>>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::View)?;

    let mods: Vec<Module> = sqlx::query_as::<_, Module>(
        r#"
        SELECT module_id, name, description, code, is_active, display_order, icon_name,
               created_at, updated_at
        FROM module
        ORDER BY display_order, name
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let perms: Vec<Permission> = sqlx::query_as::<_, Permission>(&format!(
        "SELECT {PERMISSION_COLUMNS} FROM permission ORDER BY code"
    ))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: group_permissions(mods, perms),
    }))
}

fn group_permissions(mods: Vec<Module>, perms: Vec<Permission>) -> Vec<ModuleWithPermissions> {
    let mut grouped: Vec<ModuleWithPermissions> = mods
        .into_iter()
        .map(|module| ModuleWithPermissions {
            module,
            permissions: Vec::new(),
        })
        .collect();
    for p in perms {
        if let Some(m) = grouped.iter_mut().find(|m| m.module.module_id == p.module_id) {
            m.permissions.push(p);
        }
    }
    grouped
}

/* ============================================================
   Roles
   ============================================================ */

const ROLE_COLUMNS: &str = "role_id, name, description, is_active, created_at, updated_at";

pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<Role>>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::View)?;

    let rows: Vec<Role> =
        sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM role ORDER BY name"))
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;
    Ok(Json(ApiOk { data: rows }))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<ApiOk<Role>>), ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::Create)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }

    let role: Role = sqlx::query_as::<_, Role>(&format!(
        "INSERT INTO role (role_id, name, description) VALUES ($1, $2, $3) RETURNING {ROLE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(req.description.as_deref())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Role", role.role_id, AuditAction::Create)
            .by(Some(auth.user_id))
            .after(&role),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiOk { data: role })))
}

async fn role_permissions(state: &AppState, role_id: Uuid) -> Result<Vec<Permission>, ApiError> {
    let cols = PERMISSION_COLUMNS
        .split(", ")
        .map(|c| format!("p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    sqlx::query_as::<_, Permission>(&format!(
        r#"
        SELECT {cols}
        FROM role_permission rp
        JOIN permission p ON p.permission_id = rp.permission_id
        WHERE rp.role_id = $1
        ORDER BY p.code
        "#
    ))
    .bind(role_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

async fn role_exists(state: &AppState, role_id: Uuid) -> Result<(), ApiError> {
    let found: Option<Uuid> = sqlx::query_scalar("SELECT role_id FROM role WHERE role_id = $1")
        .bind(role_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;
    found
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("role", role_id))
}

pub async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(role_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<Permission>>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::View)?;
    role_exists(&state, role_id).await?;
    let data = role_permissions(&state, role_id).await?;
    Ok(Json(ApiOk { data }))
}

#[derive(Debug, Deserialize)]
pub struct PutRolePermissionsRequest {
    pub permission_ids: Vec<Uuid>,
}

/// Replaces the role's permission set.
pub async fn put_role_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(role_id): Path<Uuid>,
    Json(req): Json<PutRolePermissionsRequest>,
) -> Result<Json<ApiOk<Vec<RolePermission>>>, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::Edit)?;
    role_exists(&state, role_id).await?;

    let before: Vec<Uuid> = role_permissions(&state, role_id)
        .await?
        .into_iter()
        .map(|p| p.permission_id)
        .collect();

    let mut ids = req.permission_ids;
    ids.sort();
    ids.dedup();

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query("DELETE FROM role_permission WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    let rows: Vec<RolePermission> = sqlx::query_as::<_, RolePermission>(
        r#"
        INSERT INTO role_permission (role_id, permission_id)
        SELECT $1, p.permission_id FROM permission p WHERE p.permission_id = ANY($2)
        RETURNING role_id, permission_id, assigned_at
        "#,
    )
    .bind(role_id)
    .bind(&ids)
    .fetch_all(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    if rows.len() != ids.len() {
        return Err(ApiError::validation("unknown permission id in request"));
    }

    tx.commit().await.map_err(ApiError::db)?;

    record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Role", role_id, AuditAction::PermissionChange)
            .by(Some(auth.user_id))
            .before(&before)
            .after(&ids),
    )
    .await;

    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   User roles
   ============================================================ */

pub async fn list_user_roles(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<Role>>>, ApiError> {
    if auth.user_id != user_id {
        auth.require(modules::ADMINISTRATION, PermissionType::View)?;
    }

    let rows: Vec<Role> = sqlx::query_as::<_, Role>(
        r#"
        SELECT r.role_id, r.name, r.description, r.is_active, r.created_at, r.updated_at
        FROM user_role ur
        JOIN role r ON r.role_id = ur.role_id
        WHERE ur.user_id = $1
        ORDER BY r.name
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;
    Ok(Json(ApiOk { data: rows }))
}

pub async fn assign_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<ApiOk<UserRole>>), ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::Edit)?;

    let row: UserRole = sqlx::query_as::<_, UserRole>(
        r#"
        INSERT INTO user_role (user_id, role_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, role_id) DO UPDATE SET assigned_at = user_role.assigned_at
        RETURNING user_id, role_id, assigned_at
        "#,
    )
    .bind(user_id)
    .bind(role_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    record_best_effort(
        &*state.audit,
        NewAuditEntry::new("User", user_id, AuditAction::RoleAssignment)
            .by(Some(auth.user_id))
            .after(&serde_json::json!({ "role_id": role_id, "assigned": true })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::ADMINISTRATION, PermissionType::Edit)?;

    let deleted = sqlx::query("DELETE FROM user_role WHERE user_id = $1 AND role_id = $2")
        .bind(user_id)
        .bind(role_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound(
            "NOT_FOUND",
            "user does not hold that role".into(),
        ));
    }

    record_best_effort(
        &*state.audit,
        NewAuditEntry::new("User", user_id, AuditAction::RoleAssignment)
            .by(Some(auth.user_id))
            .before(&serde_json::json!({ "role_id": role_id, "assigned": true })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/* ============================================================
   GET /rbac/menu
   ============================================================ */

pub async fn get_my_menu(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<MenuNode>>>, ApiError> {
    let entries: Vec<MenuEntry> = sqlx::query_as::<_, MenuEntry>(
        r#"
        SELECT mn.menu_id, mn.module_id, mn.parent_menu_id, mn.name, mn.url, mn.icon_name,
               mn.display_order,
               COALESCE(array_agg(mp.permission_id) FILTER (WHERE mp.permission_id IS NOT NULL),
                        '{}') AS required_permissions
        FROM menu mn
        JOIN module m ON m.module_id = mn.module_id AND m.is_active
        LEFT JOIN menu_permission mp ON mp.menu_id = mn.menu_id
        WHERE mn.is_active AND mn.is_visible
        GROUP BY mn.menu_id
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let held = held_permission_ids(&state.db, auth.user_id)
        .await
        .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: build_menu_tree(entries, &held),
    }))
}
