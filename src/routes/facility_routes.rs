// src/routes/facility_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::{ApiOk, deserialize_double_option, provider_routes::ProviderListItem},
    services::access::modules,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/facilities", get(list_facilities).post(create_facility))
        .route("/facilities/{facility_id}", get(get_facility).patch(update_facility))
        .route("/facilities/{facility_id}/providers", get(list_facility_providers))
}

#[derive(Debug, Deserialize)]
pub struct CreateFacilityRequest {
    pub name: String,
    pub address: String,
    pub contact_information: Option<String>,
    pub operating_hours: Option<String>,
    pub services: Option<String>,
    pub amenities: Option<String>,
}

pub async fn create_facility(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateFacilityRequest>,
) -> Result<(StatusCode, Json<ApiOk<Facility>>), ApiError> {
    auth.require(modules::FACILITIES, PermissionType::Create)?;

    let name = req.name.trim();
    let address = req.address.trim();
    if name.is_empty() || address.is_empty() {
        return Err(ApiError::validation("name and address are required"));
    }

    let row: Facility = sqlx::query_as::<_, Facility>(&format!(
        r#"
        INSERT INTO facility
          (facility_id, name, address, contact_information, operating_hours, services, amenities)
        VALUES ($1,$2,$3,$4,$5,$6,$7)
        RETURNING {FACILITY_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(address)
    .bind(req.contact_information.as_deref())
    .bind(req.operating_hours.as_deref())
    .bind(req.services.as_deref())
    .bind(req.amenities.as_deref())
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Facility", row.facility_id, AuditAction::Create)
            .by(Some(auth.user_id))
            .after(&row),
    )
    .await;

    Ok((StatusCode::CREATED, Json(ApiOk { data: row })))
}

pub async fn list_facilities(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<Facility>>>, ApiError> {
    auth.require(modules::FACILITIES, PermissionType::View)?;

    let rows: Vec<Facility> =
        sqlx::query_as::<_, Facility>(&format!("SELECT {FACILITY_COLUMNS} FROM facility ORDER BY name"))
            .fetch_all(&state.db)
            .await
            .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

async fn load_facility(state: &AppState, facility_id: Uuid) -> Result<Facility, ApiError> {
    sqlx::query_as::<_, Facility>(&format!(
        "SELECT {FACILITY_COLUMNS} FROM facility WHERE facility_id = $1"
    ))
    .bind(facility_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("facility", facility_id))
}

pub async fn get_facility(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<ApiOk<Facility>>, ApiError> {
    auth.require(modules::FACILITIES, PermissionType::View)?;
    let data = load_facility(&state, facility_id).await?;
    Ok(Json(ApiOk { data }))
}

/// Absent fields are left alone; `null` clears an optional field.
#[derive(Debug, Default, Deserialize)]
pub struct PatchFacilityRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_information: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub operating_hours: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub services: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub amenities: Option<Option<String>>,
}

impl PatchFacilityRequest {
    pub fn apply(self, f: &mut Facility) -> Result<(), ApiError> {
        if let Some(name) = self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ApiError::validation("name cannot be blank"));
            }
            f.name = name.to_string();
        }
        if let Some(address) = self.address {
            let address = address.trim();
            if address.is_empty() {
                return Err(ApiError::validation("address cannot be blank"));
            }
            f.address = address.to_string();
        }
        if let Some(v) = self.contact_information {
            f.contact_information = v;
        }
        if let Some(v) = self.operating_hours {
            f.operating_hours = v;
        }
        if let Some(v) = self.services {
            f.services = v;
        }
        if let Some(v) = self.amenities {
            f.amenities = v;
        }
        Ok(())
    }
}

pub async fn update_facility(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(facility_id): Path<Uuid>,
    Json(req): Json<PatchFacilityRequest>,
) -> Result<Json<ApiOk<Facility>>, ApiError> {
    auth.require(modules::FACILITIES, PermissionType::Edit)?;

    let before = load_facility(&state, facility_id).await?;
    let mut after = before.clone();
    req.apply(&mut after)?;

    sqlx::query(
        r#"
        UPDATE facility
        SET name = $2, address = $3, contact_information = $4,
            operating_hours = $5, services = $6, amenities = $7
        WHERE facility_id = $1
        "#,
    )
    .bind(facility_id)
    .bind(&after.name)
    .bind(&after.address)
    .bind(after.contact_information.as_deref())
    .bind(after.operating_hours.as_deref())
    .bind(after.services.as_deref())
    .bind(after.amenities.as_deref())
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    crate::services::audit::record_best_effort(
        &*state.audit,
        NewAuditEntry::new("Facility", facility_id, AuditAction::Update)
            .by(Some(auth.user_id))
            .before(&before)
            .after(&after),
    )
    .await;

    Ok(Json(ApiOk { data: after }))
}

pub async fn list_facility_providers(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(facility_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<ProviderListItem>>>, ApiError> {
    auth.require(modules::PROVIDERS, PermissionType::View)?;
    load_facility(&state, facility_id).await?;

    let rows: Vec<ProviderListItem> = sqlx::query_as::<_, ProviderListItem>(
        r#"
        SELECT pr.provider_id, pr.user_id, u.name, pr.specialization, pr.years_of_experience,
               pr.consultation_fee_cents, pr.average_rating
        FROM provider_facility pf
        JOIN provider pr ON pr.provider_id = pf.provider_id
        JOIN app_user u ON u.user_id = pr.user_id
        WHERE pf.facility_id = $1 AND u.is_active
        ORDER BY u.name
        "#,
    )
    .bind(facility_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk { data: rows }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn facility() -> Facility {
        Facility {
            facility_id: Uuid::new_v4(),
            name: "Northside Clinic".into(),
            address: "1 Main St".into(),
            contact_information: Some("+1 555 0199".into()),
            operating_hours: None,
            services: Some("General".into()),
            amenities: None,
        }
    }

    #[test]
    fn patch_updates_only_present_fields() {
        let req: PatchFacilityRequest =
            serde_json::from_str(r#"{"name": " Southside Clinic ", "contact_information": null}"#)
                .unwrap();
        let mut f = facility();
        req.apply(&mut f).unwrap();
        assert_eq!(f.name, "Southside Clinic");
        assert_eq!(f.contact_information, None);
        assert_eq!(f.services.as_deref(), Some("General"));
    }

    #[test]
    fn patch_rejects_blank_name() {
        let req: PatchFacilityRequest = serde_json::from_str(r#"{"name": "  "}"#).unwrap();
        let mut f = facility();
        assert_matches!(req.apply(&mut f), Err(ApiError::BadRequest(..)));
        assert_eq!(f.name, "Northside Clinic");
    }
}
