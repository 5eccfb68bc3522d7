// src/routes/appointment_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, AppointmentDetail, PermissionType, UserType},
    routes::ApiOk,
    services::access::modules,
    services::appointment::{AppointmentError, NewAppointment, UpdateAppointment},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/confirm", post(confirm_appointment))
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/appointments/{appointment_id}/reschedule", post(reschedule_appointment))
        .route("/appointments/{appointment_id}/complete", post(complete_appointment))
        .route("/appointments/{appointment_id}/no_show", post(no_show_appointment))
}

/* ============================================================
   Patient scoping
   ============================================================ */

/// Patient accounts only ever see their own bookings. Staff get `None`.
pub async fn own_patient_id(state: &AppState, auth: &AuthContext) -> Result<Option<Uuid>, ApiError> {
    if auth.user_type != UserType::Patient {
        return Ok(None);
    }
    let patient_id: Uuid = sqlx::query_scalar("SELECT patient_id FROM patient WHERE user_id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| {
            ApiError::Forbidden("NO_PATIENT_PROFILE", "Account has no patient profile".into())
        })?;
    Ok(Some(patient_id))
}

/// Loads the appointment and hides it from patients who do not own it.
async fn visible_appointment(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
) -> Result<AppointmentDetail, ApiError> {
    let detail = state.appointments.get(appointment_id).await?;
    if let Some(own) = own_patient_id(state, auth).await? {
        if detail.appointment.patient_id != own {
            return Err(ApiError::not_found("appointment", appointment_id));
        }
    }
    Ok(detail)
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::View)?;

    let data = match own_patient_id(&state, &auth).await? {
        Some(patient_id) => state.appointments.list_for_patient(patient_id).await?,
        None => state.appointments.list_all().await?,
    };
    Ok(Json(ApiOk { data }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::View)?;
    let data = visible_appointment(&state, &auth, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /appointments
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<NewAppointment>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<ApiOk<AppointmentDetail>>), ApiError>
{
    auth.require(modules::APPOINTMENTS, PermissionType::Create)?;

    if let Some(own) = own_patient_id(&state, &auth).await? {
        if req.patient_id != own {
            return Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Patients can only book for themselves".into(),
            ));
        }
    }

    let detail = state.appointments.create(&auth.actor(), req).await?;
    let location = format!("/api/v1/appointments/{}", detail.appointment.appointment_id);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(ApiOk { data: detail }),
    ))
}

/* ============================================================
   PUT / DELETE /appointments/{id}
   ============================================================ */

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointment>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Edit)?;
    if req.appointment_id != appointment_id {
        return Err(AppointmentError::IdMismatch {
            path: appointment_id,
            body: req.appointment_id,
        }
        .into());
    }
    visible_appointment(&state, &auth, appointment_id).await?;

    state
        .appointments
        .update(&auth.actor(), appointment_id, req)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Delete)?;
    visible_appointment(&state, &auth, appointment_id).await?;

    state
        .appointments
        .delete(&auth.actor(), appointment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/* ============================================================
   Status transitions
   ============================================================ */

pub async fn confirm_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Approve)?;
    visible_appointment(&state, &auth, appointment_id).await?;
    state
        .appointments
        .confirm(&auth.actor(), appointment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Reject)?;
    visible_appointment(&state, &auth, appointment_id).await?;
    state
        .appointments
        .cancel(&auth.actor(), appointment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

pub async fn reschedule_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Edit)?;
    visible_appointment(&state, &auth, appointment_id).await?;
    state
        .appointments
        .reschedule(&auth.actor(), appointment_id, req.scheduled_at)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Edit)?;
    visible_appointment(&state, &auth, appointment_id).await?;
    state
        .appointments
        .complete(&auth.actor(), appointment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn no_show_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth.require(modules::APPOINTMENTS, PermissionType::Edit)?;
    visible_appointment(&state, &auth, appointment_id).await?;
    state
        .appointments
        .mark_no_show(&auth.actor(), appointment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, AppointmentType};
    use crate::services::testing::{Harness, at, staff};
    use assert_matches::assert_matches;
    use axum::response::IntoResponse;

    fn front_desk() -> AuthContext {
        staff(&[
            (modules::APPOINTMENTS, PermissionType::View),
            (modules::APPOINTMENTS, PermissionType::Create),
            (modules::APPOINTMENTS, PermissionType::Edit),
            (modules::APPOINTMENTS, PermissionType::Delete),
            (modules::APPOINTMENTS, PermissionType::Approve),
            (modules::APPOINTMENTS, PermissionType::Reject),
        ])
    }

    fn request(h: &Harness, hour: u32) -> NewAppointment {
        NewAppointment {
            patient_id: h.patient_id,
            provider_id: h.provider_id,
            facility_id: h.facility_id,
            scheduled_at: at(hour, 0),
            duration_minutes: 30,
            appointment_type: AppointmentType::Checkup,
            notes: None,
        }
    }

    async fn book(h: &Harness, hour: u32) -> Uuid {
        let (_, _, Json(body)) =
            create_appointment(State(h.app_state()), front_desk(), Json(request(h, hour)))
                .await
                .unwrap();
        body.data.appointment.appointment_id
    }

    #[tokio::test]
    async fn create_returns_created_with_location() {
        let h = Harness::new();
        let (status, [(name, location)], Json(body)) =
            create_appointment(State(h.app_state()), front_desk(), Json(request(&h, 9)))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(name, header::LOCATION);
        assert_eq!(
            location,
            format!("/api/v1/appointments/{}", body.data.appointment.appointment_id)
        );
        assert_eq!(body.data.appointment.status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn create_without_permission_is_forbidden() {
        let h = Harness::new();
        let viewer = staff(&[(modules::APPOINTMENTS, PermissionType::View)]);
        let err = create_appointment(State(h.app_state()), viewer, Json(request(&h, 9)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn double_booking_is_a_conflict() {
        let h = Harness::new();
        book(&h, 9).await;
        let err = create_appointment(State(h.app_state()), front_desk(), Json(request(&h, 9)))
            .await
            .unwrap_err();
        assert_matches!(err, ApiError::Conflict("SLOT_TAKEN", _));
    }

    #[tokio::test]
    async fn get_and_list() {
        let h = Harness::new();
        let id = book(&h, 9).await;

        let Json(one) = get_appointment(State(h.app_state()), front_desk(), Path(id))
            .await
            .unwrap();
        assert_eq!(one.data.appointment.appointment_id, id);

        let Json(all) = list_appointments(State(h.app_state()), front_desk()).await.unwrap();
        assert_eq!(all.data.len(), 1);

        let err = get_appointment(State(h.app_state()), front_desk(), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_checks_ids_then_existence() {
        let h = Harness::new();
        let id = book(&h, 9).await;
        let body = |appointment_id| UpdateAppointment {
            appointment_id,
            scheduled_at: at(13, 0),
            duration_minutes: 20,
            appointment_type: AppointmentType::FollowUp,
            notes: Some("bring results".into()),
        };

        let err = update_appointment(State(h.app_state()), front_desk(), Path(id), Json(body(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let ghost = Uuid::new_v4();
        let err = update_appointment(State(h.app_state()), front_desk(), Path(ghost), Json(body(ghost)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let status = update_appointment(State(h.app_state()), front_desk(), Path(id), Json(body(id)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let stored = h.service.get(id).await.unwrap().appointment;
        assert_eq!(stored.scheduled_at, at(13, 0));
        assert_eq!(stored.notes.as_deref(), Some("bring results"));
    }

    #[tokio::test]
    async fn delete_then_gone() {
        let h = Harness::new();
        let id = book(&h, 9).await;

        let err = delete_appointment(State(h.app_state()), front_desk(), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let status = delete_appointment(State(h.app_state()), front_desk(), Path(id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_matches!(
            get_appointment(State(h.app_state()), front_desk(), Path(id)).await,
            Err(ApiError::NotFound(..))
        );
    }

    #[tokio::test]
    async fn transitions_return_no_content() {
        let h = Harness::new();
        let id = book(&h, 9).await;

        let ghost = Uuid::new_v4();
        assert_matches!(
            confirm_appointment(State(h.app_state()), front_desk(), Path(ghost)).await,
            Err(ApiError::NotFound(..))
        );
        assert_matches!(
            cancel_appointment(State(h.app_state()), front_desk(), Path(ghost)).await,
            Err(ApiError::NotFound(..))
        );

        assert_eq!(
            confirm_appointment(State(h.app_state()), front_desk(), Path(id)).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            reschedule_appointment(
                State(h.app_state()),
                front_desk(),
                Path(id),
                Json(RescheduleRequest { scheduled_at: at(16, 0) }),
            )
            .await
            .unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            complete_appointment(State(h.app_state()), front_desk(), Path(id)).await.unwrap(),
            StatusCode::NO_CONTENT
        );

        let done = h.service.get(id).await.unwrap().appointment;
        assert_eq!(done.status, AppointmentStatus::Completed);
        assert_eq!(done.scheduled_at, at(16, 0));

        let err = cancel_appointment(State(h.app_state()), front_desk(), Path(id))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn no_show_and_cancel() {
        let h = Harness::new();
        let missed = book(&h, 9).await;
        let dropped = book(&h, 10).await;

        no_show_appointment(State(h.app_state()), front_desk(), Path(missed))
            .await
            .unwrap();
        cancel_appointment(State(h.app_state()), front_desk(), Path(dropped))
            .await
            .unwrap();

        assert_eq!(h.service.get(missed).await.unwrap().appointment.status, AppointmentStatus::NoShow);
        assert_eq!(h.service.get(dropped).await.unwrap().appointment.status, AppointmentStatus::Canceled);
    }

    #[tokio::test]
    async fn audit_entries_carry_caller_ip() {
        let h = Harness::new();
        let mut caller = front_desk();
        caller.ip_address = Some("198.51.100.23".into());

        let (_, _, Json(body)) =
            create_appointment(State(h.app_state()), caller.clone(), Json(request(&h, 9)))
                .await
                .unwrap();
        let id = body.data.appointment.appointment_id;
        confirm_appointment(State(h.app_state()), caller.clone(), Path(id))
            .await
            .unwrap();

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            assert_eq!(entry.user_id, Some(caller.user_id));
            assert_eq!(entry.ip_address.as_deref(), Some("198.51.100.23"));
        }
    }
}
