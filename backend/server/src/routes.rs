use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::NaiveDate;
use fleet::{
    Position,
    models::{Id, Trip, TripStatus},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::AppError,
    services::{
        attendance::{self, AttendanceFilter, NewAttendance},
        audit, drivers, geofence, mfa, payments,
        routes::{self, NewRoute},
        security::{self, CardDetails},
        students::{self, NewStudent},
        trips::{self, NewTrip, TripFilter},
        vehicles,
    },
    state::State as AppState,
    utils::{ApiResponse, PageQuery, PageRequest, TenantId},
};

type Shared = State<Arc<AppState>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub date: Option<NaiveDate>,
    pub status: Option<TripStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub trip_id: Option<Id>,
    pub student_id: Option<Id>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub student_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopAssignment {
    pub stop_id: Option<Id>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceCheck {
    pub trip_id: Id,
    pub latitude: f64,
    pub longitude: f64,
}

fn created<T: serde::Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::ok(data)))
}

pub async fn health_handler() -> impl IntoResponse {
    Json(ApiResponse::ok_with_message((), "OK"))
}

pub async fn list_students_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<StudentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageRequest::new(query.page, query.page_size);
    let students = students::list_students(&state.db, tenant, query.search, page).await?;

    Ok(Json(ApiResponse::ok(students)))
}

pub async fn create_student_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<NewStudent>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(students::create_student(&state.db, tenant, input).await?))
}

pub async fn get_student_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(students::get_student(&state.db, tenant, id).await?)))
}

pub async fn assign_stop_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
    Json(body): Json<StopAssignment>,
) -> Result<impl IntoResponse, AppError> {
    let student = students::assign_stop(&state.db, tenant, id, body.stop_id).await?;

    Ok(Json(ApiResponse::ok(student)))
}

pub async fn delete_student_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    students::delete_student(&state.db, tenant, id).await?;

    Ok(Json(ApiResponse::ok_with_message((), "Student deleted")))
}

pub async fn list_drivers_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        drivers::list_drivers(&state.db, tenant, query.request()).await?,
    )))
}

pub async fn create_driver_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<drivers::NewDriver>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(drivers::create_driver(&state.db, tenant, input).await?))
}

pub async fn get_driver_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(drivers::get_driver(&state.db, tenant, id).await?)))
}

pub async fn delete_driver_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    drivers::delete_driver(&state.db, tenant, id).await?;

    Ok(Json(ApiResponse::ok_with_message((), "Driver deleted")))
}

pub async fn list_vehicles_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        vehicles::list_vehicles(&state.db, tenant, query.request()).await?,
    )))
}

pub async fn create_vehicle_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<vehicles::NewVehicle>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(vehicles::create_vehicle(&state.db, tenant, input).await?))
}

pub async fn get_vehicle_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(vehicles::get_vehicle(&state.db, tenant, id).await?)))
}

pub async fn delete_vehicle_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    vehicles::delete_vehicle(&state.db, tenant, id).await?;

    Ok(Json(ApiResponse::ok_with_message((), "Vehicle deleted")))
}

pub async fn list_routes_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        routes::list_routes(&state.db, tenant, query.request()).await?,
    )))
}

pub async fn create_route_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<NewRoute>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(routes::create_route(&state.db, tenant, input).await?))
}

pub async fn get_route_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(routes::get_route(&state.db, tenant, id).await?)))
}

pub async fn delete_route_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    routes::delete_route(&state.db, tenant, id).await?;

    Ok(Json(ApiResponse::ok_with_message((), "Route deleted")))
}

pub async fn list_trips_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<TripQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = TripFilter {
        date: query.date,
        status: query.status,
    };

    Ok(Json(ApiResponse::ok(
        trips::list_trips(&state.db, tenant, filter, page).await?,
    )))
}

pub async fn create_trip_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<NewTrip>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(trips::create_trip(&state.db, tenant, input).await?))
}

pub async fn get_trip_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(trips::get_trip(&state.db, tenant, id).await?)))
}

async fn transition(
    state: &AppState,
    tenant: TenantId,
    id: Id,
    next: TripStatus,
) -> Result<Json<ApiResponse<Trip>>, AppError> {
    let trip = trips::transition_trip(&state.db, &state.hub, tenant, id, next).await?;

    Ok(Json(ApiResponse::ok(trip)))
}

pub async fn start_trip_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    transition(&state, tenant, id, TripStatus::InProgress).await
}

pub async fn complete_trip_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    transition(&state, tenant, id, TripStatus::Completed).await
}

pub async fn cancel_trip_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    transition(&state, tenant, id, TripStatus::Cancelled).await
}

pub async fn update_location_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
    Json(location): Json<geofence::VehicleLocation>,
) -> Result<impl IntoResponse, AppError> {
    let alerts = geofence::update_vehicle_location(
        &state.db,
        &state.hub,
        tenant,
        id,
        location,
        state.tracking_limits(),
    )
    .await?;

    Ok(Json(ApiResponse::ok(alerts)))
}

pub async fn trip_alerts_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        geofence::list_trip_alerts(&state.db, tenant, id, query.request()).await?,
    )))
}

pub async fn list_attendance_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<AttendanceQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageRequest::new(query.page, query.page_size);
    let filter = AttendanceFilter {
        trip_id: query.trip_id,
        student_id: query.student_id,
        date: query.date,
    };

    Ok(Json(ApiResponse::ok(
        attendance::list_attendance(&state.db, tenant, filter, page).await?,
    )))
}

pub async fn record_attendance_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(input): Json<NewAttendance>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(attendance::record_attendance(&state.db, tenant, input).await?))
}

pub async fn geofence_check_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(check): Json<GeofenceCheck>,
) -> Result<impl IntoResponse, AppError> {
    let position = Position::new(check.latitude, check.longitude);
    let alerts = geofence::check_geofence_alerts(
        &state.db,
        tenant,
        check.trip_id,
        position,
        state.config.attendance_radius_km,
    )
    .await?;

    let message = format!("{} alerts", alerts.len());
    Ok(Json(ApiResponse::ok_with_message(alerts, message)))
}

pub async fn list_payments_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<PaymentQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageRequest::new(query.page, query.page_size);

    Ok(Json(ApiResponse::ok(
        payments::list_payments(&state.db, tenant, query.student_id, page).await?,
    )))
}

pub async fn process_payment_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(request): Json<payments::PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = payments::process_payment(&state.db, tenant, request, state.config.gateway_delay).await?;

    Ok(created(outcome))
}

pub async fn get_payment_handler(
    State(state): Shared,
    tenant: TenantId,
    Path(id): Path<Id>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(payments::get_payment(&state.db, tenant, id).await?)))
}

/// Scores a card without charging it.
pub async fn validate_payment_handler(
    _tenant: TenantId,
    Json(card): Json<CardDetails>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(security::validate_payment_security(&card)))
}

pub async fn issue_challenge_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(request): Json<mfa::ChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let challenge = mfa::issue_challenge(
        &state.db,
        state.sms.as_ref(),
        tenant,
        request,
        state.config.mfa_code_ttl,
        state.config.sms_base_delay,
    )
    .await?;

    Ok(created(challenge))
}

pub async fn verify_challenge_handler(
    State(state): Shared,
    tenant: TenantId,
    Json(request): Json<mfa::VerifyRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        mfa::verify_challenge(&state.db, tenant, request).await?,
    )))
}

pub async fn list_audit_handler(
    State(state): Shared,
    tenant: TenantId,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ApiResponse::ok(
        audit::list_audit(&state.db, tenant, query.request()).await?,
    )))
}

pub async fn notifications_handler(
    State(state): Shared,
    tenant: TenantId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Notification stream opened for {}", tenant.as_str());

    let stream = state.hub.subscribe(tenant).into_stream().filter_map(|notification| async move {
        match Event::default().event(notification.kind()).json_data(&notification) {
            Ok(event) => Some(Ok::<_, Infallible>(event)),
            Err(e) => {
                warn!("Dropping notification that failed to serialize: {e}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
