//! HTTP server for the rideline platform.
//!
//! Everything under `/api` is scoped to the tenant named by the `X-Tenant-Id`
//! header and answers with the `{success, data, message}` envelope from
//! [`utils::ApiResponse`].
use std::{sync::Arc, time::Duration};

use anyhow::Error;
use axum::{
    Router,
    http::{
        HeaderName, HeaderValue, Method,
        header::{ACCEPT, CONTENT_TYPE},
    },
    routing::{get, post, put},
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod hub;
pub mod routes;
pub mod services;
pub mod sms;
pub mod state;
pub mod utils;

use config::Config;
use routes::*;
use state::State;

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static(utils::TENANT_HEADER)])
        .max_age(Duration::from_secs(60 * 60));

    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(e)) => {
            warn!("Ignoring invalid CORS_ORIGIN: {e}");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

pub fn build_router(state: Arc<State>) -> Router {
    let api = Router::new()
        .route("/students", get(list_students_handler).post(create_student_handler))
        .route("/students/{id}", get(get_student_handler).delete(delete_student_handler))
        .route("/students/{id}/stop", put(assign_stop_handler))
        .route("/drivers", get(list_drivers_handler).post(create_driver_handler))
        .route("/drivers/{id}", get(get_driver_handler).delete(delete_driver_handler))
        .route("/vehicles", get(list_vehicles_handler).post(create_vehicle_handler))
        .route("/vehicles/{id}", get(get_vehicle_handler).delete(delete_vehicle_handler))
        .route("/routes", get(list_routes_handler).post(create_route_handler))
        .route("/routes/{id}", get(get_route_handler).delete(delete_route_handler))
        .route("/trips", get(list_trips_handler).post(create_trip_handler))
        .route("/trips/{id}", get(get_trip_handler))
        .route("/trips/{id}/start", post(start_trip_handler))
        .route("/trips/{id}/complete", post(complete_trip_handler))
        .route("/trips/{id}/cancel", post(cancel_trip_handler))
        .route("/trips/{id}/location", post(update_location_handler))
        .route("/trips/{id}/alerts", get(trip_alerts_handler))
        .route("/attendance", get(list_attendance_handler).post(record_attendance_handler))
        .route("/attendance/geofence-check", post(geofence_check_handler))
        .route("/payments", get(list_payments_handler).post(process_payment_handler))
        .route("/payments/validate", post(validate_payment_handler))
        .route("/payments/{id}", get(get_payment_handler))
        .route("/mfa/challenges", post(issue_challenge_handler))
        .route("/mfa/verify", post(verify_challenge_handler))
        .route("/audit", get(list_audit_handler))
        .route("/notifications/stream", get(notifications_handler));

    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(cors)
        .with_state(state)
}

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

pub async fn start_server() -> Result<(), Error> {
    init_tracing();

    info!("Loading config...");
    let config = Config::load()?;

    serve(config).await
}

pub async fn serve(config: Config) -> Result<(), Error> {
    info!("Initializing state...");
    let state = State::new(config)?;

    info!("Starting server...");
    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
