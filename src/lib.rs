pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/whatsapp", post(handlers::webhook::whatsapp_webhook))
        .route("/api/admin/companies", post(handlers::admin::upsert_company))
        .route(
            "/api/admin/companies/:id/services",
            post(handlers::admin::upsert_service),
        )
        .route(
            "/api/admin/companies/:id/professionals",
            post(handlers::admin::upsert_professional),
        )
        .route(
            "/api/admin/companies/:id/defaults",
            post(handlers::admin::set_defaults),
        )
        .route(
            "/api/admin/companies/:id/appointments",
            get(handlers::admin::list_appointments).post(handlers::admin::create_appointment),
        )
        .route(
            "/api/admin/appointments/:id/cancel",
            post(handlers::admin::cancel_appointment),
        )
        .with_state(state)
}
