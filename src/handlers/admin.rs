//! Administrative commands over the same query layer the booking flow uses.
//!
//! Every write here is an upsert or a guarded update, so re-running a request leaves the
//! store in the same state.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus, Client, Company};
use crate::services::booking::{persist_appointment, resolve_catalog_ids, NewAppointment};
use crate::services::extractor::{normalize_time, resolve_date};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn load_company(state: &AppState, company_id: i64) -> Result<Company, AppError> {
    let db = state.db()?;
    queries::get_company(&db, company_id)?
        .ok_or_else(|| AppError::NotFound(format!("company {company_id}")))
}

fn require_text<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

// POST /api/admin/companies
#[derive(Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    pub whatsapp_number: String,
}

pub async fn upsert_company(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CompanyRequest>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = require_text(&body.name, "name")?;
    let number = require_text(&body.whatsapp_number, "whatsapp_number")?;

    let id = {
        let db = state.db()?;
        queries::upsert_company(&db, name, number)?
    };
    tracing::info!(company_id = id, whatsapp_number = number, "company saved");

    Ok(Json(json!({ "id": id })))
}

// POST /api/admin/companies/:id/services
#[derive(Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<i32>,
}

pub async fn upsert_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(company_id): Path<i64>,
    Json(body): Json<ServiceRequest>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = require_text(&body.name, "name")?;
    load_company(&state, company_id)?;

    let id = {
        let db = state.db()?;
        queries::upsert_service(
            &db,
            company_id,
            name,
            body.price_cents,
            body.duration_minutes.unwrap_or(60),
        )?
    };

    Ok(Json(json!({ "id": id })))
}

// POST /api/admin/companies/:id/professionals
#[derive(Deserialize)]
pub struct ProfessionalRequest {
    pub name: String,
}

pub async fn upsert_professional(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(company_id): Path<i64>,
    Json(body): Json<ProfessionalRequest>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let name = require_text(&body.name, "name")?;
    load_company(&state, company_id)?;

    let id = {
        let db = state.db()?;
        queries::upsert_professional(&db, company_id, name)?
    };

    Ok(Json(json!({ "id": id })))
}

// POST /api/admin/companies/:id/defaults
#[derive(Deserialize)]
pub struct DefaultsRequest {
    pub default_service_id: Option<i64>,
    pub default_professional_id: Option<i64>,
}

pub async fn set_defaults(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(company_id): Path<i64>,
    Json(body): Json<DefaultsRequest>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    load_company(&state, company_id)?;

    let db = state.db()?;
    if !queries::catalog_ids_belong_to(
        &db,
        company_id,
        body.default_service_id,
        body.default_professional_id,
    )? {
        return Err(AppError::NotFound(
            "service or professional not registered for this company".to_string(),
        ));
    }

    queries::set_company_defaults(
        &db,
        company_id,
        body.default_service_id,
        body.default_professional_id,
    )?;

    Ok(Json(json!({ "ok": true })))
}

// GET /api/admin/companies/:id/appointments
#[derive(Deserialize)]
pub struct AppointmentsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AppointmentResponse {
    id: String,
    client_id: i64,
    client_name: Option<String>,
    client_phone: Option<String>,
    service_id: Option<i64>,
    professional_id: Option<i64>,
    date: String,
    time: String,
    status: String,
    source_message_id: Option<i64>,
    created_at: String,
}

impl AppointmentResponse {
    fn new(a: Appointment, client: Option<Client>) -> Self {
        let (client_name, client_phone) = match client {
            Some(c) => (Some(c.name), Some(c.phone)),
            None => (None, None),
        };
        Self {
            id: a.id,
            client_id: a.client_id,
            client_name,
            client_phone,
            service_id: a.service_id,
            professional_id: a.professional_id,
            date: a.date.format("%Y-%m-%d").to_string(),
            time: a.time,
            status: a.status.as_str().to_string(),
            source_message_id: a.source_message_id,
            created_at: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(company_id): Path<i64>,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<AppointmentResponse>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let db = state.db()?;
    let appointments = queries::list_appointments(&db, company_id, query.status.as_deref(), limit)?
        .into_iter()
        .map(|a| {
            let client = queries::get_client(&db, a.client_id)?;
            Ok(AppointmentResponse::new(a, client))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(appointments))
}

// POST /api/admin/companies/:id/appointments
#[derive(Deserialize)]
pub struct ManualAppointmentRequest {
    pub client_name: String,
    pub client_phone: String,
    pub service_name: String,
    pub professional_name: Option<String>,
    /// `DD/MM/YYYY`
    pub date: String,
    /// `HH:MM`
    pub time: String,
}

pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(company_id): Path<i64>,
    Json(body): Json<ManualAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let client_name = require_text(&body.client_name, "client_name")?;
    let client_phone = require_text(&body.client_phone, "client_phone")?;
    let date = resolve_date(&body.date).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let time = normalize_time(&body.time)
        .ok_or_else(|| AppError::BadRequest(format!("invalid time: {}", body.time)))?;

    let company = load_company(&state, company_id)?;

    let response = {
        let db = state.db()?;
        let (service_id, professional_id) = resolve_catalog_ids(
            &db,
            &company,
            &body.service_name,
            body.professional_name.as_deref(),
        )?;
        let appointment = persist_appointment(
            &db,
            company.id,
            &NewAppointment {
                client_name,
                client_phone,
                service_id,
                professional_id,
                date,
                time: &time,
                source_message_id: None,
            },
        )?;
        let client = queries::get_client(&db, appointment.client_id)?;
        AppointmentResponse::new(appointment, client)
    };

    Ok(Json(response))
}

// POST /api/admin/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let updated = {
        let db = state.db()?;
        queries::update_appointment_status(&db, &id, &AppointmentStatus::Cancelled)?
    };

    if updated {
        tracing::info!(appointment_id = %id, "appointment cancelled");
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(AppError::NotFound(format!("appointment {id}")))
    }
}
