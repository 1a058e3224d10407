use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Appointment, AppointmentStatus, BookingDraft, Company, Role};
use crate::services::ai::assistant::generate_reply;
use crate::services::catalog::{self, resolve_professional, resolve_service};
use crate::services::extractor::{find_latest_confirmation, ExtractError};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("nothing to book: {0}")]
    NoConfirmation(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum BookingOutcome {
    Booked {
        appointment: Appointment,
        draft: BookingDraft,
    },
    /// The latest confirmation was already turned into this appointment.
    AlreadyBooked(Appointment),
}

const AFFIRMATIVE: &[&str] = &[
    "sim",
    "s",
    "ok",
    "okay",
    "isso",
    "certo",
    "confirmo",
    "confirmar",
    "confirmado",
    "confirma",
    "pode ser",
    "pode",
    "pode agendar",
    "pode confirmar",
    "fechado",
    "beleza",
    "perfeito",
    "yes",
];

/// Short replies that accept the summary the assistant just sent.
pub fn is_affirmative(text: &str) -> bool {
    let stripped: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let normalized = catalog::normalize(&stripped);
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        return true;
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    matches!(words.first(), Some(&"sim") | Some(&"ok"))
        && words.len() <= 4
        && !words.iter().any(|w| matches!(*w, "nao" | "mas" | "mudar" | "trocar"))
}

/// Service and professional ids for free-text names, falling back to the company's
/// configured defaults when a name is missing or does not match.
pub fn resolve_catalog_ids(
    conn: &Connection,
    company: &Company,
    service_name: &str,
    professional_name: Option<&str>,
) -> anyhow::Result<(Option<i64>, Option<i64>)> {
    let service_id = match resolve_service(conn, company.id, service_name)? {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(
                company_id = company.id,
                service = service_name,
                fallback = ?company.default_service_id,
                "service not found, using company default"
            );
            company.default_service_id
        }
    };

    let professional_id = match professional_name {
        Some(name) => match resolve_professional(conn, company.id, name)? {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(
                    company_id = company.id,
                    professional = name,
                    fallback = ?company.default_professional_id,
                    "professional not found, using company default"
                );
                company.default_professional_id
            }
        },
        None => company.default_professional_id,
    };

    Ok((service_id, professional_id))
}

pub fn tomorrow() -> NaiveDate {
    (Utc::now() + Duration::days(1)).date_naive()
}

/// Everything the store needs to record one appointment.
pub struct NewAppointment<'a> {
    pub client_name: &'a str,
    pub client_phone: &'a str,
    pub service_id: Option<i64>,
    pub professional_id: Option<i64>,
    pub date: NaiveDate,
    pub time: &'a str,
    pub source_message_id: Option<i64>,
}

pub fn persist_appointment(
    conn: &Connection,
    company_id: i64,
    new: &NewAppointment,
) -> anyhow::Result<Appointment> {
    let client_id = queries::upsert_client(conn, company_id, new.client_name, new.client_phone)?;

    let appointment = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        company_id,
        client_id,
        service_id: new.service_id,
        professional_id: new.professional_id,
        date: new.date,
        time: new.time.to_string(),
        status: AppointmentStatus::Confirmed,
        source_message_id: new.source_message_id,
        created_at: Utc::now().naive_utc(),
    };
    queries::create_appointment(conn, &appointment)?;

    tracing::info!(
        company_id,
        appointment_id = %appointment.id,
        date = %appointment.date,
        time = %appointment.time,
        "appointment created"
    );
    Ok(appointment)
}

/// Turn the latest confirmation in a conversation into a stored appointment.
pub fn book_from_history(
    conn: &Connection,
    company: &Company,
    client_phone: &str,
    conversation_id: i64,
    history_window: i64,
) -> Result<BookingOutcome, BookingError> {
    let messages = queries::recent_messages(conn, conversation_id, history_window)?;
    let mut draft = find_latest_confirmation(&messages)?;

    if let Some(existing) = queries::find_appointment_by_source(conn, draft.source_message_id)? {
        tracing::info!(
            appointment_id = %existing.id,
            source_message_id = draft.source_message_id,
            "confirmation already booked"
        );
        return Ok(BookingOutcome::AlreadyBooked(existing));
    }

    let (service_id, professional_id) = resolve_catalog_ids(
        conn,
        company,
        &draft.service_name,
        draft.professional_name.as_deref(),
    )?;
    draft.service_id = service_id;
    draft.professional_id = professional_id;

    let date = draft.appointment_date.unwrap_or_else(|| {
        tracing::warn!(
            raw = %draft.appointment_date_raw,
            "unusable appointment date, defaulting to tomorrow"
        );
        tomorrow()
    });

    let appointment = persist_appointment(
        conn,
        company.id,
        &NewAppointment {
            client_name: &draft.client_name,
            client_phone,
            service_id,
            professional_id,
            date,
            time: &draft.appointment_time,
            source_message_id: Some(draft.source_message_id),
        },
    )?;

    Ok(BookingOutcome::Booked { appointment, draft })
}

fn booked_reply(appointment: &Appointment, draft: &BookingDraft) -> String {
    let first_name = draft.client_name.split_whitespace().next().unwrap_or("");
    format!(
        "✅ Agendamento confirmado, {first_name}! {} em {} às {}. Até lá!",
        draft.service_name,
        appointment.date.format("%d/%m/%Y"),
        appointment.time,
    )
}

fn already_booked_reply(appointment: &Appointment) -> String {
    format!(
        "Seu horário de {} às {} já está confirmado. 😉",
        appointment.date.format("%d/%m/%Y"),
        appointment.time,
    )
}

/// Handle one inbound WhatsApp message and return the reply to send back.
pub async fn process_message(
    state: &Arc<AppState>,
    company: &Company,
    from_phone: &str,
    text: &str,
) -> anyhow::Result<String> {
    let conversation_id = {
        let db = state.db()?;
        let conversation_id = queries::get_or_create_conversation(&db, company.id, from_phone)?;
        queries::insert_message(&db, conversation_id, Role::User, text)?;
        conversation_id
    };

    if is_affirmative(text) {
        let outcome = {
            let db = state.db()?;
            book_from_history(
                &db,
                company,
                from_phone,
                conversation_id,
                state.config.history_window,
            )
        };

        let reply = match outcome {
            Ok(BookingOutcome::Booked { appointment, draft }) => {
                Some(booked_reply(&appointment, &draft))
            }
            Ok(BookingOutcome::AlreadyBooked(appointment)) => {
                Some(already_booked_reply(&appointment))
            }
            Err(BookingError::NoConfirmation(e)) => {
                tracing::info!(phone = from_phone, reason = %e, "affirmative reply without a confirmation");
                None
            }
            Err(BookingError::Store(e)) => return Err(e),
        };

        if let Some(reply) = reply {
            let db = state.db()?;
            queries::insert_message(&db, conversation_id, Role::Assistant, &reply)?;
            return Ok(reply);
        }
    }

    let (history, services, professionals) = {
        let db = state.db()?;
        (
            queries::recent_messages(&db, conversation_id, state.config.history_window)?,
            queries::list_services(&db, company.id)?,
            queries::list_professionals(&db, company.id)?,
        )
    };

    let reply = generate_reply(
        state.llm.as_ref(),
        company,
        &services,
        &professionals,
        &history,
    )
    .await?;

    {
        let db = state.db()?;
        queries::insert_message(&db, conversation_id, Role::Assistant, &reply)?;
    }

    Ok(reply)
}
