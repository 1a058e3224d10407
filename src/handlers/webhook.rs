use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::db::queries;
use crate::services::booking;
use crate::services::messaging::strip_whatsapp_prefix;
use crate::state::AppState;

const FALLBACK_REPLY: &str =
    "Desculpe, tive um problema para responder agora. Pode tentar novamente em instantes?";

/// The fields the agent reads from a Twilio webhook. Twilio posts many more (AccountSid,
/// NumMedia, ProfileName, WaId, ...), and all of them are covered by the signature.
pub struct TwilioWebhookForm {
    pub from: String,
    pub to: String,
    pub body: String,
    pub message_sid: Option<String>,
}

impl TwilioWebhookForm {
    pub fn from_params(params: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        Some(Self {
            from: get("From")?,
            to: get("To")?,
            body: get("Body").unwrap_or_default(),
            message_sid: get("MessageSid"),
        })
    }
}

/// Base64 HMAC-SHA1 of the URL followed by every param as key+value, sorted by key.
pub fn twilio_signature(auth_token: &str, url: &str, params: &[(&str, &str)]) -> Option<String> {
    let mut data = url.to_string();
    let mut sorted_params = params.to_vec();
    sorted_params.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in &sorted_params {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(data.as_bytes());
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn validate_twilio_signature(
    auth_token: &str,
    signature: &str,
    url: &str,
    params: &[(&str, &str)],
) -> bool {
    twilio_signature(auth_token, url, params).is_some_and(|expected| expected == signature)
}

#[allow(clippy::result_large_err)]
fn check_signature(
    state: &AppState,
    headers: &HeaderMap,
    params: &[(String, String)],
) -> Result<(), Response> {
    // Empty auth token means local development: no signature to check
    if state.config.twilio_auth_token.is_empty() {
        return Ok(());
    }

    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!("missing X-Twilio-Signature header");
        return Err((StatusCode::FORBIDDEN, "Missing signature").into_response());
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get("host"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let url = format!("{proto}://{host}/webhook/whatsapp");

    let params: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    if !validate_twilio_signature(&state.config.twilio_auth_token, signature, &url, &params) {
        tracing::warn!("invalid Twilio signature");
        return Err((StatusCode::FORBIDDEN, "Invalid signature").into_response());
    }
    Ok(())
}

pub async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    if let Err(rejection) = check_signature(&state, &headers, &params) {
        return rejection;
    }

    let Some(form) = TwilioWebhookForm::from_params(&params) else {
        tracing::warn!("webhook without From or To, ignoring");
        return (StatusCode::BAD_REQUEST, "Missing From or To").into_response();
    };

    let from = strip_whatsapp_prefix(&form.from).to_string();
    let to = strip_whatsapp_prefix(&form.to).to_string();
    let body = form.body.trim();

    tracing::info!(from = %from, to = %to, sid = ?form.message_sid, "incoming WhatsApp message");

    if body.is_empty() {
        tracing::debug!(from = %from, "message without text, ignoring");
        return twiml_response();
    }

    let company = {
        let db = match state.db() {
            Ok(db) => db,
            Err(e) => {
                tracing::error!(error = %e, "database unavailable");
                return twiml_response();
            }
        };
        queries::get_company_by_whatsapp(&db, &to)
    };

    let company = match company {
        Ok(Some(company)) => company,
        Ok(None) => {
            tracing::warn!(to = %to, "no company registered for this number, ignoring");
            return twiml_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to look up company");
            return twiml_response();
        }
    };

    let reply = match booking::process_message(&state, &company, &from, body).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(error = %e, from = %from, company_id = company.id, "conversation processing failed");
            FALLBACK_REPLY.to_string()
        }
    };

    if let Err(e) = state
        .messaging
        .send_message(&company.whatsapp_number, &from, &reply)
        .await
    {
        tracing::error!(error = %e, from = %from, "failed to send reply");
    }

    twiml_response()
}

fn twiml_response() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        "<Response></Response>",
    )
        .into_response()
}
