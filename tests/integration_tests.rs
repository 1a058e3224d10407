use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use agenday::config::AppConfig;
use agenday::db;
use agenday::db::queries;
use agenday::handlers::webhook::twilio_signature;
use agenday::services::ai::{ChatMessage, LlmProvider};
use agenday::services::extractor::render_summary;
use agenday::services::messaging::MessagingProvider;
use agenday::state::AppState;

const COMPANY_NUMBER: &str = "+5511999990000";
const CLIENT_NUMBER: &str = "+5511988887777";

// ── Mock Providers ──

struct MockLlm;

#[async_trait]
impl LlmProvider for MockLlm {
    async fn chat(&self, _system_prompt: &str, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        if last.contains("agendar") {
            Ok(render_summary("Maria Silva", "corte de cabelo", Some("Carlos"), "05/07/2025", "14:30"))
        } else {
            Ok("Olá! Como posso ajudar?".to_string())
        }
    }
}

type Sent = Arc<Mutex<Vec<(String, String, String)>>>;

struct MockMessaging {
    sent: Sent,
}

#[async_trait]
impl MessagingProvider for MockMessaging {
    async fn send_message(&self, from: &str, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((from.to_string(), to.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        ollama_url: "http://localhost:11434".to_string(),
        ollama_model: "test".to_string(),
        twilio_account_sid: "".to_string(),
        twilio_auth_token: "".to_string(), // empty = skip signature validation
        history_window: 50,
    }
}

fn test_state_with(config: AppConfig) -> (Arc<AppState>, Sent) {
    let conn = db::init_db(":memory:").unwrap();
    let sent: Sent = Arc::new(Mutex::new(vec![]));
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        llm: Box::new(MockLlm),
        messaging: Box::new(MockMessaging {
            sent: Arc::clone(&sent),
        }),
    });
    (state, sent)
}

fn test_state() -> (Arc<AppState>, Sent) {
    test_state_with(test_config())
}

fn test_app(state: Arc<AppState>) -> Router {
    agenday::build_router(state)
}

/// Register the company behind COMPANY_NUMBER with one service and one professional.
fn seed_company(state: &AppState) -> (i64, i64, i64) {
    let db = state.db.lock().unwrap();
    let company_id = queries::upsert_company(&db, "Barbearia Central", COMPANY_NUMBER).unwrap();
    let service_id =
        queries::upsert_service(&db, company_id, "Corte de Cabelo Masculino", Some(5000), 30).unwrap();
    let professional_id = queries::upsert_professional(&db, company_id, "Carlos Souza").unwrap();
    (company_id, service_id, professional_id)
}

fn encode(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('+', "%2B")
        .replace(':', "%3A")
        .replace('&', "%26")
        .replace(' ', "+")
}

fn whatsapp_request(to: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook/whatsapp")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "From={}&To={}&Body={}&MessageSid=SM123",
            encode(&format!("whatsapp:{CLIENT_NUMBER}")),
            encode(&format!("whatsapp:{to}")),
            encode(body),
        )))
        .unwrap()
}

fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", "Bearer test-token");
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let (state, _) = test_state();
    let res = test_app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "ok");
}

// ── Webhook Tests ──

#[tokio::test]
async fn test_unknown_company_number_ignored() {
    let (state, sent) = test_state();
    seed_company(&state);

    let res = test_app(state)
        .oneshot(whatsapp_request("+5521000000000", "oi"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(String::from_utf8(body.to_vec()).unwrap(), "<Response></Response>");
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_general_message_gets_assistant_reply() {
    let (state, sent) = test_state();
    seed_company(&state);

    let res = test_app(state)
        .oneshot(whatsapp_request(COMPANY_NUMBER, "oi"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, COMPANY_NUMBER);
    assert_eq!(sent[0].1, CLIENT_NUMBER);
    assert_eq!(sent[0].2, "Olá! Como posso ajudar?");
}

#[tokio::test]
async fn test_confirmation_books_appointment_once() {
    let (state, sent) = test_state();
    let (company_id, service_id, professional_id) = seed_company(&state);

    for text in ["quero agendar um corte", "sim", "sim"] {
        let res = test_app(state.clone())
            .oneshot(whatsapp_request(COMPANY_NUMBER, text))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    {
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].2.contains("Nome: Maria Silva"));
        assert!(sent[1].2.starts_with("✅ Agendamento confirmado, Maria!"));
        assert!(sent[1].2.contains("05/07/2025 às 14:30"));
        assert!(sent[2].2.contains("já está confirmado"));
    }

    let db = state.db.lock().unwrap();
    let appointments = queries::list_appointments(&db, company_id, None, 10).unwrap();
    assert_eq!(appointments.len(), 1);
    let appointment = &appointments[0];
    assert_eq!(appointment.service_id, Some(service_id));
    assert_eq!(appointment.professional_id, Some(professional_id));
    assert_eq!(appointment.date.format("%d/%m/%Y").to_string(), "05/07/2025");
    assert_eq!(appointment.time, "14:30");
}

#[tokio::test]
async fn test_affirmative_without_summary_goes_to_assistant() {
    let (state, sent) = test_state();
    let (company_id, _, _) = seed_company(&state);

    let res = test_app(state.clone())
        .oneshot(whatsapp_request(COMPANY_NUMBER, "ok"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(sent.lock().unwrap()[0].2, "Olá! Como posso ajudar?");
    let db = state.db.lock().unwrap();
    assert!(queries::list_appointments(&db, company_id, None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_rejects_missing_signature() {
    let mut config = test_config();
    config.twilio_auth_token = "secret".to_string();
    let (state, sent) = test_state_with(config);
    seed_company(&state);

    let res = test_app(state)
        .oneshot(whatsapp_request(COMPANY_NUMBER, "oi"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_accepts_signature_over_all_params() {
    let mut config = test_config();
    config.twilio_auth_token = "secret".to_string();
    let (state, sent) = test_state_with(config);
    seed_company(&state);

    let from = format!("whatsapp:{CLIENT_NUMBER}");
    let to = format!("whatsapp:{COMPANY_NUMBER}");
    let params = [
        ("From", from.as_str()),
        ("To", to.as_str()),
        ("Body", "oi"),
        ("MessageSid", "SM123"),
        ("AccountSid", "AC123"),
        ("NumMedia", "0"),
        ("ProfileName", "Maria"),
        ("WaId", "5511988887777"),
    ];
    let signature =
        twilio_signature("secret", "https://agenday.example/webhook/whatsapp", &params).unwrap();
    let body = params
        .iter()
        .map(|(k, v)| format!("{k}={}", encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let signed = |body: String| {
        Request::builder()
            .method("POST")
            .uri("/webhook/whatsapp")
            .header("Host", "agenday.example")
            .header("X-Twilio-Signature", signature.as_str())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    };

    let res = test_app(state.clone())
        .oneshot(signed(body.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(sent.lock().unwrap().len(), 1);

    let tampered = body.replace("ProfileName=Maria", "ProfileName=Outra");
    let res = test_app(state).oneshot(signed(tampered)).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(sent.lock().unwrap().len(), 1);
}

// ── Admin API Tests ──

#[tokio::test]
async fn test_admin_requires_auth() {
    let (state, _) = test_state();
    let (company_id, _, _) = seed_company(&state);

    let res = test_app(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/api/admin/companies/{company_id}/appointments"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = test_app(state)
        .oneshot(
            Request::builder()
                .uri(format!("/api/admin/companies/{company_id}/appointments"))
                .header("Authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_catalog_setup_is_idempotent() {
    let (state, _) = test_state();

    let mut ids = vec![];
    for _ in 0..2 {
        let res = test_app(state.clone())
            .oneshot(admin_request(
                "POST",
                "/api/admin/companies",
                Some(serde_json::json!({"name": "Salão Bela", "whatsapp_number": "+5511911112222"})),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        ids.push(body_json(res).await["id"].as_i64().unwrap());
    }
    assert_eq!(ids[0], ids[1]);
    let company_id = ids[0];

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/companies/{company_id}/services"),
            Some(serde_json::json!({"name": "Escova", "price_cents": 4000})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let service_id = body_json(res).await["id"].as_i64().unwrap();

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/companies/{company_id}/defaults"),
            Some(serde_json::json!({"default_service_id": service_id})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let db = state.db.lock().unwrap();
    let company = queries::get_company(&db, company_id).unwrap().unwrap();
    assert_eq!(company.default_service_id, Some(service_id));
    assert_eq!(company.default_professional_id, None);
}

#[tokio::test]
async fn test_admin_defaults_reject_foreign_ids() {
    let (state, _) = test_state();
    let (company_id, _, _) = seed_company(&state);
    let foreign_service = {
        let db = state.db.lock().unwrap();
        let other = queries::upsert_company(&db, "Outra", "+5521000000000").unwrap();
        queries::upsert_service(&db, other, "Barba", None, 20).unwrap()
    };

    let res = test_app(state)
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/companies/{company_id}/defaults"),
            Some(serde_json::json!({"default_service_id": foreign_service})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_manual_appointment_and_cancel() {
    let (state, _) = test_state();
    let (company_id, service_id, _) = seed_company(&state);

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/companies/{company_id}/appointments"),
            Some(serde_json::json!({
                "client_name": "João",
                "client_phone": "+5511977776666",
                "service_name": "corte de cabelo",
                "date": "32/01/2025",
                "time": "10:00",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/companies/{company_id}/appointments"),
            Some(serde_json::json!({
                "client_name": "João",
                "client_phone": "+5511977776666",
                "service_name": "corte de cabelo",
                "date": "5/7/2025",
                "time": "9:30",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let created = body_json(res).await;
    assert_eq!(created["service_id"], service_id);
    assert_eq!(created["date"], "2025-07-05");
    assert_eq!(created["time"], "09:30");
    assert_eq!(created["status"], "confirmed");
    assert_eq!(created["client_name"], "João");
    assert_eq!(created["client_phone"], "+5511977776666");
    let appointment_id = created["id"].as_str().unwrap().to_string();

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "POST",
            &format!("/api/admin/appointments/{appointment_id}/cancel"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = test_app(state.clone())
        .oneshot(admin_request(
            "GET",
            &format!("/api/admin/companies/{company_id}/appointments?status=cancelled"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let listed = body_json(res).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], appointment_id.as_str());

    let res = test_app(state)
        .oneshot(admin_request("POST", "/api/admin/appointments/missing/cancel", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
