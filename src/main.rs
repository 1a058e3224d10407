use std::sync::{Arc, Mutex};

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use agenday::config::AppConfig;
use agenday::db;
use agenday::services::ai::ollama::OllamaProvider;
use agenday::services::messaging::twilio::TwilioWhatsAppProvider;
use agenday::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.twilio_account_sid.is_empty() {
        tracing::warn!("TWILIO_ACCOUNT_SID not set, outbound WhatsApp messages will fail");
    }
    tracing::info!(
        "using Ollama at {} (model: {})",
        config.ollama_url,
        config.ollama_model
    );

    let llm = OllamaProvider::new(config.ollama_url.clone(), config.ollama_model.clone());
    let messaging = TwilioWhatsAppProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        llm: Box::new(llm),
        messaging: Box::new(messaging),
    });

    let app = agenday::build_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
