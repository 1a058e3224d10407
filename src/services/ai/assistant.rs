use crate::models::{Company, Message, Professional, Service};
use crate::services::ai::{ChatMessage, LlmProvider};
use crate::services::extractor::render_summary;

const SYSTEM_PROMPT: &str = r#"Você é a assistente virtual de agendamentos pelo WhatsApp. Converse em português do Brasil, de forma simpática e objetiva.

Seu objetivo é coletar, um de cada vez, os dados do agendamento:
- nome do cliente
- serviço desejado (somente serviços da lista abaixo)
- profissional (opcional, somente da lista abaixo)
- data no formato DD/MM/AAAA
- horário no formato HH:MM (24 horas)

Quando tiver TODOS os dados, envie o resumo exatamente neste formato, sem alterar os rótulos:

{TEMPLATE}

Nunca envie o resumo com algum dado faltando. Se o cliente quiser mudar algo depois do resumo, envie um novo resumo completo.
"#;

fn catalog_context(company: &Company, services: &[Service], professionals: &[Professional]) -> String {
    let services = services
        .iter()
        .map(|s| match s.price_cents {
            Some(cents) => format!("- {} (R$ {},{:02})", s.name, cents / 100, cents % 100),
            None => format!("- {}", s.name),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let professionals = professionals
        .iter()
        .map(|p| format!("- {}", p.name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Empresa: {}\n\nServiços:\n{}\n\nProfissionais:\n{}",
        company.name,
        if services.is_empty() { "- (nenhum cadastrado)" } else { services.as_str() },
        if professionals.is_empty() { "- (qualquer um)" } else { professionals.as_str() },
    )
}

pub fn build_system_prompt(
    company: &Company,
    services: &[Service],
    professionals: &[Professional],
) -> String {
    let template = render_summary(
        "Maria Silva",
        "Corte",
        Some("João"),
        "05/07/2025",
        "14:30",
    );
    let prompt = SYSTEM_PROMPT.replace("{TEMPLATE}", &template);
    format!(
        "{prompt}\nDados da empresa:\n{}",
        catalog_context(company, services, professionals)
    )
}

/// Ask the model for the next assistant turn. `history` is newest-first, as read from
/// the store.
pub async fn generate_reply(
    llm: &dyn LlmProvider,
    company: &Company,
    services: &[Service],
    professionals: &[Professional],
    history: &[Message],
) -> anyhow::Result<String> {
    let messages: Vec<ChatMessage> = history
        .iter()
        .rev()
        .map(|m| ChatMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect();

    let system = build_system_prompt(company, services, professionals);
    let reply = llm.chat(&system, &messages).await?;

    if reply.trim().is_empty() {
        anyhow::bail!("assistant returned an empty reply");
    }
    Ok(reply)
}
