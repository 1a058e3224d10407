pub mod twilio;

use async_trait::async_trait;

/// Outbound WhatsApp gateway. `from` is the company's number, `to` the client's; both
/// plain E.164.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, from: &str, to: &str, body: &str) -> anyhow::Result<()>;
}

/// Twilio addresses WhatsApp endpoints as `whatsapp:+5511...`.
pub fn whatsapp_address(phone: &str) -> String {
    if phone.starts_with("whatsapp:") {
        phone.to_string()
    } else {
        format!("whatsapp:{phone}")
    }
}

pub fn strip_whatsapp_prefix(address: &str) -> &str {
    address.strip_prefix("whatsapp:").unwrap_or(address).trim()
}
