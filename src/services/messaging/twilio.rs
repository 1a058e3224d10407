use anyhow::Context;
use async_trait::async_trait;

use super::{whatsapp_address, MessagingProvider};

pub struct TwilioWhatsAppProvider {
    account_sid: String,
    auth_token: String,
    client: reqwest::Client,
}

impl TwilioWhatsAppProvider {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            account_sid,
            auth_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessagingProvider for TwilioWhatsAppProvider {
    async fn send_message(&self, from: &str, to: &str, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let to = whatsapp_address(to);
        let from = whatsapp_address(from);

        self.client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to.as_str()), ("From", from.as_str()), ("Body", body)])
            .send()
            .await
            .context("failed to send WhatsApp message via Twilio")?
            .error_for_status()
            .context("Twilio API returned error")?;

        tracing::debug!(to = %to, "sent WhatsApp message");
        Ok(())
    }
}
