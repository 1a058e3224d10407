use serde::{Deserialize, Serialize};

/// A tenant. Inbound WhatsApp traffic is routed to a company by the number it was sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub whatsapp_number: String,
    pub default_service_id: Option<i64>,
    pub default_professional_id: Option<i64>,
}
