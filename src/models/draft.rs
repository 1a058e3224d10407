use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Structured booking read back from an assistant confirmation message.
///
/// Only ever built from a message where all mandatory fields were found. The resolved
/// ids start empty and are filled in by the catalog lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingDraft {
    pub client_name: String,
    pub service_name: String,
    pub service_id: Option<i64>,
    pub professional_name: Option<String>,
    pub professional_id: Option<i64>,
    pub appointment_date_raw: String,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: String,
    pub source_message_id: i64,
}
