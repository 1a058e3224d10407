//! Reads booking details back out of the assistant's confirmation summary.
//!
//! The assistant closes every booking with a labelled summary ("Nome:", "Serviço:",
//! "Data:", "Horário:") and waits for the client to say yes. When that yes arrives, the
//! conversation history is scanned newest-first for the latest complete summary and its
//! fields are lifted into a [`BookingDraft`].
//!
//! Labels are described by a small table ([`FIELD_SPECS`]) and every field goes through
//! the same capture routine, so adding a label alias never needs a new regex by hand.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::{BookingDraft, Message, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no appointment confirmation found")]
    NotFound,

    #[error("invalid date: {0}")]
    InvalidDate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Service,
    Professional,
    Date,
    Time,
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Text,
    Date,
    Time,
}

/// Where a captured value ends, on top of the line break and the next known label.
#[derive(Debug, Clone, Copy)]
enum Stop {
    Literal(&'static str),
    /// First emoji/pictograph after the value has started.
    Icon,
}

struct FieldSpec {
    field: Field,
    aliases: &'static [&'static str],
    kind: ValueKind,
    stops: &'static [Stop],
    required: bool,
}

const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec {
        field: Field::Name,
        aliases: &["nome do cliente", "nome", "cliente"],
        kind: ValueKind::Text,
        stops: &[Stop::Icon, Stop::Literal("R$"), Stop::Literal("(")],
        required: true,
    },
    FieldSpec {
        field: Field::Service,
        aliases: &["serviço", "servico"],
        kind: ValueKind::Text,
        stops: &[Stop::Literal("R$"), Stop::Literal("("), Stop::Icon],
        required: true,
    },
    FieldSpec {
        field: Field::Professional,
        aliases: &["profissional", "barbeiro", "atendente"],
        kind: ValueKind::Text,
        stops: &[Stop::Literal("R$"), Stop::Literal("("), Stop::Icon],
        required: false,
    },
    FieldSpec {
        field: Field::Date,
        aliases: &["data", "dia"],
        kind: ValueKind::Date,
        stops: &[],
        required: true,
    },
    FieldSpec {
        field: Field::Time,
        aliases: &["horário", "horario", "hora"],
        kind: ValueKind::Time,
        stops: &[],
        required: true,
    },
];

/// Characters left behind by the stop delimiters or by WhatsApp formatting.
const STRAY: &[char] = &['-', ':', ',', ';', '.', '*', '|', '_', '"', '\'', '–', '—'];

struct CompiledField {
    spec: &'static FieldSpec,
    label: Regex,
}

fn label_pattern<'a>(aliases: impl Iterator<Item = &'a str>) -> String {
    let mut aliases: Vec<&str> = aliases.collect();
    // Longest first so "nome do cliente" wins over "nome"
    aliases.sort_by_key(|a| std::cmp::Reverse(a.chars().count()));
    let alternation = aliases
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    format!(r"(?i)\**\b(?:{alternation})\b\**\s*:\**")
}

static FIELDS: LazyLock<Vec<CompiledField>> = LazyLock::new(|| {
    FIELD_SPECS
        .iter()
        .map(|spec| CompiledField {
            spec,
            label: Regex::new(&label_pattern(spec.aliases.iter().copied()))
                .expect("valid label regex"),
        })
        .collect()
});

static ANY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    let all = FIELD_SPECS.iter().flat_map(|s| s.aliases.iter().copied());
    Regex::new(&label_pattern(all)).expect("valid label regex")
});

static DATE_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{4})(?:\D|$)").expect("valid date regex")
});

static TIME_IN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)(?:\D|$)").expect("valid time regex")
});

static TIME_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$").expect("valid time regex")
});

static DATE_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid date regex")
});

/// Fields lifted from one confirmation message, before any store lookup.
#[derive(Debug, Default)]
struct Extracted {
    name: Option<String>,
    service: Option<String>,
    professional: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

impl Extracted {
    fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Service => &mut self.service,
            Field::Professional => &mut self.professional,
            Field::Date => &mut self.date,
            Field::Time => &mut self.time,
        };
        *slot = Some(value);
    }
}

/// Emoji and pictographs, with the variation selector, joiner and keycap marks that ride
/// along with them. Typographic punctuation (’ – ·) is not an icon.
static ICON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{Extended_Pictographic}\x{FE0F}\x{200D}\x{20E3}]$").expect("valid icon regex")
});

fn is_icon(c: char) -> bool {
    let mut buf = [0u8; 4];
    !c.is_ascii() && ICON.is_match(c.encode_utf8(&mut buf))
}

fn has_label(text: &str, field: Field) -> bool {
    FIELDS
        .iter()
        .find(|f| f.spec.field == field)
        .map(|f| f.label.is_match(text))
        .unwrap_or(false)
}

/// True when `text` carries all four mandatory labels: name, service, date and time.
pub fn is_confirmation(text: &str) -> bool {
    [Field::Name, Field::Service, Field::Date, Field::Time]
        .into_iter()
        .all(|field| has_label(text, field))
}

fn value_region<'a>(text: &'a str, start: usize, stops: &[Stop]) -> &'a str {
    let rest = &text[start..];
    let mut end = rest.find('\n').unwrap_or(rest.len());

    if let Some(next) = ANY_LABEL.find_at(text, start) {
        end = end.min(next.start() - start);
    }

    for stop in stops {
        let window = &rest[..end];
        let pos = match stop {
            Stop::Literal(delimiter) => window.find(delimiter),
            Stop::Icon => window
                .char_indices()
                .skip_while(|(_, c)| !c.is_alphanumeric())
                .find(|(_, c)| is_icon(*c))
                .map(|(i, _)| i),
        };
        if let Some(pos) = pos {
            end = end.min(pos);
        }
    }

    &rest[..end]
}

fn clean(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || STRAY.contains(&c) || is_icon(c))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn capture(text: &str, field: &CompiledField) -> Option<String> {
    let label = field.label.find(text)?;
    let region = value_region(text, label.end(), field.spec.stops);

    match field.spec.kind {
        ValueKind::Text => Some(clean(region)).filter(|v| !v.is_empty()),
        ValueKind::Date => DATE_IN_TEXT
            .captures(region)
            .map(|caps| caps[1].to_string()),
        ValueKind::Time => TIME_IN_TEXT.captures(region).and_then(|caps| {
            let hour: u32 = caps[1].parse().ok()?;
            Some(format!("{hour:02}:{}", &caps[2]))
        }),
    }
}

fn extract(text: &str) -> Result<Extracted, Field> {
    let mut extracted = Extracted::default();

    for field in FIELDS.iter() {
        match capture(text, field) {
            Some(value) => extracted.set(field.spec.field, value),
            None if field.spec.required => return Err(field.spec.field),
            None => {}
        }
    }

    Ok(extracted)
}

/// Scan `messages` (newest first) for the latest assistant confirmation and lift a draft
/// out of it. Older messages are never looked at once a confirmation is found, even when
/// that confirmation turns out to be unreadable.
pub fn find_latest_confirmation(messages: &[Message]) -> Result<BookingDraft, ExtractError> {
    let candidate = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .find(|m| is_confirmation(&m.content))
        .ok_or(ExtractError::NotFound)?;

    let fields = extract(&candidate.content).map_err(|field| {
        tracing::warn!(
            message_id = candidate.id,
            field = ?field,
            "confirmation message is missing a required value"
        );
        ExtractError::NotFound
    })?;

    // extract() only succeeds when every required field is present
    let (Some(client_name), Some(service_name), Some(date_raw), Some(time)) =
        (fields.name, fields.service, fields.date, fields.time)
    else {
        return Err(ExtractError::NotFound);
    };

    let appointment_date = match resolve_date(&date_raw) {
        Ok(date) => Some(date),
        Err(e) => {
            tracing::warn!(message_id = candidate.id, error = %e, "confirmation has an unusable date");
            None
        }
    };

    tracing::debug!(message_id = candidate.id, "extracted booking draft");

    Ok(BookingDraft {
        client_name,
        service_name,
        service_id: None,
        professional_name: fields.professional,
        professional_id: None,
        appointment_date_raw: date_raw,
        appointment_date,
        appointment_time: time,
        source_message_id: candidate.id,
    })
}

/// Parse a Brazilian `DD/MM/YYYY` date (day first).
pub fn resolve_date(raw: &str) -> Result<NaiveDate, ExtractError> {
    let invalid = || ExtractError::InvalidDate(raw.to_string());

    let caps = DATE_EXACT.captures(raw.trim()).ok_or_else(invalid)?;
    let day: u32 = caps[1].parse().map_err(|_| invalid())?;
    let month: u32 = caps[2].parse().map_err(|_| invalid())?;
    let year: i32 = caps[3].parse().map_err(|_| invalid())?;

    if day > 31 || month > 12 {
        return Err(invalid());
    }

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Normalize `H:MM`/`HH:MM` to zero-padded 24-hour `HH:MM`.
pub fn normalize_time(raw: &str) -> Option<String> {
    let caps = TIME_EXACT.captures(raw.trim())?;
    let hour: u32 = caps[1].parse().ok()?;
    Some(format!("{hour:02}:{}", &caps[2]))
}

/// The summary layout the assistant is asked to produce; [`find_latest_confirmation`]
/// reads it back.
pub fn render_summary(
    client_name: &str,
    service: &str,
    professional: Option<&str>,
    date: &str,
    time: &str,
) -> String {
    let mut summary = format!(
        "📋 *Resumo do agendamento*\n👤 Nome: {client_name}\n💇 Serviço: {service}\n"
    );
    if let Some(professional) = professional {
        summary.push_str(&format!("✂️ Profissional: {professional}\n"));
    }
    summary.push_str(&format!(
        "📅 Data: {date}\n🕐 Horário: {time}\n\nPosso confirmar? Responda *sim* para agendar."
    ));
    summary
}
