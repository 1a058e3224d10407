use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Appointment, AppointmentStatus, Client, Company, Message, Professional, Role, Service,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_string() -> String {
    Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

// ── Companies ──

fn parse_company_row(row: &rusqlite::Row) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        whatsapp_number: row.get(2)?,
        default_service_id: row.get(3)?,
        default_professional_id: row.get(4)?,
    })
}

pub fn get_company(conn: &Connection, id: i64) -> anyhow::Result<Option<Company>> {
    let company = conn
        .query_row(
            "SELECT id, name, whatsapp_number, default_service_id, default_professional_id
             FROM companies WHERE id = ?1",
            params![id],
            parse_company_row,
        )
        .optional()?;
    Ok(company)
}

pub fn get_company_by_whatsapp(
    conn: &Connection,
    whatsapp_number: &str,
) -> anyhow::Result<Option<Company>> {
    let company = conn
        .query_row(
            "SELECT id, name, whatsapp_number, default_service_id, default_professional_id
             FROM companies WHERE whatsapp_number = ?1",
            params![whatsapp_number],
            parse_company_row,
        )
        .optional()?;
    Ok(company)
}

/// Insert or rename the company that owns `whatsapp_number`.
pub fn upsert_company(conn: &Connection, name: &str, whatsapp_number: &str) -> anyhow::Result<i64> {
    let id = conn.query_row(
        "INSERT INTO companies (name, whatsapp_number) VALUES (?1, ?2)
         ON CONFLICT(whatsapp_number) DO UPDATE SET name = excluded.name
         RETURNING id",
        params![name, whatsapp_number],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn set_company_defaults(
    conn: &Connection,
    company_id: i64,
    default_service_id: Option<i64>,
    default_professional_id: Option<i64>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE companies SET default_service_id = ?1, default_professional_id = ?2 WHERE id = ?3",
        params![default_service_id, default_professional_id, company_id],
    )?;
    Ok(count > 0)
}

// ── Services & Professionals ──

pub fn list_services(conn: &Connection, company_id: i64) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, company_id, name, price_cents, duration_minutes
         FROM services WHERE company_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![company_id], |row| {
        Ok(Service {
            id: row.get(0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            duration_minutes: row.get(4)?,
        })
    })?;

    let mut services = vec![];
    for row in rows {
        services.push(row?);
    }
    Ok(services)
}

pub fn upsert_service(
    conn: &Connection,
    company_id: i64,
    name: &str,
    price_cents: Option<i64>,
    duration_minutes: i32,
) -> anyhow::Result<i64> {
    let id = conn.query_row(
        "INSERT INTO services (company_id, name, price_cents, duration_minutes) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(company_id, name) DO UPDATE SET
           price_cents = excluded.price_cents,
           duration_minutes = excluded.duration_minutes
         RETURNING id",
        params![company_id, name, price_cents, duration_minutes],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn list_professionals(conn: &Connection, company_id: i64) -> anyhow::Result<Vec<Professional>> {
    let mut stmt = conn.prepare(
        "SELECT id, company_id, name FROM professionals WHERE company_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![company_id], |row| {
        Ok(Professional {
            id: row.get(0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
        })
    })?;

    let mut professionals = vec![];
    for row in rows {
        professionals.push(row?);
    }
    Ok(professionals)
}

pub fn upsert_professional(conn: &Connection, company_id: i64, name: &str) -> anyhow::Result<i64> {
    let id = conn.query_row(
        "INSERT INTO professionals (company_id, name) VALUES (?1, ?2)
         ON CONFLICT(company_id, name) DO UPDATE SET name = excluded.name
         RETURNING id",
        params![company_id, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Whether `service_id` and `professional_id` (when given) belong to `company_id`.
pub fn catalog_ids_belong_to(
    conn: &Connection,
    company_id: i64,
    service_id: Option<i64>,
    professional_id: Option<i64>,
) -> anyhow::Result<bool> {
    if let Some(id) = service_id {
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM services WHERE id = ?1 AND company_id = ?2",
            params![id, company_id],
            |row| row.get(0),
        )?;
        if !found {
            return Ok(false);
        }
    }
    if let Some(id) = professional_id {
        let found: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM professionals WHERE id = ?1 AND company_id = ?2",
            params![id, company_id],
            |row| row.get(0),
        )?;
        if !found {
            return Ok(false);
        }
    }
    Ok(true)
}

// ── Clients ──

/// Insert the client or refresh its name; returns the client id.
pub fn upsert_client(
    conn: &Connection,
    company_id: i64,
    name: &str,
    phone: &str,
) -> anyhow::Result<i64> {
    let id = conn.query_row(
        "INSERT INTO clients (company_id, name, phone) VALUES (?1, ?2, ?3)
         ON CONFLICT(company_id, phone) DO UPDATE SET name = excluded.name
         RETURNING id",
        params![company_id, name, phone],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_client(conn: &Connection, id: i64) -> anyhow::Result<Option<Client>> {
    let client = conn
        .query_row(
            "SELECT id, company_id, name, phone FROM clients WHERE id = ?1",
            params![id],
            |row| {
                Ok(Client {
                    id: row.get(0)?,
                    company_id: row.get(1)?,
                    name: row.get(2)?,
                    phone: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(client)
}

// ── Conversations & Messages ──

pub fn get_or_create_conversation(
    conn: &Connection,
    company_id: i64,
    client_phone: &str,
) -> anyhow::Result<i64> {
    let id = conn.query_row(
        "INSERT INTO conversations (company_id, client_phone) VALUES (?1, ?2)
         ON CONFLICT(company_id, client_phone) DO UPDATE SET client_phone = excluded.client_phone
         RETURNING id",
        params![company_id, client_phone],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn insert_message(
    conn: &Connection,
    conversation_id: i64,
    role: Role,
    content: &str,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO messages (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, role.as_str(), content, now_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The `limit` most recent messages of a conversation, newest first.
pub fn recent_messages(
    conn: &Connection,
    conversation_id: i64,
    limit: i64,
) -> anyhow::Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages WHERE conversation_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![conversation_id, limit], |row| {
        let role: String = row.get(2)?;
        let created_at: String = row.get(4)?;
        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: Role::parse(&role),
            content: row.get(3)?,
            created_at: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT)
                .unwrap_or_else(|_| Utc::now().naive_utc()),
        })
    })?;

    let mut messages = vec![];
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, company_id, client_id, service_id, professional_id, date, time, status, source_message_id, created_at";

pub fn create_appointment(conn: &Connection, appointment: &Appointment) -> anyhow::Result<()> {
    let date = appointment.date.format("%Y-%m-%d").to_string();
    let created_at = appointment.created_at.format(TIMESTAMP_FORMAT).to_string();

    conn.execute(
        "INSERT INTO appointments (id, company_id, client_id, service_id, professional_id, date, time, status, source_message_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            appointment.id,
            appointment.company_id,
            appointment.client_id,
            appointment.service_id,
            appointment.professional_id,
            date,
            appointment.time,
            appointment.status.as_str(),
            appointment.source_message_id,
            created_at,
        ],
    )?;
    Ok(())
}

/// The live appointment booked from a given confirmation message, if any.
pub fn find_appointment_by_source(
    conn: &Connection,
    source_message_id: i64,
) -> anyhow::Result<Option<Appointment>> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE source_message_id = ?1 AND status != 'cancelled'"
    );
    let result = conn
        .query_row(&sql, params![source_message_id], |row| Ok(parse_appointment_row(row)))
        .optional()?;

    match result {
        Some(appointment) => Ok(Some(appointment?)),
        None => Ok(None),
    }
}

pub fn get_appointment_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_appointment_row(row)))
        .optional()?;

    match result {
        Some(appointment) => Ok(Some(appointment?)),
        None => Ok(None),
    }
}

pub fn list_appointments(
    conn: &Connection,
    company_id: i64,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Appointment>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE company_id = ?1 AND status = ?2 ORDER BY date DESC, time DESC LIMIT ?3"
            ),
            vec![
                Box::new(company_id) as Box<dyn rusqlite::types::ToSql>,
                Box::new(status.to_string()),
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE company_id = ?1 ORDER BY date DESC, time DESC LIMIT ?2"
            ),
            vec![
                Box::new(company_id) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &str,
    status: &AppointmentStatus,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(count > 0)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let date_str: String = row.get(5)?;
    let status_str: String = row.get(7)?;
    let created_at_str: String = row.get(9)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| Utc::now().naive_utc());

    Ok(Appointment {
        id: row.get(0)?,
        company_id: row.get(1)?,
        client_id: row.get(2)?,
        service_id: row.get(3)?,
        professional_id: row.get(4)?,
        date,
        time: row.get(6)?,
        status: AppointmentStatus::parse(&status_str),
        source_message_id: row.get(8)?,
        created_at,
    })
}
