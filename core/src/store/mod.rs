//! SQLite-backed authoritative store
//!
//! One connection guarded by an async mutex. Every operation is `async` and
//! multi-statement units run inside a single transaction. The store is split
//! by component:
//! - `pages`: Page Registry (slug derivation, publish invariant)
//! - `members`: Membership Store (roster, uniqueness, reorder)
//! - `reasons`: Reason Set Store (catalog, full-replace assignments)

mod members;
mod pages;
mod reasons;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::errors::{Result, RosterError};
use crate::gate::ContactDirectory;
use crate::model::Contact;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Authoritative store for pages, members, reasons and the contact table.
pub struct RosterStore {
    conn: Mutex<Connection>,
}

impl RosterStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                RosterError::storage_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            RosterError::storage_with_source(format!("failed to open db at {}", path.display()), e)
        })?;
        Self::apply_schema(&conn)?;

        tracing::debug!(path = %path.display(), "Roster DB initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests and embedded callers.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RosterError::storage_with_source("failed to open in-memory db", e))?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn apply_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| RosterError::storage_with_source("failed to apply schema", e))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // contacts
    // ─────────────────────────────────────────────────────────────────────────────

    /// Insert or refresh a contact row. The contact directory is owned
    /// elsewhere; this is how its records are mirrored into the store.
    pub async fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO contacts (id, name, title, photo_url, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = ?2,
                title = ?3,
                photo_url = ?4,
                is_active = ?5
            "#,
            params![
                contact.id,
                contact.name,
                contact.title,
                contact.photo_url,
                contact.is_active
            ],
        )
        .map_err(db_err("failed to upsert contact"))?;
        Ok(())
    }

    pub async fn contact(&self, contact_id: &str) -> Result<Option<Contact>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, name, title, photo_url, is_active FROM contacts WHERE id = ?1",
            params![contact_id],
            |row| {
                Ok(Contact {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    title: row.get(2)?,
                    photo_url: row.get(3)?,
                    is_active: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(db_err("failed to get contact"))
    }

    #[cfg(test)]
    pub(crate) async fn raw_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

#[async_trait]
impl ContactDirectory for RosterStore {
    async fn get_contact(&self, contact_id: &str) -> Result<Contact> {
        self.contact(contact_id)
            .await?
            .ok_or_else(|| RosterError::not_found("contact", contact_id))
    }
}

/// Wrap a rusqlite error with a short context message.
pub(crate) fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> RosterError {
    move |e| RosterError::storage_with_source(context, e)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Read an RFC 3339 column as a UTC timestamp.
pub(crate) fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
