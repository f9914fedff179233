//! Page Registry: page identity, field CRUD and the published-slug invariant.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{RosterStore, db_err, new_id, now_rfc3339, timestamp_column};
use crate::errors::{Result, RosterError};
use crate::model::{ContactPage, NewPage, PagePatch};
use crate::slug::{derive_slug, validate_area_code, validate_brand_color, validate_customer_name};

const PAGE_COLUMNS: &str = "id, customer_name, area_code, slug, brand_color, intro_text, \
                            logo_url, is_published, created_at";

fn page_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactPage> {
    Ok(ContactPage {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        area_code: row.get(2)?,
        slug: row.get(3)?,
        brand_color: row.get(4)?,
        intro_text: row.get(5)?,
        logo_url: row.get(6)?,
        is_published: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
    })
}

pub(crate) fn load_page(conn: &Connection, page_id: &str) -> Result<Option<ContactPage>> {
    conn.query_row(
        &format!("SELECT {PAGE_COLUMNS} FROM contact_pages WHERE id = ?1"),
        params![page_id],
        page_from_row,
    )
    .optional()
    .map_err(db_err("failed to get page"))
}

pub(crate) fn require_page(conn: &Connection, page_id: &str) -> Result<ContactPage> {
    load_page(conn, page_id)?.ok_or_else(|| RosterError::not_found("page", page_id))
}

/// Trim optional text fields; blank becomes `None`.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RosterStore {
    /// Create an unpublished page. The slug is derived here and never changes.
    pub async fn create_page(&self, new_page: NewPage) -> Result<ContactPage> {
        let customer_name = validate_customer_name(&new_page.customer_name)?;
        validate_area_code(&new_page.area_code)?;
        let brand_color = clean(new_page.brand_color);
        if let Some(color) = &brand_color {
            validate_brand_color(color)?;
        }

        let id = new_id();
        let slug = derive_slug(&customer_name, &new_page.area_code);

        let conn = self.conn.lock().await;
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM contact_pages WHERE area_code = ?1",
                params![new_page.area_code],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("failed to check area code"))?;
        if taken.is_some() {
            return Err(RosterError::conflict(format!(
                "area code {} is already assigned to another page",
                new_page.area_code
            )));
        }

        conn.execute(
            r#"
            INSERT INTO contact_pages
                (id, customer_name, area_code, slug, brand_color, intro_text, logo_url,
                 is_published, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
            "#,
            params![
                id,
                customer_name,
                new_page.area_code,
                slug,
                brand_color,
                clean(new_page.intro_text),
                clean(new_page.logo_url),
                now_rfc3339()
            ],
        )
        .map_err(db_err("failed to insert page"))?;

        tracing::debug!(page_id = %id, slug = %slug, "Created contact page");
        require_page(&conn, &id)
    }

    pub async fn get_page(&self, page_id: &str) -> Result<ContactPage> {
        let conn = self.conn.lock().await;
        require_page(&conn, page_id)
    }

    /// Public lookup: only published pages are visible by area code.
    pub async fn published_page_by_area_code(&self, area_code: &str) -> Result<ContactPage> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!(
                "SELECT {PAGE_COLUMNS} FROM contact_pages WHERE area_code = ?1 AND is_published = 1"
            ),
            params![area_code],
            page_from_row,
        )
        .optional()
        .map_err(db_err("failed to get page by area code"))?
        .ok_or_else(|| RosterError::not_found("published page", area_code))
    }

    /// All pages in creation order.
    pub async fn list_pages(&self) -> Result<Vec<ContactPage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM contact_pages ORDER BY rowid ASC"
            ))
            .map_err(db_err("failed to prepare page listing"))?;
        let pages = stmt
            .query_map([], page_from_row)
            .map_err(db_err("failed to list pages"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("failed to read page row"))?;
        Ok(pages)
    }

    /// Update page fields. Omitted fields stay unchanged; an empty string
    /// clears an optional field. The slug is not touched.
    pub async fn update_page(&self, page_id: &str, patch: PagePatch) -> Result<ContactPage> {
        let customer_name = patch
            .customer_name
            .as_deref()
            .map(validate_customer_name)
            .transpose()?;
        if let Some(color) = patch.brand_color.as_deref().map(str::trim)
            && !color.is_empty()
        {
            validate_brand_color(color)?;
        }

        let conn = self.conn.lock().await;
        let mut page = require_page(&conn, page_id)?;
        if let Some(name) = customer_name {
            page.customer_name = name;
        }
        if let Some(color) = patch.brand_color {
            page.brand_color = clean(Some(color));
        }
        if let Some(intro) = patch.intro_text {
            page.intro_text = clean(Some(intro));
        }
        if let Some(logo) = patch.logo_url {
            page.logo_url = clean(Some(logo));
        }

        conn.execute(
            r#"
            UPDATE contact_pages
            SET customer_name = ?2, brand_color = ?3, intro_text = ?4, logo_url = ?5
            WHERE id = ?1
            "#,
            params![
                page.id,
                page.customer_name,
                page.brand_color,
                page.intro_text,
                page.logo_url
            ],
        )
        .map_err(db_err("failed to update page"))?;

        Ok(page)
    }

    /// Flip `is_published`.
    ///
    /// Publishing is refused with `Conflict` while another page with the same
    /// slug is published. Check and write share one IMMEDIATE transaction.
    pub async fn toggle_publish(&self, page_id: &str) -> Result<ContactPage> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("failed to begin publish transaction"))?;

        let mut page = require_page(&tx, page_id)?;
        let publish = !page.is_published;

        if publish {
            let holder: Option<String> = tx
                .query_row(
                    r#"
                    SELECT id FROM contact_pages
                    WHERE slug = ?1 AND is_published = 1 AND id != ?2
                    LIMIT 1
                    "#,
                    params![page.slug, page.id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("failed to check slug collision"))?;

            if let Some(holder) = holder {
                tracing::warn!(
                    page_id = %page.id,
                    slug = %page.slug,
                    published_page = %holder,
                    "Publish refused: slug already published"
                );
                return Err(RosterError::conflict(format!(
                    "slug {:?} is already used by published page {holder}",
                    page.slug
                )));
            }
        }

        tx.execute(
            "UPDATE contact_pages SET is_published = ?2 WHERE id = ?1",
            params![page.id, publish],
        )
        .map_err(db_err("failed to toggle publish flag"))?;
        tx.commit().map_err(db_err("failed to commit publish toggle"))?;

        page.is_published = publish;
        tracing::info!(page_id = %page.id, slug = %page.slug, published = publish, "Toggled page publish flag");
        Ok(page)
    }

    /// Delete a page together with its members and their reason assignments.
    pub async fn delete_page(&self, page_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin page deletion"))?;
        require_page(&tx, page_id)?;

        let reasons = tx
            .execute(
                r#"
                DELETE FROM member_reasons
                WHERE member_id IN (SELECT id FROM members WHERE page_id = ?1)
                "#,
                params![page_id],
            )
            .map_err(db_err("failed to delete page member reasons"))?;
        let members = tx
            .execute("DELETE FROM members WHERE page_id = ?1", params![page_id])
            .map_err(db_err("failed to delete page members"))?;
        tx.execute("DELETE FROM contact_pages WHERE id = ?1", params![page_id])
            .map_err(db_err("failed to delete page"))?;
        tx.commit().map_err(db_err("failed to commit page deletion"))?;

        tracing::debug!(page_id, members, reasons, "Deleted contact page");
        Ok(())
    }
}
