//! Membership Store: the ordered roster of a page.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension, params};

use super::pages::require_page;
use super::reasons::replace_reasons_in;
use super::{RosterStore, db_err, new_id, now_rfc3339, timestamp_column};
use crate::errors::{Result, RosterError};
use crate::model::{Contact, Member, ReasonRef, ReorderEntry, ReorderFailure, ReorderReport, RosterEntry};
use crate::role::Role;

/// A member row before its stored role code has been decoded.
struct MemberRow {
    id: String,
    page_id: String,
    contact_id: String,
    role: i64,
    order_index: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl MemberRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            page_id: row.get(1)?,
            contact_id: row.get(2)?,
            role: row.get(3)?,
            order_index: row.get(4)?,
            created_at: timestamp_column(row, 5)?,
        })
    }

    fn into_member(self) -> Result<Member> {
        Ok(Member {
            role: Role::from_stored(self.role)?,
            id: self.id,
            page_id: self.page_id,
            contact_id: self.contact_id,
            order_index: self.order_index,
            created_at: self.created_at,
        })
    }
}

fn load_member(conn: &Connection, member_id: &str) -> Result<Option<Member>> {
    conn.query_row(
        r#"
        SELECT id, page_id, contact_id, role, order_index, created_at
        FROM members WHERE id = ?1
        "#,
        params![member_id],
        MemberRow::from_row,
    )
    .optional()
    .map_err(db_err("failed to get member"))?
    .map(MemberRow::into_member)
    .transpose()
}

pub(crate) fn require_member(conn: &Connection, member_id: &str) -> Result<Member> {
    load_member(conn, member_id)?.ok_or_else(|| RosterError::not_found("member", member_id))
}

fn roster_len(conn: &Connection, page_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM members WHERE page_id = ?1",
        params![page_id],
        |row| row.get(0),
    )
    .map_err(db_err("failed to count roster"))
}

fn require_contact(conn: &Connection, contact_id: &str) -> Result<()> {
    let known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM contacts WHERE id = ?1",
            params![contact_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("failed to check contact"))?;
    known
        .map(|_| ())
        .ok_or_else(|| RosterError::not_found("contact", contact_id))
}

fn validate_order_index(order_index: i64) -> Result<()> {
    if order_index < 0 {
        return Err(RosterError::validation(format!(
            "order index must be non-negative, got {order_index}"
        )));
    }
    Ok(())
}

impl RosterStore {
    /// Place a contact from the `contacts` table on a page.
    ///
    /// Without an explicit index the member is appended (`index = roster
    /// length`). A contact may appear on a page at most once.
    pub async fn add_member(
        &self,
        page_id: &str,
        contact_id: &str,
        role: Role,
        order_index: Option<i64>,
    ) -> Result<Member> {
        self.insert_member(page_id, contact_id, role, order_index, true)
            .await
    }

    /// Like [`Self::add_member`] for a contact an external directory has
    /// already resolved; the local `contacts` table is not consulted.
    pub(crate) async fn add_resolved_member(
        &self,
        page_id: &str,
        contact_id: &str,
        role: Role,
        order_index: Option<i64>,
    ) -> Result<Member> {
        self.insert_member(page_id, contact_id, role, order_index, false)
            .await
    }

    async fn insert_member(
        &self,
        page_id: &str,
        contact_id: &str,
        role: Role,
        order_index: Option<i64>,
        local_contact: bool,
    ) -> Result<Member> {
        if let Some(index) = order_index {
            validate_order_index(index)?;
        }

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin add member"))?;
        require_page(&tx, page_id)?;
        if local_contact {
            require_contact(&tx, contact_id)?;
        }

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM members WHERE page_id = ?1 AND contact_id = ?2",
                params![page_id, contact_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("failed to check membership"))?;
        if let Some(existing) = existing {
            return Err(RosterError::conflict(format!(
                "contact {contact_id} is already on page {page_id} as member {existing}"
            )));
        }

        let order_index = match order_index {
            Some(index) => index,
            None => roster_len(&tx, page_id)?,
        };
        let id = new_id();
        tx.execute(
            r#"
            INSERT INTO members (id, page_id, contact_id, role, order_index, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![id, page_id, contact_id, role.stored(), order_index, now_rfc3339()],
        )
        .map_err(db_err("failed to insert member"))?;
        let member = require_member(&tx, &id)?;
        tx.commit().map_err(db_err("failed to commit add member"))?;

        tracing::debug!(
            page_id,
            member_id = %member.id,
            contact_id,
            role = %role,
            order_index,
            "Added member"
        );
        Ok(member)
    }

    pub async fn get_member(&self, member_id: &str) -> Result<Member> {
        let conn = self.conn.lock().await;
        require_member(&conn, member_id)
    }

    /// Partial update. Omitted fields are left unchanged; a present
    /// `reason_ids` replaces the member's whole reason set in the same
    /// transaction. Order contiguity is not checked here.
    pub async fn update_member(
        &self,
        member_id: &str,
        role: Option<Role>,
        order_index: Option<i64>,
        reason_ids: Option<&BTreeSet<String>>,
    ) -> Result<Member> {
        if let Some(index) = order_index {
            validate_order_index(index)?;
        }

        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin member update"))?;
        let current = require_member(&tx, member_id)?;

        let role = role.unwrap_or(current.role);
        let order_index = order_index.unwrap_or(current.order_index);
        tx.execute(
            "UPDATE members SET role = ?2, order_index = ?3 WHERE id = ?1",
            params![member_id, role.stored(), order_index],
        )
        .map_err(db_err("failed to update member"))?;

        if let Some(reason_ids) = reason_ids {
            replace_reasons_in(&tx, member_id, reason_ids)?;
        }

        let member = require_member(&tx, member_id)?;
        tx.commit().map_err(db_err("failed to commit member update"))?;

        tracing::debug!(member_id, role = %member.role, order_index = member.order_index, "Updated member");
        Ok(member)
    }

    /// Delete a member and its reason assignments as one unit. Remaining
    /// members keep their indices; the next reorder closes the gap.
    pub async fn remove_member(&self, member_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin member removal"))?;
        require_member(&tx, member_id)?;

        tx.execute(
            "DELETE FROM member_reasons WHERE member_id = ?1",
            params![member_id],
        )
        .map_err(db_err("failed to delete member reasons"))?;
        tx.execute("DELETE FROM members WHERE id = ?1", params![member_id])
            .map_err(db_err("failed to delete member"))?;
        tx.commit().map_err(db_err("failed to commit member removal"))?;

        tracing::debug!(member_id, "Removed member");
        Ok(())
    }

    /// Write every `(member_id, order_index)` pair independently.
    ///
    /// There is no enclosing transaction: pairs that succeed stay written
    /// even when others fail. Every failure is reported so the caller can
    /// re-fetch the authoritative roster. Indices are stored exactly as
    /// given.
    pub async fn reorder(&self, page_id: &str, entries: &[ReorderEntry]) -> Result<ReorderReport> {
        {
            let conn = self.conn.lock().await;
            require_page(&conn, page_id)?;
        }

        let mut failures = Vec::new();
        for entry in entries {
            if let Err(e) = self.write_order_index(page_id, entry).await {
                failures.push(ReorderFailure {
                    member_id: entry.member_id.clone(),
                    reason: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            tracing::debug!(page_id, pairs = entries.len(), "Reordered roster");
        } else {
            tracing::warn!(
                page_id,
                pairs = entries.len(),
                failed = failures.len(),
                "Reorder partially failed"
            );
        }
        Ok(ReorderReport::from_failures(failures))
    }

    async fn write_order_index(&self, page_id: &str, entry: &ReorderEntry) -> Result<()> {
        validate_order_index(entry.order_index)?;
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE members SET order_index = ?3 WHERE id = ?1 AND page_id = ?2",
                params![entry.member_id, page_id, entry.order_index],
            )
            .map_err(db_err("failed to write order index"))?;
        if updated == 0 {
            return Err(RosterError::not_found("member on page", &entry.member_id));
        }
        Ok(())
    }

    /// The roster of a page: `order_index` ascending, ties by creation order.
    pub async fn roster(&self, page_id: &str) -> Result<Vec<RosterEntry>> {
        let conn = self.conn.lock().await;
        require_page(&conn, page_id)?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT m.id, m.page_id, m.contact_id, m.role, m.order_index, m.created_at,
                       c.id, c.name, c.title, c.photo_url, c.is_active
                FROM members m
                LEFT JOIN contacts c ON c.id = m.contact_id
                WHERE m.page_id = ?1
                ORDER BY m.order_index ASC, m.rowid ASC
                "#,
            )
            .map_err(db_err("failed to prepare roster query"))?;
        let rows = stmt
            .query_map(params![page_id], |row| {
                let member = MemberRow::from_row(row)?;
                let contact = match row.get::<_, Option<String>>(6)? {
                    Some(id) => Some(Contact {
                        id,
                        name: row.get(7)?,
                        title: row.get(8)?,
                        photo_url: row.get(9)?,
                        is_active: row.get(10)?,
                    }),
                    None => None,
                };
                Ok((member, contact))
            })
            .map_err(db_err("failed to query roster"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("failed to read roster row"))?;

        let mut reasons = page_reason_refs(&conn, page_id)?;
        rows.into_iter()
            .map(|(row, contact)| {
                let member = row.into_member()?;
                Ok(RosterEntry {
                    reasons: reasons.remove(&member.id).unwrap_or_default(),
                    member_id: member.id,
                    page_id: member.page_id,
                    contact_id: member.contact_id,
                    contact,
                    role: member.role,
                    order_index: member.order_index,
                })
            })
            .collect()
    }
}

/// Reason assignments for every member of a page, keyed by member id.
fn page_reason_refs(conn: &Connection, page_id: &str) -> Result<HashMap<String, Vec<ReasonRef>>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT mr.member_id, mr.reason_id, r.label
            FROM member_reasons mr
            JOIN members m ON m.id = mr.member_id
            LEFT JOIN reasons r ON r.id = mr.reason_id
            WHERE m.page_id = ?1
            ORDER BY r.rowid ASC, mr.reason_id ASC
            "#,
        )
        .map_err(db_err("failed to prepare member reasons query"))?;
    let rows = stmt
        .query_map(params![page_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .map_err(db_err("failed to query member reasons"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("failed to read member reason row"))?;

    let mut by_member: HashMap<String, Vec<ReasonRef>> = HashMap::new();
    for (member_id, reason_id, label) in rows {
        let Some(label) = label else {
            return Err(RosterError::integrity(format!(
                "member {member_id} references missing reason {reason_id}"
            )));
        };
        by_member
            .entry(member_id)
            .or_default()
            .push(ReasonRef { id: reason_id, label });
    }
    Ok(by_member)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::errors::ErrorCategory;
    use crate::model::is_contiguous;
    use pretty_assertions::assert_eq;

    fn ids(roster: &[RosterEntry]) -> Vec<(String, i64)> {
        roster
            .iter()
            .map(|e| (e.member_id.clone(), e.order_index))
            .collect()
    }

    #[tokio::test]
    async fn add_member_appends_by_default() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m1 = member(&store, &page.id, "c1").await;
        let m2 = member(&store, &page.id, "c2").await;
        assert_eq!(m1.order_index, 0);
        assert_eq!(m2.order_index, 1);

        let roster = store.roster(&page.id).await.expect("roster");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].contact.as_ref().map(|c| c.name.as_str()), Some("Contact c1"));
        assert_eq!(roster[1].role, Role::Sales);
    }

    #[tokio::test]
    async fn duplicate_contact_on_page_conflicts_and_roster_is_unchanged() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        member(&store, &page.id, "c1").await;

        let err = store
            .add_member(&page.id, "c1", Role::Daily, None)
            .await
            .expect_err("duplicate");
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(store.roster(&page.id).await.expect("roster").len(), 1);
    }

    #[tokio::test]
    async fn same_contact_may_join_different_pages() {
        let store = store().await;
        let a = page(&store, "Acme", "1234").await;
        let b = page(&store, "Beta", "5678").await;
        member(&store, &a.id, "c1").await;
        store
            .add_member(&b.id, "c1", Role::Operations, Some(0))
            .await
            .expect("other page");
    }

    #[tokio::test]
    async fn add_member_with_unknown_contact_is_not_found() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;

        let err = store
            .add_member(&page.id, "ghost", Role::Sales, None)
            .await
            .expect_err("no such contact");
        assert!(matches!(err, RosterError::NotFound { ref entity, .. } if entity == "contact"));
        assert!(store.roster(&page.id).await.expect("roster").is_empty());

        // A contact resolved elsewhere bypasses the local table.
        store
            .add_resolved_member(&page.id, "ghost", Role::Sales, None)
            .await
            .expect("resolved externally");
    }

    #[tokio::test]
    async fn add_member_to_missing_page_is_not_found() {
        let store = store().await;
        let err = store
            .add_member("missing", "c1", Role::Sales, None)
            .await
            .expect_err("no page");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn update_member_is_partial() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;

        let updated = store
            .update_member(&m.id, Some(Role::Daily), None, None)
            .await
            .expect("role only");
        assert_eq!(updated.role, Role::Daily);
        assert_eq!(updated.order_index, 0);

        let updated = store
            .update_member(&m.id, None, Some(7), None)
            .await
            .expect("order only");
        assert_eq!(updated.role, Role::Daily);
        assert_eq!(updated.order_index, 7);
    }

    #[tokio::test]
    async fn update_member_with_unknown_reason_changes_nothing() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;

        let wanted: BTreeSet<String> = ["nope".to_string()].into_iter().collect();
        let err = store
            .update_member(&m.id, Some(Role::Operations), None, Some(&wanted))
            .await
            .expect_err("unknown reason");
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(store.get_member(&m.id).await.expect("get").role, Role::Sales);
    }

    #[tokio::test]
    async fn remove_member_leaves_gap_until_reorder() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m1 = member(&store, &page.id, "c1").await;
        let m2 = member(&store, &page.id, "c2").await;
        let m3 = member(&store, &page.id, "c3").await;
        let reason = store.create_reason("Billing", None).await.expect("reason");
        store
            .replace_member_reasons(&m2.id, &[reason.id.clone()].into_iter().collect())
            .await
            .expect("assign");

        store.remove_member(&m2.id).await.expect("remove");
        let roster = store.roster(&page.id).await.expect("roster");
        assert_eq!(ids(&roster), vec![(m1.id.clone(), 0), (m3.id.clone(), 2)]);
        assert!(!is_contiguous(&roster));
        assert!(store.member_reasons(&m2.id).await.is_err());

        let report = store
            .reorder(
                &page.id,
                &[ReorderEntry::new(&m1.id, 0), ReorderEntry::new(&m3.id, 1)],
            )
            .await
            .expect("reorder");
        assert!(report.success);
        assert!(is_contiguous(&store.roster(&page.id).await.expect("roster")));
    }

    #[tokio::test]
    async fn reorder_applies_permutation() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m1 = member(&store, &page.id, "c1").await;
        let m2 = member(&store, &page.id, "c2").await;
        let m3 = member(&store, &page.id, "c3").await;

        let report = store
            .reorder(
                &page.id,
                &[
                    ReorderEntry::new(&m1.id, 2),
                    ReorderEntry::new(&m2.id, 0),
                    ReorderEntry::new(&m3.id, 1),
                ],
            )
            .await
            .expect("reorder");
        assert_eq!(report, ReorderReport::from_failures(vec![]));

        let roster = store.roster(&page.id).await.expect("roster");
        assert_eq!(ids(&roster), vec![(m2.id, 0), (m3.id, 1), (m1.id, 2)]);
    }

    #[tokio::test]
    async fn reorder_reports_failures_while_other_pairs_land() {
        let store = store().await;
        let other = page(&store, "Other", "9999").await;
        let page = page(&store, "Acme", "1234").await;
        let m1 = member(&store, &page.id, "c1").await;
        let m2 = member(&store, &page.id, "c2").await;
        let foreign = member(&store, &other.id, "c3").await;

        let report = store
            .reorder(
                &page.id,
                &[
                    ReorderEntry::new(&m1.id, 1),
                    ReorderEntry::new("ghost", 0),
                    ReorderEntry::new(&foreign.id, 0),
                    ReorderEntry::new(&m2.id, -1),
                ],
            )
            .await
            .expect("reorder runs");

        assert!(!report.success);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.member_id.as_str()).collect();
        assert_eq!(failed, vec!["ghost", foreign.id.as_str(), m2.id.as_str()]);

        // m1's write landed even though the batch failed.
        assert_eq!(store.get_member(&m1.id).await.expect("m1").order_index, 1);
        assert_eq!(store.get_member(&foreign.id).await.expect("foreign").order_index, 0);
    }

    #[tokio::test]
    async fn ties_are_broken_by_creation_order() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m1 = member(&store, &page.id, "c1").await;
        let m2 = member(&store, &page.id, "c2").await;
        store
            .reorder(&page.id, &[ReorderEntry::new(&m2.id, 0)])
            .await
            .expect("reorder");

        let first = store.roster(&page.id).await.expect("roster");
        assert_eq!(ids(&first), vec![(m1.id.clone(), 0), (m2.id.clone(), 0)]);
        assert_eq!(store.roster(&page.id).await.expect("roster"), first);
    }

    #[tokio::test]
    async fn unmappable_stored_role_surfaces_as_integrity_fault() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        {
            let conn = store.raw_connection().await;
            conn.execute("UPDATE members SET role = 99 WHERE id = ?1", params![m.id])
                .expect("corrupt role");
        }

        let err = store.roster(&page.id).await.expect_err("corrupt");
        assert!(matches!(err, RosterError::UnmappableRole { stored: 99 }));
    }

    #[tokio::test]
    async fn dangling_reason_row_is_reported() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        {
            let conn = store.raw_connection().await;
            conn.execute_batch("PRAGMA foreign_keys = OFF;").expect("pragma");
            conn.execute(
                "INSERT INTO member_reasons (member_id, reason_id) VALUES (?1, 'vanished')",
                params![m.id],
            )
            .expect("dangling row");
        }

        let err = store.roster(&page.id).await.expect_err("dangling");
        assert_eq!(err.category(), ErrorCategory::Integrity);
    }
}
