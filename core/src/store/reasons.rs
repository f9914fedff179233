//! Reason Set Store: the global catalog and per-member assignments.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};

use super::members::require_member;
use super::{RosterStore, db_err, new_id, now_rfc3339, timestamp_column};
use crate::errors::{Result, RosterError};
use crate::model::{Reason, ReasonRef};

fn reason_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reason> {
    Ok(Reason {
        id: row.get(0)?,
        label: row.get(1)?,
        description: row.get(2)?,
        created_at: timestamp_column(row, 3)?,
    })
}

fn current_reason_ids(conn: &Connection, member_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT reason_id FROM member_reasons WHERE member_id = ?1")
        .map_err(db_err("failed to prepare member reasons query"))?;
    let ids = stmt
        .query_map(params![member_id], |row| row.get::<_, String>(0))
        .map_err(db_err("failed to query member reasons"))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()
        .map_err(db_err("failed to read member reason row"))?;
    Ok(ids)
}

fn assigned_refs(conn: &Connection, member_id: &str) -> Result<Vec<ReasonRef>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT mr.reason_id, r.label
            FROM member_reasons mr
            LEFT JOIN reasons r ON r.id = mr.reason_id
            WHERE mr.member_id = ?1
            ORDER BY r.rowid ASC, mr.reason_id ASC
            "#,
        )
        .map_err(db_err("failed to prepare assigned reasons query"))?;
    let rows = stmt
        .query_map(params![member_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })
        .map_err(db_err("failed to query assigned reasons"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("failed to read assigned reason row"))?;

    rows.into_iter()
        .map(|(id, label)| match label {
            Some(label) => Ok(ReasonRef { id, label }),
            None => Err(RosterError::integrity(format!(
                "member {member_id} references missing reason {id}"
            ))),
        })
        .collect()
}

/// Replace a member's reason set inside the caller's transaction.
///
/// Applies only the symmetric difference. Every requested reason must exist;
/// the existence check runs in the same transaction as the junction writes.
pub(crate) fn replace_reasons_in(
    conn: &Connection,
    member_id: &str,
    reason_ids: &BTreeSet<String>,
) -> Result<Vec<ReasonRef>> {
    let current = current_reason_ids(conn, member_id)?;

    let to_add: Vec<&String> = reason_ids.difference(&current).collect();
    let to_remove: Vec<&String> = current.difference(reason_ids).collect();

    for reason_id in &to_add {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM reasons WHERE id = ?1",
                params![reason_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("failed to check reason"))?;
        if exists.is_none() {
            return Err(RosterError::not_found("reason", reason_id.as_str()));
        }
    }

    for reason_id in &to_remove {
        conn.execute(
            "DELETE FROM member_reasons WHERE member_id = ?1 AND reason_id = ?2",
            params![member_id, reason_id],
        )
        .map_err(db_err("failed to detach reason"))?;
    }
    for reason_id in &to_add {
        conn.execute(
            "INSERT INTO member_reasons (member_id, reason_id) VALUES (?1, ?2)",
            params![member_id, reason_id],
        )
        .map_err(db_err("failed to attach reason"))?;
    }

    tracing::debug!(
        member_id,
        added = to_add.len(),
        removed = to_remove.len(),
        "Replaced member reasons"
    );
    assigned_refs(conn, member_id)
}

impl RosterStore {
    /// Every catalog entry in creation order.
    pub async fn list_catalog(&self) -> Result<Vec<Reason>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT id, label, description, created_at FROM reasons ORDER BY rowid ASC")
            .map_err(db_err("failed to prepare catalog query"))?;
        let reasons = stmt
            .query_map([], reason_from_row)
            .map_err(db_err("failed to list catalog"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("failed to read catalog row"))?;
        Ok(reasons)
    }

    /// Add a catalog entry. Labels are trimmed and must be non-empty; they
    /// need not be unique.
    pub async fn create_reason(&self, label: &str, description: Option<&str>) -> Result<Reason> {
        let label = label.trim();
        if label.is_empty() {
            return Err(RosterError::validation("reason label must not be empty"));
        }
        let description = description.map(str::trim).filter(|d| !d.is_empty());

        let id = new_id();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reasons (id, label, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, label, description, now_rfc3339()],
        )
        .map_err(db_err("failed to insert reason"))?;

        let reason = conn
            .query_row(
                "SELECT id, label, description, created_at FROM reasons WHERE id = ?1",
                params![id],
                reason_from_row,
            )
            .map_err(db_err("failed to read back reason"))?;
        tracing::debug!(reason_id = %reason.id, label = %reason.label, "Created reason");
        Ok(reason)
    }

    /// Remove a catalog entry. Refused while any member still carries it.
    pub async fn delete_reason(&self, reason_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin reason deletion"))?;

        let assigned: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM member_reasons WHERE reason_id = ?1",
                params![reason_id],
                |row| row.get(0),
            )
            .map_err(db_err("failed to count reason assignments"))?;
        if assigned > 0 {
            return Err(RosterError::conflict(format!(
                "reason {reason_id} is still assigned to {assigned} member(s)"
            )));
        }

        let deleted = tx
            .execute("DELETE FROM reasons WHERE id = ?1", params![reason_id])
            .map_err(db_err("failed to delete reason"))?;
        if deleted == 0 {
            return Err(RosterError::not_found("reason", reason_id));
        }
        tx.commit().map_err(db_err("failed to commit reason deletion"))?;
        Ok(())
    }

    /// Replace the whole reason set of a member atomically.
    ///
    /// Either the new set is fully attached and the old one fully detached,
    /// or nothing changes. Calling twice with the same set is a no-op the
    /// second time and returns the same references.
    pub async fn replace_member_reasons(
        &self,
        member_id: &str,
        reason_ids: &BTreeSet<String>,
    ) -> Result<Vec<ReasonRef>> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(db_err("failed to begin reason replacement"))?;
        require_member(&tx, member_id)?;
        let refs = replace_reasons_in(&tx, member_id, reason_ids)?;
        tx.commit()
            .map_err(db_err("failed to commit reason replacement"))?;
        Ok(refs)
    }

    /// Current reason assignment of a member.
    pub async fn member_reasons(&self, member_id: &str) -> Result<Vec<ReasonRef>> {
        let conn = self.conn.lock().await;
        require_member(&conn, member_id)?;
        assigned_refs(&conn, member_id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::errors::ErrorCategory;
    use pretty_assertions::assert_eq;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn create_reason_trims_and_validates() {
        let store = store().await;
        let reason = store
            .create_reason("  Billing ", Some("   "))
            .await
            .expect("create");
        assert_eq!(reason.label, "Billing");
        assert_eq!(reason.description, None);

        let err = store.create_reason("   ", None).await.expect_err("blank");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn catalog_order_is_stable_and_labels_may_repeat() {
        let store = store().await;
        let a = store.create_reason("Support", None).await.expect("a");
        let b = store.create_reason("Support", Some("Second desk")).await.expect("b");
        let c = store.create_reason("Billing", None).await.expect("c");

        let first = store.list_catalog().await.expect("list");
        let ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);
        assert_eq!(store.list_catalog().await.expect("list"), first);
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        let a = store.create_reason("A", None).await.expect("a");
        let b = store.create_reason("B", None).await.expect("b");
        let wanted = set(&[a.id.as_str(), b.id.as_str()]);

        let first = store
            .replace_member_reasons(&m.id, &wanted)
            .await
            .expect("first");
        let second = store
            .replace_member_reasons(&m.id, &wanted)
            .await
            .expect("second");

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![ReasonRef::from(&a), ReasonRef::from(&b)]
        );
        assert_eq!(store.member_reasons(&m.id).await.expect("current"), first);
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_set() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        let a = store.create_reason("A", None).await.expect("a");
        let b = store.create_reason("B", None).await.expect("b");
        let c = store.create_reason("C", None).await.expect("c");

        store
            .replace_member_reasons(&m.id, &set(&[a.id.as_str(), b.id.as_str()]))
            .await
            .expect("first");
        let refs = store
            .replace_member_reasons(&m.id, &set(&[b.id.as_str(), c.id.as_str()]))
            .await
            .expect("second");
        assert_eq!(refs, vec![ReasonRef::from(&b), ReasonRef::from(&c)]);

        let cleared = store
            .replace_member_reasons(&m.id, &BTreeSet::new())
            .await
            .expect("clear");
        assert!(cleared.is_empty());
    }

    #[tokio::test]
    async fn replace_with_unknown_reason_leaves_set_untouched() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        let a = store.create_reason("A", None).await.expect("a");
        let b = store.create_reason("B", None).await.expect("b");
        store
            .replace_member_reasons(&m.id, &set(&[a.id.as_str()]))
            .await
            .expect("seed");

        let err = store
            .replace_member_reasons(&m.id, &set(&[b.id.as_str(), "ghost"]))
            .await
            .expect_err("unknown reason");
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(
            store.member_reasons(&m.id).await.expect("current"),
            vec![ReasonRef::from(&a)]
        );
    }

    #[tokio::test]
    async fn replace_for_missing_member_is_not_found() {
        let store = store().await;
        let err = store
            .replace_member_reasons("ghost", &BTreeSet::new())
            .await
            .expect_err("missing member");
        assert!(matches!(err, RosterError::NotFound { ref entity, .. } if entity == "member"));
    }

    #[tokio::test]
    async fn assigned_reason_cannot_be_deleted() {
        let store = store().await;
        let page = page(&store, "Acme", "1234").await;
        let m = member(&store, &page.id, "c1").await;
        let a = store.create_reason("A", None).await.expect("a");
        store
            .replace_member_reasons(&m.id, &set(&[a.id.as_str()]))
            .await
            .expect("assign");

        let err = store.delete_reason(&a.id).await.expect_err("assigned");
        assert_eq!(err.category(), ErrorCategory::Conflict);

        store
            .replace_member_reasons(&m.id, &BTreeSet::new())
            .await
            .expect("detach");
        store.delete_reason(&a.id).await.expect("delete");
        assert!(store.list_catalog().await.expect("list").is_empty());

        let err = store.delete_reason(&a.id).await.expect_err("already gone");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
