//! Records and payloads shared by the store, the service surface and the
//! sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, RosterError};
use crate::role::Role;

/// A customer's public contact directory page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPage {
    pub id: String,
    pub customer_name: String,
    pub area_code: String,
    /// Derived from `customer_name` + `area_code` at creation; never rewritten.
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a page. Pages always start unpublished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPage {
    pub customer_name: String,
    pub area_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// Partial field update for a page. The slug is not updatable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// External contact record. Referenced by members, never owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub is_active: bool,
}

/// A contact placed on a page's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub page_id: String,
    pub contact_id: String,
    pub role: Role,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
}

/// Payload for placing a contact on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub contact_id: String,
    /// External role string; decoded by the role codec.
    pub role: String,
    /// Appended at the end of the roster when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
}

/// Partial member update. `reason_ids`, when present, replaces the whole set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPatch {
    /// External role string; decoded by the role codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_ids: Option<Vec<String>>,
}

impl MemberPatch {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.order_index.is_none() && self.reason_ids.is_none()
    }
}

/// Global catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The id+label projection returned for member assignments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReasonRef {
    pub id: String,
    pub label: String,
}

impl From<&Reason> for ReasonRef {
    fn from(reason: &Reason) -> Self {
        Self {
            id: reason.id.clone(),
            label: reason.label.clone(),
        }
    }
}

/// One roster line as returned by `roster.get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub member_id: String,
    pub page_id: String,
    pub contact_id: String,
    /// `None` only for entries that are still speculative on a client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    pub role: Role,
    pub order_index: i64,
    #[serde(default)]
    pub reasons: Vec<ReasonRef>,
}

/// One `(member_id, order_index)` pair of a reorder batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderEntry {
    pub member_id: String,
    pub order_index: i64,
}

impl ReorderEntry {
    pub fn new(member_id: impl Into<String>, order_index: i64) -> Self {
        Self {
            member_id: member_id.into(),
            order_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderFailure {
    pub member_id: String,
    pub reason: String,
}

/// Outcome of a reorder batch. Pairs are applied independently, so a
/// non-empty `failures` list means the stored order is only partly updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderReport {
    pub success: bool,
    #[serde(default)]
    pub failures: Vec<ReorderFailure>,
}

impl ReorderReport {
    pub fn from_failures(failures: Vec<ReorderFailure>) -> Self {
        Self {
            success: failures.is_empty(),
            failures,
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(RosterError::PartialFailure {
                failures: self.failures,
            })
        }
    }
}

/// Sort roster entries the way every read returns them: `order_index`
/// ascending, ties kept in their existing (creation) order.
pub fn sort_roster(entries: &mut [RosterEntry]) {
    entries.sort_by_key(|entry| entry.order_index);
}

/// True when the indices of `entries` are exactly `0..entries.len()`.
pub fn is_contiguous(entries: &[RosterEntry]) -> bool {
    let mut indices: Vec<i64> = entries.iter().map(|e| e.order_index).collect();
    indices.sort_unstable();
    indices
        .iter()
        .enumerate()
        .all(|(position, index)| i64::try_from(position).ok() == Some(*index))
}
