//! Local, speculative versions of each mutation.
//!
//! These run against the cached view before the request is dispatched. They
//! never fail: a speculation that targets something the view does not hold
//! is a no-op and the server response settles the outcome.

use std::collections::HashSet;

use chrono::Utc;
use roster_core::model::sort_roster;
use roster_core::{
    ContactPage, NewMember, PagePatch, Reason, ReasonRef, ReorderEntry, Role, RosterEntry,
};

const PLACEHOLDER_PREFIX: &str = "pending-";

/// Id for an entity the server has not assigned yet.
pub fn placeholder_id() -> String {
    format!("{PLACEHOLDER_PREFIX}{}", uuid::Uuid::new_v4())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Roster
// ─────────────────────────────────────────────────────────────────────────────

/// Append (or place at the requested index) a member whose contact is not
/// known locally yet.
pub fn add_entry(roster: &mut Vec<RosterEntry>, page_id: &str, new_member: &NewMember, role: Role) {
    let order_index = new_member
        .order_index
        .unwrap_or_else(|| i64::try_from(roster.len()).unwrap_or(i64::MAX));
    roster.push(RosterEntry {
        member_id: placeholder_id(),
        page_id: page_id.to_string(),
        contact_id: new_member.contact_id.clone(),
        contact: None,
        role,
        order_index,
        reasons: Vec::new(),
    });
    sort_roster(roster);
}

pub fn update_entry(
    roster: &mut [RosterEntry],
    member_id: &str,
    role: Option<Role>,
    order_index: Option<i64>,
    reasons: Option<Vec<ReasonRef>>,
) {
    let Some(entry) = roster.iter_mut().find(|e| e.member_id == member_id) else {
        return;
    };
    if let Some(role) = role {
        entry.role = role;
    }
    if let Some(order_index) = order_index {
        entry.order_index = order_index;
    }
    if let Some(reasons) = reasons {
        entry.reasons = reasons;
    }
    sort_roster(roster);
}

pub fn remove_entry(roster: &mut Vec<RosterEntry>, member_id: &str) {
    roster.retain(|e| e.member_id != member_id);
}

/// Assign every listed index, then re-sort with the stable tiebreak.
pub fn apply_reorder(roster: &mut [RosterEntry], entries: &[ReorderEntry]) {
    for pair in entries {
        if let Some(entry) = roster.iter_mut().find(|e| e.member_id == pair.member_id) {
            entry.order_index = pair.order_index;
        }
    }
    sort_roster(roster);
}

pub fn replace_reasons(roster: &mut [RosterEntry], member_id: &str, reasons: Vec<ReasonRef>) {
    if let Some(entry) = roster.iter_mut().find(|e| e.member_id == member_id) {
        entry.reasons = reasons;
    }
}

/// Catalog entries for `reason_ids`, in catalog order. Ids the cached
/// catalog does not know are left out until the server answers.
pub fn resolve_reasons(catalog: &[Reason], reason_ids: &[String]) -> Vec<ReasonRef> {
    let wanted: HashSet<&str> = reason_ids.iter().map(String::as_str).collect();
    catalog
        .iter()
        .filter(|reason| wanted.contains(reason.id.as_str()))
        .map(ReasonRef::from)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Pages and catalog
// ─────────────────────────────────────────────────────────────────────────────

pub fn toggle_page(page: &mut ContactPage) {
    page.is_published = !page.is_published;
}

/// Mirror of the store's patch rules: an empty string clears an optional
/// field, the slug never changes.
pub fn patch_page(page: &mut ContactPage, patch: &PagePatch) {
    if let Some(name) = &patch.customer_name {
        page.customer_name = name.trim().to_string();
    }
    let clearable = [
        (&patch.brand_color, &mut page.brand_color),
        (&patch.intro_text, &mut page.intro_text),
        (&patch.logo_url, &mut page.logo_url),
    ];
    for (update, field) in clearable {
        if let Some(value) = update.as_deref().map(str::trim) {
            *field = (!value.is_empty()).then(|| value.to_string());
        }
    }
}

pub fn push_reason(catalog: &mut Vec<Reason>, label: &str, description: Option<&str>) {
    catalog.push(Reason {
        id: placeholder_id(),
        label: label.trim().to_string(),
        description: description.map(str::to_string),
        created_at: Utc::now(),
    });
}

pub fn drop_reason(catalog: &mut Vec<Reason>, reason_id: &str) {
    catalog.retain(|reason| reason.id != reason_id);
}
