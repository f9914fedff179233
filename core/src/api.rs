//! The logical mutation/query surface of the roster.
//!
//! `RosterApi` is what clients program against: the in-process [`Session`]
//! implements it directly over [`RosterService`], and the socket client in
//! `roster-service` implements it over the wire. Queries are open; every
//! mutation passes the authorization gate first.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RosterConfig;
use crate::errors::{Result, RosterError};
use crate::gate::{Actor, AllowAll, AllowList, AuthorizationGate, ContactDirectory};
use crate::model::{
    ContactPage, Member, MemberPatch, NewMember, NewPage, PagePatch, Reason, ReasonRef,
    ReorderEntry, ReorderReport, RosterEntry,
};
use crate::role;
use crate::store::RosterStore;

#[async_trait]
pub trait RosterApi: Send + Sync {
    // ── Roster ───────────────────────────────────────────────────────────

    async fn roster(&self, page_id: &str) -> Result<Vec<RosterEntry>>;

    async fn add_member(&self, page_id: &str, new_member: NewMember) -> Result<Member>;

    async fn update_member(&self, member_id: &str, patch: MemberPatch) -> Result<Member>;

    async fn reorder(&self, page_id: &str, entries: Vec<ReorderEntry>) -> Result<ReorderReport>;

    async fn remove_member(&self, member_id: &str) -> Result<()>;

    // ── Reasons ──────────────────────────────────────────────────────────

    async fn list_catalog(&self) -> Result<Vec<Reason>>;

    async fn create_reason(&self, label: &str, description: Option<&str>) -> Result<Reason>;

    async fn delete_reason(&self, reason_id: &str) -> Result<()>;

    async fn replace_member_reasons(
        &self,
        member_id: &str,
        reason_ids: Vec<String>,
    ) -> Result<Vec<ReasonRef>>;

    // ── Pages ────────────────────────────────────────────────────────────

    async fn create_page(&self, new_page: NewPage) -> Result<ContactPage>;

    async fn get_page(&self, page_id: &str) -> Result<ContactPage>;

    async fn list_pages(&self) -> Result<Vec<ContactPage>>;

    async fn published_page_by_area_code(&self, area_code: &str) -> Result<ContactPage>;

    async fn update_page(&self, page_id: &str, patch: PagePatch) -> Result<ContactPage>;

    async fn toggle_publish(&self, page_id: &str) -> Result<ContactPage>;

    async fn delete_page(&self, page_id: &str) -> Result<()>;
}

/// Authoritative roster service: authorization, contact lookup, role
/// decoding, then the store.
pub struct RosterService {
    store: Arc<RosterStore>,
    gate: Arc<dyn AuthorizationGate>,
    /// External contact source; `None` checks the store's own table.
    contacts: Option<Arc<dyn ContactDirectory>>,
}

impl RosterService {
    /// Service over `store` that admits every actor and resolves contacts
    /// from the store's own contact table.
    pub fn new(store: Arc<RosterStore>) -> Self {
        Self {
            contacts: None,
            store,
            gate: Arc::new(AllowAll),
        }
    }

    /// Open the configured database and gate.
    pub fn from_config(cfg: &RosterConfig) -> Result<Self> {
        let store = Arc::new(RosterStore::open(&cfg.resolved_db_path())?);
        let service = Self::new(store);
        let allowed = &cfg.authorization.allowed_actors;
        if allowed.is_empty() {
            Ok(service)
        } else {
            Ok(service.with_gate(Arc::new(AllowList::new(allowed.iter().cloned()))))
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_contact_directory(mut self, contacts: Arc<dyn ContactDirectory>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn store(&self) -> &Arc<RosterStore> {
        &self.store
    }

    /// Bind an actor to the service.
    pub fn session(self: &Arc<Self>, actor: Actor) -> Session {
        Session {
            service: Arc::clone(self),
            actor,
        }
    }

    async fn authorize(&self, actor: &Actor, operation: &'static str) -> Result<()> {
        if self.gate.is_authorized(actor).await {
            Ok(())
        } else {
            tracing::warn!(actor = %actor, operation, "Mutation refused by authorization gate");
            Err(RosterError::Unauthorized {
                actor: actor.name().to_string(),
            })
        }
    }

    pub async fn add_member(
        &self,
        actor: &Actor,
        page_id: &str,
        new_member: NewMember,
    ) -> Result<Member> {
        self.authorize(actor, "member.add").await?;
        let role = role::decode(&new_member.role)?;
        let contact_id = &new_member.contact_id;
        match &self.contacts {
            Some(directory) => {
                directory.get_contact(contact_id).await?;
                self.store
                    .add_resolved_member(page_id, contact_id, role, new_member.order_index)
                    .await
            }
            None => {
                self.store
                    .add_member(page_id, contact_id, role, new_member.order_index)
                    .await
            }
        }
    }

    pub async fn update_member(
        &self,
        actor: &Actor,
        member_id: &str,
        patch: MemberPatch,
    ) -> Result<Member> {
        self.authorize(actor, "member.update").await?;
        let role = patch.role.as_deref().map(role::decode).transpose()?;
        let reason_ids: Option<BTreeSet<String>> =
            patch.reason_ids.map(|ids| ids.into_iter().collect());
        self.store
            .update_member(member_id, role, patch.order_index, reason_ids.as_ref())
            .await
    }

    pub async fn reorder(
        &self,
        actor: &Actor,
        page_id: &str,
        entries: &[ReorderEntry],
    ) -> Result<ReorderReport> {
        self.authorize(actor, "roster.reorder").await?;
        self.store.reorder(page_id, entries).await
    }

    pub async fn remove_member(&self, actor: &Actor, member_id: &str) -> Result<()> {
        self.authorize(actor, "member.remove").await?;
        self.store.remove_member(member_id).await
    }

    pub async fn create_reason(
        &self,
        actor: &Actor,
        label: &str,
        description: Option<&str>,
    ) -> Result<Reason> {
        self.authorize(actor, "reason.create").await?;
        self.store.create_reason(label, description).await
    }

    pub async fn delete_reason(&self, actor: &Actor, reason_id: &str) -> Result<()> {
        self.authorize(actor, "reason.delete").await?;
        self.store.delete_reason(reason_id).await
    }

    pub async fn replace_member_reasons(
        &self,
        actor: &Actor,
        member_id: &str,
        reason_ids: Vec<String>,
    ) -> Result<Vec<ReasonRef>> {
        self.authorize(actor, "member.reasons.replace").await?;
        let reason_ids: BTreeSet<String> = reason_ids.into_iter().collect();
        self.store
            .replace_member_reasons(member_id, &reason_ids)
            .await
    }

    pub async fn create_page(&self, actor: &Actor, new_page: NewPage) -> Result<ContactPage> {
        self.authorize(actor, "page.create").await?;
        self.store.create_page(new_page).await
    }

    pub async fn update_page(
        &self,
        actor: &Actor,
        page_id: &str,
        patch: PagePatch,
    ) -> Result<ContactPage> {
        self.authorize(actor, "page.update").await?;
        self.store.update_page(page_id, patch).await
    }

    pub async fn toggle_publish(&self, actor: &Actor, page_id: &str) -> Result<ContactPage> {
        self.authorize(actor, "page.toggle_publish").await?;
        self.store.toggle_publish(page_id).await
    }

    pub async fn delete_page(&self, actor: &Actor, page_id: &str) -> Result<()> {
        self.authorize(actor, "page.delete").await?;
        self.store.delete_page(page_id).await
    }
}

/// A [`RosterService`] bound to one actor; the in-process `RosterApi`.
#[derive(Clone)]
pub struct Session {
    service: Arc<RosterService>,
    actor: Actor,
}

impl Session {
    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}

#[async_trait]
impl RosterApi for Session {
    async fn roster(&self, page_id: &str) -> Result<Vec<RosterEntry>> {
        self.service.store.roster(page_id).await
    }

    async fn add_member(&self, page_id: &str, new_member: NewMember) -> Result<Member> {
        self.service
            .add_member(&self.actor, page_id, new_member)
            .await
    }

    async fn update_member(&self, member_id: &str, patch: MemberPatch) -> Result<Member> {
        self.service
            .update_member(&self.actor, member_id, patch)
            .await
    }

    async fn reorder(&self, page_id: &str, entries: Vec<ReorderEntry>) -> Result<ReorderReport> {
        self.service.reorder(&self.actor, page_id, &entries).await
    }

    async fn remove_member(&self, member_id: &str) -> Result<()> {
        self.service.remove_member(&self.actor, member_id).await
    }

    async fn list_catalog(&self) -> Result<Vec<Reason>> {
        self.service.store.list_catalog().await
    }

    async fn create_reason(&self, label: &str, description: Option<&str>) -> Result<Reason> {
        self.service
            .create_reason(&self.actor, label, description)
            .await
    }

    async fn delete_reason(&self, reason_id: &str) -> Result<()> {
        self.service.delete_reason(&self.actor, reason_id).await
    }

    async fn replace_member_reasons(
        &self,
        member_id: &str,
        reason_ids: Vec<String>,
    ) -> Result<Vec<ReasonRef>> {
        self.service
            .replace_member_reasons(&self.actor, member_id, reason_ids)
            .await
    }

    async fn create_page(&self, new_page: NewPage) -> Result<ContactPage> {
        self.service.create_page(&self.actor, new_page).await
    }

    async fn get_page(&self, page_id: &str) -> Result<ContactPage> {
        self.service.store.get_page(page_id).await
    }

    async fn list_pages(&self) -> Result<Vec<ContactPage>> {
        self.service.store.list_pages().await
    }

    async fn published_page_by_area_code(&self, area_code: &str) -> Result<ContactPage> {
        self.service
            .store
            .published_page_by_area_code(area_code)
            .await
    }

    async fn update_page(&self, page_id: &str, patch: PagePatch) -> Result<ContactPage> {
        self.service.update_page(&self.actor, page_id, patch).await
    }

    async fn toggle_publish(&self, page_id: &str) -> Result<ContactPage> {
        self.service.toggle_publish(&self.actor, page_id).await
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        self.service.delete_page(&self.actor, page_id).await
    }
}
