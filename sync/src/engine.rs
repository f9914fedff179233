//! Optimistic Sync Engine.
//!
//! Every mutation runs the same four steps: snapshot the cached view,
//! apply the change speculatively, dispatch the request, then reconcile
//! with the server or roll back to the snapshot. Dispatch and completion
//! run in a spawned task so an abandoned caller never leaves the cache
//! half-settled.

use std::future::Future;
use std::sync::Arc;

use roster_core::{
    ContactPage, Member, MemberPatch, NewMember, PagePatch, Reason, ReasonRef, ReorderEntry,
    RosterApi, RosterEntry, role,
};

use crate::cache::{Outcome, ViewCache};
use crate::errors::{Result, SyncError};
use crate::speculate;
use crate::view::SyncedView;

/// Client-side owner of every cached view. Cached views change only
/// through this type; reads hand out clones.
#[derive(Clone)]
pub struct SyncEngine {
    api: Arc<dyn RosterApi>,
    rosters: Arc<ViewCache<Vec<RosterEntry>>>,
    pages: Arc<ViewCache<ContactPage>>,
    catalog: Arc<ViewCache<Vec<Reason>>>,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn RosterApi>) -> Self {
        Self {
            api,
            rosters: Arc::new(ViewCache::new()),
            pages: Arc::new(ViewCache::new()),
            catalog: Arc::new(ViewCache::new()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    pub async fn load_roster(&self, page_id: &str) -> roster_core::Result<Vec<RosterEntry>> {
        self.rosters.load(self.api.as_ref(), &page_id.to_string()).await
    }

    /// Cached roster, if loaded.
    pub async fn roster(&self, page_id: &str) -> Option<Vec<RosterEntry>> {
        self.rosters.get(&page_id.to_string()).await
    }

    pub async fn load_page(&self, page_id: &str) -> roster_core::Result<ContactPage> {
        self.pages.load(self.api.as_ref(), &page_id.to_string()).await
    }

    pub async fn page(&self, page_id: &str) -> Option<ContactPage> {
        self.pages.get(&page_id.to_string()).await
    }

    pub async fn load_catalog(&self) -> roster_core::Result<Vec<Reason>> {
        self.catalog.load(self.api.as_ref(), &()).await
    }

    pub async fn catalog(&self) -> Option<Vec<Reason>> {
        self.catalog.get(&()).await
    }

    /// Mutations still awaiting a response on a page's roster.
    pub async fn roster_in_flight(&self, page_id: &str) -> usize {
        self.rosters.in_flight(&page_id.to_string()).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roster mutations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn add_member(&self, page_id: &str, new_member: NewMember) -> Result<Member> {
        let role = role::decode(&new_member.role).map_err(SyncError::Rejected)?;
        let target = page_id.to_string();
        let page = page_id.to_string();
        let speculative = new_member.clone();
        self.run(
            &self.rosters,
            page_id.to_string(),
            move |roster| speculate::add_entry(roster, &target, &speculative, role),
            move |api| async move { api.add_member(&page, new_member).await },
        )
        .await
    }

    pub async fn update_member(
        &self,
        page_id: &str,
        member_id: &str,
        patch: MemberPatch,
    ) -> Result<Member> {
        let role = patch
            .role
            .as_deref()
            .map(role::decode)
            .transpose()
            .map_err(SyncError::Rejected)?;
        let reasons = match &patch.reason_ids {
            Some(ids) => Some(self.resolve_reasons(ids).await?),
            None => None,
        };
        let order_index = patch.order_index;
        let target = member_id.to_string();
        let member_id = member_id.to_string();
        self.run(
            &self.rosters,
            page_id.to_string(),
            move |roster| speculate::update_entry(roster, &target, role, order_index, reasons),
            move |api| async move { api.update_member(&member_id, patch).await },
        )
        .await
    }

    pub async fn remove_member(&self, page_id: &str, member_id: &str) -> Result<()> {
        let target = member_id.to_string();
        let member_id = member_id.to_string();
        self.run(
            &self.rosters,
            page_id.to_string(),
            move |roster| speculate::remove_entry(roster, &target),
            move |api| async move { api.remove_member(&member_id).await },
        )
        .await
    }

    /// Reorder a roster. A partially applied batch rolls back locally, then
    /// the authoritative order is re-fetched.
    pub async fn reorder(&self, page_id: &str, entries: Vec<ReorderEntry>) -> Result<()> {
        let speculative = entries.clone();
        let page = page_id.to_string();
        self.run(
            &self.rosters,
            page_id.to_string(),
            move |roster| speculate::apply_reorder(roster, &speculative),
            move |api| async move { api.reorder(&page, entries).await?.into_result() },
        )
        .await
    }

    pub async fn replace_member_reasons(
        &self,
        page_id: &str,
        member_id: &str,
        reason_ids: Vec<String>,
    ) -> Result<Vec<ReasonRef>> {
        let refs = self.resolve_reasons(&reason_ids).await?;
        let target = member_id.to_string();
        let member_id = member_id.to_string();
        self.run(
            &self.rosters,
            page_id.to_string(),
            move |roster| speculate::replace_reasons(roster, &target, refs),
            move |api| async move { api.replace_member_reasons(&member_id, reason_ids).await },
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Page and catalog mutations
    // ─────────────────────────────────────────────────────────────────────

    pub async fn toggle_publish(&self, page_id: &str) -> Result<ContactPage> {
        let page = page_id.to_string();
        self.run(
            &self.pages,
            page_id.to_string(),
            speculate::toggle_page,
            move |api| async move { api.toggle_publish(&page).await },
        )
        .await
    }

    pub async fn update_page(&self, page_id: &str, patch: PagePatch) -> Result<ContactPage> {
        let speculative = patch.clone();
        let page = page_id.to_string();
        self.run(
            &self.pages,
            page_id.to_string(),
            move |view| speculate::patch_page(view, &speculative),
            move |api| async move { api.update_page(&page, patch).await },
        )
        .await
    }

    pub async fn create_reason(&self, label: &str, description: Option<&str>) -> Result<Reason> {
        let label = label.to_string();
        let description = description.map(str::to_string);
        let (spec_label, spec_description) = (label.clone(), description.clone());
        self.run(
            &self.catalog,
            (),
            move |catalog| {
                speculate::push_reason(catalog, &spec_label, spec_description.as_deref());
            },
            move |api| async move { api.create_reason(&label, description.as_deref()).await },
        )
        .await
    }

    pub async fn delete_reason(&self, reason_id: &str) -> Result<()> {
        let target = reason_id.to_string();
        let reason_id = reason_id.to_string();
        self.run(
            &self.catalog,
            (),
            move |catalog| speculate::drop_reason(catalog, &target),
            move |api| async move { api.delete_reason(&reason_id).await },
        )
        .await
    }

    /// Resolve reason ids for a speculative apply, loading the catalog on
    /// first use.
    async fn resolve_reasons(&self, reason_ids: &[String]) -> Result<Vec<ReasonRef>> {
        let catalog = match self.catalog.get(&()).await {
            Some(catalog) => catalog,
            None => self.load_catalog().await.map_err(SyncError::Rejected)?,
        };
        Ok(speculate::resolve_reasons(&catalog, reason_ids))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Protocol
    // ─────────────────────────────────────────────────────────────────────

    async fn run<V, T, S, D, Fut>(
        &self,
        cache: &Arc<ViewCache<V>>,
        key: V::Key,
        speculate: S,
        dispatch: D,
    ) -> Result<T>
    where
        V: SyncedView,
        T: Send + 'static,
        S: FnOnce(&mut V),
        D: FnOnce(Arc<dyn RosterApi>) -> Fut,
        Fut: Future<Output = roster_core::Result<T>> + Send + 'static,
    {
        let seq = cache
            .begin(self.api.as_ref(), &key, speculate)
            .await
            .map_err(SyncError::Rejected)?;

        let request = dispatch(Arc::clone(&self.api));
        let api = Arc::clone(&self.api);
        let cache = Arc::clone(cache);
        let completion = tokio::spawn(async move {
            let outcome = match tokio::spawn(request).await {
                Ok(response) => Outcome::Responded(response),
                Err(err) => Outcome::Panicked(err.to_string()),
            };
            cache.complete(api.as_ref(), &key, seq, outcome).await
        });

        completion
            .await
            .unwrap_or_else(|err| Err(SyncError::TaskFailed(err.to_string())))
    }
}
