//! View families the engine caches, and how each is fetched authoritatively.

use std::fmt::Debug;

use async_trait::async_trait;
use roster_core::{ContactPage, Reason, RosterApi, RosterEntry};

#[async_trait]
pub trait SyncedView: Clone + Debug + Send + Sync + 'static {
    type Key: Clone + Debug + Ord + Send + Sync + 'static;

    /// Family name used in log fields.
    const FAMILY: &'static str;

    async fn fetch(api: &dyn RosterApi, key: &Self::Key) -> roster_core::Result<Self>;
}

/// A page's ordered roster, keyed by page id.
#[async_trait]
impl SyncedView for Vec<RosterEntry> {
    type Key = String;
    const FAMILY: &'static str = "roster";

    async fn fetch(api: &dyn RosterApi, page_id: &String) -> roster_core::Result<Self> {
        api.roster(page_id).await
    }
}

#[async_trait]
impl SyncedView for ContactPage {
    type Key = String;
    const FAMILY: &'static str = "page";

    async fn fetch(api: &dyn RosterApi, page_id: &String) -> roster_core::Result<Self> {
        api.get_page(page_id).await
    }
}

/// The global reason catalog; there is exactly one.
#[async_trait]
impl SyncedView for Vec<Reason> {
    type Key = ();
    const FAMILY: &'static str = "catalog";

    async fn fetch(api: &dyn RosterApi, _key: &()) -> roster_core::Result<Self> {
        api.list_catalog().await
    }
}
