//! Optimistic, rollback-capable client view of contact page rosters.
//!
//! [`SyncEngine`] owns a keyed cache of rosters, pages and the reason
//! catalog, and drives every mutation through snapshot, speculative apply,
//! dispatch and reconcile-or-rollback against any [`roster_core::RosterApi`].

mod cache;
pub mod cancel;
pub mod engine;
pub mod errors;
pub mod speculate;
pub mod view;

pub use cancel::OrAbandonExt;
pub use engine::SyncEngine;
pub use errors::{Result, SyncError};
pub use view::SyncedView;
