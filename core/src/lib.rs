//! Roster core: membership, ordering and publication of contact directory
//! pages.
//!
//! Components:
//! - Role codec (`role`): external role strings to the stored enum
//! - Page registry, membership and reason stores (`store`), SQLite-backed
//! - Service surface (`api`): authorization plus the `RosterApi` trait
//! - Configuration (`config`) and the shared error taxonomy (`errors`)

pub mod api;
pub mod config;
pub mod errors;
pub mod gate;
pub mod model;
pub mod role;
pub mod slug;
pub mod store;

pub use api::{RosterApi, RosterService, Session};
pub use config::RosterConfig;
pub use errors::{ErrorCategory, Result, RosterError};
pub use gate::{Actor, AllowAll, AllowList, AuthorizationGate, ContactDirectory};
pub use model::{
    Contact, ContactPage, Member, MemberPatch, NewMember, NewPage, PagePatch, Reason, ReasonRef,
    ReorderEntry, ReorderFailure, ReorderReport, RosterEntry,
};
pub use role::Role;
pub use store::RosterStore;
