//! External collaborators consumed as opaque interfaces.
//!
//! - `AuthorizationGate`: decides whether an actor may mutate pages
//! - `ContactDirectory`: resolves contact ids to contact records
//!
//! The SQLite store implements `ContactDirectory` over its `contacts` table;
//! deployments with an external directory plug in their own implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::model::Contact;

/// Identity of whoever issues a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn is_authorized(&self, actor: &Actor) -> bool;
}

/// Lets every actor through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationGate for AllowAll {
    async fn is_authorized(&self, _actor: &Actor) -> bool {
        true
    }
}

/// Fixed set of actor names.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    actors: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actors: actors.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AuthorizationGate for AllowList {
    async fn is_authorized(&self, actor: &Actor) -> bool {
        self.actors.contains(actor.name())
    }
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Fails with `NotFound` when the contact does not exist.
    async fn get_contact(&self, contact_id: &str) -> Result<Contact>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_list_only_admits_named_actors() {
        let gate = AllowList::new(["editor"]);
        assert!(gate.is_authorized(&Actor::new("editor")).await);
        assert!(!gate.is_authorized(&Actor::new("visitor")).await);
        assert!(AllowAll.is_authorized(&Actor::new("visitor")).await);
    }
}
