//! Outcomes of an optimistic mutation that did not land cleanly.

use roster_core::{ErrorCategory, RosterError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The server refused the mutation; the view was rolled back first.
    #[error("mutation rejected: {0}")]
    Rejected(#[source] RosterError),

    /// An earlier mutation on the same view rolled back underneath this one.
    /// Its speculation is gone; when the server applied it anyway the view
    /// is re-fetched.
    #[error("mutation invalidated by an earlier rollback (server applied: {server_applied})")]
    Invalidated { server_applied: bool },

    /// The caller stopped waiting. The response still reconciles or rolls
    /// back the view when it arrives.
    #[error("caller abandoned the mutation; reconciliation continues in the background")]
    Abandoned,

    /// The dispatch task died without a response; the view was rolled back.
    #[error("dispatch task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// The server's error, when there was one.
    pub fn rejection(&self) -> Option<&RosterError> {
        match self {
            SyncError::Rejected(err) => Some(err),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.rejection().map(RosterError::category)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
