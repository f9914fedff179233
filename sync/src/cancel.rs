//! Abandoning an optimistic mutation from the caller's side.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, SyncError};

/// Race an engine mutation against a `CancellationToken`.
///
/// Cancelling only stops the caller from waiting: the dispatched request
/// keeps running and its response still reconciles or rolls back the view.
#[async_trait]
pub trait OrAbandonExt: Sized {
    type Output;

    async fn or_abandon(self, token: &CancellationToken) -> Result<Self::Output>;
}

#[async_trait]
impl<F, T> OrAbandonExt for F
where
    F: Future<Output = Result<T>> + Send,
    T: Send,
{
    type Output = T;

    async fn or_abandon(self, token: &CancellationToken) -> Result<T> {
        tokio::select! {
            _ = token.cancelled() => Err(SyncError::Abandoned),
            res = self => res,
        }
    }
}
