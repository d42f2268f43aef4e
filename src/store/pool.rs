//! Managed pool abstraction for acquiring a durable-backend connection.

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Result;

use crate::{error::BackendIo, store::AbstractionStore};

/// Keeps track of a pool of connections to the durable backend.
///
/// [`crate::store::postgres::PostgresStorePool`] is the only implementor;
/// the trait exists so the reaper-task wiring and migration runner stay
/// separable from the store itself.
#[async_trait]
pub trait StorePool: Send + Sync {
    /// The concrete, long-lived store this pool hands out.
    type Store: AbstractionStore;

    /// Acquires (constructing on first call) the store backed by this pool.
    ///
    /// # Errors
    ///
    /// Returns [`BackendIo`] if the connection or migration step fails.
    async fn acquire(&self) -> Result<Arc<Self::Store>, BackendIo>;
}
