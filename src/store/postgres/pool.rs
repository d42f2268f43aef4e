//! `bb8`-backed connection pool, implementing the generic [`StorePool`]
//! contract for [`PostgresStore`].

use std::sync::Arc;

use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use error_stack::{IntoReport, Result, ResultExt};
use tokio_postgres::NoTls;

use super::PostgresStore;
use crate::{error::BackendIo, store::pool::StorePool};

pub(super) type ConnectionPool = Pool<PostgresConnectionManager<NoTls>>;

/// Owns the `bb8` pool and mints the single long-lived [`PostgresStore`]
/// backed by it.
pub struct PostgresStorePool {
    connection_string: String,
}

impl PostgresStorePool {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[async_trait]
impl StorePool for PostgresStorePool {
    type Store = PostgresStore;

    async fn acquire(&self) -> Result<Arc<PostgresStore>, BackendIo> {
        let manager = PostgresConnectionManager::new_from_stringlike(&self.connection_string, NoTls)
            .into_report()
            .change_context(BackendIo)?;
        let pool = Pool::builder()
            .build(manager)
            .await
            .into_report()
            .change_context(BackendIo)?;
        PostgresStore::from_pool(pool).await
    }
}
