//! The durable, Postgres-backed store (C8): the same `AbstractionStore`
//! contract as the in-memory backend, committed through a pooled
//! connection. Ported from `sqlite_ral_framework.py::SQLiteRALFramework`'s
//! deletion and indexing algorithm onto a pooled-connection, `error-stack`
//! idiom.
//!
//! The one structural difference from the in-memory backend is liveness
//! reclamation: `HandlePin::drop` is synchronous but the safe-delete probe
//! here is a database round trip, so drop only enqueues the id on an
//! unbounded channel; a background task spawned alongside the pool drains
//! it and actually runs the probe. `set_remembered(_, false)` runs the
//! probe inline instead, since that call site is already `async`.

mod pool;
mod queries;
mod schema;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use error_stack::{IntoReport, Report, Result, ResultExt};
use tokio::sync::mpsc;
use tracing::instrument;

pub use self::pool::PostgresStorePool;
use self::pool::ConnectionPool;
use crate::{
    abstraction::{canonical_key, AbstractionId, Slot},
    error::{BackendIo, InvalidSlot, MalformedInput, PatternError, UseAfterDelete},
    handle::{Content, Handle, HandleRegistry, ReclaimSink},
    search::{self, Binding, Pattern},
    store::AbstractionStore,
};

/// Durable backend. Holds the `bb8` connection pool, the weak handle
/// registry shared with every minted [`Handle`], and the sending half of
/// the reaper channel `HandlePin::drop` feeds.
pub struct PostgresStore {
    pool: ConnectionPool,
    registry: HandleRegistry,
    reaper: mpsc::UnboundedSender<AbstractionId>,
}

impl PostgresStore {
    pub(super) async fn from_pool(pool: ConnectionPool) -> Result<Arc<Self>, BackendIo> {
        {
            let mut connection = pool.get().await.into_report().change_context(BackendIo)?;
            schema::run_migrations(&mut connection).await.change_context(BackendIo)?;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            pool,
            registry: HandleRegistry::default(),
            reaper: sender,
        });
        spawn_reaper(Arc::clone(&store), receiver);
        Ok(store)
    }

    fn reclaim_sink(self: &Arc<Self>) -> ReclaimSink {
        let reaper = self.reaper.clone();
        Arc::new(move |id| {
            // An error here only means the store has already been dropped
            // (the reaper task exited with it), so there is nothing to
            // reclaim and nothing to report.
            let _ = reaper.send(id);
        })
    }

    fn make_handle(self: &Arc<Self>, id: AbstractionId, content: Content) -> Handle<Self> {
        let pin = self.registry.pin_for(id, &self.reclaim_sink());
        Handle::new(id, content, Arc::clone(self), pin)
    }

    async fn content_for(&self, id: AbstractionId) -> Result<Content, BackendIo> {
        let connection = self.pool.get().await.into_report().change_context(BackendIo)?;
        let kind = queries::fetch_kind(&*connection, id)
            .await?
            .ok_or_else(|| Report::new(BackendIo).attach_printable(format!("id {id} vanished mid-read")))?;
        match kind {
            queries::StoredKind::Data { data, format } => Ok(Content::Data { data, format }),
            queries::StoredKind::Constructed => {
                let connections = queries::fetch_triples_owned_by(&*connection, id).await?;
                Ok(Content::Constructed { connections })
            }
        }
    }

    /// The same reachability probe the in-memory backend runs, driven over
    /// the pool instead of a mutex-guarded map.
    async fn run_safe_delete_probe(&self, start: AbstractionId) -> Result<(), BackendIo> {
        let connection = self.pool.get().await.into_report().change_context(BackendIo)?;
        let mut pending = vec![start];
        let mut visited = HashSet::new();
        let mut to_delete = Vec::new();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            if !queries::abstraction_exists(&*connection, id).await? {
                continue;
            }
            if queries::is_remembered(&*connection, id).await?.unwrap_or(true) {
                continue;
            }
            if self.registry.is_live(id) {
                continue;
            }
            if !queries::only_self_owned_mentions(&*connection, id).await? {
                continue;
            }
            if let Some(queries::StoredKind::Constructed) = queries::fetch_kind(&*connection, id).await? {
                for (subject, predicate, object) in queries::fetch_triples_owned_by(&*connection, id).await? {
                    for slot in [subject, predicate, object] {
                        if let Some(other) = slot.id() {
                            if other != id {
                                pending.push(other);
                            }
                        }
                    }
                }
            }
            to_delete.push(id);
        }
        queries::delete_abstractions(&*connection, &to_delete).await?;
        for id in &to_delete {
            self.registry.forget(*id);
        }
        Ok(())
    }

    async fn run_forced_delete(&self, start: AbstractionId) -> Result<(), BackendIo> {
        let connection = self.pool.get().await.into_report().change_context(BackendIo)?;
        let mut to_force = vec![start];
        let mut force_deleted = HashSet::new();
        while let Some(id) = to_force.pop() {
            if force_deleted.contains(&id) || !queries::abstraction_exists(&*connection, id).await? {
                continue;
            }
            force_deleted.insert(id);
            self.registry.mark_deleted(id);
            for owner in queries::fetch_mentioning_owners(&*connection, id).await? {
                if owner != id {
                    to_force.push(owner);
                }
            }
        }
        let ids: Vec<AbstractionId> = force_deleted.into_iter().collect();
        queries::delete_abstractions(&*connection, &ids).await?;
        for id in &ids {
            self.registry.forget(*id);
        }
        Ok(())
    }
}

fn spawn_reaper(store: Arc<PostgresStore>, mut receiver: mpsc::UnboundedReceiver<AbstractionId>) {
    tokio::spawn(async move {
        while let Some(id) = receiver.recv().await {
            if let Err(report) = store.run_safe_delete_probe(id).await {
                tracing::warn!(error = ?report, abstraction = %id, "deferred safe-delete probe failed");
            }
        }
    });
}

#[async_trait]
impl AbstractionStore for PostgresStore {
    #[instrument(level = "debug", skip(self, data, format))]
    async fn intern_data(self: &Arc<Self>, data: String, format: String) -> Handle<Self> {
        // Mirrors the in-memory backend: never fails, so a pool or query
        // error here can only mean the backend itself is unusable. Crashing
        // the caller's task is the least surprising response to that,
        // matching this method's infallible signature.
        let connection = self
            .pool
            .get()
            .await
            .expect("durable backend unavailable for intern_data");
        let id = match queries::find_data_id(&*connection, &data, &format)
            .await
            .expect("durable backend unavailable for intern_data")
        {
            Some(id) => id,
            None => queries::insert_data(&*connection, &data, &format)
                .await
                .expect("durable backend unavailable for intern_data"),
        };
        self.make_handle(id, Content::Data { data, format })
    }

    #[instrument(level = "debug", skip(self, triples))]
    async fn intern_constructed(
        self: &Arc<Self>,
        triples: Vec<(Slot, Slot, Slot)>,
    ) -> Result<Handle<Self>, InvalidSlot> {
        let mut connection = self
            .pool
            .get()
            .await
            .into_report()
            .change_context(InvalidSlot)
            .attach_printable("could not acquire a connection to validate slots")?;
        for (subject, predicate, object) in &triples {
            for slot in [*subject, *predicate, *object] {
                if let Some(id) = slot.id() {
                    let exists = queries::abstraction_exists(&*connection, id)
                        .await
                        .change_context(InvalidSlot)?;
                    if !exists {
                        return Err(Report::new(InvalidSlot)
                            .attach_printable(format!("slot references abstraction {id} which is not in this store")));
                    }
                }
            }
        }

        let key = canonical_key(&triples);
        if let Some(id) = queries::find_constructed_id(&*connection, &key).await.change_context(InvalidSlot)? {
            return Ok(self.make_handle(id, Content::Constructed { connections: triples }));
        }

        let transaction = connection
            .transaction()
            .await
            .into_report()
            .change_context(InvalidSlot)
            .attach_printable("could not open a transaction to intern a constructed abstraction")?;
        let id = queries::insert_constructed(&transaction, &key, &triples)
            .await
            .change_context(InvalidSlot)?;
        transaction
            .commit()
            .await
            .into_report()
            .change_context(InvalidSlot)
            .attach_printable("could not commit a newly interned constructed abstraction")?;

        Ok(self.make_handle(id, Content::Constructed { connections: triples }))
    }

    async fn all_handles(self: &Arc<Self>) -> Vec<Handle<Self>> {
        let connection = self
            .pool
            .get()
            .await
            .expect("durable backend unavailable for all_handles");
        let ids = queries::all_ids(&*connection)
            .await
            .expect("durable backend unavailable for all_handles");
        drop(connection);
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(content) = self.content_for(id).await {
                handles.push(self.make_handle(id, content));
            }
        }
        handles
    }

    #[instrument(level = "debug", skip(self))]
    async fn clear(self: &Arc<Self>) {
        let connection = self.pool.get().await.expect("durable backend unavailable for clear");
        queries::truncate_all(&*connection)
            .await
            .expect("durable backend unavailable for clear");
    }

    async fn is_valid(&self, id: AbstractionId) -> bool {
        let Ok(connection) = self.pool.get().await else {
            return false;
        };
        queries::abstraction_exists(&*connection, id).await.unwrap_or(false)
    }

    async fn search(self: &Arc<Self>, pattern: &Pattern) -> Result<Vec<Binding<Self>>, PatternError> {
        let connection = self.pool.get().await.into_report().change_context(PatternError)?;
        let ids = queries::all_ids(&*connection).await.change_context(PatternError)?;
        let mut data = HashMap::new();
        let mut constructed = HashMap::new();
        for id in ids {
            match queries::fetch_kind(&*connection, id).await.change_context(PatternError)? {
                Some(queries::StoredKind::Data { data: value, format }) => {
                    data.insert(id, search::DataEntry { data: value, format });
                }
                Some(queries::StoredKind::Constructed) => {
                    let triples = queries::fetch_triples_owned_by(&*connection, id)
                        .await
                        .change_context(PatternError)?
                        .into_iter()
                        .map(|(subject, predicate, object)| crate::abstraction::Triple::new(subject, predicate, object, id))
                        .collect();
                    constructed.insert(id, search::ConstructedEntry { triples });
                }
                None => {}
            }
        }
        drop(connection);
        let snapshot = search::Snapshot::build(data, constructed);
        search::run(self, &snapshot, pattern).await
    }

    fn handle_to_string_id(&self, handle: &Handle<Self>) -> String {
        handle.id().to_string()
    }

    async fn string_id_to_handle(self: &Arc<Self>, id: &str) -> Result<Handle<Self>, MalformedInput> {
        let parsed: u64 = id
            .parse()
            .into_report()
            .change_context(MalformedInput)
            .attach_printable_lazy(|| format!("not an id: {id}"))?;
        let abstraction_id = AbstractionId::new(parsed);
        let content = self.content_for(abstraction_id).await.change_context(MalformedInput)?;
        Ok(self.make_handle(abstraction_id, content))
    }

    async fn is_remembered(&self, id: AbstractionId) -> Result<bool, UseAfterDelete> {
        let connection = self
            .pool
            .get()
            .await
            .into_report()
            .change_context(UseAfterDelete)?;
        queries::is_remembered(&*connection, id)
            .await
            .change_context(UseAfterDelete)?
            .ok_or_else(|| Report::new(UseAfterDelete))
    }

    async fn set_remembered(self: &Arc<Self>, id: AbstractionId, value: bool) -> Result<(), UseAfterDelete> {
        let found = {
            let connection = self
                .pool
                .get()
                .await
                .into_report()
                .change_context(UseAfterDelete)?;
            queries::set_remembered(&*connection, id, value)
                .await
                .change_context(UseAfterDelete)?
        };
        if !found {
            return Err(Report::new(UseAfterDelete));
        }
        if !value {
            self.run_safe_delete_probe(id).await.change_context(UseAfterDelete)?;
        }
        Ok(())
    }

    async fn force_delete(self: &Arc<Self>, id: AbstractionId) -> Result<(), UseAfterDelete> {
        if !self.is_valid(id).await {
            return Err(Report::new(UseAfterDelete));
        }
        self.run_forced_delete(id).await.change_context(UseAfterDelete)?;
        Ok(())
    }
}
