//! The ephemeral, process-memory-backed store.
//!
//! Ported directly from `ral_framework.py::RALFramework`: one map from
//! canonical key to id for dedup, one map from id to the stored record, one
//! reverse index from id to every triple mentioning it (used for both
//! search and deletion reachability), and a `remembered` set.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use error_stack::{Report, Result};
use tracing::instrument;

use crate::{
    abstraction::{canonical_key, AbstractionId, Slot, Triple},
    error::{InvalidSlot, MalformedInput, PatternError, UseAfterDelete},
    handle::{Content, Handle, HandleRegistry, ReclaimSink},
    search::{self, Binding, Pattern},
    store::AbstractionStore,
};

enum Record {
    Data { data: String, format: String },
    Constructed { triples: Vec<Triple>, canonical_key: String },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    data_index: HashMap<(String, String), AbstractionId>,
    constructed_index: HashMap<String, AbstractionId>,
    abstractions: HashMap<AbstractionId, Record>,
    /// Reverse index: abstraction id -> every triple (anywhere in this
    /// store) whose subject/predicate/object resolves to it.
    mentions: HashMap<AbstractionId, HashSet<Triple>>,
    remembered: HashSet<AbstractionId>,
}

impl Inner {
    fn fresh_id(&mut self) -> AbstractionId {
        self.next_id += 1;
        AbstractionId::new(self.next_id)
    }

    fn resolved(slot: Slot, owner: AbstractionId) -> AbstractionId {
        slot.id().unwrap_or(owner)
    }

    fn index_triple(&mut self, triple: Triple) {
        for slot in [triple.subject, triple.predicate, triple.object] {
            self.mentions
                .entry(Self::resolved(slot, triple.owner))
                .or_default()
                .insert(triple);
        }
    }

    fn unindex_triple(&mut self, triple: &Triple) {
        for slot in [triple.subject, triple.predicate, triple.object] {
            if let Some(set) = self.mentions.get_mut(&Self::resolved(slot, triple.owner)) {
                set.remove(triple);
            }
        }
    }
}

/// The in-memory backend. Cheap to construct, lost on process exit.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    registry: HandleRegistry,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            registry: HandleRegistry::default(),
        })
    }

    fn reclaim_sink(self: &Arc<Self>) -> ReclaimSink {
        let store = Arc::clone(self);
        Arc::new(move |id| store.run_safe_delete_probe(id))
    }

    fn make_handle(self: &Arc<Self>, id: AbstractionId, content: Content) -> Handle<Self> {
        let pin = self.registry.pin_for(id, &self.reclaim_sink());
        Handle::new(id, content, Arc::clone(self), pin)
    }

    fn content_for(inner: &Inner, id: AbstractionId) -> Content {
        match &inner.abstractions[&id] {
            Record::Data { data, format } => Content::Data {
                data: data.clone(),
                format: format.clone(),
            },
            Record::Constructed { triples, .. } => Content::Constructed {
                connections: triples
                    .iter()
                    .map(|triple| (triple.subject, triple.predicate, triple.object))
                    .collect(),
            },
        }
    }

    /// Walks outward from `start`, removing every abstraction that has no
    /// live handle, no `remembered` pin, and whose only mentions are owned
    /// by itself (pure self-reference, never a dependency from elsewhere).
    /// Runs inline since the in-memory backend never needs to await anything.
    fn run_safe_delete_probe(&self, start: AbstractionId) {
        let mut pending = vec![start];
        let mut inner = self.inner.lock().expect("memory store poisoned");
        while let Some(id) = pending.pop() {
            if !inner.abstractions.contains_key(&id) {
                continue;
            }
            if inner.remembered.contains(&id) {
                continue;
            }
            if self.registry.is_live(id) {
                continue;
            }
            let all_owned_by_self = inner
                .mentions
                .get(&id)
                .is_none_or(|triples| triples.iter().all(|triple| triple.owner == id));
            if !all_owned_by_self {
                continue;
            }
            let record = inner.abstractions.remove(&id).expect("checked above");
            match record {
                Record::Constructed { triples, canonical_key } => {
                    inner.constructed_index.remove(&canonical_key);
                    for triple in &triples {
                        inner.unindex_triple(triple);
                        for slot in [triple.subject, triple.predicate, triple.object] {
                            if let Some(other) = slot.id() {
                                if other != id {
                                    pending.push(other);
                                }
                            }
                        }
                    }
                }
                Record::Data { data, format } => {
                    inner.data_index.remove(&(data, format));
                }
            }
            inner.mentions.remove(&id);
            self.registry.forget(id);
        }
    }

    /// Tears down cycles explicitly by cascading into every abstraction
    /// whose triples mention `start`, overriding `remembered` pins.
    fn run_forced_delete(&self, start: AbstractionId) {
        let mut to_force = vec![start];
        let mut force_deleted = HashSet::new();
        {
            let mut inner = self.inner.lock().expect("memory store poisoned");
            while let Some(id) = to_force.pop() {
                if force_deleted.contains(&id) || !inner.abstractions.contains_key(&id) {
                    continue;
                }
                force_deleted.insert(id);
                inner.remembered.remove(&id);
                self.registry.mark_deleted(id);
                let owners: HashSet<AbstractionId> = inner
                    .mentions
                    .get(&id)
                    .into_iter()
                    .flatten()
                    .map(|triple| triple.owner)
                    .collect();
                for owner in owners {
                    if owner != id {
                        to_force.push(owner);
                    }
                }
                let record = inner.abstractions.remove(&id).expect("checked above");
                match record {
                    Record::Constructed { triples, canonical_key } => {
                        inner.constructed_index.remove(&canonical_key);
                        for triple in &triples {
                            inner.unindex_triple(triple);
                        }
                    }
                    Record::Data { data, format } => {
                        inner.data_index.remove(&(data, format));
                    }
                }
                inner.mentions.remove(&id);
                self.registry.forget(id);
            }
        }
        for id in force_deleted {
            self.run_safe_delete_probe(id);
        }
    }
}

#[async_trait]
impl AbstractionStore for MemoryStore {
    #[instrument(level = "debug", skip(self))]
    async fn intern_data(self: &Arc<Self>, data: String, format: String) -> Handle<Self> {
        let key = (data.clone(), format.clone());
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let id = if let Some(&id) = inner.data_index.get(&key) {
            id
        } else {
            let id = inner.fresh_id();
            inner.data_index.insert(key, id);
            inner.abstractions.insert(
                id,
                Record::Data {
                    data: data.clone(),
                    format: format.clone(),
                },
            );
            id
        };
        let content = Content::Data { data, format };
        drop(inner);
        self.make_handle(id, content)
    }

    #[instrument(level = "debug", skip(self, triples))]
    async fn intern_constructed(
        self: &Arc<Self>,
        triples: Vec<(Slot, Slot, Slot)>,
    ) -> Result<Handle<Self>, InvalidSlot> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        for (subject, predicate, object) in &triples {
            for slot in [*subject, *predicate, *object] {
                if let Some(id) = slot.id() {
                    if !inner.abstractions.contains_key(&id) {
                        return Err(Report::new(InvalidSlot).attach_printable(format!(
                            "slot references abstraction {id} which is not in this store"
                        )));
                    }
                }
            }
        }
        let key = canonical_key(&triples);
        let id = if let Some(&id) = inner.constructed_index.get(&key) {
            id
        } else {
            let id = inner.fresh_id();
            let stored: Vec<Triple> = triples
                .iter()
                .map(|&(subject, predicate, object)| Triple::new(subject, predicate, object, id))
                .collect();
            for triple in &stored {
                inner.index_triple(*triple);
            }
            inner.constructed_index.insert(key.clone(), id);
            inner.abstractions.insert(
                id,
                Record::Constructed {
                    triples: stored,
                    canonical_key: key,
                },
            );
            id
        };
        let content = Content::Constructed {
            connections: triples,
        };
        drop(inner);
        Ok(self.make_handle(id, content))
    }

    async fn all_handles(self: &Arc<Self>) -> Vec<Handle<Self>> {
        let ids: Vec<AbstractionId> = {
            let inner = self.inner.lock().expect("memory store poisoned");
            inner.abstractions.keys().copied().collect()
        };
        ids.into_iter()
            .map(|id| {
                let content = {
                    let inner = self.inner.lock().expect("memory store poisoned");
                    Self::content_for(&inner, id)
                };
                self.make_handle(id, content)
            })
            .collect()
    }

    #[instrument(level = "debug", skip(self))]
    async fn clear(self: &Arc<Self>) {
        let ids: Vec<AbstractionId> = {
            let inner = self.inner.lock().expect("memory store poisoned");
            inner.abstractions.keys().copied().collect()
        };
        for id in ids {
            self.run_forced_delete(id);
        }
    }

    async fn is_valid(&self, id: AbstractionId) -> bool {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .abstractions
            .contains_key(&id)
    }

    async fn search(
        self: &Arc<Self>,
        pattern: &Pattern,
    ) -> Result<Vec<Binding<Self>>, PatternError> {
        let snapshot = {
            let inner = self.inner.lock().expect("memory store poisoned");
            let mut data = HashMap::new();
            let mut constructed = HashMap::new();
            for (&id, record) in &inner.abstractions {
                match record {
                    Record::Data { data: value, format } => {
                        data.insert(
                            id,
                            search::DataEntry {
                                data: value.clone(),
                                format: format.clone(),
                            },
                        );
                    }
                    Record::Constructed { triples, .. } => {
                        constructed.insert(
                            id,
                            search::ConstructedEntry {
                                triples: triples.clone(),
                            },
                        );
                    }
                }
            }
            search::Snapshot::build(data, constructed)
        };
        search::run(self, &snapshot, pattern).await
    }

    fn handle_to_string_id(&self, handle: &Handle<Self>) -> String {
        handle.id().to_string()
    }

    async fn string_id_to_handle(self: &Arc<Self>, id: &str) -> Result<Handle<Self>, MalformedInput> {
        let parsed: u64 = id
            .parse()
            .map_err(|_err| Report::new(MalformedInput).attach_printable(format!("not an id: {id}")))?;
        let abstraction_id = AbstractionId::new(parsed);
        let content = {
            let inner = self.inner.lock().expect("memory store poisoned");
            if !inner.abstractions.contains_key(&abstraction_id) {
                return Err(Report::new(MalformedInput)
                    .attach_printable(format!("no abstraction with id {abstraction_id}")));
            }
            Self::content_for(&inner, abstraction_id)
        };
        Ok(self.make_handle(abstraction_id, content))
    }

    async fn is_remembered(&self, id: AbstractionId) -> Result<bool, UseAfterDelete> {
        let inner = self.inner.lock().expect("memory store poisoned");
        if !inner.abstractions.contains_key(&id) {
            return Err(Report::new(UseAfterDelete));
        }
        Ok(inner.remembered.contains(&id))
    }

    async fn set_remembered(self: &Arc<Self>, id: AbstractionId, value: bool) -> Result<(), UseAfterDelete> {
        {
            let mut inner = self.inner.lock().expect("memory store poisoned");
            if !inner.abstractions.contains_key(&id) {
                return Err(Report::new(UseAfterDelete));
            }
            if value {
                inner.remembered.insert(id);
            } else {
                inner.remembered.remove(&id);
            }
        }
        if !value {
            self.run_safe_delete_probe(id);
        }
        Ok(())
    }

    async fn force_delete(self: &Arc<Self>, id: AbstractionId) -> Result<(), UseAfterDelete> {
        if !self.is_valid(id).await {
            return Err(Report::new(UseAfterDelete));
        }
        self.run_forced_delete(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intern_data_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.intern_data("hello".into(), "text".into()).await;
        let b = store.intern_data("hello".into(), "text".into()).await;
        assert_eq!(a.id(), b.id());
        assert_eq!(a.data().unwrap(), "hello");
        assert_eq!(a.format().unwrap(), "text");
    }

    #[tokio::test]
    async fn intern_constructed_is_idempotent_regardless_of_order() {
        let store = MemoryStore::new();
        let a = store.intern_data("x".into(), "t".into()).await;
        let triples = vec![
            (Slot::Ref(a.id()), Slot::SelfRef, Slot::SelfRef),
            (Slot::SelfRef, Slot::Ref(a.id()), Slot::SelfRef),
        ];
        let mut reversed = triples.clone();
        reversed.reverse();
        let first = store.intern_constructed(triples).await.unwrap();
        let second = store.intern_constructed(reversed).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn single_self_triple_round_trips() {
        let store = MemoryStore::new();
        let handle = store
            .intern_constructed(vec![(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef)])
            .await
            .unwrap();
        let connections = handle.connections().unwrap().to_vec();
        let reinterned = store.intern_constructed(connections).await.unwrap();
        assert_eq!(handle.id(), reinterned.id());
    }

    #[tokio::test]
    async fn mutual_cycle_interns_as_two_abstractions() {
        let store = MemoryStore::new();
        // Build with a placeholder first, then rebuild B once A exists, matching
        // how a forward reference has to be resolved in a content-addressed store.
        let b_seed = store
            .intern_constructed(vec![(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef)])
            .await
            .unwrap();
        let a = store
            .intern_constructed(vec![(Slot::Ref(b_seed.id()), Slot::Ref(b_seed.id()), Slot::SelfRef)])
            .await
            .unwrap();
        let b = store
            .intern_constructed(vec![(Slot::Ref(a.id()), Slot::Ref(a.id()), Slot::SelfRef)])
            .await
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), b_seed.id());
    }

    #[tokio::test]
    async fn dropping_last_handle_reclaims_unremembered_abstraction() {
        let store = MemoryStore::new();
        let handle = store.intern_data("ephemeral".into(), "text".into()).await;
        let id = handle.id();
        drop(handle);
        assert!(!store.is_valid(id).await);
    }

    #[tokio::test]
    async fn remembered_abstraction_survives_handle_drop() {
        let store = MemoryStore::new();
        let handle = store.intern_data("pinned".into(), "text".into()).await;
        let id = handle.id();
        handle.set_remembered(true).await.unwrap();
        drop(handle);
        assert!(store.is_valid(id).await);
    }

    #[tokio::test]
    async fn force_delete_cascades_to_dependent_abstractions() {
        let store = MemoryStore::new();
        let leaf = store.intern_data("leaf".into(), "text".into()).await;
        leaf.set_remembered(true).await.unwrap();
        let parent = store
            .intern_constructed(vec![(Slot::Ref(leaf.id()), Slot::SelfRef, Slot::SelfRef)])
            .await
            .unwrap();
        parent.set_remembered(true).await.unwrap();
        let parent_id = parent.id();
        leaf.force_delete().await.unwrap();
        assert!(leaf.is_deleted());
        assert!(parent.is_deleted());
        assert!(!store.is_valid(parent_id).await);
    }
}
