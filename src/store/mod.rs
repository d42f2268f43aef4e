//! The shared store contract (C1) implemented by both backends.

pub mod memory;
pub mod pool;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Result;

pub use self::memory::MemoryStore;
use crate::{
    abstraction::{AbstractionId, Slot},
    error::{InvalidSlot, MalformedInput, UseAfterDelete},
    handle::Handle,
    search::{Binding, Pattern},
};

/// Describes the API every backend implements.
///
/// Both [`MemoryStore`] and [`postgres::PostgresStore`] implement this trait
/// identically; any code written against `AbstractionStore` observes the
/// same behaviour on either backend.
///
/// # Errors
///
/// Individual methods document the error kinds they can raise. Durable-
/// backend implementations may additionally raise [`crate::error::BackendIo`]
/// for any method that touches the connection.
#[async_trait]
pub trait AbstractionStore: Sized + Send + Sync + 'static {
    /// Interns a data abstraction, returning the canonical handle. Collapses
    /// to the existing entity if `(data, format)` was interned before.
    ///
    /// Never fails.
    async fn intern_data(self: &Arc<Self>, data: String, format: String) -> Handle<Self>;

    /// Interns a constructed abstraction from its triple multiset, returning
    /// the canonical handle. Collapses to the existing entity if an equal
    /// (as an unordered, duplicate-free set) triple multiset was interned
    /// before.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSlot`] if any slot is a reference to an abstraction
    /// that does not belong to this store.
    async fn intern_constructed(
        self: &Arc<Self>,
        triples: Vec<(Slot, Slot, Slot)>,
    ) -> Result<Handle<Self>, InvalidSlot>;

    /// Every abstraction currently stored, live handle or not — including
    /// ones kept alive only as a triple slot of some other stored
    /// abstraction.
    ///
    /// This is an observational snapshot, not a live view.
    async fn all_handles(self: &Arc<Self>) -> Vec<Handle<Self>>;

    /// Force-deletes every abstraction in the store.
    async fn clear(self: &Arc<Self>);

    /// Whether `id` currently names a live abstraction in this store.
    async fn is_valid(&self, id: AbstractionId) -> bool;

    /// Runs a pattern search and returns every satisfying binding.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PatternError`] if the pattern cannot be
    /// compiled (never for "no match" — that yields an empty result).
    async fn search(
        self: &Arc<Self>,
        pattern: &Pattern,
    ) -> Result<Vec<Binding<Self>>, crate::error::PatternError>;

    /// A stable string encoding of a handle's identity, for use as a
    /// persistence key (see the RALJ codec).
    fn handle_to_string_id(&self, handle: &Handle<Self>) -> String;

    /// Resolves a string id produced by [`Self::handle_to_string_id`] back
    /// into a handle.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput`] if the string does not name a live
    /// abstraction in this store.
    async fn string_id_to_handle(self: &Arc<Self>, id: &str) -> Result<Handle<Self>, MalformedInput>;

    /// Reads the `remembered` pin.
    ///
    /// # Errors
    ///
    /// Returns [`UseAfterDelete`] if `id` no longer names a live abstraction.
    async fn is_remembered(&self, id: AbstractionId) -> Result<bool, UseAfterDelete>;

    /// Sets or clears the `remembered` pin. Clearing it on an otherwise-
    /// unreferenced abstraction triggers a safe-delete probe.
    ///
    /// # Errors
    ///
    /// Returns [`UseAfterDelete`] if `id` no longer names a live abstraction.
    async fn set_remembered(self: &Arc<Self>, id: AbstractionId, value: bool) -> Result<(), UseAfterDelete>;

    /// Forces deletion of `id`, cascading through every abstraction whose
    /// triples mention it.
    ///
    /// # Errors
    ///
    /// Returns [`UseAfterDelete`] if `id` no longer names a live abstraction.
    async fn force_delete(self: &Arc<Self>, id: AbstractionId) -> Result<(), UseAfterDelete>;
}
