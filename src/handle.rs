//! External live references to stored abstractions.
//!
//! A [`Handle`] pins its target's liveness for as long as it (or any clone
//! coalesced onto the same [`HandlePin`]) is alive. The store keeps a
//! [`HandleRegistry`] — a weak map from id to pin — so that concurrently
//! requested handles to the same abstraction share one liveness count instead
//! of each independently triggering a safe-delete probe on drop. The store
//! owns the abstraction; the handle owns nothing but observes and pins it.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
};

use error_stack::{Report, Result};

use crate::{
    abstraction::{AbstractionId, Kind, Slot},
    error::UseAfterDelete,
    store::AbstractionStore,
};

/// A closure the store hands to every [`HandlePin`] it mints, invoked exactly
/// once, when the last clone pinning an id is dropped.
pub(crate) type ReclaimSink = Arc<dyn Fn(AbstractionId) + Send + Sync>;

/// Shared liveness state for every [`Handle`] pinning a given abstraction.
///
/// Kept out of [`Handle`] itself so the registry can hand out `Weak` clones
/// without caring about the store's own generic type.
pub(crate) struct HandlePin {
    id: AbstractionId,
    deleted: AtomicBool,
    reclaim: ReclaimSink,
}

impl HandlePin {
    fn new(id: AbstractionId, reclaim: ReclaimSink) -> Self {
        Self {
            id,
            deleted: AtomicBool::new(false),
            reclaim,
        }
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

impl Drop for HandlePin {
    fn drop(&mut self) {
        (self.reclaim)(self.id);
    }
}

/// A weak map from abstraction id to its [`HandlePin`], so that every live
/// [`Handle`] to the same abstraction shares one liveness count.
///
/// Both backends embed one of these; neither backend needs its own notion of
/// "how many handles point at X" beyond what this registry already tracks.
#[derive(Default)]
pub(crate) struct HandleRegistry {
    pins: Mutex<HashMap<AbstractionId, Weak<HandlePin>>>,
}

impl HandleRegistry {
    /// Returns the existing pin for `id` if one is still alive, otherwise
    /// mints a new one backed by `reclaim`.
    pub(crate) fn pin_for(&self, id: AbstractionId, reclaim: &ReclaimSink) -> Arc<HandlePin> {
        let mut pins = self.pins.lock().expect("handle registry poisoned");
        if let Some(existing) = pins.get(&id).and_then(Weak::upgrade) {
            return existing;
        }
        let pin = Arc::new(HandlePin::new(id, Arc::clone(reclaim)));
        pins.insert(id, Arc::downgrade(&pin));
        pin
    }

    /// Whether any [`Handle`] currently pins `id`.
    pub(crate) fn is_live(&self, id: AbstractionId) -> bool {
        let pins = self.pins.lock().expect("handle registry poisoned");
        pins.get(&id).is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Flags the pin for `id`, if one exists, as deleted. Called by forced
    /// deletion so every outstanding [`Handle`] observes `is_deleted() ==
    /// true` without a round trip to the backend.
    pub(crate) fn mark_deleted(&self, id: AbstractionId) {
        let pins = self.pins.lock().expect("handle registry poisoned");
        if let Some(pin) = pins.get(&id).and_then(Weak::upgrade) {
            pin.mark_deleted();
        }
    }

    /// Drops the bookkeeping entry for `id`. Safe to call whether or not a
    /// pin still exists; used once an id has been fully removed from the
    /// backend so the map doesn't grow without bound.
    pub(crate) fn forget(&self, id: AbstractionId) {
        self.pins.lock().expect("handle registry poisoned").remove(&id);
    }
}

/// The cached, immutable essential content of an abstraction.
///
/// Data and triple sets never change after interning (only the `remembered`
/// flag and handle liveness do), so a [`Handle`] snapshots this once at
/// construction instead of re-querying the backend on every accessor call.
#[derive(Debug, Clone)]
pub(crate) enum Content {
    Data { data: String, format: String },
    Constructed { connections: Vec<(Slot, Slot, Slot)> },
}

impl Content {
    pub(crate) const fn kind(&self) -> Kind {
        match self {
            Self::Data { .. } => Kind::Data,
            Self::Constructed { .. } => Kind::Constructed,
        }
    }
}

/// An external live reference to a stored abstraction.
///
/// Cloning a `Handle` shares the same liveness pin; dropping the last clone
/// triggers a safe-delete probe on the backend (immediately for the
/// in-memory backend, via a background reaper for the durable one — see
/// [`crate::store::postgres`]).
pub struct Handle<S: AbstractionStore> {
    id: AbstractionId,
    content: Arc<Content>,
    store: Arc<S>,
    pin: Arc<HandlePin>,
}

impl<S: AbstractionStore> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            content: Arc::clone(&self.content),
            store: Arc::clone(&self.store),
            pin: Arc::clone(&self.pin),
        }
    }
}

impl<S: AbstractionStore> fmt::Debug for Handle<S> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Handle").field("id", &self.id).finish()
    }
}

impl<S: AbstractionStore> PartialEq for Handle<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.store, &other.store)
    }
}

impl<S: AbstractionStore> Eq for Handle<S> {}

impl<S: AbstractionStore> std::hash::Hash for Handle<S> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<S: AbstractionStore> Handle<S> {
    pub(crate) fn new(id: AbstractionId, content: Content, store: Arc<S>, pin: Arc<HandlePin>) -> Self {
        Self {
            id,
            content: Arc::new(content),
            store,
            pin,
        }
    }

    /// The backend-local identity of this abstraction.
    #[must_use]
    pub const fn id(&self) -> AbstractionId {
        self.id
    }

    /// The store this handle belongs to.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether this handle's target has been force-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.pin.is_deleted()
    }

    fn check_alive(&self) -> Result<(), UseAfterDelete> {
        if self.is_deleted() {
            return Err(Report::new(UseAfterDelete).attach_printable(format!("id {}", self.id)));
        }
        Ok(())
    }

    /// `data` or `constructed`.
    pub fn kind(&self) -> Result<Kind, UseAfterDelete> {
        self.check_alive()?;
        Ok(self.content.kind())
    }

    /// The payload string of a data abstraction.
    ///
    /// # Panics
    ///
    /// Panics if this handle does not refer to a data abstraction.
    pub fn data(&self) -> Result<&str, UseAfterDelete> {
        self.check_alive()?;
        match &*self.content {
            Content::Data { data, .. } => Ok(data.as_str()),
            Content::Constructed { .. } => panic!("`data` called on a constructed abstraction"),
        }
    }

    /// The format string of a data abstraction.
    ///
    /// # Panics
    ///
    /// Panics if this handle does not refer to a data abstraction.
    pub fn format(&self) -> Result<&str, UseAfterDelete> {
        self.check_alive()?;
        match &*self.content {
            Content::Data { format, .. } => Ok(format.as_str()),
            Content::Constructed { .. } => panic!("`format` called on a constructed abstraction"),
        }
    }

    /// The frozen triple set of a constructed abstraction, with `SELF`
    /// re-materialised as [`Slot::SelfRef`].
    ///
    /// # Panics
    ///
    /// Panics if this handle does not refer to a constructed abstraction.
    pub fn connections(&self) -> Result<&[(Slot, Slot, Slot)], UseAfterDelete> {
        self.check_alive()?;
        match &*self.content {
            Content::Constructed { connections } => Ok(connections.as_slice()),
            Content::Data { .. } => panic!("`connections` called on a data abstraction"),
        }
    }

    /// Reads the `remembered` pin from the backend.
    pub async fn remembered(&self) -> Result<bool, UseAfterDelete> {
        self.check_alive()?;
        self.store.is_remembered(self.id).await
    }

    /// Sets or clears the `remembered` pin on the backend.
    ///
    /// Clearing `remembered` on an otherwise-unreferenced abstraction
    /// triggers a safe-delete probe.
    pub async fn set_remembered(&self, value: bool) -> Result<(), UseAfterDelete> {
        self.check_alive()?;
        self.store.set_remembered(self.id, value).await
    }

    /// Forces deletion of this handle's target, cascading through every
    /// abstraction whose triples mention it.
    pub async fn force_delete(&self) -> Result<(), UseAfterDelete> {
        self.check_alive()?;
        self.store.force_delete(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_coalesces_pins_for_the_same_id() {
        let registry = HandleRegistry::default();
        let sink: ReclaimSink = Arc::new(|_id| {});
        let id = AbstractionId::new(1);
        let first = registry.pin_for(id, &sink);
        let second = registry.pin_for(id, &sink);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_live(id));
        drop(first);
        drop(second);
        assert!(!registry.is_live(id));
    }

    #[test]
    fn registry_mints_fresh_pin_once_prior_one_is_dropped() {
        let registry = HandleRegistry::default();
        let sink: ReclaimSink = Arc::new(|_id| {});
        let id = AbstractionId::new(1);
        let first = registry.pin_for(id, &sink);
        drop(first);
        let second = registry.pin_for(id, &sink);
        assert!(registry.is_live(id));
        drop(second);
    }
}
