//! The cross-store network transformer (C4): resolves a user-supplied
//! rewrite over a set of seed abstractions to a fixed point, even when the
//! rewrites form a mutually recursive cycle.
//!
//! Ported from `network_transformation.py::transformRALNetwork`'s
//! three-set state machine (`unchecked`, `unfinished`, `finished`) plus a
//! `dependencies` map from a still-unresolved source to every template slot
//! waiting on it.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use error_stack::{Report, Result};

use crate::{
    abstraction::AbstractionId,
    error::TransformError,
    handle::Handle,
    store::AbstractionStore,
};

/// A slot inside a rewrite template.
pub enum TemplateSlot<Source: AbstractionStore, Target: AbstractionStore> {
    SelfRef,
    /// Still needs transformation.
    Source(Handle<Source>),
    /// Already resolved in the target store — the rewrite function is
    /// responsible for wrapping a target handle this way when it already
    /// knows the answer for a slot (e.g. a shared constant).
    Target(Handle<Target>),
}

/// What a rewrite function returns for one source abstraction.
pub enum RewriteOutcome<Source: AbstractionStore, Target: AbstractionStore> {
    /// The transformation is already complete for this source.
    Finished(Handle<Target>),
    /// A forward-referencing triple template describing the eventual
    /// constructed abstraction in the target store.
    Template(Vec<(TemplateSlot<Source, Target>, TemplateSlot<Source, Target>, TemplateSlot<Source, Target>)>),
}

/// A user-supplied rewrite, invoked once per source abstraction reachable
/// from the seed set.
#[async_trait]
pub trait RewriteFn<Source: AbstractionStore, Target: AbstractionStore>: Send + Sync {
    async fn rewrite(
        &self,
        source: &Handle<Source>,
        source_store: &Arc<Source>,
        target_store: &Arc<Target>,
    ) -> Result<RewriteOutcome<Source, Target>, TransformError>;
}

/// An in-progress template: the partially-filled triple list and how many
/// source slots remain unresolved.
struct Pending<Target: AbstractionStore> {
    triples: Vec<(Slot<Target>, Slot<Target>, Slot<Target>)>,
    remaining: usize,
}

/// A triple slot once `SELF` has been rewritten to the owner's eventual id
/// and every already-finished source slot has been substituted: either a
/// still-unresolved dependency (by source id) or a resolved target handle.
enum Slot<Target: AbstractionStore> {
    SelfRef,
    Unresolved(AbstractionId),
    Resolved(Handle<Target>),
}

/// Transforms every abstraction reachable from `seeds` (via `rewrite`'s
/// templates) from `source_store` into `target_store`, returning the
/// mapping from each transformed source id to its target handle.
///
/// # Errors
///
/// Returns [`TransformError::WrongStore`] if any seed does not belong to
/// `source_store`, or [`TransformError::InvalidSlot`] if a template
/// references an abstraction that is neither `SELF`, a live source handle,
/// nor an already-resolved target handle.
pub async fn transform<Source, Target>(
    seeds: Vec<Handle<Source>>,
    source_store: &Arc<Source>,
    target_store: &Arc<Target>,
    rewrite: &(impl RewriteFn<Source, Target> + ?Sized),
) -> Result<HashMap<AbstractionId, Handle<Target>>, TransformError>
where
    Source: AbstractionStore,
    Target: AbstractionStore,
{
    for seed in &seeds {
        if !Arc::ptr_eq(seed.store(), source_store) {
            return Err(Report::new(TransformError::WrongStore)
                .attach_printable(format!("seed {} is not from the given source store", seed.id())));
        }
    }

    let mut finished: HashMap<AbstractionId, Handle<Target>> = HashMap::new();
    let mut unfinished: HashMap<AbstractionId, Pending<Target>> = HashMap::new();
    let mut sources: HashMap<AbstractionId, Handle<Source>> = HashMap::new();
    let mut dependencies: HashMap<AbstractionId, Vec<(AbstractionId, usize, usize)>> = HashMap::new();
    let mut unchecked: Vec<AbstractionId> = Vec::new();

    for seed in seeds {
        let id = seed.id();
        if !sources.contains_key(&id) {
            unchecked.push(id);
            sources.insert(id, seed);
        }
    }

    while let Some(id) = unchecked.pop() {
        if finished.contains_key(&id) {
            continue;
        }
        let source_handle = sources[&id].clone();
        let outcome = rewrite.rewrite(&source_handle, source_store, target_store).await?;
        match outcome {
            RewriteOutcome::Finished(target) => {
                resolve(id, target, &mut finished, &mut unfinished, &mut dependencies, target_store).await?;
            }
            RewriteOutcome::Template(template) => {
                let mut triples = Vec::with_capacity(template.len());
                let mut remaining = 0usize;
                for (triple_index, (subject, predicate, object)) in template.into_iter().enumerate() {
                    let mut resolve_one = |slot_index: usize, slot: TemplateSlot<Source, Target>| -> Result<Slot<Target>, TransformError> {
                        match slot {
                            TemplateSlot::SelfRef => Ok(Slot::SelfRef),
                            TemplateSlot::Target(handle) => Ok(Slot::Resolved(handle)),
                            TemplateSlot::Source(handle) => {
                                if !Arc::ptr_eq(handle.store(), source_store) {
                                    return Err(Report::new(TransformError::InvalidSlot).attach_printable(format!(
                                        "template slot at triple {triple_index}, position {slot_index} is not from the source store"
                                    )));
                                }
                                let dep_id = handle.id();
                                if let Some(done) = finished.get(&dep_id) {
                                    return Ok(Slot::Resolved(done.clone()));
                                }
                                remaining += 1;
                                dependencies.entry(dep_id).or_default().push((id, triple_index, slot_index));
                                sources.entry(dep_id).or_insert(handle);
                                if !unfinished.contains_key(&dep_id) {
                                    unchecked.push(dep_id);
                                }
                                Ok(Slot::Unresolved(dep_id))
                            }
                        }
                    };
                    let subject = resolve_one(0, subject)?;
                    let predicate = resolve_one(1, predicate)?;
                    let object = resolve_one(2, object)?;
                    triples.push((subject, predicate, object));
                }
                if remaining == 0 {
                    let target = intern_template(target_store, triples).await?;
                    resolve(id, target, &mut finished, &mut unfinished, &mut dependencies, target_store).await?;
                } else {
                    unfinished.insert(id, Pending { triples, remaining });
                }
            }
        }
    }

    Ok(finished)
}

async fn intern_template<Target: AbstractionStore>(
    target_store: &Arc<Target>,
    triples: Vec<(Slot<Target>, Slot<Target>, Slot<Target>)>,
) -> Result<Handle<Target>, TransformError> {
    let as_triples: Vec<(crate::abstraction::Slot, crate::abstraction::Slot, crate::abstraction::Slot)> = triples
        .into_iter()
        .map(|(subject, predicate, object)| {
            (slot_to_abstraction_slot(subject), slot_to_abstraction_slot(predicate), slot_to_abstraction_slot(object))
        })
        .collect();
    target_store.intern_constructed(as_triples).await.change_context_transform()
}

fn slot_to_abstraction_slot<Target: AbstractionStore>(slot: Slot<Target>) -> crate::abstraction::Slot {
    match slot {
        Slot::SelfRef => crate::abstraction::Slot::SelfRef,
        Slot::Resolved(handle) => crate::abstraction::Slot::Ref(handle.id()),
        Slot::Unresolved(_) => unreachable!("all slots are resolved before interning"),
    }
}

trait ChangeContextTransform<T> {
    fn change_context_transform(self) -> Result<T, TransformError>;
}

impl<T> ChangeContextTransform<T> for Result<T, crate::error::InvalidSlot> {
    fn change_context_transform(self) -> Result<T, TransformError> {
        error_stack::ResultExt::change_context(self, TransformError::InvalidSlot)
    }
}

/// Marks `id` finished with `target`, then cascades through every
/// dependent template waiting on it, interning and resolving each one that
/// becomes fully concrete as a result.
async fn resolve<Target: AbstractionStore>(
    id: AbstractionId,
    target: Handle<Target>,
    finished: &mut HashMap<AbstractionId, Handle<Target>>,
    unfinished: &mut HashMap<AbstractionId, Pending<Target>>,
    dependencies: &mut HashMap<AbstractionId, Vec<(AbstractionId, usize, usize)>>,
    target_store: &Arc<Target>,
) -> Result<(), TransformError> {
    finished.insert(id, target);
    let mut to_resolve = vec![id];
    while let Some(resolved_id) = to_resolve.pop() {
        let Some(dependents) = dependencies.remove(&resolved_id) else {
            continue;
        };
        let resolved_target = finished[&resolved_id].clone();
        for (dependent_id, triple_index, slot_index) in dependents {
            let Some(pending) = unfinished.get_mut(&dependent_id) else {
                continue;
            };
            let triple = &mut pending.triples[triple_index];
            let slot = match slot_index {
                0 => &mut triple.0,
                1 => &mut triple.1,
                _ => &mut triple.2,
            };
            *slot = Slot::Resolved(resolved_target.clone());
            pending.remaining -= 1;
            if pending.remaining == 0 {
                let pending = unfinished.remove(&dependent_id).expect("checked above");
                let target = intern_template(target_store, pending.triples).await?;
                finished.insert(dependent_id, target);
                to_resolve.push(dependent_id);
            }
        }
    }
    Ok(())
}

/// The identity rewrite: a data source collapses to the equivalent target
/// data abstraction; a constructed source's own connections become the
/// template, translating each referenced handle into a not-yet-transformed
/// source slot.
pub struct IdentityRewrite;

#[async_trait]
impl<Source, Target> RewriteFn<Source, Target> for IdentityRewrite
where
    Source: AbstractionStore,
    Target: AbstractionStore,
{
    async fn rewrite(
        &self,
        source: &Handle<Source>,
        source_store: &Arc<Source>,
        target_store: &Arc<Target>,
    ) -> Result<RewriteOutcome<Source, Target>, TransformError> {
        use crate::abstraction::Kind;

        match source.kind().change_context_transform_use_after_delete()? {
            Kind::Data => {
                let data = source.data().change_context_transform_use_after_delete()?.to_owned();
                let format = source.format().change_context_transform_use_after_delete()?.to_owned();
                let handle = target_store.intern_data(data, format).await;
                Ok(RewriteOutcome::Finished(handle))
            }
            Kind::Constructed => {
                let connections = source.connections().change_context_transform_use_after_delete()?.to_vec();
                let mut template = Vec::with_capacity(connections.len());
                for (subject, predicate, object) in connections {
                    template.push((
                        to_template_slot(subject, source, source_store).await?,
                        to_template_slot(predicate, source, source_store).await?,
                        to_template_slot(object, source, source_store).await?,
                    ));
                }
                Ok(RewriteOutcome::Template(template))
            }
        }
    }
}

async fn to_template_slot<Source: AbstractionStore, Target: AbstractionStore>(
    slot: crate::abstraction::Slot,
    source: &Handle<Source>,
    source_store: &Arc<Source>,
) -> Result<TemplateSlot<Source, Target>, TransformError> {
    match slot {
        crate::abstraction::Slot::SelfRef => Ok(TemplateSlot::SelfRef),
        crate::abstraction::Slot::Ref(id) if id == source.id() => Ok(TemplateSlot::SelfRef),
        crate::abstraction::Slot::Ref(id) => {
            let handle = source_store
                .string_id_to_handle(&id.to_string())
                .await
                .change_context_transform_malformed()?;
            Ok(TemplateSlot::Source(handle))
        }
    }
}

trait ChangeContextTransformMalformed<T> {
    fn change_context_transform_malformed(self) -> Result<T, TransformError>;
}

impl<T> ChangeContextTransformMalformed<T> for Result<T, crate::error::MalformedInput> {
    fn change_context_transform_malformed(self) -> Result<T, TransformError> {
        error_stack::ResultExt::change_context(self, TransformError::InvalidSlot)
    }
}

trait ChangeContextTransformUseAfterDelete<T> {
    fn change_context_transform_use_after_delete(self) -> Result<T, TransformError>;
}

impl<T> ChangeContextTransformUseAfterDelete<T> for Result<T, crate::error::UseAfterDelete> {
    fn change_context_transform_use_after_delete(self) -> Result<T, TransformError> {
        error_stack::ResultExt::change_context(self, TransformError::InvalidSlot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{abstraction::Slot, store::memory::MemoryStore};

    #[tokio::test]
    async fn identity_transform_preserves_single_self_triple() {
        let source = MemoryStore::new();
        let target = MemoryStore::new();
        let seed = source
            .intern_constructed(vec![(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef)])
            .await
            .unwrap();

        let result = transform(vec![seed.clone()], &source, &target, &IdentityRewrite).await.unwrap();
        let transformed = &result[&seed.id()];
        assert_eq!(transformed.connections().unwrap(), &[(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef)]);
    }
}
