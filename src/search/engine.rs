//! Snapshot gathering, the backtracking join, and the bindings it yields.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use error_stack::{Result, ResultExt};

use super::{
    module::{compile, Module},
    pattern::{FieldSpec, Pattern},
};
use crate::{
    abstraction::{AbstractionId, Slot, Triple},
    error::PatternError,
    handle::Handle,
    store::AbstractionStore,
};

/// A stored data abstraction's payload, as seen by the search engine.
pub(crate) struct DataEntry {
    pub data: String,
    pub format: String,
}

/// A stored constructed abstraction's triple set, as seen by the search
/// engine.
pub(crate) struct ConstructedEntry {
    pub triples: Vec<Triple>,
}

/// A triple with every slot resolved to a concrete id (`SELF` replaced by
/// the triple's owner).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedTriple {
    pub subject: AbstractionId,
    pub predicate: AbstractionId,
    pub object: AbstractionId,
    pub owner: AbstractionId,
}

fn resolve(slot: Slot, owner: AbstractionId) -> AbstractionId {
    match slot {
        Slot::SelfRef => owner,
        Slot::Ref(id) => id,
    }
}

/// A read-consistent, backend-agnostic view of every abstraction in a
/// store, gathered once at the start of a search so the join runs over a
/// fixed dataset.
pub(crate) struct Snapshot {
    data: HashMap<AbstractionId, DataEntry>,
    constructed: HashMap<AbstractionId, ConstructedEntry>,
    all_triples: Vec<ResolvedTriple>,
    /// Every resolved triple mentioning a given id as subject, predicate,
    /// or object (never merely as owner) — the same reach a triple's three
    /// non-owner slots index into, mirrored here for O(1) lookup by anchor.
    linked: HashMap<AbstractionId, Vec<ResolvedTriple>>,
}

impl Snapshot {
    pub(crate) fn build(
        data: HashMap<AbstractionId, DataEntry>,
        constructed: HashMap<AbstractionId, ConstructedEntry>,
    ) -> Self {
        let mut all_triples = Vec::new();
        let mut linked: HashMap<AbstractionId, Vec<ResolvedTriple>> = HashMap::new();
        for entry in constructed.values() {
            for triple in &entry.triples {
                let resolved = ResolvedTriple {
                    subject: resolve(triple.subject, triple.owner),
                    predicate: resolve(triple.predicate, triple.owner),
                    object: resolve(triple.object, triple.owner),
                    owner: triple.owner,
                };
                all_triples.push(resolved);
                let mut indexed: HashSet<AbstractionId> = HashSet::new();
                for id in [resolved.subject, resolved.predicate, resolved.object] {
                    if indexed.insert(id) {
                        linked.entry(id).or_default().push(resolved);
                    }
                }
            }
        }
        Self {
            data,
            constructed,
            all_triples,
            linked,
        }
    }

    pub(crate) fn all_triples(&self) -> &[ResolvedTriple] {
        &self.all_triples
    }

    pub(crate) fn linked(&self, id: AbstractionId) -> &[ResolvedTriple] {
        self.linked.get(&id).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn triples_owned_by(&self, owner: AbstractionId) -> Option<Vec<ResolvedTriple>> {
        let entry = self.constructed.get(&owner)?;
        Some(
            entry
                .triples
                .iter()
                .map(|triple| ResolvedTriple {
                    subject: resolve(triple.subject, triple.owner),
                    predicate: resolve(triple.predicate, triple.owner),
                    object: resolve(triple.object, triple.owner),
                    owner: triple.owner,
                })
                .collect(),
        )
    }

    pub(crate) fn data_entries(&self) -> impl Iterator<Item = (AbstractionId, &DataEntry)> {
        self.data.iter().map(|(&id, entry)| (id, entry))
    }
}

/// Either kind of value a pattern variable can be bound to: an abstraction
/// (from a triple or constructed-shape constraint) or a captured string
/// (from a data pattern's `[var]` field).
#[derive(Debug, Clone)]
pub(crate) enum BoundValue {
    Id(AbstractionId),
    Text(String),
}

impl BoundValue {
    pub(crate) const fn as_id(&self) -> Option<AbstractionId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Text(_) => None,
        }
    }

    pub(crate) fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Id(_) => None,
        }
    }
}

/// A value a binding assigns to a variable: a live handle, or a captured
/// string from a data pattern's `[var]` field.
#[derive(Debug)]
pub enum Bound<S: AbstractionStore> {
    Handle(Handle<S>),
    Text(String),
}

/// One satisfying assignment of every variable in a searched pattern.
#[derive(Debug)]
pub struct Binding<S: AbstractionStore>(HashMap<String, Bound<S>>);

impl<S: AbstractionStore> Binding<S> {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bound<S>> {
        self.0.get(name)
    }

    #[must_use]
    pub fn handle(&self, name: &str) -> Option<&Handle<S>> {
        match self.0.get(name)? {
            Bound::Handle(handle) => Some(handle),
            Bound::Text(_) => None,
        }
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            Bound::Text(text) => Some(text.as_str()),
            Bound::Handle(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every variable name referenced anywhere in `pattern`, regardless of
/// which clause introduces it.
fn all_variable_names(pattern: &Pattern) -> HashSet<String> {
    use super::pattern::{ConstructedSlot, FieldSpec, PatternSlot};

    let mut names = HashSet::new();
    for triple in &pattern.triples {
        for slot in [&triple.subject, &triple.predicate, &triple.object] {
            if let PatternSlot::Var(name) = slot {
                names.insert(name.clone());
            }
        }
    }
    for (param, spec) in &pattern.data {
        names.insert(param.clone());
        for field in [&spec.data, &spec.format] {
            if let FieldSpec::Var(name) = field {
                names.insert(name.clone());
            }
        }
    }
    for (param, spec) in &pattern.constructed {
        names.insert(param.clone());
        for (subject, predicate, object) in &spec.triples {
            for slot in [subject, predicate, object] {
                if let ConstructedSlot::Var(name) = slot {
                    names.insert(name.clone());
                }
            }
        }
    }
    names
}

fn search_all(modules: &[Module], known: HashMap<String, BoundValue>, snapshot: &Snapshot, out: &mut Vec<HashMap<String, BoundValue>>) {
    if modules.is_empty() {
        out.push(known);
        return;
    }
    let (index, _) = modules
        .iter()
        .enumerate()
        .min_by_key(|(_, module)| module.undefinedness(&known))
        .expect("modules is non-empty");
    let mut remaining = modules.to_vec();
    let module = remaining.remove(index);
    for candidate in module.produce(snapshot, &known) {
        let mut merged = known.clone();
        merged.extend(candidate);
        search_all(&remaining, merged, snapshot, out);
    }
}

/// Compiles `pattern`, runs the greedy backtracking join over `snapshot`,
/// and resolves every satisfying assignment into a [`Binding`] against
/// `store`.
///
/// # Errors
///
/// Returns [`PatternError`] if the pattern references a variable that no
/// clause can ever bind.
pub(crate) async fn run<S: AbstractionStore>(
    store: &Arc<S>,
    snapshot: &Snapshot,
    pattern: &Pattern,
) -> Result<Vec<Binding<S>>, PatternError> {
    // A fully-concrete (data, format) pair is pre-bound, not materialised as
    // a module: its param is always bound to the interned node, found or
    // created, the same way the original `Node(data, format)` constructor
    // call does.
    let mut known: HashMap<String, BoundValue> = HashMap::new();
    for (param, spec) in &pattern.data {
        if let (FieldSpec::Concrete(data), FieldSpec::Concrete(format)) = (&spec.data, &spec.format) {
            let handle = store.intern_data(data.clone(), format.clone()).await;
            known.insert(param.clone(), BoundValue::Id(handle.id()));
        }
    }

    let modules = compile(pattern);
    let bindable: HashSet<String> = modules
        .iter()
        .flat_map(|module| module.variables().iter().cloned())
        .chain(known.keys().cloned())
        .collect();
    for name in all_variable_names(pattern) {
        if !bindable.contains(&name) {
            return Err(error_stack::Report::new(PatternError)
                .attach_printable(format!("variable `{name}` is never bound by any clause")));
        }
    }

    let mut raw = Vec::new();
    search_all(&modules, known, snapshot, &mut raw);

    let mut bindings = Vec::with_capacity(raw.len());
    for assignment in raw {
        let mut resolved = HashMap::with_capacity(assignment.len());
        for (name, value) in assignment {
            let bound = match value {
                BoundValue::Text(text) => Bound::Text(text),
                BoundValue::Id(id) => {
                    let handle = store
                        .string_id_to_handle(&id.to_string())
                        .await
                        .change_context(PatternError)?;
                    Bound::Handle(handle)
                }
            };
            resolved.insert(name, bound);
        }
        bindings.push(Binding(resolved));
    }
    Ok(bindings)
}
