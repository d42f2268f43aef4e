//! Search modules: the compiled units that each enumerate candidate
//! bindings for a slice of a pattern's variables.

use std::collections::{HashMap, HashSet};

use super::{
    engine::{BoundValue, ResolvedTriple, Snapshot},
    pattern::{ConstructedSlot, ConstructedSpec, FieldSpec, Pattern, PatternSlot, TriplePattern},
};
use crate::abstraction::AbstractionId;

fn resolve_slot(slot: &PatternSlot, known: &HashMap<String, BoundValue>) -> Option<AbstractionId> {
    match slot {
        PatternSlot::Concrete(id) => Some(*id),
        PatternSlot::Var(name) => known.get(name).and_then(BoundValue::as_id),
    }
}

fn resolve_field(field: &FieldSpec, known: &HashMap<String, BoundValue>) -> Option<String> {
    match field {
        FieldSpec::Concrete(value) => Some(value.clone()),
        FieldSpec::Var(name) => known.get(name).and_then(BoundValue::as_text).map(str::to_owned),
    }
}

fn slot_variables(slot: &PatternSlot, into: &mut HashSet<String>) {
    if let PatternSlot::Var(name) = slot {
        into.insert(name.clone());
    }
}

/// Enumerates triples anywhere in the store matching an owner-less
/// `(subject, predicate, object)` pattern.
#[derive(Debug, Clone)]
pub(super) struct TripleModule {
    subject: PatternSlot,
    predicate: PatternSlot,
    object: PatternSlot,
    variables: HashSet<String>,
}

impl TripleModule {
    fn new(pattern: &TriplePattern) -> Self {
        let mut variables = HashSet::new();
        slot_variables(&pattern.subject, &mut variables);
        slot_variables(&pattern.predicate, &mut variables);
        slot_variables(&pattern.object, &mut variables);
        Self {
            subject: pattern.subject.clone(),
            predicate: pattern.predicate.clone(),
            object: pattern.object.clone(),
            variables,
        }
    }

    fn produce(&self, snapshot: &Snapshot, known: &HashMap<String, BoundValue>) -> Vec<HashMap<String, BoundValue>> {
        let subject_value = resolve_slot(&self.subject, known);
        let predicate_value = resolve_slot(&self.predicate, known);
        let object_value = resolve_slot(&self.object, known);
        let anchor = subject_value.or(predicate_value).or(object_value);
        let owned;
        let candidates: &[ResolvedTriple] = match anchor {
            Some(id) => snapshot.linked(id),
            None => {
                owned = snapshot.all_triples().to_vec();
                &owned
            }
        };

        let mut out = Vec::new();
        for triple in candidates {
            if subject_value.is_some_and(|value| value != triple.subject) {
                continue;
            }
            if predicate_value.is_some_and(|value| value != triple.predicate) {
                continue;
            }
            if object_value.is_some_and(|value| value != triple.object) {
                continue;
            }
            let mut binding = HashMap::new();
            if let PatternSlot::Var(name) = &self.subject {
                binding.insert(name.clone(), BoundValue::Id(triple.subject));
            }
            if let PatternSlot::Var(name) = &self.predicate {
                binding.insert(name.clone(), BoundValue::Id(triple.predicate));
            }
            if let PatternSlot::Var(name) = &self.object {
                binding.insert(name.clone(), BoundValue::Id(triple.object));
            }
            out.push(binding);
        }
        out
    }
}

/// One instance per triple index of a constructed-shape pattern; a match
/// requires every sibling index's module to also match against a distinct
/// triple of the same owner.
#[derive(Debug, Clone)]
pub(super) struct ConstructedModule {
    owner: String,
    subject: PatternSlot,
    predicate: PatternSlot,
    object: PatternSlot,
    siblings: Vec<(PatternSlot, PatternSlot, PatternSlot)>,
    exact: bool,
    arity: usize,
    variables: HashSet<String>,
}

impl ConstructedModule {
    fn new(owner: String, spec: &ConstructedSpec, index: usize) -> Self {
        let rewrite = |slot: &ConstructedSlot| -> PatternSlot {
            match slot {
                ConstructedSlot::SelfRef => PatternSlot::Var(owner.clone()),
                ConstructedSlot::Concrete(id) => PatternSlot::Concrete(*id),
                ConstructedSlot::Var(name) => PatternSlot::Var(name.clone()),
            }
        };
        let rewritten: Vec<(PatternSlot, PatternSlot, PatternSlot)> = spec
            .triples
            .iter()
            .map(|(subject, predicate, object)| (rewrite(subject), rewrite(predicate), rewrite(object)))
            .collect();
        let (subject, predicate, object) = rewritten[index].clone();
        let siblings: Vec<_> = rewritten
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .map(|(_, triple)| triple.clone())
            .collect();

        let mut variables = HashSet::new();
        variables.insert(owner.clone());
        slot_variables(&subject, &mut variables);
        slot_variables(&predicate, &mut variables);
        slot_variables(&object, &mut variables);

        Self {
            owner,
            subject,
            predicate,
            object,
            siblings,
            exact: spec.exact,
            arity: spec.triples.len(),
            variables,
        }
    }

    /// Sibling triple patterns whose slots are all already resolvable
    /// against `known`: these candidates are "spoken for" and must not be
    /// reused by this module's own match.
    fn already_matched(&self, known: &HashMap<String, BoundValue>) -> HashSet<(AbstractionId, AbstractionId, AbstractionId)> {
        self.siblings
            .iter()
            .filter_map(|(subject, predicate, object)| {
                let subject = resolve_slot(subject, known)?;
                let predicate = resolve_slot(predicate, known)?;
                let object = resolve_slot(object, known)?;
                Some((subject, predicate, object))
            })
            .collect()
    }

    fn produce(&self, snapshot: &Snapshot, known: &HashMap<String, BoundValue>) -> Vec<HashMap<String, BoundValue>> {
        let owner_value = known.get(&self.owner).and_then(BoundValue::as_id);
        let subject_value = resolve_slot(&self.subject, known);
        let predicate_value = resolve_slot(&self.predicate, known);
        let object_value = resolve_slot(&self.object, known);

        let candidates: Vec<ResolvedTriple> = if let Some(owner) = owner_value {
            match snapshot.triples_owned_by(owner) {
                Some(triples) => triples,
                None => return Vec::new(),
            }
        } else if let Some(id) = subject_value.or(predicate_value).or(object_value) {
            snapshot.linked(id).to_vec()
        } else {
            snapshot.all_triples().to_vec()
        };

        let already_matched = self.already_matched(known);
        let mut out = Vec::new();
        for triple in candidates {
            if subject_value.is_some_and(|value| value != triple.subject) {
                continue;
            }
            if predicate_value.is_some_and(|value| value != triple.predicate) {
                continue;
            }
            if object_value.is_some_and(|value| value != triple.object) {
                continue;
            }
            if owner_value.is_none() && self.exact {
                let Some(owner_triples) = snapshot.triples_owned_by(triple.owner) else {
                    continue;
                };
                if owner_triples.len() != self.arity {
                    continue;
                }
            }
            if already_matched.contains(&(triple.subject, triple.predicate, triple.object)) {
                continue;
            }
            let mut binding = HashMap::new();
            binding.insert(self.owner.clone(), BoundValue::Id(triple.owner));
            if let PatternSlot::Var(name) = &self.subject {
                binding.insert(name.clone(), BoundValue::Id(triple.subject));
            }
            if let PatternSlot::Var(name) = &self.predicate {
                binding.insert(name.clone(), BoundValue::Id(triple.predicate));
            }
            if let PatternSlot::Var(name) = &self.object {
                binding.insert(name.clone(), BoundValue::Id(triple.object));
            }
            out.push(binding);
        }
        out
    }
}

/// Enumerates data abstractions matching a `(data, format)` constraint,
/// optionally capturing either field into a fresh variable.
#[derive(Debug, Clone)]
pub(super) struct DataModule {
    param: String,
    data: FieldSpec,
    format: FieldSpec,
    variables: HashSet<String>,
}

impl DataModule {
    fn new(param: String, spec: &super::pattern::DataSpec) -> Self {
        let mut variables = HashSet::new();
        variables.insert(param.clone());
        if let FieldSpec::Var(name) = &spec.data {
            variables.insert(name.clone());
        }
        if let FieldSpec::Var(name) = &spec.format {
            variables.insert(name.clone());
        }
        Self {
            param,
            data: spec.data.clone(),
            format: spec.format.clone(),
            variables,
        }
    }

    fn produce(&self, snapshot: &Snapshot, known: &HashMap<String, BoundValue>) -> Vec<HashMap<String, BoundValue>> {
        let param_value = known.get(&self.param).and_then(BoundValue::as_id);
        let data_value = resolve_field(&self.data, known);
        let format_value = resolve_field(&self.format, known);

        let mut out = Vec::new();
        for (id, entry) in snapshot.data_entries() {
            if param_value.is_some_and(|value| value != id) {
                continue;
            }
            if data_value.as_deref().is_some_and(|value| value != entry.data) {
                continue;
            }
            if format_value.as_deref().is_some_and(|value| value != entry.format) {
                continue;
            }
            let mut binding = HashMap::new();
            binding.insert(self.param.clone(), BoundValue::Id(id));
            if let FieldSpec::Var(name) = &self.data {
                binding.insert(name.clone(), BoundValue::Text(entry.data.clone()));
            }
            if let FieldSpec::Var(name) = &self.format {
                binding.insert(name.clone(), BoundValue::Text(entry.format.clone()));
            }
            out.push(binding);
        }
        out
    }
}

/// A compiled search module, dispatched by kind.
#[derive(Debug, Clone)]
pub(super) enum Module {
    Triple(TripleModule),
    Constructed(ConstructedModule),
    Data(DataModule),
}

impl Module {
    pub(super) fn variables(&self) -> &HashSet<String> {
        match self {
            Self::Triple(module) => &module.variables,
            Self::Constructed(module) => &module.variables,
            Self::Data(module) => &module.variables,
        }
    }

    pub(super) fn undefinedness(&self, known: &HashMap<String, BoundValue>) -> usize {
        self.variables().iter().filter(|name| !known.contains_key(*name)).count()
    }

    pub(super) fn produce(&self, snapshot: &Snapshot, known: &HashMap<String, BoundValue>) -> Vec<HashMap<String, BoundValue>> {
        match self {
            Self::Triple(module) => module.produce(snapshot, known),
            Self::Constructed(module) => module.produce(snapshot, known),
            Self::Data(module) => module.produce(snapshot, known),
        }
    }
}

/// Compiles a pattern into the flat list of modules the join operates over:
/// one [`TripleModule`] per triple pattern, one [`DataModule`] per data
/// constraint, and one [`ConstructedModule`] per triple index of every
/// constructed-shape constraint.
pub(super) fn compile(pattern: &Pattern) -> Vec<Module> {
    let mut modules = Vec::new();
    for triple in &pattern.triples {
        modules.push(Module::Triple(TripleModule::new(triple)));
    }
    for (param, spec) in &pattern.data {
        if matches!((&spec.data, &spec.format), (FieldSpec::Concrete(_), FieldSpec::Concrete(_))) {
            // A fully-concrete (data, format) pair is pre-bound by `run`
            // before the join starts, not matched against the snapshot.
            continue;
        }
        modules.push(Module::Data(DataModule::new(param.clone(), spec)));
    }
    for (param, spec) in &pattern.constructed {
        for index in 0..spec.triples.len() {
            modules.push(Module::Constructed(ConstructedModule::new(param.clone(), spec, index)));
        }
    }
    modules
}
