//! The pattern language: triple constraints, data constraints, and
//! constructed-shape constraints, each keyed to variable names that a
//! successful search binds.

use std::collections::HashMap;

use crate::abstraction::AbstractionId;

/// A slot in a top-level triple pattern or a data pattern's param position:
/// either a concrete abstraction or an unbound variable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSlot {
    Concrete(AbstractionId),
    Var(String),
}

/// A slot inside a constructed pattern's triple list. `SelfRef` is the
/// pattern-language sentinel `0`, rewritten to the owning variable at
/// compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructedSlot {
    SelfRef,
    Concrete(AbstractionId),
    Var(String),
}

/// Either a concrete string constraint or a single-element capture `[var]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    Concrete(String),
    Var(String),
}

/// A `(data_spec, format_spec)` constraint bound to a parameter variable.
#[derive(Debug, Clone)]
pub struct DataSpec {
    pub data: FieldSpec,
    pub format: FieldSpec,
}

/// A constraint on the shape of a constructed abstraction bound to a
/// parameter variable: the list of triples it must contain, and whether
/// that list is the abstraction's entire triple set (`exact`) or merely a
/// subset (trailing `+` in the source pattern language).
#[derive(Debug, Clone)]
pub struct ConstructedSpec {
    pub triples: Vec<(ConstructedSlot, ConstructedSlot, ConstructedSlot)>,
    pub exact: bool,
}

/// A top-level, owner-less triple constraint.
#[derive(Debug, Clone)]
pub struct TriplePattern {
    pub subject: PatternSlot,
    pub predicate: PatternSlot,
    pub object: PatternSlot,
}

/// A complete search request: independent triple constraints, data
/// constraints, and constructed-shape constraints, all sharing one
/// variable namespace. A match is an assignment of every variable
/// satisfying every constraint simultaneously.
#[derive(Debug, Clone, Default)]
pub struct Pattern {
    pub triples: Vec<TriplePattern>,
    pub data: HashMap<String, DataSpec>,
    pub constructed: HashMap<String, ConstructedSpec>,
}

impl Pattern {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_triple(mut self, subject: PatternSlot, predicate: PatternSlot, object: PatternSlot) -> Self {
        self.triples.push(TriplePattern {
            subject,
            predicate,
            object,
        });
        self
    }

    #[must_use]
    pub fn with_data(mut self, param: impl Into<String>, spec: DataSpec) -> Self {
        self.data.insert(param.into(), spec);
        self
    }

    #[must_use]
    pub fn with_constructed(mut self, param: impl Into<String>, spec: ConstructedSpec) -> Self {
        self.constructed.insert(param.into(), spec);
        self
    }
}
