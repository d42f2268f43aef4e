//! The data model: abstractions, triples, and the canonical key that makes
//! constructed abstractions content-addressed.

use derive_more::Display;

/// Opaque, backend-local identity of a stored abstraction.
///
/// Never constructed by users directly; handed out only through
/// [`crate::Handle`] or the codec's string-id mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct AbstractionId(u64);

impl AbstractionId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// The kind of a stored abstraction, as observed through [`crate::Handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Data,
    Constructed,
}

/// A triple slot: either the `SELF` sentinel or a reference to another
/// abstraction.
///
/// `SELF` is kept as a distinct tag rather than being resolved to the owning
/// id at construction time so that equality and the canonical key are stable
/// no matter which id the owner eventually receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    SelfRef,
    Ref(AbstractionId),
}

impl Slot {
    #[must_use]
    pub const fn is_self(self) -> bool {
        matches!(self, Self::SelfRef)
    }

    #[must_use]
    pub const fn id(self) -> Option<AbstractionId> {
        match self {
            Self::SelfRef => None,
            Self::Ref(id) => Some(id),
        }
    }

    /// Renders this slot for the canonical key: `"-"` for `SELF`, the decimal
    /// id otherwise. Matches the durable backend's on-disk encoding exactly
    /// (`sqlite_ral_framework.py::ConstructedAbstraction`), so both backends
    /// compute the same key for the same triple set.
    fn render(self) -> String {
        match self {
            Self::SelfRef => "-".to_owned(),
            Self::Ref(id) => id.to_string(),
        }
    }
}

/// An ordered `(subject, predicate, object)` slot triple, plus the id of the
/// constructed abstraction that owns it.
///
/// Triples are never independently addressable by users; they exist only as
/// a multiset inside their owner's stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triple {
    pub subject: Slot,
    pub predicate: Slot,
    pub object: Slot,
    pub owner: AbstractionId,
}

impl Triple {
    #[must_use]
    pub const fn new(subject: Slot, predicate: Slot, object: Slot, owner: AbstractionId) -> Self {
        Self {
            subject,
            predicate,
            object,
            owner,
        }
    }

    fn render(&self) -> String {
        format!(
            "{},{},{}",
            self.subject.render(),
            self.predicate.render(),
            self.object.render()
        )
    }
}

/// Computes the canonical interning key for a constructed abstraction's
/// triple set: each triple renders to `sub,pred,obj`, the per-triple strings
/// are lexicographically sorted (duplicates collapse because the input is
/// iterated as a set upstream), and the sorted list joins with `|`.
///
/// Identity is therefore stable across insertion order and across duplicate
/// triples: two triple sets that are equal as sets intern to the same id.
#[must_use]
pub fn canonical_key<'a>(triples: impl IntoIterator<Item = &'a (Slot, Slot, Slot)>) -> String {
    let mut rendered: Vec<String> = triples
        .into_iter()
        .map(|(subject, predicate, object)| {
            format!("{},{},{}", subject.render(), predicate.render(), object.render())
        })
        .collect();
    rendered.sort_unstable();
    rendered.dedup();
    rendered.join("|")
}

/// Computes the canonical key directly from a stored abstraction's owned
/// [`Triple`]s, ignoring the `owner` field (it is the same for all of them).
#[must_use]
pub fn canonical_key_from_triples<'a>(triples: impl IntoIterator<Item = &'a Triple>) -> String {
    let mut rendered: Vec<String> = triples.into_iter().map(Triple::render).collect();
    rendered.sort_unstable();
    rendered.dedup();
    rendered.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_order_independent() {
        let a = AbstractionId::new(1);
        let b = AbstractionId::new(2);
        let forward = [
            (Slot::Ref(a), Slot::Ref(b), Slot::SelfRef),
            (Slot::SelfRef, Slot::SelfRef, Slot::Ref(a)),
        ];
        let mut backward = forward;
        backward.reverse();
        assert_eq!(canonical_key(&forward), canonical_key(&backward));
    }

    #[test]
    fn canonical_key_collapses_duplicate_triples() {
        let a = AbstractionId::new(7);
        let one = [(Slot::Ref(a), Slot::Ref(a), Slot::SelfRef)];
        let duplicated = [
            (Slot::Ref(a), Slot::Ref(a), Slot::SelfRef),
            (Slot::Ref(a), Slot::Ref(a), Slot::SelfRef),
        ];
        assert_eq!(canonical_key(&one), canonical_key(&duplicated));
    }

    #[test]
    fn self_triple_renders_with_sentinel() {
        let owner = AbstractionId::new(3);
        let triple = Triple::new(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef, owner);
        assert_eq!(triple.render(), "-,-,-");
    }
}
