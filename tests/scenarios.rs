//! End-to-end scenarios run against the in-memory backend through the
//! public API only, exercising interning, search, and transformation
//! together rather than any one module in isolation.

use ral::{
    abstraction::Slot,
    search::{ConstructedSlot, ConstructedSpec, DataSpec, FieldSpec, Pattern, PatternSlot},
    store::memory::MemoryStore,
    transform::{transform, IdentityRewrite},
    AbstractionStore,
};

#[tokio::test]
async fn interning_the_same_data_twice_yields_one_handle() {
    let store = MemoryStore::new();
    let first = store.intern_data("hello".into(), "text".into()).await;
    let second = store.intern_data("hello".into(), "text".into()).await;
    assert_eq!(first.id(), second.id());
    assert_eq!(first.data().unwrap(), "hello");
    assert_eq!(first.format().unwrap(), "text");
}

#[tokio::test]
async fn interning_a_self_referencing_triple_over_a_data_abstraction_is_idempotent() {
    let store = MemoryStore::new();
    let a = store.intern_data("x".into(), "t".into()).await;
    let triples = vec![(Slot::Ref(a.id()), Slot::Ref(a.id()), Slot::SelfRef)];
    let first = store.intern_constructed(triples.clone()).await.unwrap();
    let second = store.intern_constructed(triples).await.unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(first.connections().unwrap(), &[(Slot::Ref(a.id()), Slot::Ref(a.id()), Slot::SelfRef)]);
}

#[tokio::test]
async fn a_mutually_referencing_pair_round_trips_through_save_and_load() {
    use ral::codec::{JsonRaljCodec, RaljCodec};

    let source = MemoryStore::new();
    let b_seed = source
        .intern_constructed(vec![(Slot::SelfRef, Slot::SelfRef, Slot::SelfRef)])
        .await
        .unwrap();
    let c1 = source
        .intern_constructed(vec![(Slot::Ref(b_seed.id()), Slot::Ref(b_seed.id()), Slot::SelfRef)])
        .await
        .unwrap();
    let c2 = source
        .intern_constructed(vec![(Slot::Ref(c1.id()), Slot::Ref(c1.id()), Slot::SelfRef)])
        .await
        .unwrap();
    drop(b_seed);

    let codec = JsonRaljCodec;
    let document = codec.save(vec![c1.clone(), c2.clone()], &source).await.unwrap();
    assert_eq!(document.constructed.len(), 2);

    let target = MemoryStore::new();
    let loaded = codec.load(&document, &target).await.unwrap();
    assert_eq!(loaded.len(), 2);

    // Every loaded entry references exactly the other loaded entry twice,
    // with SELF in the remaining slot — the same shape the source pair had.
    let loaded_ids: Vec<_> = loaded.values().map(|handle| handle.id()).collect();
    for handle in loaded.values() {
        let connections = handle.connections().unwrap();
        assert_eq!(connections.len(), 1);
        let (subject, predicate, object) = connections[0];
        assert_eq!(subject, predicate);
        assert_eq!(object, Slot::SelfRef);
        let referenced = subject.id().expect("not SELF");
        assert_ne!(referenced, handle.id());
        assert!(loaded_ids.contains(&referenced));
    }
}

#[tokio::test]
async fn searching_a_concrete_triple_pattern_binds_the_free_variables() {
    let store = MemoryStore::new();
    let a = store.intern_data("a".into(), "t".into()).await;
    store
        .intern_constructed(vec![(Slot::Ref(a.id()), Slot::Ref(a.id()), Slot::Ref(a.id()))])
        .await
        .unwrap();

    let pattern = Pattern::new().with_triple(
        PatternSlot::Var("x".into()),
        PatternSlot::Concrete(a.id()),
        PatternSlot::Var("y".into()),
    );
    let bindings = store.search(&pattern).await.unwrap();
    assert_eq!(bindings.len(), 1);
    let binding = &bindings[0];
    assert_eq!(binding.handle("x").unwrap().id(), a.id());
    assert_eq!(binding.handle("y").unwrap().id(), a.id());
}

#[tokio::test]
async fn exact_constructed_pattern_rejects_an_abstraction_with_extra_triples() {
    let store = MemoryStore::new();
    let s0 = store.intern_data("s".into(), "t".into()).await;
    let p0 = store.intern_data("p".into(), "t".into()).await;
    let exactly_one = store
        .intern_constructed(vec![(Slot::Ref(s0.id()), Slot::Ref(p0.id()), Slot::SelfRef)])
        .await
        .unwrap();
    let extra_slot = store.intern_data("extra".into(), "t".into()).await;
    let two_triples = store
        .intern_constructed(vec![
            (Slot::Ref(s0.id()), Slot::Ref(p0.id()), Slot::SelfRef),
            (Slot::Ref(extra_slot.id()), Slot::SelfRef, Slot::SelfRef),
        ])
        .await
        .unwrap();

    let pattern = Pattern::new().with_constructed(
        "P",
        ConstructedSpec {
            triples: vec![(ConstructedSlot::Var("s".into()), ConstructedSlot::Var("p".into()), ConstructedSlot::SelfRef)],
            exact: true,
        },
    );
    let bindings = store.search(&pattern).await.unwrap();
    let matched_ids: Vec<_> = bindings.iter().map(|binding| binding.handle("P").unwrap().id()).collect();
    assert!(matched_ids.contains(&exactly_one.id()));
    assert!(!matched_ids.contains(&two_triples.id()));
}

#[tokio::test]
async fn data_pattern_captures_fall_out_as_bound_text() {
    let store = MemoryStore::new();
    store.intern_data("hello".into(), "text".into()).await;

    let pattern = Pattern::new().with_data(
        "D",
        DataSpec {
            data: FieldSpec::Var("captured".into()),
            format: FieldSpec::Concrete("text".into()),
        },
    );
    let bindings = store.search(&pattern).await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].text("captured").unwrap(), "hello");
}

#[tokio::test]
async fn identity_transform_is_stable_across_a_second_run() {
    let source = MemoryStore::new();
    let target = MemoryStore::new();
    let a = source.intern_data("leaf".into(), "t".into()).await;
    let seed = source
        .intern_constructed(vec![(Slot::Ref(a.id()), Slot::Ref(a.id()), Slot::SelfRef)])
        .await
        .unwrap();

    let first_pass = transform(vec![seed.clone()], &source, &target, &IdentityRewrite).await.unwrap();
    let first_target = &first_pass[&seed.id()];
    let second_pass = transform(vec![seed.clone()], &source, &target, &IdentityRewrite).await.unwrap();
    let second_target = &second_pass[&seed.id()];

    assert_eq!(first_target.id(), second_target.id());
    assert_eq!(first_target.connections().unwrap(), seed.connections().unwrap().iter().copied().collect::<Vec<_>>().as_slice());
}

#[tokio::test]
async fn force_deleting_a_leaf_cascades_to_every_dependent_and_leaves_no_dangling_triple() {
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

    let pattern = Pattern::new().with_triple(
        PatternSlot::Var("x".into()),
        PatternSlot::Var("y".into()),
        PatternSlot::Var("z".into()),
    );
    assert!(store.search(&pattern).await.unwrap().is_empty());
}
