//! Transition tree tests
//!
//! Sharing of shapes between objects built the same way, descriptor table
//! ownership, and the non-property edges (integrity, prototype).

use otter_vm_layout::{
    DescriptorOwnership, IntegrityLevel, LayoutConfig, LayoutContext, LookupResult, PropertyAttributes,
    PropertyKey, TransitionStorage, Value,
};
use proptest::prelude::*;

fn build(ctx: &mut LayoutContext, names: &[String]) -> otter_vm_layout::ObjectId {
    let root = ctx.root_shape().unwrap();
    let obj = ctx.allocate_object(root).unwrap();
    for (i, name) in names.iter().enumerate() {
        ctx.set_property(obj, name.as_str().into(), Value::Smi(i as i32)).unwrap();
    }
    obj
}

// ============================================================================
// Sharing
// ============================================================================

#[test]
fn test_same_construction_same_shape() {
    let mut ctx = LayoutContext::default();
    let names = ["x".to_string(), "y".to_string(), "z".to_string()];
    let first = build(&mut ctx, &names);
    let shapes = ctx.shape_count();
    let second = build(&mut ctx, &names);

    assert_eq!(ctx.object_shape(first).unwrap(), ctx.object_shape(second).unwrap());
    assert_eq!(ctx.shape_count(), shapes, "second object must not allocate shapes");
    assert_eq!(ctx.stats().transitions_reused, 3);
}

#[test]
fn test_order_matters() {
    let mut ctx = LayoutContext::default();
    let xy = build(&mut ctx, &["x".to_string(), "y".to_string()]);
    let yx = build(&mut ctx, &["y".to_string(), "x".to_string()]);
    assert_ne!(ctx.object_shape(xy).unwrap(), ctx.object_shape(yx).unwrap());
    ctx.verify_heap().unwrap();
}

#[test]
fn test_attributes_select_distinct_edges() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let a = ctx.allocate_object(root).unwrap();
    let b = ctx.allocate_object(root).unwrap();
    ctx.define_property(a, "k".into(), Value::Smi(1), PropertyAttributes::data())
        .unwrap();
    ctx.define_property(b, "k".into(), Value::Smi(1), PropertyAttributes::read_only())
        .unwrap();

    let (sa, sb) = (ctx.object_shape(a).unwrap(), ctx.object_shape(b).unwrap());
    assert_ne!(sa, sb);
    assert_eq!(
        ctx.find_transition(
            root,
            &"k".into(),
            TransitionStorage::TaggedField,
            PropertyAttributes::read_only()
        ),
        Some(sb)
    );
    assert_eq!(ctx.shape(root).transitions().property_count(), 2);
}

#[test]
fn test_branch_keeps_single_owner() {
    let mut ctx = LayoutContext::default();
    let ab = build(&mut ctx, &["a".to_string(), "b".to_string()]);
    let ac = build(&mut ctx, &["a".to_string(), "c".to_string()]);
    let (ab, ac) = (ctx.object_shape(ab).unwrap(), ctx.object_shape(ac).unwrap());
    let a = ctx.shape(ab).back_pointer().unwrap();

    // the first branch took the shared table, the second got a copy
    assert_eq!(ctx.shape(a).ownership(), DescriptorOwnership::Reference(ab));
    assert_eq!(ctx.shape(ab).ownership(), DescriptorOwnership::Owner);
    assert_eq!(ctx.shape(ac).ownership(), DescriptorOwnership::Owner);
    assert_ne!(ctx.shape(ab).descriptors(), ctx.shape(ac).descriptors());
    assert_eq!(ctx.shape(a).descriptors(), ctx.shape(ab).descriptors());

    let keys: Vec<_> = ctx.descriptors(ac).iter().map(|d| d.key.clone()).collect();
    assert_eq!(keys, vec![PropertyKey::from("a"), PropertyKey::from("c")]);
    assert_eq!(ctx.stats().transitions_branched, 1);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_transition_path_reaches_root() {
    let mut ctx = LayoutContext::default();
    let obj = build(&mut ctx, &["p".to_string(), "q".to_string(), "r".to_string()]);
    let shape = ctx.object_shape(obj).unwrap();
    let path = ctx.transition_path(shape);
    assert_eq!(path.len(), 4);
    assert_eq!(path.first().copied(), Some(ctx.root_shape().unwrap()));
    assert_eq!(path.last().copied(), Some(shape));
}

// ============================================================================
// Limits
// ============================================================================

#[test]
fn test_full_transition_table_detaches_children() {
    let mut ctx = LayoutContext::new(LayoutConfig::new().max_transitions(2));
    let a = build(&mut ctx, &["a".to_string()]);
    let b = build(&mut ctx, &["b".to_string()]);
    let c = build(&mut ctx, &["c".to_string()]);
    let root = ctx.root_shape().unwrap();

    assert_eq!(ctx.shape(ctx.object_shape(a).unwrap()).back_pointer(), Some(root));
    assert_eq!(ctx.shape(ctx.object_shape(b).unwrap()).back_pointer(), Some(root));
    let detached = ctx.object_shape(c).unwrap();
    assert_eq!(ctx.shape(detached).back_pointer(), None);
    assert_eq!(ctx.shape(root).transitions().property_count(), 2);

    // a second object does not find the detached shape again
    let again = build(&mut ctx, &["c".to_string()]);
    assert_ne!(ctx.object_shape(again).unwrap(), detached);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_lookup_locates_fields() {
    let mut ctx = LayoutContext::new(LayoutConfig::new().default_in_object_properties(2));
    let obj = build(&mut ctx, &["a".to_string(), "b".to_string(), "c".to_string()]);
    let shape = ctx.object_shape(obj).unwrap();

    assert!(matches!(
        ctx.lookup(shape, &"a".into()),
        LookupResult::Field { index: otter_vm_layout::FieldIndex::InObject(0), .. }
    ));
    assert!(matches!(
        ctx.lookup(shape, &"c".into()),
        LookupResult::Field { index: otter_vm_layout::FieldIndex::OutOfLine(0), .. }
    ));
    assert_eq!(ctx.lookup(shape, &"missing".into()), LookupResult::NotFound);
}

// ============================================================================
// Integrity and prototype edges
// ============================================================================

#[test]
fn test_integrity_edges_are_cached() {
    let mut ctx = LayoutContext::default();
    let obj = build(&mut ctx, &["a".to_string()]);
    let shape = ctx.object_shape(obj).unwrap();

    let sealed = ctx.seal(shape).unwrap();
    assert_eq!(ctx.seal(shape).unwrap(), sealed);
    assert_eq!(ctx.seal(sealed).unwrap(), sealed);
    assert!(ctx.shape(sealed).flags().sealed);
    assert!(!ctx.shape(sealed).is_extensible());
    assert!(!ctx.descriptor(sealed, 0).attributes.configurable);
    assert!(ctx.descriptor(sealed, 0).attributes.writable);

    let frozen = ctx.freeze(shape).unwrap();
    assert!(ctx.shape(frozen).flags().frozen);
    assert!(!ctx.descriptor(frozen, 0).attributes.writable);

    let non_extensible = ctx.prevent_extensions(shape).unwrap();
    assert!(!ctx.shape(non_extensible).is_extensible());
    assert_eq!(ctx.descriptor(non_extensible, 0).attributes, PropertyAttributes::data());
    assert_eq!(
        ctx.shape(shape).transitions().integrity_target(IntegrityLevel::Frozen),
        Some(frozen)
    );
    ctx.verify_heap().unwrap();
}

#[test]
fn test_prototype_cache_evicts_oldest() {
    let mut ctx = LayoutContext::default();
    let obj = build(&mut ctx, &["a".to_string()]);
    let shape = ctx.object_shape(obj).unwrap();
    let root = ctx.root_shape().unwrap();
    let protos: Vec<_> = (0..5).map(|_| ctx.allocate_object(root).unwrap()).collect();

    let first = ctx.transition_to_prototype(shape, Some(protos[0])).unwrap();
    assert_eq!(ctx.transition_to_prototype(shape, Some(protos[0])).unwrap(), first);
    assert_eq!(ctx.shape(first).prototype(), Some(protos[0]));
    for proto in &protos[1..] {
        ctx.transition_to_prototype(shape, Some(*proto)).unwrap();
    }

    // four entries fit, so the first one was pushed out
    assert_eq!(ctx.shape(shape).transitions().prototype_target(Some(protos[0])), None);
    assert_ne!(ctx.transition_to_prototype(shape, Some(protos[0])).unwrap(), first);
    assert_eq!(ctx.transition_to_prototype(shape, ctx.shape(shape).prototype()).unwrap(), shape);
}

#[test]
fn test_root_prototype_transition_uses_registered_root() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let proto = ctx.allocate_object(root).unwrap();
    let with_proto = ctx.transition_to_prototype(root, Some(proto)).unwrap();
    assert!(ctx.shape(with_proto).is_tree_root());
    assert_eq!(
        ctx.initial_shape(None, Some(proto), Default::default(), 4).unwrap(),
        with_proto
    );
}

// ============================================================================
// Properties
// ============================================================================

fn unique_names(indices: Vec<usize>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for i in indices {
        let name = format!("p{i}");
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

proptest! {
    #[test]
    fn prop_replaying_a_sequence_reuses_shapes(indices in prop::collection::vec(0usize..8, 1..10)) {
        let names = unique_names(indices);
        let mut ctx = LayoutContext::default();
        let first = build(&mut ctx, &names);
        let shapes = ctx.shape_count();
        let second = build(&mut ctx, &names);

        prop_assert_eq!(ctx.object_shape(first).unwrap(), ctx.object_shape(second).unwrap());
        prop_assert_eq!(ctx.shape_count(), shapes);
        prop_assert!(ctx.verify_heap().is_ok());
    }

    #[test]
    fn prop_descriptor_prefix_matches_insertion(indices in prop::collection::vec(0usize..12, 1..12)) {
        let names = unique_names(indices);
        let mut ctx = LayoutContext::default();
        let obj = build(&mut ctx, &names);
        let keys: Vec<String> = ctx
            .own_keys(obj)
            .unwrap()
            .iter()
            .map(|k| k.as_str().unwrap_or_default().to_string())
            .collect();
        prop_assert_eq!(keys, names);
    }
}
