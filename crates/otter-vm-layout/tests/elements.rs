//! Elements kind tests
//!
//! Kind widening on stores, holes, sparse stores and the elements-edge
//! chain shared by objects of one shape.

use otter_vm_layout::{ElementsKind, LayoutConfig, LayoutContext, ObjectId, Value};

fn kind_of(ctx: &LayoutContext, obj: ObjectId) -> ElementsKind {
    ctx.shape(ctx.object_shape(obj).unwrap()).elements_kind()
}

#[test]
fn test_kind_widens_with_stored_values() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let arr = ctx.allocate_object(root).unwrap();

    ctx.set_element(arr, 0, Value::Smi(1)).unwrap();
    assert_eq!(kind_of(&ctx, arr), ElementsKind::PackedSmi);

    ctx.set_element(arr, 1, Value::number(1.5)).unwrap();
    assert_eq!(kind_of(&ctx, arr), ElementsKind::PackedDouble);
    assert_eq!(ctx.get_element(arr, 0).unwrap(), Some(Value::Smi(1)));

    ctx.set_element(arr, 2, Value::string("x")).unwrap();
    assert_eq!(kind_of(&ctx, arr), ElementsKind::PackedObject);
    assert_eq!(ctx.get_element(arr, 1).unwrap(), Some(Value::Number(1.5)));
    assert_eq!(ctx.elements_length(arr).unwrap(), 3);

    // storing a Smi never narrows the kind again
    ctx.set_element(arr, 0, Value::Smi(5)).unwrap();
    assert_eq!(kind_of(&ctx, arr), ElementsKind::PackedObject);
    assert_eq!(ctx.stats().elements_transitions, 2);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_gap_makes_kind_holey() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let arr = ctx.allocate_object(root).unwrap();
    ctx.set_element(arr, 0, Value::Smi(1)).unwrap();
    ctx.set_element(arr, 4, Value::Smi(5)).unwrap();

    assert_eq!(kind_of(&ctx, arr), ElementsKind::HoleySmi);
    assert_eq!(ctx.get_element(arr, 2).unwrap(), None);
    assert_eq!(ctx.elements_length(arr).unwrap(), 5);
    ctx.verify_object(arr).unwrap();
}

#[test]
fn test_delete_element_punches_hole() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let arr = ctx.allocate_object(root).unwrap();
    ctx.set_element(arr, 0, Value::number(0.5)).unwrap();
    ctx.set_element(arr, 1, Value::number(1.5)).unwrap();

    assert!(ctx.delete_element(arr, 0).unwrap());
    assert_eq!(kind_of(&ctx, arr), ElementsKind::HoleyDouble);
    assert_eq!(ctx.get_element(arr, 0).unwrap(), None);
    assert!(!ctx.delete_element(arr, 0).unwrap());
    ctx.verify_object(arr).unwrap();
}

#[test]
fn test_sparse_store_uses_dictionary_elements() {
    let mut ctx = LayoutContext::new(LayoutConfig::default());
    let root = ctx.root_shape().unwrap();
    let arr = ctx.allocate_object(root).unwrap();
    ctx.set_element(arr, 0, Value::Smi(1)).unwrap();
    let gap = ctx.config().max_elements_gap;
    ctx.set_element(arr, gap + 10, Value::Smi(2)).unwrap();

    assert_eq!(kind_of(&ctx, arr), ElementsKind::Dictionary);
    assert_eq!(ctx.get_element(arr, 0).unwrap(), Some(Value::Smi(1)));
    assert_eq!(ctx.get_element(arr, gap + 10).unwrap(), Some(Value::Smi(2)));
    assert_eq!(ctx.get_element(arr, 5).unwrap(), None);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_elements_chain_is_shared() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let a = ctx.allocate_object(root).unwrap();
    let b = ctx.allocate_object(root).unwrap();
    ctx.set_property(a, "len".into(), Value::Smi(0)).unwrap();
    ctx.set_property(b, "len".into(), Value::Smi(0)).unwrap();

    ctx.set_element(a, 0, Value::number(0.5)).unwrap();
    let shapes = ctx.shape_count();
    ctx.set_element(b, 0, Value::number(2.5)).unwrap();

    let shape = ctx.object_shape(a).unwrap();
    assert_eq!(ctx.object_shape(b).unwrap(), shape);
    assert_eq!(ctx.shape_count(), shapes);
    // PackedSmi -> HoleySmi -> PackedDouble
    let holey = ctx.shape(shape).back_pointer().unwrap();
    assert_eq!(ctx.shape(holey).elements_kind(), ElementsKind::HoleySmi);
    assert_eq!(ctx.descriptors(shape).len(), 1);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_property_added_after_kind_change() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let arr = ctx.allocate_object(root).unwrap();
    ctx.set_element(arr, 0, Value::string("s")).unwrap();
    ctx.set_property(arr, "name".into(), Value::Smi(1)).unwrap();

    let shape = ctx.object_shape(arr).unwrap();
    assert_eq!(ctx.shape(shape).elements_kind(), ElementsKind::PackedObject);
    assert_eq!(ctx.get_element(arr, 0).unwrap(), Some(Value::string("s")));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_kind_lattice() {
    use ElementsKind::*;
    assert_eq!(PackedSmi.generalize(PackedDouble), PackedDouble);
    assert_eq!(HoleySmi.generalize(PackedDouble), HoleyDouble);
    assert_eq!(PackedDouble.generalize(PackedObject), PackedObject);
    assert_eq!(HoleyObject.generalize(Dictionary), Dictionary);
    assert!(HoleyObject.is_more_general_than(PackedSmi));
    assert!(!PackedDouble.is_more_general_than(HoleySmi));
}
