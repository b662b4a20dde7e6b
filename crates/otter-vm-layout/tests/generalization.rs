//! Field generalization tests
//!
//! In-place widening, branch replacement with deprecation, and the
//! monotonicity of representations and field types.

use otter_vm_layout::{
    ConstructorId, DependencyEvent, FieldSlot, FieldType, InstanceType, LayoutConfig, LayoutContext,
    PropertyAttributes, PropertyDetails, PropertyValue, RecordingObserver, Representation,
    TransitionStorage, Value,
};
use proptest::prelude::*;
use std::sync::Arc;

fn data(value: Value) -> Option<PropertyValue> {
    Some(PropertyValue::Data(value))
}

fn field(representation: Representation) -> PropertyDetails {
    PropertyDetails::Field {
        representation,
        field_type: FieldType::Any,
    }
}

// ============================================================================
// Branch replacement
// ============================================================================

#[test]
fn test_double_field_is_a_sibling_transition() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let attrs = PropertyAttributes::data();

    let s1 = ctx
        .add_transition(root, "x".into(), attrs, field(Representation::Smi))
        .unwrap();
    let s2 = ctx
        .add_transition(s1, "y".into(), attrs, field(Representation::Smi))
        .unwrap();
    let shapes = ctx.shape_count();

    let d = ctx
        .add_transition(root, "x".into(), attrs, field(Representation::Double))
        .unwrap();
    assert_ne!(d, s1);
    assert_eq!(ctx.shape_count(), shapes + 1);
    assert_eq!(ctx.descriptor(d, 0).representation(), Representation::Double);
    assert_eq!(ctx.shape(d).back_pointer(), Some(root));
    assert!(!ctx.shape(s1).is_deprecated());
    assert!(!ctx.shape(s2).is_deprecated());
    assert_eq!(
        ctx.find_transition(root, &"x".into(), TransitionStorage::TaggedField, attrs),
        Some(s1)
    );
    assert_eq!(
        ctx.find_transition(root, &"x".into(), TransitionStorage::DoubleField, attrs),
        Some(d)
    );

    // both siblings are handed out again for their own storage
    assert_eq!(
        ctx.add_transition(root, "x".into(), attrs, field(Representation::Smi))
            .unwrap(),
        s1
    );
    assert_eq!(
        ctx.add_transition(root, "x".into(), attrs, field(Representation::Double))
            .unwrap(),
        d
    );
    assert_eq!(ctx.shape_count(), shapes + 1);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_double_store_on_fresh_object_keeps_smi_branch() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();

    let o1 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o1, "x".into(), Value::Smi(1)).unwrap();
    ctx.set_property(o1, "y".into(), Value::Smi(2)).unwrap();
    let s2 = ctx.object_shape(o1).unwrap();
    let s1 = ctx.shape(s2).back_pointer().unwrap();

    let o2 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o2, "x".into(), Value::number(1.5)).unwrap();
    let double = ctx.object_shape(o2).unwrap();
    assert_ne!(double, s1);
    assert_eq!(ctx.shape(double).back_pointer(), Some(root));
    assert_eq!(ctx.descriptor(double, 0).representation(), Representation::Double);
    assert!(!ctx.shape(s1).is_deprecated());
    assert!(!ctx.shape(s2).is_deprecated());
    assert_eq!(ctx.stats().shapes_deprecated, 0);

    // a Smi store from the root still lands on S1 without allocating
    let shapes = ctx.shape_count();
    let o3 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o3, "x".into(), Value::Smi(3)).unwrap();
    assert_eq!(ctx.object_shape(o3).unwrap(), s1);
    assert_eq!(ctx.shape_count(), shapes);

    assert_eq!(ctx.object_shape(o1).unwrap(), s2);
    assert_eq!(ctx.get_property(o1, &"x".into()).unwrap(), data(Value::Smi(1)));
    assert_eq!(ctx.get_property(o2, &"x".into()).unwrap(), data(Value::number(1.5)));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_double_store_on_existing_field_retires_branch() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();

    let o1 = ctx.allocate_object(root).unwrap();
    let o2 = ctx.allocate_object(root).unwrap();
    for (obj, x) in [(o1, 1), (o2, 10)] {
        ctx.set_property(obj, "x".into(), Value::Smi(x)).unwrap();
        ctx.set_property(obj, "y".into(), Value::Smi(x + 1)).unwrap();
    }
    let s2 = ctx.object_shape(o1).unwrap();
    let s1 = ctx.shape(s2).back_pointer().unwrap();

    ctx.set_property(o1, "x".into(), Value::number(1.5)).unwrap();
    let current = ctx.object_shape(o1).unwrap();
    let double = ctx.shape(current).back_pointer().unwrap();
    assert!(ctx.shape(s1).is_deprecated());
    assert!(ctx.shape(s2).is_deprecated());
    assert_eq!(ctx.shape(double).back_pointer(), Some(root));
    assert_eq!(ctx.descriptor(current, 0).representation(), Representation::Double);
    assert_eq!(ctx.descriptor(current, 1).representation(), Representation::Smi);
    assert_eq!(ctx.get_property(o1, &"x".into()).unwrap(), data(Value::number(1.5)));
    assert_eq!(ctx.get_property(o1, &"y".into()).unwrap(), data(Value::Smi(2)));

    // the other object follows on access and keeps its values
    assert_eq!(ctx.get_property(o2, &"x".into()).unwrap(), data(Value::Smi(10)));
    assert_eq!(ctx.object_shape(o2).unwrap(), current);
    assert_eq!(ctx.get_property(o2, &"y".into()).unwrap(), data(Value::Smi(11)));

    // the retired Smi edge now resolves to the double sibling
    let shapes = ctx.shape_count();
    let o3 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o3, "x".into(), Value::Smi(3)).unwrap();
    assert_eq!(ctx.object_shape(o3).unwrap(), double);
    assert_eq!(ctx.shape_count(), shapes);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_middle_field_widened_to_double() {
    let mut ctx = LayoutContext::new(LayoutConfig::new().default_in_object_properties(3));
    let root = ctx.root_shape().unwrap();
    let obj = ctx.allocate_object(root).unwrap();
    ctx.set_property(obj, "a".into(), Value::Smi(10)).unwrap();
    ctx.set_property(obj, "b".into(), Value::Smi(20)).unwrap();
    ctx.set_property(obj, "c".into(), Value::Smi(30)).unwrap();
    let before = ctx.object_shape(obj).unwrap();

    let after = ctx
        .generalize(before, 1, Representation::Double, FieldType::Any, false)
        .unwrap();
    assert_ne!(after, before);
    assert!(ctx.shape(before).is_deprecated());
    assert_eq!(ctx.ensure_current(obj).unwrap(), after);

    let object = ctx.object(obj).unwrap();
    assert_eq!(object.in_object_slots()[0], FieldSlot::Smi(10));
    assert_eq!(object.in_object_slots()[1], FieldSlot::BoxedDouble(Box::new(20.0)));
    assert_eq!(object.in_object_slots()[2], FieldSlot::Smi(30));
    assert_eq!(ctx.stats().migrations_relayout, 1);
    assert_eq!(ctx.get_property(obj, &"b".into()).unwrap(), data(Value::Smi(20)));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_generalization_tail_keeps_later_fields() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let obj = ctx.allocate_object(root).unwrap();
    ctx.set_property(obj, "a".into(), Value::Smi(1)).unwrap();
    ctx.set_property(obj, "b".into(), Value::string("s")).unwrap();
    ctx.set_property(obj, "c".into(), Value::Smi(3)).unwrap();

    ctx.set_property(obj, "a".into(), Value::number(0.25)).unwrap();
    let shape = ctx.object_shape(obj).unwrap();
    assert_eq!(ctx.descriptor(shape, 0).representation(), Representation::Double);
    assert_eq!(ctx.descriptor(shape, 1).representation(), Representation::HeapObject);
    assert_eq!(ctx.descriptor(shape, 2).representation(), Representation::Smi);
    assert_eq!(ctx.get_property(obj, &"b".into()).unwrap(), data(Value::string("s")));
    assert_eq!(ctx.get_property(obj, &"c".into()).unwrap(), data(Value::Smi(3)));
}

// ============================================================================
// In-place widening
// ============================================================================

#[test]
fn test_tagged_widening_is_in_place() {
    let mut ctx = LayoutContext::default();
    let observer = Arc::new(RecordingObserver::new());
    ctx.add_observer(observer.clone());
    let root = ctx.root_shape().unwrap();
    let obj = ctx.allocate_object(root).unwrap();
    ctx.set_property(obj, "v".into(), Value::Smi(1)).unwrap();
    ctx.set_property(obj, "w".into(), Value::Smi(2)).unwrap();
    let shape = ctx.object_shape(obj).unwrap();
    let owner = ctx.field_owner(shape, 0);
    observer.take();

    ctx.set_property(obj, "v".into(), Value::string("now a string")).unwrap();
    assert_eq!(ctx.object_shape(obj).unwrap(), shape);
    assert_eq!(ctx.descriptor(shape, 0).representation(), Representation::Tagged);
    assert_eq!(ctx.descriptor(owner, 0).representation(), Representation::Tagged);
    assert_eq!(ctx.stats().in_place_generalizations, 1);
    assert_eq!(ctx.stats().shapes_deprecated, 0);
    assert!(
        observer
            .events()
            .contains(&DependencyEvent::FieldGeneralized { shape: owner, descriptor: 0 })
    );
}

#[test]
fn test_field_type_widens_to_any() {
    let mut ctx = LayoutContext::new(LayoutConfig::new().max_class_set_size(1));
    let root = ctx.root_shape().unwrap();
    let point = ctx
        .initial_shape(Some(ConstructorId(1)), None, InstanceType::Object, 4)
        .unwrap();
    let line = ctx
        .initial_shape(Some(ConstructorId(2)), None, InstanceType::Object, 4)
        .unwrap();
    let a = ctx.allocate_object(point).unwrap();
    let b = ctx.allocate_object(line).unwrap();

    let holder = ctx.allocate_object(root).unwrap();
    ctx.set_property(holder, "ref".into(), Value::Object(a)).unwrap();
    let shape = ctx.object_shape(holder).unwrap();
    assert_eq!(ctx.descriptor(shape, 0).representation(), Representation::HeapObject);
    assert_eq!(ctx.descriptor(shape, 0).field_type().classes(), &[point]);

    // an object of a second class exceeds the one-class budget
    ctx.set_property(holder, "ref".into(), Value::Object(b)).unwrap();
    let shape = ctx.object_shape(holder).unwrap();
    assert!(ctx.descriptor(shape, 0).field_type().is_any());
    assert_eq!(ctx.descriptor(shape, 0).representation(), Representation::HeapObject);
    assert_eq!(ctx.get_property(holder, &"ref".into()).unwrap(), data(Value::Object(b)));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_constant_becomes_field_on_conflict() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let a = ctx.allocate_object(root).unwrap();
    let b = ctx.allocate_object(root).unwrap();
    ctx.define_constant(a, "k".into(), Value::Smi(7), PropertyAttributes::data())
        .unwrap();
    ctx.define_constant(b, "k".into(), Value::Smi(7), PropertyAttributes::data())
        .unwrap();
    let constant = ctx.object_shape(a).unwrap();
    assert_eq!(ctx.object_shape(b).unwrap(), constant);
    assert_eq!(ctx.descriptor(constant, 0).field_index(), None);

    ctx.set_property(b, "k".into(), Value::Smi(8)).unwrap();
    let field = ctx.object_shape(b).unwrap();
    assert!(ctx.descriptor(field, 0).field_index().is_some());
    assert!(ctx.shape(constant).is_deprecated());
    assert_eq!(ctx.get_property(a, &"k".into()).unwrap(), data(Value::Smi(7)));
    assert_eq!(ctx.get_property(b, &"k".into()).unwrap(), data(Value::Smi(8)));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_forced_constant_field_holds_both_values() {
    let cases = [
        (Value::Smi(7), Value::number(2.5), Representation::Double),
        (Value::Smi(7), Value::string("x"), Representation::Tagged),
        (Value::string("s"), Value::number(1.5), Representation::Tagged),
        (Value::string("s"), Value::string("t"), Representation::HeapObject),
        (Value::number(0.5), Value::Smi(3), Representation::Double),
        (Value::Null, Value::Smi(1), Representation::Tagged),
    ];
    for (constant, stored, expected) in cases {
        let mut ctx = LayoutContext::default();
        let root = ctx.root_shape().unwrap();
        let a = ctx.allocate_object(root).unwrap();
        let b = ctx.allocate_object(root).unwrap();
        for obj in [a, b] {
            ctx.define_constant(obj, "k".into(), constant.clone(), PropertyAttributes::data())
                .unwrap();
        }

        ctx.set_property(b, "k".into(), stored.clone()).unwrap();
        let shape = ctx.object_shape(b).unwrap();
        assert_eq!(
            ctx.descriptor(shape, 0).representation(),
            expected,
            "{constant:?} then {stored:?}"
        );
        assert_eq!(ctx.get_property(a, &"k".into()).unwrap(), data(constant.clone()));
        assert_eq!(ctx.get_property(b, &"k".into()).unwrap(), data(stored.clone()));
        assert_eq!(ctx.object_shape(a).unwrap(), shape);
        ctx.verify_heap().unwrap();
    }
}

// ============================================================================
// Properties
// ============================================================================

fn representation() -> impl Strategy<Value = Representation> {
    prop_oneof![
        Just(Representation::None),
        Just(Representation::Smi),
        Just(Representation::Double),
        Just(Representation::HeapObject),
        Just(Representation::Tagged),
    ]
}

proptest! {
    #[test]
    fn prop_generalization_never_narrows(steps in prop::collection::vec(representation(), 1..8)) {
        let mut ctx = LayoutContext::default();
        let root = ctx.root_shape().unwrap();
        let obj = ctx.allocate_object(root).unwrap();
        ctx.set_property(obj, "f".into(), Value::Smi(0)).unwrap();
        let mut shape = ctx.object_shape(obj).unwrap();
        let mut previous = ctx.descriptor(shape, 0).representation();

        for step in steps {
            shape = ctx.generalize(shape, 0, step, FieldType::Any, false).unwrap();
            let current = ctx.descriptor(shape, 0).representation();
            prop_assert!(current.accommodates(previous), "{current} cannot hold {previous}");
            prop_assert!(current.accommodates(step) || step.is_none());
            prop_assert!(!ctx.shape(shape).is_deprecated());
            previous = current;
        }

        // Tagged/Any is a fixed point
        let top = ctx.generalize(shape, 0, Representation::Tagged, FieldType::Any, false).unwrap();
        prop_assert_eq!(ctx.descriptor(top, 0).representation(), Representation::Tagged);
        prop_assert_eq!(
            ctx.generalize(top, 0, Representation::Tagged, FieldType::Any, false).unwrap(),
            top
        );

        prop_assert_eq!(ctx.get_property(obj, &"f".into()).unwrap(), data(Value::Smi(0)));
        prop_assert!(ctx.verify_heap().is_ok());
    }
}
