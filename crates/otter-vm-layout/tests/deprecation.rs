//! Deprecation tests
//!
//! Objects left on deprecated shapes must reach a live shape on their next
//! access without losing values, and dependents hear about every shape that
//! was retired.

use otter_vm_layout::{
    DependencyEvent, LayoutContext, NormalizationMode, PropertyAttributes, PropertyKey, PropertyValue,
    RecordingObserver, Value,
};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_every_stale_object_recovers() {
    init_tracing();
    let mut ctx = LayoutContext::default();
    let observer = Arc::new(RecordingObserver::new());
    ctx.add_observer(observer.clone());
    let root = ctx.root_shape().unwrap();

    let o1 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o1, "a".into(), Value::Smi(1)).unwrap();
    let o2 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o2, "a".into(), Value::Smi(2)).unwrap();
    ctx.set_property(o2, "b".into(), Value::Smi(3)).unwrap();
    let o3 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o3, "a".into(), Value::Smi(4)).unwrap();
    ctx.set_property(o3, "c".into(), Value::string("five")).unwrap();
    let stale = [
        ctx.object_shape(o1).unwrap(),
        ctx.object_shape(o2).unwrap(),
        ctx.object_shape(o3).unwrap(),
    ];

    // widening `a` to Double retires the whole subtree below it
    ctx.set_property(o1, "a".into(), Value::number(0.5)).unwrap();
    for shape in stale {
        assert!(ctx.shape(shape).is_deprecated());
        assert!(observer.saw_deprecation(shape));
    }

    let expected = [
        (o1, vec![("a", Value::number(0.5))]),
        (o2, vec![("a", Value::Smi(2)), ("b", Value::Smi(3))]),
        (o3, vec![("a", Value::Smi(4)), ("c", Value::string("five"))]),
    ];
    for (obj, props) in expected {
        let live = ctx.ensure_current(obj).unwrap();
        assert!(!ctx.shape(live).is_deprecated());
        let actual: Vec<_> = ctx
            .own_properties(obj)
            .unwrap()
            .into_iter()
            .map(|(key, value, _)| (key, value))
            .collect();
        let wanted: Vec<_> = props
            .into_iter()
            .map(|(name, value)| (PropertyKey::from(name), PropertyValue::Data(value)))
            .collect();
        assert_eq!(actual, wanted);
    }

    // all three now hang below the same double-typed `a`
    let a = ctx.shape(ctx.object_shape(o2).unwrap()).back_pointer().unwrap();
    assert_eq!(ctx.shape(ctx.object_shape(o3).unwrap()).back_pointer(), Some(a));
    assert_eq!(ctx.object_shape(o1).unwrap(), a);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_successor_is_cached() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let o1 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o1, "a".into(), Value::Smi(1)).unwrap();
    ctx.set_property(o1, "b".into(), Value::Smi(2)).unwrap();
    let stale = ctx.object_shape(o1).unwrap();

    let o2 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o2, "a".into(), Value::Smi(3)).unwrap();
    ctx.set_property(o2, "a".into(), Value::number(0.5)).unwrap();
    assert!(ctx.shape(stale).is_deprecated());

    let first = ctx.updated_shape(stale).unwrap();
    let shapes = ctx.shape_count();
    assert_eq!(ctx.updated_shape(stale).unwrap(), first);
    assert_eq!(ctx.current_shape_for_deprecated(stale).unwrap(), Some(first));
    assert_eq!(ctx.shape_count(), shapes);
}

#[test]
fn test_allocation_on_deprecated_shape_uses_replacement() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let o1 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o1, "a".into(), Value::Smi(1)).unwrap();
    let stale = ctx.object_shape(o1).unwrap();
    ctx.set_property(o1, "a".into(), Value::number(1.5)).unwrap();
    assert!(ctx.shape(stale).is_deprecated());

    let fresh = ctx.allocate_object(stale).unwrap();
    assert_eq!(ctx.object_shape(fresh).unwrap(), ctx.object_shape(o1).unwrap());
    ctx.verify_object(fresh).unwrap();
}

#[test]
fn test_stale_object_can_be_normalized() {
    let mut ctx = LayoutContext::default();
    let root = ctx.root_shape().unwrap();
    let o1 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o1, "a".into(), Value::Smi(1)).unwrap();
    ctx.set_property(o1, "b".into(), Value::string("b")).unwrap();
    let o2 = ctx.allocate_object(root).unwrap();
    ctx.set_property(o2, "a".into(), Value::Smi(2)).unwrap();
    ctx.set_property(o2, "a".into(), Value::number(0.5)).unwrap();
    assert!(ctx.shape(ctx.object_shape(o1).unwrap()).is_deprecated());

    ctx.normalize(o1, NormalizationMode::KeepInObjectProperties).unwrap();
    assert_eq!(
        ctx.get_property(o1, &"b".into()).unwrap(),
        Some(PropertyValue::Data(Value::string("b")))
    );
    assert_eq!(
        ctx.get_attributes(o1, &"a".into()).unwrap(),
        Some(PropertyAttributes::data())
    );
}

#[test]
fn test_unstable_events_follow_migrations() {
    let mut ctx = LayoutContext::default();
    let observer = Arc::new(RecordingObserver::new());
    ctx.add_observer(observer.clone());
    let root = ctx.root_shape().unwrap();
    let obj = ctx.allocate_object(root).unwrap();
    assert!(ctx.is_stable(root));

    ctx.set_property(obj, "a".into(), Value::Smi(1)).unwrap();
    assert!(!ctx.is_stable(root));
    let a = ctx.object_shape(obj).unwrap();
    assert!(ctx.is_stable(a));
    assert_eq!(observer.take(), vec![DependencyEvent::ShapeUnstable(root)]);
}
