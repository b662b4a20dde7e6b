//! Structural verification
//!
//! These checks walk the arena and report the first broken invariant as
//! [`LayoutError::Invariant`]. They are meant for tests and debug hooks in
//! the host; nothing on the hot path calls them.

use crate::context::{LayoutContext, instance_size_for};
use crate::descriptors::DescriptorTableId;
use crate::error::{LayoutError, LayoutResult};
use crate::object::PropertyStorage;
use crate::shape::{DescriptorOwnership, FieldIndex, ShapeId, TransitionKey};
use crate::value::ObjectId;
use rustc_hash::FxHashMap;

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(LayoutError::invariant(format!($($arg)+)));
        }
    };
}

impl LayoutContext {
    /// Check every invariant of a single shape
    pub fn verify_shape(&self, shape: ShapeId) -> LayoutResult<()> {
        let record = self.check_shape(shape)?;
        let table = self.table(record.descriptors);
        let own = record.own_descriptors();

        ensure!(own <= table.len(), "{shape:?} sees {own} descriptors of a table with {}", table.len());
        ensure!(
            table.is_sorted_without_duplicates(own),
            "{shape:?} descriptor prefix is not sorted or has duplicates"
        );
        ensure!(
            !record.is_dictionary() || own == 0,
            "dictionary {shape:?} has {own} descriptors"
        );
        ensure!(
            record.instance_size == instance_size_for(record.in_object_properties),
            "{shape:?} instance size {} does not match {} inline slots",
            record.instance_size,
            record.in_object_properties
        );

        let mut nof = 0;
        for (i, descriptor) in table.prefix(own).iter().enumerate() {
            if let Some(index) = descriptor.field_index() {
                ensure!(index == nof, "{shape:?} descriptor {i} has field index {index}, expected {nof}");
                nof += 1;
            }
        }
        if !record.is_dictionary() && nof <= record.in_object_properties {
            ensure!(
                record.unused_property_fields == record.in_object_properties - nof,
                "{shape:?} reports {} unused fields with {nof} of {} inline slots used",
                record.unused_property_fields,
                record.in_object_properties
            );
        }

        match record.ownership {
            DescriptorOwnership::Owner => ensure!(
                own == table.len(),
                "owner {shape:?} sees {own} of {} descriptors",
                table.len()
            ),
            DescriptorOwnership::Reference(owner) => {
                let owner_record = self.check_shape(owner)?;
                ensure!(
                    owner_record.descriptors == record.descriptors,
                    "{shape:?} references {owner:?} but uses another table"
                );
                ensure!(
                    owner_record.own_descriptors() >= own,
                    "{shape:?} sees more descriptors than its owner {owner:?}"
                );
            }
        }

        if let Some(parent) = record.back_pointer {
            let parent_record = self.check_shape(parent)?;
            if record.is_deprecated() || parent_record.is_deprecated() {
                return Ok(());
            }
            let parent_own = parent_record.own_descriptors();
            let linked = if parent_own + 1 == own {
                let last = table.get(own - 1);
                parent_record
                    .transitions
                    .find(&TransitionKey::new(last.key.clone(), last.storage(), last.attributes))
                    == Some(shape)
            } else if parent_own == own {
                parent_record.transitions.elements_target() == Some(shape)
            } else {
                false
            };
            ensure!(linked, "{shape:?} is not reachable from its parent {parent:?}");
        }
        Ok(())
    }

    /// Check every shape, table ownership and object in the context
    pub fn verify_heap(&self) -> LayoutResult<()> {
        let mut owners: FxHashMap<DescriptorTableId, ShapeId> = FxHashMap::default();
        for index in 0..self.shape_count() {
            let shape = ShapeId::from_index(index as u32);
            self.verify_shape(shape)?;
            if self.shape(shape).ownership == DescriptorOwnership::Owner {
                if let Some(other) = owners.insert(self.shape(shape).descriptors, shape) {
                    return Err(LayoutError::invariant(format!(
                        "{shape:?} and {other:?} both own table {:?}",
                        self.shape(shape).descriptors
                    )));
                }
            }
        }
        for index in 0..self.object_count() {
            self.verify_object(ObjectId::from_index(index as u32))?;
        }
        Ok(())
    }

    /// Check that an object's storage matches its published shape
    pub fn verify_object(&self, obj: ObjectId) -> LayoutResult<()> {
        let object = self.object(obj)?;
        let shape = object.shape();
        let record = self.check_shape(shape)?;

        ensure!(
            object.in_object_slots().len() == record.in_object_properties as usize,
            "{obj:?} has {} inline slots, {shape:?} expects {}",
            object.in_object_slots().len(),
            record.in_object_properties
        );
        match (&object.properties, record.is_dictionary()) {
            (PropertyStorage::Dictionary(_), true) => {}
            (PropertyStorage::OutOfLine(slots), false) => {
                let capacity = record.out_of_line_capacity(self.number_of_fields(shape)) as usize;
                ensure!(
                    slots.len() == capacity,
                    "{obj:?} has {} out-of-line slots, {shape:?} expects {capacity}",
                    slots.len()
                );
                for descriptor in self.descriptors(shape) {
                    let Some(index) = descriptor.field_index() else {
                        continue;
                    };
                    let location = FieldIndex::for_field(index, record.in_object_properties);
                    let representation = descriptor.representation();
                    match object.slot(location) {
                        Some(slot) => ensure!(
                            slot.fits(representation),
                            "{obj:?} field {} holds {slot:?}, not {representation}",
                            descriptor.key
                        ),
                        None => {
                            return Err(LayoutError::invariant(format!(
                                "{obj:?} is missing slot {location:?}"
                            )));
                        }
                    }
                }
            }
            (_, dictionary) => {
                return Err(LayoutError::invariant(format!(
                    "{obj:?} storage mode disagrees with {shape:?} (dictionary: {dictionary})"
                )));
            }
        }

        let kind = record.elements_kind;
        ensure!(
            object.elements.matches_kind(kind),
            "{obj:?} elements store does not match {kind:?}"
        );
        ensure!(
            kind.is_holey() || kind.is_dictionary() || !object.elements.has_holes(),
            "{obj:?} has holes in packed {kind:?} elements"
        );
        Ok(())
    }
}
