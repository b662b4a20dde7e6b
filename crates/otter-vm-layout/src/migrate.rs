//! Object migration between fast shapes
//!
//! Three strategies, cheapest first:
//!
//! - swap: every field keeps its slot and boxing, only the shape changes
//! - extend: existing fields stay put and new fields are appended
//! - relayout: every field is copied into fresh storage at its new index
//!
//! A relayout builds the new storage off to the side with every allocation
//! booked in one reservation. Nothing about the object changes until all of
//! it has succeeded, and the shape is published last.

use crate::context::LayoutContext;
use crate::descriptors::DescriptorDetails;
use crate::error::{LayoutError, LayoutResult};
use crate::memory::{BOXED_DOUBLE_SIZE, BarrierSlot, TAGGED_SIZE};
use crate::object::{FieldSlot, PropertyStorage};
use crate::representation::Representation;
use crate::shape::{FieldIndex, ShapeId};
use crate::value::{ObjectId, Value};

/// Where the value of a target field comes from
#[derive(Debug)]
enum Source {
    Slot {
        location: FieldIndex,
        representation: Representation,
    },
    Constant(Value),
    Missing,
}

#[derive(Debug)]
struct FieldMove {
    to: FieldIndex,
    representation: Representation,
    source: Source,
}

impl FieldMove {
    /// Same slot and same boxing before and after
    fn stays_in_place(&self) -> bool {
        match self.source {
            Source::Slot {
                location,
                representation,
            } => location == self.to && representation.is_double() == self.representation.is_double(),
            _ => false,
        }
    }
}

impl LayoutContext {
    /// Move `obj` to `target`, converting its field storage as needed.
    ///
    /// Both shapes must be fast. Fields are matched by name; fields missing
    /// from the old shape start uninitialized (or as a zero box for Double
    /// fields) and fields missing from the target are dropped. On
    /// allocation failure the object is left untouched under its old shape.
    pub fn migrate(&mut self, obj: ObjectId, target: ShapeId) -> LayoutResult<()> {
        let from = self.object(obj)?.shape();
        if from == target {
            return Ok(());
        }
        if self.check_shape(from)?.is_dictionary() {
            return Err(LayoutError::DictionaryMode(from));
        }
        if self.check_shape(target)?.is_dictionary() {
            return Err(LayoutError::DictionaryMode(target));
        }

        let plan = self.migration_plan(from, target);
        let old_nof = self.number_of_fields(from) as usize;
        let new_nof = plan.len();
        let (old, new) = (self.shape(from), self.shape(target));
        let same_frame = old.in_object_properties == new.in_object_properties;
        let new_capacity = new.out_of_line_capacity(new_nof as u32) as usize;
        let old_capacity = self.objects[obj.index()].out_of_line_slots().len();

        if same_frame
            && new_nof == old_nof
            && new_capacity == old_capacity
            && plan.iter().all(FieldMove::stays_in_place)
        {
            self.objects[obj.index()].publish_shape(target);
            self.stats.migrations_swapped += 1;
        } else if same_frame
            && new_nof > old_nof
            && new_capacity >= old_capacity
            && plan[..old_nof].iter().all(FieldMove::stays_in_place)
            && plan[old_nof..].iter().all(|m| matches!(m.source, Source::Missing))
        {
            self.extend_storage(obj, target, &plan[old_nof..], new_capacity)?;
            self.stats.migrations_extended += 1;
        } else {
            self.relayout(obj, target, &plan, new_capacity)?;
            self.stats.migrations_relayout += 1;
            tracing::debug!(
                target: "otter::layout",
                object = obj.index(),
                from = from.index(),
                to = target.index(),
                fields = new_nof,
                "relayout migration"
            );
        }
        self.mark_unstable(from);
        Ok(())
    }

    /// One entry per field of `target`, in field order
    fn migration_plan(&self, from: ShapeId, target: ShapeId) -> Vec<FieldMove> {
        let old_in_object = self.shape(from).in_object_properties;
        let new_in_object = self.shape(target).in_object_properties;
        self.descriptors(target)
            .iter()
            .filter_map(|d| {
                let DescriptorDetails::Field {
                    index,
                    representation,
                    ..
                } = d.details
                else {
                    return None;
                };
                let source = match self.search_descriptor(from, &d.key) {
                    Some(old) => match &self.descriptor(from, old).details {
                        DescriptorDetails::Field {
                            index,
                            representation,
                            ..
                        } => Source::Slot {
                            location: FieldIndex::for_field(*index, old_in_object),
                            representation: *representation,
                        },
                        DescriptorDetails::Constant(value) => Source::Constant(value.clone()),
                        DescriptorDetails::Accessor(_) => Source::Missing,
                    },
                    None => Source::Missing,
                };
                Some(FieldMove {
                    to: FieldIndex::for_field(index, new_in_object),
                    representation,
                    source,
                })
            })
            .collect()
    }

    fn extend_storage(
        &mut self,
        obj: ObjectId,
        target: ShapeId,
        added: &[FieldMove],
        new_capacity: usize,
    ) -> LayoutResult<()> {
        let old_capacity = self.objects[obj.index()].out_of_line_slots().len();
        let mut reservation = self.memory.reserve();
        reservation.alloc((new_capacity - old_capacity) * TAGGED_SIZE)?;
        let mut fresh = Vec::with_capacity(added.len());
        for m in added {
            let slot = FieldSlot::default_for(m.representation);
            if slot.is_boxed_double() {
                reservation.alloc(BOXED_DOUBLE_SIZE)?;
            }
            fresh.push((m.to, slot));
        }
        reservation.commit();

        let object = &mut self.objects[obj.index()];
        if let PropertyStorage::OutOfLine(slots) = &mut object.properties {
            slots.resize(new_capacity, FieldSlot::Uninitialized);
        }
        for (location, slot) in fresh {
            if let Some(existing) = object.slot_mut(location) {
                *existing = slot;
            }
        }
        object.publish_shape(target);
        Ok(())
    }

    fn relayout(
        &mut self,
        obj: ObjectId,
        target: ShapeId,
        plan: &[FieldMove],
        new_capacity: usize,
    ) -> LayoutResult<()> {
        let new_in_object = self.shape(target).in_object_properties as usize;
        let object = &self.objects[obj.index()];
        let inline_len = object.in_object.len();
        if new_in_object > inline_len {
            return Err(LayoutError::invariant(format!(
                "{obj:?} has {inline_len} inline slots, {target:?} needs {new_in_object}"
            )));
        }
        let old_capacity = object.out_of_line_slots().len();
        let old_boxes = object.boxed_double_count();

        let mut reservation = self.memory.reserve();
        if new_capacity > old_capacity {
            reservation.alloc((new_capacity - old_capacity) * TAGGED_SIZE)?;
        }
        let mut inline = vec![FieldSlot::Uninitialized; new_in_object];
        let mut out_of_line = vec![FieldSlot::Uninitialized; new_capacity];
        for m in plan {
            let slot = match &m.source {
                Source::Slot { location, .. } => match object.slot(*location) {
                    None | Some(FieldSlot::Uninitialized) => FieldSlot::default_for(m.representation),
                    Some(old) => FieldSlot::encode(&old.to_value(), m.representation),
                },
                Source::Constant(value) => FieldSlot::encode(value, m.representation),
                Source::Missing => FieldSlot::default_for(m.representation),
            };
            if slot.is_boxed_double() {
                reservation.alloc(BOXED_DOUBLE_SIZE)?;
            }
            let destination = match m.to {
                FieldIndex::InObject(i) => inline.get_mut(i as usize),
                FieldIndex::OutOfLine(i) => out_of_line.get_mut(i as usize),
            };
            match destination {
                Some(destination) => *destination = slot,
                None => {
                    return Err(LayoutError::invariant(format!(
                        "{target:?} places a field at {:?} outside the new storage",
                        m.to
                    )));
                }
            }
        }

        // Nothing below can fail
        reservation.commit();
        let object = &mut self.objects[obj.index()];
        object.in_object = inline;
        object.properties = PropertyStorage::OutOfLine(out_of_line);
        self.memory.free(old_boxes * BOXED_DOUBLE_SIZE);
        if old_capacity > new_capacity {
            self.memory.free((old_capacity - new_capacity) * TAGGED_SIZE);
        }
        self.memory
            .create_filler((inline_len - new_in_object) * TAGGED_SIZE);
        object.publish_shape(target);

        for (i, slot) in object.in_object.iter().enumerate() {
            if slot.is_reference() {
                self.memory.record_write(obj, BarrierSlot::InObject(i as u32));
            }
        }
        for (i, slot) in object.out_of_line_slots().iter().enumerate() {
            if slot.is_reference() {
                self.memory.record_write(obj, BarrierSlot::OutOfLine(i as u32));
            }
        }
        Ok(())
    }
}
