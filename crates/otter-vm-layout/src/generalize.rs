//! Field generalization
//!
//! Widening a field first tries to rewrite the field in place for every
//! shape that sees it. When the storage itself must change (anything to or
//! from Double, or a constant turning into a field) the transition tree is
//! replayed from the root along the old shape's names, merging field types
//! on the way, and a new branch is grafted at the first incompatible step.
//! The branch it replaces is deprecated.

use crate::context::LayoutContext;
use crate::dependency::DependencyEvent;
use crate::descriptors::{Descriptor, DescriptorDetails, DescriptorTable};
use crate::error::{LayoutError, LayoutResult};
use crate::field_type::FieldType;
use crate::representation::Representation;
use crate::shape::{DescriptorOwnership, ShapeId, ShapeState, TransitionKey};
use rustc_hash::FxHashSet;

/// Copy of `descriptors` with every field widened to `Tagged`/`Any`.
///
/// The constant at `force_field`, if any, becomes a field too. Field
/// indices are renumbered in descriptor order.
pub(crate) fn widen_all_fields(descriptors: &[Descriptor], force_field: Option<usize>) -> Vec<Descriptor> {
    let mut next_index = 0;
    descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let widen = match d.details {
                DescriptorDetails::Field { .. } => true,
                DescriptorDetails::Constant(_) => force_field == Some(i),
                DescriptorDetails::Accessor(_) => false,
            };
            if !widen {
                return d.clone();
            }
            let field = Descriptor::field(
                d.key.clone(),
                d.attributes,
                next_index,
                Representation::Tagged,
                FieldType::Any,
            );
            next_index += 1;
            field
        })
        .collect()
}

/// Renumber field indices in descriptor order
fn renumber_fields(descriptors: &mut [Descriptor]) {
    let mut next_index = 0;
    for descriptor in descriptors {
        if let DescriptorDetails::Field { index, .. } = &mut descriptor.details {
            *index = next_index;
            next_index += 1;
        }
    }
}

impl LayoutContext {
    /// Shape whose descriptor `descriptor` can hold values of
    /// `representation` and `field_type`.
    ///
    /// Constants are left alone unless `force_field` is set, in which case
    /// the constant becomes a field. Accessors are never generalized.
    /// Deprecated input shapes are resolved to their live replacement first.
    pub fn generalize(
        &mut self,
        shape: ShapeId,
        descriptor: usize,
        representation: Representation,
        field_type: FieldType,
        force_field: bool,
    ) -> LayoutResult<ShapeId> {
        let shape = self.updated_shape(shape)?;
        if self.shape(shape).is_dictionary() {
            return Err(LayoutError::DictionaryMode(shape));
        }
        if descriptor >= self.shape(shape).own_descriptors() {
            return Err(LayoutError::invariant(format!(
                "{shape:?} has no descriptor {descriptor}"
            )));
        }

        let (old_repr, old_type) = match &self.descriptor(shape, descriptor).details {
            DescriptorDetails::Accessor(_) => return Ok(shape),
            DescriptorDetails::Constant(_) if !force_field => return Ok(shape),
            DescriptorDetails::Constant(_) => {
                return self.reconfigure(shape, descriptor, representation, field_type);
            }
            DescriptorDetails::Field {
                representation,
                field_type,
                ..
            } => (*representation, field_type.clone()),
        };

        let new_repr = old_repr.generalize_field(representation);
        let new_type = self.merge_field_types(&old_type, &field_type);
        if new_repr == old_repr && new_type == old_type {
            return Ok(shape);
        }
        if old_repr.can_be_in_place_changed_to(new_repr) {
            let owner = self.field_owner(shape, descriptor);
            self.update_field_in_subtree(owner, descriptor, new_repr, &new_type);
            self.stats.in_place_generalizations += 1;
            tracing::trace!(
                target: "otter::layout",
                shape = owner.index(),
                descriptor,
                from = %old_repr,
                to = %new_repr,
                "generalized field in place"
            );
            return Ok(shape);
        }
        self.reconfigure(shape, descriptor, representation, field_type)
    }

    /// Widen descriptor `descriptor` in every table reachable from `owner`'s
    /// subtree and notify dependents
    fn update_field_in_subtree(
        &mut self,
        owner: ShapeId,
        descriptor: usize,
        representation: Representation,
        field_type: &FieldType,
    ) {
        let mut visited = FxHashSet::default();
        let mut stack = vec![owner];
        while let Some(current) = stack.pop() {
            stack.extend(self.shape(current).transitions.tree_children());
            let table_id = self.shape(current).descriptors;
            if !visited.insert(table_id) {
                continue;
            }
            let (old_repr, old_type) = match &self.table(table_id).get(descriptor).details {
                DescriptorDetails::Field {
                    representation,
                    field_type,
                    ..
                } => (*representation, field_type.clone()),
                _ => continue,
            };
            let merged_type = self.merge_field_types(&old_type, field_type);
            if let DescriptorDetails::Field {
                representation: repr,
                field_type: ty,
                ..
            } = self.table_mut(table_id).details_mut(descriptor)
            {
                *repr = old_repr.generalize_field(representation);
                *ty = merged_type;
            }
        }
        self.notify(DependencyEvent::FieldGeneralized {
            shape: owner,
            descriptor,
        });
    }

    /// Replay `old`'s names from its root, reusing every compatible step,
    /// and graft a new branch where the tree stops matching
    fn reconfigure(
        &mut self,
        old: ShapeId,
        modify: usize,
        representation: Representation,
        field_type: FieldType,
    ) -> LayoutResult<ShapeId> {
        let root = self.find_root(old);
        let elements_kind = self.shape(old).elements_kind;
        let comparable = {
            let root_record = self.shape(root);
            root_record.is_tree_root()
                && root_record.equivalent_for_transition(self.shape(old))
                && !elements_kind.is_dictionary()
        };
        if !comparable {
            return self.full_generalization(old, Some(modify), "root mismatch");
        }
        let start = self.transition_array_kind(root, elements_kind)?;
        if self.shape(start).elements_kind != elements_kind {
            return self.full_generalization(old, Some(modify), "elements kind mismatch");
        }

        // What the old shape needs after the change
        let mut wanted: Vec<Descriptor> = self.descriptors(old).to_vec();
        let (modified_repr, modified_type) = match &wanted[modify].details {
            DescriptorDetails::Field {
                representation: repr,
                field_type: ty,
                ..
            } => (
                repr.generalize_field(representation),
                self.merge_field_types(ty, &field_type),
            ),
            DescriptorDetails::Constant(constant) => {
                let repr = constant.optimal_representation().generalize_field(representation);
                let seeded = self.optimal_field_type(constant, repr);
                (repr, self.merge_field_types(&seeded, &field_type))
            }
            DescriptorDetails::Accessor(_) => (representation, field_type),
        };
        let modified = Descriptor::field(
            wanted[modify].key.clone(),
            wanted[modify].attributes,
            0,
            modified_repr,
            modified_type,
        );
        // A change of storage class moves the property to a sibling edge;
        // the branch that introduced the old storage is retired
        let retired = (wanted[modify].storage() != modified.storage())
            .then(|| self.field_owner(old, modify));
        wanted[modify] = modified;
        renumber_fields(&mut wanted);

        // Walk, merging what the tree already has into what we need
        let mut split = start;
        let mut walked = 0;
        while walked < wanted.len() {
            let want = &wanted[walked];
            let candidates = self.transition_candidates(
                split,
                &want.key,
                want.attributes,
                want.storage().candidates(),
            );
            let want = want.clone();
            let step = candidates
                .into_iter()
                .filter(|next| Some(*next) != retired)
                .find(|next| self.merge_step(*next, walked, &want));
            let Some(next) = step else {
                break;
            };
            split = next;
            walked += 1;
        }

        let target = if walked == wanted.len() {
            tracing::debug!(
                target: "otter::layout",
                old = old.index(),
                target = split.index(),
                "generalization found existing shape"
            );
            split
        } else {
            // Merged prefix from the tree, tail from the old shape
            let mut merged: Vec<Descriptor> = self.descriptors(split).to_vec();
            merged.extend(wanted.drain(walked..));
            renumber_fields(&mut merged);
            let target = self.graft(split, merged)?;
            tracing::debug!(
                target: "otter::layout",
                old = old.index(),
                split = split.index(),
                target = target.index(),
                descriptor = modify,
                "reconfigured field"
            );
            target
        };

        if let Some(retired) = retired {
            self.deprecate_subtree(retired);
        }
        if let ShapeState::Deprecated { successor } = &mut self.shape_mut(old).state {
            *successor = Some(target);
        }
        Ok(target)
    }

    /// Can `next`, the child adding descriptor `index`, stand in for
    /// `want`. Widens the child's field in place when that is all it takes.
    fn merge_step(&mut self, next: ShapeId, index: usize, want: &Descriptor) -> bool {
        let have = self.descriptor(next, index).clone();
        match (&want.details, &have.details) {
            (
                DescriptorDetails::Field {
                    representation: want_repr,
                    field_type: want_type,
                    ..
                },
                DescriptorDetails::Field {
                    representation: have_repr,
                    field_type: have_type,
                    ..
                },
            ) => {
                let merged_repr = have_repr.generalize_field(*want_repr);
                if merged_repr != *have_repr && !have_repr.can_be_in_place_changed_to(merged_repr) {
                    return false;
                }
                let merged_type = self.merge_field_types(have_type, want_type);
                if merged_repr != *have_repr || merged_type != *have_type {
                    let owner = self.field_owner(next, index);
                    self.update_field_in_subtree(owner, index, merged_repr, &merged_type);
                    self.stats.in_place_generalizations += 1;
                }
                true
            }
            (DescriptorDetails::Constant(a), DescriptorDetails::Constant(b)) => a.same_value(b),
            (DescriptorDetails::Accessor(a), DescriptorDetails::Accessor(b)) => a == b,
            _ => false,
        }
    }

    /// Build fresh transitions below `split` for `descriptors[own(split)..]`
    /// sharing one new table, deprecating whatever branch they replace
    fn graft(&mut self, split: ShapeId, descriptors: Vec<Descriptor>) -> LayoutResult<ShapeId> {
        let first = self.shape(split).own_descriptors();
        let total = descriptors.len();
        let keys: Vec<TransitionKey> = descriptors[first..]
            .iter()
            .map(|d| TransitionKey::new(d.key.clone(), d.storage(), d.attributes))
            .collect();
        let field_flags: Vec<bool> = descriptors[first..].iter().map(Descriptor::is_field).collect();
        let table = self.alloc_table(DescriptorTable::from_descriptors(descriptors))?;

        let mut chain = Vec::with_capacity(total - first);
        let mut parent = split;
        for (offset, is_field) in field_flags.into_iter().enumerate() {
            let mut record = self.derive_child(parent);
            let nof = self.number_of_fields(parent);
            if is_field {
                record.unused_property_fields = self
                    .shape(parent)
                    .unused_after_adding_field(nof, self.config.out_of_line_slack);
            }
            record.descriptors = table;
            record.own_descriptors = (first + offset + 1) as u32;
            record.ownership = DescriptorOwnership::Owner;
            record.back_pointer = Some(parent);
            let child = self.alloc_shape(record)?;
            chain.push(child);
            parent = child;
        }
        let last = parent;

        // Everything is allocated; link the branch in
        if let Some(replaced) = self.shape(split).transitions.find(&keys[0]) {
            self.deprecate_subtree(replaced);
        }
        let mut parent = split;
        for (key, &child) in keys.into_iter().zip(&chain) {
            if child != last {
                self.shape_mut(child).ownership = DescriptorOwnership::Reference(last);
            }
            self.shape_mut(parent).transitions.insert(key, child);
            parent = child;
        }
        Ok(last)
    }

    /// Detached copy of `shape` with every field widened to `Tagged`/`Any`
    /// (and the constant at `force_field` turned into a field). Dependents
    /// of `shape` are told it is no longer stable.
    pub(crate) fn full_generalization(
        &mut self,
        shape: ShapeId,
        force_field: Option<usize>,
        reason: &'static str,
    ) -> LayoutResult<ShapeId> {
        let old_nof = self.number_of_fields(shape);
        let descriptors = widen_all_fields(self.descriptors(shape), force_field);
        let new_nof = descriptors.iter().filter(|d| d.is_field()).count() as u32;

        let mut record = self.derive_child(shape);
        if new_nof > old_nof {
            record.unused_property_fields = self
                .shape(shape)
                .unused_after_adding_field(old_nof, self.config.out_of_line_slack);
        }
        record.descriptors = self.alloc_table(DescriptorTable::from_descriptors(descriptors))?;
        record.ownership = DescriptorOwnership::Owner;
        let target = self.alloc_shape(record)?;

        self.mark_unstable(shape);
        self.stats.full_generalizations += 1;
        tracing::debug!(
            target: "otter::layout",
            shape = shape.index(),
            target = target.index(),
            reason,
            "full generalization"
        );
        Ok(target)
    }
}
