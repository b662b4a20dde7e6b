//! Deprecation and lazy replacement lookup
//!
//! Deprecated shapes keep their metadata so objects still using them can be
//! read and migrated. The live replacement is found by replaying the shape's
//! names from its root and is cached on the deprecated shape.

use crate::context::LayoutContext;
use crate::dependency::DependencyEvent;
use crate::descriptors::DescriptorDetails;
use crate::error::LayoutResult;
use crate::shape::{ShapeId, ShapeState};
use crate::transitions::PropertyDetails;

impl LayoutContext {
    /// Mark `shape` and every shape below it deprecated
    pub(crate) fn deprecate_subtree(&mut self, shape: ShapeId) {
        let mut stack = vec![shape];
        let mut count = 0usize;
        while let Some(current) = stack.pop() {
            if self.shape(current).is_deprecated() {
                continue;
            }
            stack.extend(self.shape(current).transitions.tree_children());
            let record = self.shape_mut(current);
            record.state = ShapeState::Deprecated { successor: None };
            record.flags.stable = false;
            self.stats.shapes_deprecated += 1;
            count += 1;
            self.notify(DependencyEvent::ShapeDeprecated(current));
        }
        tracing::debug!(
            target: "otter::layout",
            shape = shape.index(),
            count,
            "deprecated subtree"
        );
    }

    /// Live shape that objects of `shape` should move to.
    ///
    /// Live shapes are their own replacement. Returns `None` when the tree
    /// no longer has a compatible shape for the same names.
    pub fn current_shape_for_deprecated(&mut self, shape: ShapeId) -> LayoutResult<Option<ShapeId>> {
        let mut current = shape;
        loop {
            let state = self.check_shape(current)?.state;
            match state {
                ShapeState::Live => {
                    if current != shape {
                        self.cache_successor(shape, current);
                    }
                    return Ok(Some(current));
                }
                ShapeState::Deprecated {
                    successor: Some(next),
                } => current = next,
                ShapeState::Deprecated { successor: None } => break,
            }
        }

        let Some(target) = self.replay_from_root(current, false)? else {
            return Ok(None);
        };
        self.cache_successor(current, target);
        if current != shape {
            self.cache_successor(shape, target);
        }
        Ok(Some(target))
    }

    /// Walk `shape`'s names from its root, accepting only steps whose
    /// descriptors can hold everything `shape`'s descriptors can.
    ///
    /// With `rebuild` set, missing or deprecated steps are added again and
    /// narrower steps are generalized, so only accessor conflicts and
    /// detached roots give up.
    fn replay_from_root(&mut self, shape: ShapeId, rebuild: bool) -> LayoutResult<Option<ShapeId>> {
        let root = self.find_root(shape);
        let elements_kind = self.shape(shape).elements_kind;
        if !self.shape(root).is_tree_root() || self.shape(root).is_deprecated() {
            return Ok(None);
        }
        let mut target = self.transition_array_kind(root, elements_kind)?;
        if self.shape(target).elements_kind != elements_kind {
            return Ok(None);
        }

        for (i, old) in self.descriptors(shape).to_vec().into_iter().enumerate() {
            let candidates =
                self.transition_candidates(target, &old.key, old.attributes, old.storage().candidates());
            if let Some(next) = candidates
                .into_iter()
                .find(|next| self.descriptor(*next, i).accommodates(&old))
            {
                target = next;
                continue;
            }
            if !rebuild {
                return Ok(None);
            }
            let next = self.add_transition(
                target,
                old.key.clone(),
                old.attributes,
                PropertyDetails::from_descriptor(&old),
            )?;
            if self.descriptor(next, i).accommodates(&old) {
                target = next;
                continue;
            }
            target = match &old.details {
                DescriptorDetails::Field {
                    representation,
                    field_type,
                    ..
                } => self.generalize(next, i, *representation, field_type.clone(), false)?,
                DescriptorDetails::Constant(value) => {
                    let representation = value.optimal_representation();
                    let field_type = self.optimal_field_type(value, representation);
                    self.generalize(next, i, representation, field_type, true)?
                }
                DescriptorDetails::Accessor(_) => return Ok(None),
            };
        }
        Ok(Some(target))
    }

    fn cache_successor(&mut self, shape: ShapeId, successor: ShapeId) {
        if let ShapeState::Deprecated { successor: slot } = &mut self.shape_mut(shape).state {
            *slot = Some(successor);
        }
    }

    /// `shape` itself when live, otherwise its live replacement.
    ///
    /// When the tree has no compatible shape the missing steps are rebuilt
    /// from the root. Shapes that cannot be rebuilt get a fully generalized
    /// copy, which is cached like any other successor.
    pub fn updated_shape(&mut self, shape: ShapeId) -> LayoutResult<ShapeId> {
        if !self.check_shape(shape)?.is_deprecated() {
            return Ok(shape);
        }
        if let Some(target) = self.current_shape_for_deprecated(shape)? {
            return Ok(target);
        }
        if let Some(target) = self.replay_from_root(shape, true)? {
            self.cache_successor(shape, target);
            tracing::debug!(
                target: "otter::layout",
                shape = shape.index(),
                target = target.index(),
                "rebuilt replacement for deprecated shape"
            );
            return Ok(target);
        }
        tracing::warn!(
            target: "otter::layout",
            shape = shape.index(),
            "no live replacement for deprecated shape, generalizing"
        );
        let target = self.full_generalization(shape, None, "unresolved deprecation")?;
        self.cache_successor(shape, target);
        Ok(target)
    }
}
