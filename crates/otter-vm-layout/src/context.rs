//! Layout context: the arena every shape, descriptor table and object lives in
//!
//! The context is the single owner of the transition forest. It is created
//! once per runtime and threaded explicitly through every operation, so the
//! single-mutator rule is enforced by `&mut LayoutContext`.

use crate::config::LayoutConfig;
use crate::dependency::{DependencyEvent, DependencyObserver};
use crate::descriptors::{Descriptor, DescriptorTable, DescriptorTableId};
use crate::elements::ElementsKind;
use crate::error::{LayoutError, LayoutResult};
use crate::field_type::FieldType;
use crate::memory::{MemoryManager, OBJECT_HEADER_SIZE, SHAPE_SIZE, TAGGED_SIZE};
use crate::normalize::NormalizedShapeCache;
use crate::object::HeapObject;
use crate::representation::Representation;
use crate::shape::{
    ConstructorId, DescriptorOwnership, InstanceType, ShapeFlags, ShapeId, ShapeRecord,
    ShapeState, TransitionTable,
};
use crate::value::{ObjectId, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Counters describing what the engine has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutStats {
    /// Shapes allocated
    pub shapes_created: usize,
    /// Transitions that reused the parent's descriptor table
    pub transitions_shared: usize,
    /// Transitions that copied the parent's descriptor table
    pub transitions_branched: usize,
    /// Transition lookups satisfied by an existing child
    pub transitions_reused: usize,
    /// Generalizations resolved by mutating a field in place
    pub in_place_generalizations: usize,
    /// Generalizations that fell back to a detached all-tagged copy
    pub full_generalizations: usize,
    /// Shapes marked deprecated
    pub shapes_deprecated: usize,
    /// Migrations that only swapped the shape
    pub migrations_swapped: usize,
    /// Migrations that only appended slots
    pub migrations_extended: usize,
    /// Migrations that rebuilt the field storage
    pub migrations_relayout: usize,
    /// Fast to dictionary conversions
    pub normalizations: usize,
    /// Dictionary to fast conversions
    pub fast_conversions: usize,
    /// Normalized-shape cache hits
    pub normalized_cache_hits: usize,
    /// Dictionary to fast conversions that found a shape in the tree
    pub fast_replays: usize,
    /// Elements-kind transitions performed on objects
    pub elements_transitions: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct RootKey {
    constructor: Option<ConstructorId>,
    prototype: Option<ObjectId>,
    instance_type: InstanceType,
    in_object_properties: u32,
}

/// Owner of the shape forest, descriptor tables and object heap
pub struct LayoutContext {
    pub(crate) shapes: Vec<ShapeRecord>,
    pub(crate) tables: Vec<DescriptorTable>,
    pub(crate) objects: Vec<HeapObject>,
    pub(crate) normalized_cache: NormalizedShapeCache,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) config: LayoutConfig,
    pub(crate) stats: LayoutStats,
    roots: FxHashMap<RootKey, ShapeId>,
    observers: Vec<Arc<dyn DependencyObserver>>,
}

impl LayoutContext {
    /// Create a context with the given config and its own memory manager
    pub fn new(config: LayoutConfig) -> Self {
        let memory = Arc::new(MemoryManager::new(config.memory_limit));
        Self::with_memory(config, memory)
    }

    /// Create a context that books allocations with an existing manager
    pub fn with_memory(config: LayoutConfig, memory: Arc<MemoryManager>) -> Self {
        Self {
            shapes: Vec::new(),
            tables: Vec::new(),
            objects: Vec::new(),
            normalized_cache: NormalizedShapeCache::new(config.normalized_cache_entries),
            memory,
            config,
            stats: LayoutStats::default(),
            roots: FxHashMap::default(),
            observers: Vec::new(),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Memory manager
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Counters
    pub fn stats(&self) -> LayoutStats {
        self.stats
    }

    /// Number of shapes ever allocated
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Register a dependency observer
    pub fn add_observer(&mut self, observer: Arc<dyn DependencyObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn notify(&self, event: DependencyEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    /// Shape record for a handle
    pub fn shape(&self, id: ShapeId) -> &ShapeRecord {
        &self.shapes[id.index()]
    }

    pub(crate) fn shape_mut(&mut self, id: ShapeId) -> &mut ShapeRecord {
        &mut self.shapes[id.index()]
    }

    /// Check that a handle belongs to this context
    pub fn check_shape(&self, id: ShapeId) -> LayoutResult<&ShapeRecord> {
        self.shapes.get(id.index()).ok_or(LayoutError::InvalidShape(id))
    }

    /// Descriptor table for a handle
    pub fn table(&self, id: DescriptorTableId) -> &DescriptorTable {
        &self.tables[id.index()]
    }

    pub(crate) fn table_mut(&mut self, id: DescriptorTableId) -> &mut DescriptorTable {
        &mut self.tables[id.index()]
    }

    /// The descriptors a shape can see, in field order
    pub fn descriptors(&self, shape: ShapeId) -> &[Descriptor] {
        let record = self.shape(shape);
        self.table(record.descriptors).prefix(record.own_descriptors())
    }

    /// One descriptor of a shape
    pub fn descriptor(&self, shape: ShapeId, index: usize) -> &Descriptor {
        let record = self.shape(shape);
        debug_assert!(index < record.own_descriptors());
        self.table(record.descriptors).get(index)
    }

    /// Number of field descriptors a shape sees
    pub fn number_of_fields(&self, shape: ShapeId) -> u32 {
        let record = self.shape(shape);
        self.table(record.descriptors)
            .number_of_fields(record.own_descriptors())
    }

    pub(crate) fn alloc_shape(&mut self, record: ShapeRecord) -> LayoutResult<ShapeId> {
        self.memory.alloc(SHAPE_SIZE)?;
        let id = ShapeId::from_index(self.shapes.len() as u32);
        self.shapes.push(record);
        self.stats.shapes_created += 1;
        Ok(id)
    }

    pub(crate) fn alloc_table(&mut self, table: DescriptorTable) -> LayoutResult<DescriptorTableId> {
        self.memory.alloc(table.byte_size())?;
        let id = DescriptorTableId::from_index(self.tables.len() as u32);
        self.tables.push(table);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// The default root: ordinary objects with no constructor or prototype
    pub fn root_shape(&mut self) -> LayoutResult<ShapeId> {
        let in_object = self.config.default_in_object_properties;
        self.initial_shape(None, None, InstanceType::Object, in_object)
    }

    /// The initial shape for objects built by `constructor` with the given
    /// prototype. Repeated calls return the same root.
    pub fn initial_shape(
        &mut self,
        constructor: Option<ConstructorId>,
        prototype: Option<ObjectId>,
        instance_type: InstanceType,
        in_object_properties: u32,
    ) -> LayoutResult<ShapeId> {
        let key = RootKey {
            constructor,
            prototype,
            instance_type,
            in_object_properties,
        };
        if let Some(&root) = self.roots.get(&key) {
            return Ok(root);
        }
        let root = self.create_root(
            constructor,
            prototype,
            instance_type,
            in_object_properties,
            ElementsKind::PackedSmi,
        )?;
        self.roots.insert(key, root);
        tracing::debug!(
            target: "otter::layout",
            shape = root.index(),
            in_object = in_object_properties,
            ?instance_type,
            "created root shape"
        );
        Ok(root)
    }

    /// Allocate a fresh, unregistered tree root that owns an empty table
    pub(crate) fn create_root(
        &mut self,
        constructor: Option<ConstructorId>,
        prototype: Option<ObjectId>,
        instance_type: InstanceType,
        in_object_properties: u32,
        elements_kind: ElementsKind,
    ) -> LayoutResult<ShapeId> {
        let table = self.alloc_table(DescriptorTable::new())?;
        self.alloc_shape(ShapeRecord {
            instance_type,
            constructor,
            prototype,
            instance_size: instance_size_for(in_object_properties),
            in_object_properties,
            unused_property_fields: in_object_properties,
            descriptors: table,
            own_descriptors: 0,
            ownership: DescriptorOwnership::Owner,
            back_pointer: None,
            transitions: TransitionTable::default(),
            elements_kind,
            flags: ShapeFlags::default(),
            state: ShapeState::Live,
            fast_root: None,
        })
    }

    /// Walk back pointers to the top of the tree
    pub fn find_root(&self, shape: ShapeId) -> ShapeId {
        let mut current = shape;
        while let Some(parent) = self.shape(current).back_pointer {
            current = parent;
        }
        current
    }

    /// Shape in `shape`'s back-pointer chain that introduced descriptor
    /// `descriptor`
    pub fn field_owner(&self, shape: ShapeId, descriptor: usize) -> ShapeId {
        let mut current = shape;
        while let Some(parent) = self.shape(current).back_pointer {
            if self.shape(parent).own_descriptors() <= descriptor {
                break;
            }
            current = parent;
        }
        current
    }

    /// Names added along the back-pointer chain from root to `shape`
    pub fn transition_path(&self, shape: ShapeId) -> Vec<ShapeId> {
        let mut path = vec![shape];
        let mut current = shape;
        while let Some(parent) = self.shape(current).back_pointer {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    // ------------------------------------------------------------------
    // Stability
    // ------------------------------------------------------------------

    /// Live and never generalized through
    pub fn is_stable(&self, shape: ShapeId) -> bool {
        self.shapes
            .get(shape.index())
            .is_some_and(ShapeRecord::is_stable)
    }

    /// Clear the stable flag and tell dependents
    pub(crate) fn mark_unstable(&mut self, shape: ShapeId) {
        let record = self.shape_mut(shape);
        if record.flags.stable {
            record.flags.stable = false;
            self.notify(DependencyEvent::ShapeUnstable(shape));
        }
    }

    /// Shape of an object value, if it may be tracked in a field type
    pub(crate) fn trackable_shape_of(&self, value: &Value) -> Option<ShapeId> {
        let id = value.as_object()?;
        let shape = self.objects.get(id.index())?.shape();
        let record = self.shape(shape);
        (record.is_stable() && !record.is_dictionary()).then_some(shape)
    }

    /// Narrowest field type for a value stored with `representation`
    pub fn optimal_field_type(&self, value: &Value, representation: Representation) -> FieldType {
        FieldType::optimal(value, representation, |v| self.trackable_shape_of(v))
    }

    /// Join two field types under this context's class-set cap
    pub fn merge_field_types(&self, a: &FieldType, b: &FieldType) -> FieldType {
        a.merge(b, self.config.max_class_set_size, |s| self.is_stable(s))
    }
}

impl Default for LayoutContext {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

impl std::fmt::Debug for LayoutContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutContext")
            .field("shapes", &self.shapes.len())
            .field("tables", &self.tables.len())
            .field("objects", &self.objects.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Instance size in bytes for a given inline capacity
pub(crate) fn instance_size_for(in_object_properties: u32) -> u32 {
    (OBJECT_HEADER_SIZE + in_object_properties as usize * TAGGED_SIZE) as u32
}
