//! Configuration for the layout engine.
//!
//! All limits that decide when the engine gives up on sharing or on fast
//! storage live here, so hosts and tests can tighten them.

/// Tunable limits of a [`LayoutContext`](crate::LayoutContext).
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Maximum own descriptors per shape before objects go to dictionary mode.
    /// Default: 1020
    pub max_descriptors: usize,

    /// Maximum outgoing property transitions per shape.
    /// Default: 1536
    pub max_transitions: usize,

    /// Maximum number of shapes a class-set field type may hold.
    /// Default: 5
    pub max_class_set_size: usize,

    /// Inline slots reserved for root shapes created without an explicit count.
    /// Default: 4
    pub default_in_object_properties: u32,

    /// Number of out-of-line slots added each time the backing array grows.
    /// Default: 3
    pub out_of_line_slack: u32,

    /// Out-of-line fields tolerated before `add_property` normalizes.
    /// Default: 128
    pub max_fast_properties: usize,

    /// Largest dictionary that `transform_to_fast` will convert back.
    /// Default: 1020
    pub max_fast_properties_for_transform: usize,

    /// Number of entries in the direct-mapped normalized-shape cache.
    /// Default: 64
    pub normalized_cache_entries: usize,

    /// Largest hole a single indexed store may open before elements go
    /// to dictionary mode.
    /// Default: 1024
    pub max_elements_gap: u32,

    /// Enumeration index at which a property dictionary renumbers itself.
    /// Default: 2^23 - 1
    pub max_enumeration_index: u32,

    /// Byte budget handed to the memory manager.
    /// Default: unbounded (usize::MAX / 2)
    pub memory_limit: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_descriptors: 1020,
            max_transitions: 1536,
            max_class_set_size: 5,
            default_in_object_properties: 4,
            out_of_line_slack: 3,
            max_fast_properties: 128,
            max_fast_properties_for_transform: 1020,
            normalized_cache_entries: 64,
            max_elements_gap: 1024,
            max_enumeration_index: (1 << 23) - 1,
            memory_limit: usize::MAX / 2,
        }
    }
}

impl LayoutConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-shape descriptor cap.
    pub fn max_descriptors(mut self, limit: usize) -> Self {
        self.max_descriptors = limit;
        self
    }

    /// Set the per-shape transition cap.
    pub fn max_transitions(mut self, limit: usize) -> Self {
        self.max_transitions = limit;
        self
    }

    /// Set the class-set cap for field types.
    pub fn max_class_set_size(mut self, limit: usize) -> Self {
        self.max_class_set_size = limit;
        self
    }

    /// Set the default inline slot count for root shapes.
    pub fn default_in_object_properties(mut self, count: u32) -> Self {
        self.default_in_object_properties = count;
        self
    }

    /// Set how many out-of-line fields are tolerated in fast mode.
    pub fn max_fast_properties(mut self, limit: usize) -> Self {
        self.max_fast_properties = limit;
        self
    }

    /// Set the enumeration index renumbering threshold.
    pub fn max_enumeration_index(mut self, limit: u32) -> Self {
        self.max_enumeration_index = limit;
        self
    }

    /// Set the memory budget in bytes.
    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }
}
