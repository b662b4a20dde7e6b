//! Hash-based property and element storage used in dictionary mode
//!
//! `PropertyDictionary` holds named properties of normalized objects and
//! remembers insertion order through enumeration indices. `NumberDictionary`
//! holds sparse indexed elements.

use crate::memory::TAGGED_SIZE;
use crate::property::{PropertyAttributes, PropertyKey, PropertyValue};
use crate::value::Value;
use rustc_hash::FxHashMap;

/// One named property in dictionary mode
#[derive(Clone, Debug, PartialEq)]
pub struct DictionaryEntry {
    /// Data value or accessor pair
    pub value: PropertyValue,
    /// Property attributes
    pub attributes: PropertyAttributes,
    /// Position in for-in order (1-based, monotonically assigned)
    pub enumeration_index: u32,
}

/// Named-property dictionary
#[derive(Clone, Debug)]
pub struct PropertyDictionary {
    entries: FxHashMap<PropertyKey, DictionaryEntry>,
    next_enumeration_index: u32,
    max_enumeration_index: u32,
}

impl PropertyDictionary {
    /// Create an empty dictionary that renumbers when indices pass `max_enumeration_index`
    pub fn new(max_enumeration_index: u32) -> Self {
        Self::with_capacity(0, max_enumeration_index)
    }

    /// Create an empty dictionary with room for `capacity` entries
    pub fn with_capacity(capacity: usize, max_enumeration_index: u32) -> Self {
        let mut entries = FxHashMap::default();
        entries.reserve(capacity);
        Self {
            entries,
            next_enumeration_index: 1,
            max_enumeration_index: max_enumeration_index.max(1),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Dictionary has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index the next insertion will receive
    pub fn next_enumeration_index(&self) -> u32 {
        self.next_enumeration_index
    }

    /// Look up an entry
    pub fn find(&self, key: &PropertyKey) -> Option<&DictionaryEntry> {
        self.entries.get(key)
    }

    /// Insert a new property or overwrite an existing one in place.
    ///
    /// Overwriting keeps the enumeration index of the existing entry.
    pub fn insert(&mut self, key: PropertyKey, value: PropertyValue, attributes: PropertyAttributes) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.attributes = attributes;
            return;
        }
        if self.next_enumeration_index > self.max_enumeration_index {
            self.renumber_enumeration_indices();
        }
        let enumeration_index = self.next_enumeration_index;
        self.next_enumeration_index += 1;
        self.entries.insert(
            key.to_cacheable(),
            DictionaryEntry {
                value,
                attributes,
                enumeration_index,
            },
        );
    }

    /// Replace the value of an existing data property
    pub fn update(&mut self, key: &PropertyKey, value: Value) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = PropertyValue::Data(value);
                true
            }
            None => false,
        }
    }

    /// Remove an entry
    pub fn delete(&mut self, key: &PropertyKey) -> Option<DictionaryEntry> {
        self.entries.remove(key)
    }

    /// Entries sorted by enumeration index
    pub fn iter_enumeration_order(&self) -> Vec<(&PropertyKey, &DictionaryEntry)> {
        let mut items: Vec<_> = self.entries.iter().collect();
        items.sort_unstable_by_key(|(_, entry)| entry.enumeration_index);
        items
    }

    /// Reassign dense enumeration indices `1..=len` preserving order
    pub fn renumber_enumeration_indices(&mut self) {
        let mut order: Vec<(PropertyKey, u32)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.enumeration_index))
            .collect();
        order.sort_unstable_by_key(|(_, index)| *index);
        for (position, (key, _)) in order.into_iter().enumerate() {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.enumeration_index = position as u32 + 1;
            }
        }
        self.next_enumeration_index = self.entries.len() as u32 + 1;
        tracing::trace!(
            target: "otter::layout",
            entries = self.entries.len(),
            "renumbered dictionary enumeration indices"
        );
    }

    /// Release spare capacity
    pub fn shrink(&mut self) {
        self.entries.shrink_to_fit();
    }

    /// Approximate heap footprint in bytes
    pub fn byte_size(&self) -> usize {
        (self.entries.capacity().max(1)) * 3 * TAGGED_SIZE
    }
}

/// Sparse indexed storage
#[derive(Clone, Debug, Default)]
pub struct NumberDictionary {
    entries: FxHashMap<u32, Value>,
    length: u32,
}

impl NumberDictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present elements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No elements present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One past the largest index ever stored
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Read an element
    pub fn get(&self, index: u32) -> Option<&Value> {
        self.entries.get(&index)
    }

    /// Store an element
    pub fn insert(&mut self, index: u32, value: Value) {
        self.entries.insert(index, value);
        self.length = self.length.max(index.saturating_add(1));
    }

    /// Remove an element
    pub fn delete(&mut self, index: u32) -> Option<Value> {
        self.entries.remove(&index)
    }

    /// Present indices in ascending order
    pub fn keys_sorted(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Approximate heap footprint in bytes
    pub fn byte_size(&self) -> usize {
        (self.entries.capacity().max(1)) * 2 * TAGGED_SIZE
    }
}
