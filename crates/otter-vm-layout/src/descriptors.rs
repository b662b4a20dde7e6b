//! Descriptor tables
//!
//! A descriptor table is an ordered list of `(key, attributes, details)`
//! entries. Entries stay in insertion order (field order); a separate index
//! kept sorted by key hash serves name lookups.
//!
//! Tables are shared between shapes of one transition branch: a shape sees
//! the prefix of the table up to its own descriptor count. Only the owning
//! shape may append or replace entries; everybody else copies first. The
//! ownership bookkeeping lives on the shapes, see
//! [`DescriptorOwnership`](crate::shape::DescriptorOwnership).

use crate::field_type::FieldType;
use crate::memory::DESCRIPTOR_ENTRY_SIZE;
use crate::property::{AccessorPair, PropertyAttributes, PropertyKey, PropertyKind};
use crate::representation::Representation;
use crate::shape::TransitionStorage;
use crate::value::Value;

/// Handle to a descriptor table in the context arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorTableId(u32);

impl DescriptorTableId {
    /// Create a handle from a raw arena index
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Raw arena index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where and how a property is stored
#[derive(Clone, Debug, PartialEq)]
pub enum DescriptorDetails {
    /// Value lives in an object slot
    Field {
        /// Field index (inline slots first, then out-of-line)
        index: u32,
        /// Storage representation
        representation: Representation,
        /// Refined type of stored heap references
        field_type: FieldType,
    },
    /// Value is the same for every object with the shape and lives here
    Constant(Value),
    /// Accessor pair stored in the descriptor
    Accessor(AccessorPair),
}

/// One entry of a descriptor table
#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    /// Property name
    pub key: PropertyKey,
    /// Property attributes
    pub attributes: PropertyAttributes,
    /// Storage details
    pub details: DescriptorDetails,
}

impl Descriptor {
    /// Data field descriptor
    pub fn field(
        key: PropertyKey,
        attributes: PropertyAttributes,
        index: u32,
        representation: Representation,
        field_type: FieldType,
    ) -> Self {
        Self {
            key,
            attributes,
            details: DescriptorDetails::Field {
                index,
                representation,
                field_type,
            },
        }
    }

    /// Constant data descriptor
    pub fn constant(key: PropertyKey, attributes: PropertyAttributes, value: Value) -> Self {
        Self {
            key,
            attributes,
            details: DescriptorDetails::Constant(value),
        }
    }

    /// Accessor descriptor
    pub fn accessor(key: PropertyKey, attributes: PropertyAttributes, pair: AccessorPair) -> Self {
        Self {
            key,
            attributes,
            details: DescriptorDetails::Accessor(pair),
        }
    }

    /// Data or accessor
    pub fn kind(&self) -> PropertyKind {
        match self.details {
            DescriptorDetails::Accessor(_) => PropertyKind::Accessor,
            _ => PropertyKind::Data,
        }
    }

    /// Is the value stored in an object slot
    pub fn is_field(&self) -> bool {
        matches!(self.details, DescriptorDetails::Field { .. })
    }

    /// Field index, if this is a field
    pub fn field_index(&self) -> Option<u32> {
        match self.details {
            DescriptorDetails::Field { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Field representation; constants and accessors report `Tagged`
    pub fn representation(&self) -> Representation {
        match self.details {
            DescriptorDetails::Field { representation, .. } => representation,
            _ => Representation::Tagged,
        }
    }

    /// Field type; constants and accessors report `Any`
    pub fn field_type(&self) -> FieldType {
        match &self.details {
            DescriptorDetails::Field { field_type, .. } => field_type.clone(),
            _ => FieldType::Any,
        }
    }

    /// Storage class used to key the transition that adds this descriptor
    pub fn storage(&self) -> TransitionStorage {
        match &self.details {
            DescriptorDetails::Field { representation, .. } if representation.is_double() => {
                TransitionStorage::DoubleField
            }
            DescriptorDetails::Field { .. } => TransitionStorage::TaggedField,
            DescriptorDetails::Constant(_) => TransitionStorage::Constant,
            DescriptorDetails::Accessor(_) => TransitionStorage::Accessor,
        }
    }

    /// Can a shape carrying `self` hold what `other` describes without
    /// changing layout.
    ///
    /// A field accommodates a narrower field and any constant whose value
    /// fits its representation and type. Constants and accessors only
    /// accommodate themselves.
    pub fn accommodates(&self, other: &Descriptor) -> bool {
        if self.key != other.key || self.attributes != other.attributes {
            return false;
        }
        match (&self.details, &other.details) {
            (
                DescriptorDetails::Field {
                    representation,
                    field_type,
                    ..
                },
                DescriptorDetails::Field {
                    representation: other_repr,
                    field_type: other_type,
                    ..
                },
            ) => representation.accommodates(*other_repr) && other_type.now_is(field_type),
            (
                DescriptorDetails::Field {
                    representation,
                    field_type,
                    ..
                },
                DescriptorDetails::Constant(value),
            ) => {
                representation.accommodates(value.optimal_representation())
                    && (value.is_number() || field_type.is_any())
            }
            (DescriptorDetails::Constant(a), DescriptorDetails::Constant(b)) => a.same_value(b),
            (DescriptorDetails::Accessor(a), DescriptorDetails::Accessor(b)) => a == b,
            _ => false,
        }
    }
}

/// Ordered descriptor storage with a hash-sorted lookup index
#[derive(Clone, Debug, Default)]
pub struct DescriptorTable {
    entries: Vec<Descriptor>,
    /// Entry indices ordered by key hash
    sorted: Vec<u32>,
}

impl DescriptorTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
        }
    }

    /// Build a table from descriptors in field order
    pub fn from_descriptors(entries: Vec<Descriptor>) -> Self {
        let mut table = Self {
            sorted: Vec::with_capacity(entries.len()),
            entries,
        };
        table.sort();
        table
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> &Descriptor {
        &self.entries[index]
    }

    /// Entries in field order
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.entries.iter()
    }

    /// The first `limit` entries
    pub fn prefix(&self, limit: usize) -> &[Descriptor] {
        &self.entries[..limit.min(self.entries.len())]
    }

    /// Approximate heap footprint in bytes
    pub fn byte_size(&self) -> usize {
        self.entries.capacity().max(1) * DESCRIPTOR_ENTRY_SIZE
    }

    /// Copy the first `n` entries into a fresh table with room for
    /// `extra_slack` appends
    pub fn copy_up_to(&self, n: usize, extra_slack: usize) -> Self {
        let mut entries = Vec::with_capacity(n + extra_slack);
        entries.extend_from_slice(&self.entries[..n]);
        let mut table = Self {
            sorted: Vec::with_capacity(n + extra_slack),
            entries,
        };
        table.sort();
        table
    }

    /// Append a descriptor. Owner-only.
    pub fn append(&mut self, descriptor: Descriptor) {
        debug_assert!(
            self.search(&descriptor.key, self.len()).is_none(),
            "duplicate descriptor {}",
            descriptor.key
        );
        let hash = descriptor.key.hash_value();
        let index = self.entries.len() as u32;
        self.entries.push(descriptor);
        let position = self
            .sorted
            .partition_point(|&i| self.entries[i as usize].key.hash_value() <= hash);
        self.sorted.insert(position, index);
    }

    /// Replace the descriptor at `index`. Owner-only.
    pub fn replace(&mut self, index: usize, descriptor: Descriptor) {
        let rekeyed = self.entries[index].key != descriptor.key;
        self.entries[index] = descriptor;
        if rekeyed {
            self.sort();
        }
    }

    /// Mutable access to the details of one entry. Owner-only.
    pub fn details_mut(&mut self, index: usize) -> &mut DescriptorDetails {
        &mut self.entries[index].details
    }

    /// Find `key` among the first `limit` entries
    pub fn search(&self, key: &PropertyKey, limit: usize) -> Option<usize> {
        if limit == 0 {
            return None;
        }
        let hash = key.hash_value();
        let start = self
            .sorted
            .partition_point(|&i| self.entries[i as usize].key.hash_value() < hash);
        self.sorted[start..]
            .iter()
            .map(|&i| i as usize)
            .take_while(|&i| self.entries[i].key.hash_value() == hash)
            .find(|&i| i < limit && self.entries[i].key == *key)
    }

    /// Number of field entries among the first `limit` entries
    pub fn number_of_fields(&self, limit: usize) -> u32 {
        self.prefix(limit).iter().filter(|d| d.is_field()).count() as u32
    }

    /// Rebuild the lookup index with a heap sort on key hashes
    pub fn sort(&mut self) {
        let hashes: Vec<u32> = self.entries.iter().map(|d| d.key.hash_value()).collect();
        self.sorted.clear();
        self.sorted.extend(0..self.entries.len() as u32);
        heap_sort_by_hash(&mut self.sorted, &hashes);
        debug_assert!(self.is_sorted_without_duplicates(self.len()));
    }

    /// Check the lookup index invariant over the first `limit` entries
    pub fn is_sorted_without_duplicates(&self, limit: usize) -> bool {
        let hash_at = |i: u32| self.entries[i as usize].key.hash_value();
        if self.sorted.len() != self.entries.len()
            || !self.sorted.windows(2).all(|w| hash_at(w[0]) <= hash_at(w[1]))
        {
            return false;
        }
        let prefix = self.prefix(limit);
        prefix.iter().enumerate().all(|(i, d)| self.search(&d.key, limit) == Some(i))
    }
}

/// In-place heap sort of entry indices by their hash
fn heap_sort_by_hash(indices: &mut [u32], hashes: &[u32]) {
    let len = indices.len();
    if len < 2 {
        return;
    }
    let key = |indices: &[u32], i: usize| hashes[indices[i] as usize];

    fn sift_down(indices: &mut [u32], mut root: usize, end: usize, key: &dyn Fn(&[u32], usize) -> u32) {
        loop {
            let mut child = 2 * root + 1;
            if child >= end {
                break;
            }
            if child + 1 < end && key(indices, child) < key(indices, child + 1) {
                child += 1;
            }
            if key(indices, root) >= key(indices, child) {
                break;
            }
            indices.swap(root, child);
            root = child;
        }
    }

    for start in (0..len / 2).rev() {
        sift_down(indices, start, len, &key);
    }
    for end in (1..len).rev() {
        indices.swap(0, end);
        sift_down(indices, 0, end, &key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(name: &str, index: u32) -> Descriptor {
        Descriptor::field(
            PropertyKey::string(name),
            PropertyAttributes::data(),
            index,
            Representation::Smi,
            FieldType::Any,
        )
    }

    #[test]
    fn test_append_and_search() {
        let mut table = DescriptorTable::new();
        for (i, name) in ["a", "b", "c", "d", "e", "f", "g"].iter().enumerate() {
            table.append(data(name, i as u32));
        }
        assert!(table.is_sorted_without_duplicates(table.len()));
        assert_eq!(table.search(&PropertyKey::string("e"), 7), Some(4));
        assert_eq!(table.search(&PropertyKey::string("e"), 4), None);
        assert_eq!(table.search(&PropertyKey::string("z"), 7), None);
    }

    #[test]
    fn test_copy_up_to_truncates() {
        let mut table = DescriptorTable::new();
        for (i, name) in ["x", "y", "z"].iter().enumerate() {
            table.append(data(name, i as u32));
        }
        let copy = table.copy_up_to(2, 1);
        assert_eq!(copy.len(), 2);
        assert_eq!(copy.search(&PropertyKey::string("z"), 2), None);
        assert_eq!(copy.search(&PropertyKey::string("y"), 2), Some(1));
        assert!(copy.is_sorted_without_duplicates(2));
    }

    #[test]
    fn test_heap_sort_orders_many_entries() {
        let names: Vec<String> = (0..100).map(|i| format!("p{i}")).collect();
        let table = DescriptorTable::from_descriptors(
            names.iter().enumerate().map(|(i, n)| data(n, i as u32)).collect(),
        );
        assert!(table.is_sorted_without_duplicates(100));
        for (i, name) in names.iter().enumerate() {
            assert_eq!(table.search(&PropertyKey::string(name), 100), Some(i));
        }
    }

    #[test]
    fn test_replace_keeps_index_consistent() {
        let mut table = DescriptorTable::from_descriptors(vec![data("a", 0), data("b", 1)]);
        table.replace(1, data("c", 1));
        assert_eq!(table.search(&PropertyKey::string("b"), 2), None);
        assert_eq!(table.search(&PropertyKey::string("c"), 2), Some(1));
        assert_eq!(table.number_of_fields(2), 2);
    }

    #[test]
    fn test_field_accommodates_narrower_data() {
        let tagged = Descriptor::field(
            PropertyKey::string("a"),
            PropertyAttributes::data(),
            0,
            Representation::Tagged,
            FieldType::Any,
        );
        let double = Descriptor::field(
            PropertyKey::string("a"),
            PropertyAttributes::data(),
            0,
            Representation::Double,
            FieldType::Any,
        );
        assert!(tagged.accommodates(&data("a", 0)));
        assert!(double.accommodates(&data("a", 0)));
        assert!(!data("a", 0).accommodates(&double));
        assert!(!tagged.accommodates(&data("b", 0)));
        assert_eq!(double.storage(), TransitionStorage::DoubleField);
        assert_eq!(tagged.storage(), TransitionStorage::TaggedField);

        let text = Descriptor::constant(
            PropertyKey::string("a"),
            PropertyAttributes::data(),
            Value::string("s"),
        );
        assert!(tagged.accommodates(&text));
        assert!(!double.accommodates(&text));
        assert!(!text.accommodates(&tagged));
        assert_eq!(text.storage(), TransitionStorage::Constant);
    }
}
