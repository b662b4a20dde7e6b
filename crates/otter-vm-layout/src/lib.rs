//! # Otter VM Layout
//!
//! Hidden-class object layout engine for the Otter JavaScript runtime.
//!
//! Objects built the same way share a [`ShapeRecord`] that says where each
//! named property lives. Shapes form transition trees keyed by the property
//! added, and consecutive shapes of one branch share a single descriptor
//! table copy-on-write.
//!
//! ## Design Principles
//!
//! - **Arena handles**: shapes, tables and objects live in a [`LayoutContext`]
//!   and are addressed by `Copy` ids
//! - **Widen, never fail**: values that do not fit a field generalize the
//!   field (in place when possible, otherwise by grafting a new branch and
//!   deprecating the old one)
//! - **Lazy migration**: objects on deprecated shapes move to the live
//!   replacement on next access
//! - **Two storage modes**: fast fixed-slot storage and dictionary storage,
//!   with conversions in both directions
//!
//! ## Example
//!
//! ```ignore
//! use otter_vm_layout::{LayoutContext, Value};
//!
//! let mut ctx = LayoutContext::default();
//! let root = ctx.root_shape()?;
//! let obj = ctx.allocate_object(root)?;
//! ctx.set_property(obj, "x".into(), Value::Smi(1))?;
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod dependency;
mod deprecation;
pub mod descriptors;
pub mod dictionary;
pub mod elements;
pub mod error;
pub mod field_type;
mod generalize;
pub mod memory;
mod migrate;
pub mod normalize;
pub mod object;
pub mod property;
pub mod representation;
pub mod shape;
pub mod transitions;
pub mod value;
mod verify;

pub use config::LayoutConfig;
pub use context::{LayoutContext, LayoutStats};
pub use dependency::{DependencyEvent, DependencyObserver, RecordingObserver};
pub use descriptors::{Descriptor, DescriptorDetails, DescriptorTable, DescriptorTableId};
pub use dictionary::{DictionaryEntry, NumberDictionary, PropertyDictionary};
pub use elements::{ElementsKind, ElementsStore};
pub use error::{LayoutError, LayoutResult};
pub use field_type::FieldType;
pub use memory::{AllocationStats, BarrierEntry, BarrierSlot, MemoryManager};
pub use normalize::{NormalizationMode, NormalizedShapeCache};
pub use object::{FieldSlot, HeapObject};
pub use property::{AccessorPair, PropertyAttributes, PropertyKey, PropertyKind, PropertyValue};
pub use representation::Representation;
pub use shape::{
    ConstructorId, DescriptorOwnership, FieldIndex, InstanceType, IntegrityLevel, ShapeFlags,
    ShapeId, ShapeRecord, ShapeState, TransitionStorage,
};
pub use transitions::{LookupResult, PropertyDetails};
pub use value::{ObjectId, Value};
