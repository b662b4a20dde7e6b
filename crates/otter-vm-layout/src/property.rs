//! Property keys, attributes and accessor pairs

use crate::value::Value;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Named property key.
///
/// Indexed (array) properties never reach the shape machinery; they go to
/// the elements store.
#[derive(Clone, Debug)]
pub enum PropertyKey {
    /// Interned string; usable as a transition key
    String(Arc<str>),
    /// Non-interned string; names the same property as an interned one but
    /// cannot be cached in the transition tree
    Transient(Arc<str>),
    /// Symbol, identified by the host's symbol id
    Symbol(u32),
}

impl PropertyKey {
    /// Create an interned string key
    pub fn string(s: &str) -> Self {
        Self::String(Arc::from(s))
    }

    /// Create a non-interned string key
    pub fn transient(s: &str) -> Self {
        Self::Transient(Arc::from(s))
    }

    /// Create a symbol key
    pub fn symbol(id: u32) -> Self {
        Self::Symbol(id)
    }

    /// Can this key label a transition edge
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }

    /// String contents for string keys
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Transient(s) => Some(s),
            Self::Symbol(_) => None,
        }
    }

    /// The interned form of this key
    pub fn to_cacheable(&self) -> Self {
        match self {
            Self::Transient(s) => Self::String(s.clone()),
            other => other.clone(),
        }
    }

    /// Stable hash used to order descriptor tables
    pub fn hash_value(&self) -> u32 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        let h = hasher.finish();
        (h ^ (h >> 32)) as u32
    }
}

impl PartialEq for PropertyKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Symbol(_), _) | (_, Self::Symbol(_)) => false,
            (a, b) => a.as_str() == b.as_str(),
        }
    }
}

impl Eq for PropertyKey {}

impl Hash for PropertyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::String(s) | Self::Transient(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Self::Symbol(id) => {
                1u8.hash(state);
                id.hash(state);
            }
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Transient(s) => write!(f, "'{s}'"),
            Self::Symbol(id) => write!(f, "Symbol({id})"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Enumerable and configurable but not writable
    pub const fn read_only() -> Self {
        Self {
            writable: false,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-enumerable, otherwise default
    pub const fn hidden() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// The attributes a property keeps after `Object.freeze`
    pub const fn frozen(self) -> Self {
        Self {
            writable: false,
            enumerable: self.enumerable,
            configurable: false,
        }
    }

    /// The attributes a property keeps after `Object.seal`
    pub const fn sealed(self) -> Self {
        Self {
            writable: self.writable,
            enumerable: self.enumerable,
            configurable: false,
        }
    }
}

/// Getter/setter pair of an accessor property
#[derive(Clone, Debug, PartialEq)]
pub struct AccessorPair {
    /// Getter function, if any
    pub getter: Option<Value>,
    /// Setter function, if any
    pub setter: Option<Value>,
}

impl AccessorPair {
    /// Create an accessor pair
    pub fn new(getter: Option<Value>, setter: Option<Value>) -> Self {
        Self { getter, setter }
    }
}

/// Own property contents as returned by lookups
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// Data property value
    Data(Value),
    /// Accessor property (dispatch is the caller's concern)
    Accessor(AccessorPair),
}

impl PropertyValue {
    /// The data value, if this is a data property
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Accessor(_) => None,
        }
    }
}

/// Data or accessor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Holds a value
    Data,
    /// Holds an accessor pair
    Accessor,
}
