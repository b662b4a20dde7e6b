//! Notifications for compiled-code dependencies
//!
//! Optimized code may bake in a shape's layout or a field's type. Whenever
//! the layout engine invalidates such an assumption it tells every registered
//! observer which shape was affected.

use crate::shape::ShapeId;
use parking_lot::Mutex;

/// An invalidated layout assumption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyEvent {
    /// The shape and its transition subtree were deprecated
    ShapeDeprecated(ShapeId),
    /// A field's representation or type was widened in place
    FieldGeneralized {
        /// Shape that introduced the field
        shape: ShapeId,
        /// Descriptor index of the field
        descriptor: usize,
    },
    /// A shape lost its stable flag
    ShapeUnstable(ShapeId),
}

impl DependencyEvent {
    /// Shape whose dependents must be invalidated
    pub fn shape(&self) -> ShapeId {
        match *self {
            Self::ShapeDeprecated(shape)
            | Self::FieldGeneralized { shape, .. }
            | Self::ShapeUnstable(shape) => shape,
        }
    }
}

/// Receives dependency invalidations
pub trait DependencyObserver: Send + Sync {
    /// Called synchronously for each event
    fn on_event(&self, event: &DependencyEvent);
}

/// Observer that keeps every event (for tests and diagnostics)
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DependencyEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events
    pub fn events(&self) -> Vec<DependencyEvent> {
        self.events.lock().clone()
    }

    /// Remove and return all recorded events
    pub fn take(&self) -> Vec<DependencyEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Was `shape` deprecated
    pub fn saw_deprecation(&self, shape: ShapeId) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| *e == DependencyEvent::ShapeDeprecated(shape))
    }
}

impl DependencyObserver for RecordingObserver {
    fn on_event(&self, event: &DependencyEvent) {
        self.events.lock().push(*event);
    }
}
