//! Result publication to downstream consumers (UI, exporters, loggers).
//!
//! Observers are registered on the orchestrator and called synchronously from the
//! consumer thread for every event. They must return quickly; anything slow belongs on
//! the observer's own thread behind a channel.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::state::AcquisitionState;
use crate::data::BufferStats;
use crate::spectral::SpectralAnalysis;
use crate::wave::WaveDecompositionResult;

/// Everything the orchestrator publishes.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// Lifecycle transition
    StateChanged {
        /// Previous state
        from: AcquisitionState,
        /// New state
        to: AcquisitionState,
    },
    /// Spectra of one aligned block
    Spectral(Arc<SpectralAnalysis>),
    /// Wave separation of one aligned block
    Wave(Arc<WaveDecompositionResult>),
    /// Periodic buffer statistics
    Stats(BufferStats),
    /// A stage failed on one block; acquisition continues
    ProcessingError {
        /// Stage name
        stage: &'static str,
        /// Error description
        message: String,
    },
    /// The source failed; the session is stopping
    HardwareFault(String),
}

/// Receiver of acquisition events.
pub trait ResultObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &AcquisitionEvent);
}

impl<F> ResultObserver for F
where
    F: Fn(&AcquisitionEvent) + Send + Sync,
{
    fn on_event(&self, event: &AcquisitionEvent) {
        self(event)
    }
}

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Thread-safe observer list shared between the control thread and the consumer thread.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(ObserverId, Arc<dyn ResultObserver>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer.
    pub fn register(&self, observer: Arc<dyn ResultObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Deliver `event` to every observer in registration order.
    pub fn notify(&self, event: &AcquisitionEvent) {
        // Clone the list so observers may register or unregister from a callback
        let observers: Vec<Arc<dyn ResultObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        for observer in observers {
            observer.on_event(event);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn state_event() -> AcquisitionEvent {
        AcquisitionEvent::StateChanged {
            from: AcquisitionState::Idle,
            to: AcquisitionState::Configuring,
        }
    }

    #[test]
    fn closures_are_observers() {
        let registry = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.register(Arc::new(move |event: &AcquisitionEvent| {
            if let AcquisitionEvent::StateChanged { to, .. } = event {
                sink.lock().push(*to);
            }
        }));

        registry.notify(&state_event());
        registry.notify(&AcquisitionEvent::HardwareFault("unplugged".into()));
        assert_eq!(*seen.lock(), vec![AcquisitionState::Configuring]);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = registry.register(Arc::new(move |_: &AcquisitionEvent| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(registry.len(), 1);

        registry.notify(&state_event());
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.notify(&state_event());

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn delivery_follows_registration_order() {
        let registry = ObserverRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = Arc::clone(&order);
            registry.register(Arc::new(move |_: &AcquisitionEvent| order.lock().push(tag)));
        }
        registry.notify(&state_event());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
