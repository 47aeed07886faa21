use super::error::CacheError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

type Listener = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Fan-out point for faults detected inside the cache.
///
/// Cloning shares the listener list. A sink with no listeners drops faults
/// silently. Listeners are called in no particular order.
#[derive(Clone, Default)]
pub struct FaultSink {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl FaultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every future fault
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Deliver a fault to all listeners
    pub fn notify(&self, fault: &CacheError) {
        // Snapshot so a slow listener never holds the list lock
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            listener(fault);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl fmt::Debug for FaultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultSink")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_notify_without_listeners() {
        let sink = FaultSink::new();
        sink.notify(&CacheError::LockTimeout(Duration::from_secs(1)));
        assert_eq!(sink.listener_count(), 0);
    }

    #[test]
    fn test_every_listener_sees_fault() {
        let sink = FaultSink::new();
        let seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            sink.subscribe(move |fault| {
                assert!(fault.is_fault());
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Clones share listeners
        let shared = sink.clone();
        shared.notify(&CacheError::LockTimeout(Duration::from_secs(1)));

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(sink.listener_count(), 3);
    }
}
