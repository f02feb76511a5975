use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Handle returned when registering a listener; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of callbacks. Registration order is dispatch order.
pub(crate) struct Listeners<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(ListenerId, Handler<T>)>>,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every listener registered at the time of the call. A panicking
    /// listener is logged and skipped.
    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                error!("listener panicked, continuing with the remaining listeners");
            }
        }
    }
}
