use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Single-slot "latest wins" hand-off between one producer and its readers.
///
/// Publishing replaces the current value atomically; readers get a cheap
/// `Arc` snapshot and never wait. There is no history: a value that is
/// overwritten before anyone reads it is simply gone.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Arc<ArcSwapOption<T>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwapOption::empty()),
        }
    }

    pub fn publish(&self, value: T) {
        self.publish_shared(Arc::new(value));
    }

    pub fn publish_shared(&self, value: Arc<T>) {
        self.slot.store(Some(value));
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }
}
