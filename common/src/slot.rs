use std::sync::{Arc, RwLock};

/// Last-writer-wins holder for a whole value.
///
/// Writers swap in a complete `Arc`, readers clone the current `Arc`; the
/// lock is held only for the pointer swap, so a reader never observes a
/// partially written value.
#[derive(Debug)]
pub struct SharedSlot<T> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T> SharedSlot<T> {
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Replace the held value, returning the previous one.
    pub fn publish(&self, value: Arc<T>) -> Option<Arc<T>> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.replace(value)
    }

    pub fn clear(&self) -> Option<Arc<T>> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    pub fn snapshot(&self) -> Option<Arc<T>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    pub fn is_set(&self) -> bool {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.is_some()
    }
}

impl<T> Default for SharedSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}
