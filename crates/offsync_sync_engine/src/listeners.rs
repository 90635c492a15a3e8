//! Callback registry with explicit unsubscription.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Entries<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Handle returned by every `subscribe`-style method.
///
/// The callback stays registered until [`Subscription::unsubscribe`] is
/// called; dropping the handle does not remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the callback. Safe to call after the source is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

pub(crate) struct Registry<T> {
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: Clone + 'static> Registry<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, callback: impl Fn(T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut entries = self.entries.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.callbacks.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Entries<T>>> = Arc::downgrade(&self.entries);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(entries) = weak.upgrade() {
                    entries.lock().callbacks.retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    /// Invokes every callback outside the lock, so callbacks may subscribe
    /// or unsubscribe.
    pub(crate) fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .entries
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_and_unsubscribe() {
        let registry = Registry::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let sub = {
            let total = Arc::clone(&total);
            registry.add(move |v| {
                total.fetch_add(v as usize, Ordering::SeqCst);
            })
        };
        registry.emit(&2);
        registry.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 5);

        sub.unsubscribe();
        registry.emit(&10);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn dropping_handle_keeps_callback() {
        let registry = Registry::<()>::new();
        let _ = registry.add(|()| {});
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped() {
        let registry = Registry::<()>::new();
        let sub = registry.add(|()| {});
        drop(registry);
        sub.unsubscribe();
    }
}
