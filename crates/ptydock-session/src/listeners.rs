//! Typed listener registries.
//!
//! Each session owns four independent registries (activity, ready, error,
//! exit). The event vocabulary is closed and statically checked: one registry
//! per event type instead of a dynamic event bus. Fan-out isolates
//! subscribers — a failing callback is logged and the remaining subscribers
//! still run, and nothing propagates back to the event source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

struct RegistryInner<T> {
    next_id: u64,
    listeners: HashMap<u64, Callback<T>>,
}

/// A fan-out channel for one event type.
pub struct ListenerRegistry<T> {
    name: &'static str,
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Register a listener. The returned [`Subscription`] is the
    /// deregistration action.
    pub fn register(
        &self,
        listener: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            remove: Box::new(registry_remover(Arc::downgrade(&self.inner))),
        }
    }

    /// Invoke every current subscriber with `event`.
    pub fn emit(&self, event: &T) {
        // Snapshot the callbacks so a listener can (de)register without
        // deadlocking against the fan-out.
        let callbacks: Vec<(u64, Callback<T>)> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut cbs: Vec<_> = inner
                .listeners
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect();
            cbs.sort_by_key(|(id, _)| *id);
            cbs
        };
        for (id, cb) in callbacks {
            if let Err(e) = cb(event) {
                warn!(registry = self.name, listener_id = id, error = %e, "listener failed");
            }
        }
    }

    /// Drop every subscriber. Called at dispose.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.listeners.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn registry_remover<T>(weak: Weak<Mutex<RegistryInner<T>>>) -> impl Fn(u64) + Send + 'static
where
    T: 'static,
{
    move |id| {
        if let Some(inner) = weak.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.listeners.remove(&id);
        }
    }
}

/// Deregistration handle for one registered listener.
///
/// Holds only a weak reference to its registry, so an outstanding
/// subscription never keeps a disposed session's registries alive.
pub struct Subscription {
    id: u64,
    remove: Box<dyn Fn(u64) + Send>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the registry is gone.
    pub fn unsubscribe(self) {
        (self.remove)(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_every_listener() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = (count.clone(), count.clone());
        let _s1 = registry.register(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let _s2 = registry.register(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.emit(&7);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_listener_does_not_block_siblings() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o3) = (order.clone(), order.clone());
        let _s1 = registry.register(move |_| {
            o1.lock().unwrap().push(1);
            Ok(())
        });
        let _s2 = registry.register(|_| anyhow::bail!("listener two exploded"));
        let _s3 = registry.register(move |_| {
            o3.lock().unwrap().push(3);
            Ok(())
        });
        registry.emit(&());
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let a = count.clone();
        let sub = registry.register(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let b = count.clone();
        let _keep = registry.register(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        sub.unsubscribe();
        registry.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unsubscribe_after_clear_is_harmless() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new("test");
        let sub = registry.register(|_| Ok(()));
        registry.clear();
        assert!(registry.is_empty());
        sub.unsubscribe();
    }
}
