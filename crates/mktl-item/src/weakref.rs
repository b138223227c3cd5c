//! A uniform weak handle for update callbacks.
//!
//! The historical implementation needs a helper here because Python's
//! `weakref.ref` doesn't work on bound methods -- `weakref.WeakMethod` is a
//! separate thing, and callers can't always tell in advance which one they
//! have. Rust doesn't have that split: a bound method and a plain callable
//! are both just `Arc<dyn Fn(..)>` once captured, so a single `Weak`
//! wrapper covers both cases uniformly.

use std::sync::{Arc, Weak};

use mktl_core::Value;

pub type Callback = dyn Fn(&Value, f64) + Send + Sync;

/// A weak reference to a registered update callback. Once the strong
/// `Arc` it was built from is dropped, [`WeakCallback::call`] becomes a
/// silent no-op returning `false`, which is how [`crate::item::Item`] prunes
/// dead registrations lazily on the next publish.
#[derive(Clone)]
pub struct WeakCallback(Weak<Callback>);

impl WeakCallback {
    pub fn new(target: &Arc<Callback>) -> Self {
        WeakCallback(Arc::downgrade(target))
    }

    /// Invoke the callback if its target is still alive. Returns `false` if
    /// the target has been dropped, signaling the caller to prune this
    /// registration.
    pub fn call(&self, value: &Value, time: f64) -> bool {
        match self.0.upgrade() {
            Some(cb) => {
                cb(value, time);
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn call_invokes_live_target() {
        let counter = Arc::new(AtomicI64::new(0));
        let counter_clone = counter.clone();
        let cb: Arc<Callback> = Arc::new(move |v, _t| {
            counter_clone.fetch_add(v.as_i64().unwrap_or(0), Ordering::SeqCst);
        });
        let weak = WeakCallback::new(&cb);

        assert!(weak.call(&Value::Int(5), 0.0));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn call_returns_false_once_target_dropped() {
        let cb: Arc<Callback> = Arc::new(|_v, _t| {});
        let weak = WeakCallback::new(&cb);
        drop(cb);

        assert!(!weak.is_alive());
        assert!(!weak.call(&Value::Null, 0.0));
    }
}
