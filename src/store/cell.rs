//! Equality-gated observable cell.
//!
//! Thin wrapper over `tokio::sync::watch` that only publishes when the new
//! value differs from the current one, so downstream subscribers never see
//! spurious notifications. The sender side never closes while the cell is
//! alive, so receivers can be held across record updates without losing
//! their identity.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Cell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Cell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current value, cloned out.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// New independent subscription to this cell.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Write `next` only if it differs from the current value. Returns
    /// whether a notification was published.
    pub fn set_if_changed(&self, next: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// In-place mutation; the closure returns whether the value changed and
    /// subscribers should be notified.
    pub fn update_with(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }
}

impl<T: Clone + PartialEq + Default> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
