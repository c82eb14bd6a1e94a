//! Listener disposers.

use std::fmt;

/// Undoes a registration (a hook listener, a global error handler).
///
/// Dropping a `Disposer` keeps the registration; call
/// [`dispose`](Disposer::dispose) to remove it.
pub struct Disposer(Option<Box<dyn FnOnce()>>);

impl Disposer {
    pub(crate) fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Remove the registration.
    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("pending", &self.0.is_some())
            .finish()
    }
}
