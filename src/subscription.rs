use std::{
    any::Any,
    mem::take,
    rc::{Rc, Weak},
};


/// Keeps a listener registered. Dropping it unregisters the listener.
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    /// Calls `unsubscribe` on drop only if `this` is still alive.
    pub fn from_weak_fn<T: 'static>(
        this: Weak<T>,
        unsubscribe: impl FnOnce(Rc<T>) + 'static,
    ) -> Self {
        Subscription(RawSubscription::WeakFn {
            this,
            unsubscribe: Box::new(move |this: Weak<dyn Any>| {
                if let Some(this) = this.upgrade()
                    && let Ok(this) = this.downcast()
                {
                    unsubscribe(this)
                }
            }),
        })
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::WeakFn { this, unsubscribe } => unsubscribe(this),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    WeakFn {
        this: Weak<dyn Any>,
        unsubscribe: Box<dyn FnOnce(Weak<dyn Any>)>,
    },
}
