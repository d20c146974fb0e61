use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A value that UI code can read and subscribe to.
///
/// Subscribers receive the current value immediately and then every
/// subsequent change. Intermediate values may be skipped when updates arrive
/// faster than a subscriber runs; the latest value is never lost.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place. Subscribers are notified only when `f` returns true.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) {
        self.tx.send_if_modified(f);
    }

    /// Raw receiver for callers that want to drive the change loop themselves.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Register `callback`; it runs with the current value now and after every
    /// change until the returned [`Subscription`] is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        Subscription::spawn(async move {
            let current = rx.borrow_and_update().clone();
            callback(current);
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                callback(next);
            }
        })
    }
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Handle for a registered callback. Dropping it unregisters the callback.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: tokio::spawn(fut),
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
