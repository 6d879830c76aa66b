//! Destroy callbacks collected while a service is constructed.

use std::future::Future;

use futures::future::BoxFuture;

/// Container for destroy callbacks with LIFO execution order.
///
/// Async callbacks run first (in reverse order), followed by sync callbacks.
#[derive(Default)]
pub(crate) struct DestroyBag {
    sync: Vec<Box<dyn FnOnce() + Send>>,
    asyncs: Vec<Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>>,
}

impl DestroyBag {
    pub(crate) fn push_sync(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.sync.push(f);
    }

    pub(crate) fn push_async<Fut, F>(&mut self, f: F)
    where
        Fut: Future<Output = ()> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        self.asyncs.push(Box::new(move || Box::pin(f())));
    }

    /// Runs every callback, async ones first, each group in reverse order.
    pub(crate) async fn run_all_reverse(mut self) {
        while let Some(f) = self.asyncs.pop() {
            (f)().await;
        }
        while let Some(f) = self.sync.pop() {
            (f)();
        }
    }

    /// Moves `other`'s callbacks after this bag's, keeping their order.
    pub(crate) fn append(&mut self, mut other: DestroyBag) {
        self.sync.append(&mut other.sync);
        self.asyncs.append(&mut other.asyncs);
    }

    pub(crate) fn len(&self) -> usize {
        self.sync.len() + self.asyncs.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.sync.is_empty() && self.asyncs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn async_before_sync_each_lifo() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut bag = DestroyBag::default();

        for label in ["s1", "s2"] {
            let order = order.clone();
            bag.push_sync(Box::new(move || order.lock().unwrap().push(label)));
        }
        for label in ["a1", "a2"] {
            let order = order.clone();
            bag.push_async(move || async move { order.lock().unwrap().push(label) });
        }

        assert_eq!(bag.len(), 4);
        bag.run_all_reverse().await;
        assert_eq!(*order.lock().unwrap(), vec!["a2", "a1", "s2", "s1"]);
    }

    #[tokio::test]
    async fn append_keeps_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut first = DestroyBag::default();
        let mut second = DestroyBag::default();
        for (bag, label) in [(&mut first, "early"), (&mut second, "late")] {
            let order = order.clone();
            bag.push_sync(Box::new(move || order.lock().unwrap().push(label)));
        }

        first.append(second);
        assert_eq!(first.len(), 2);
        first.run_all_reverse().await;
        assert_eq!(*order.lock().unwrap(), vec!["late", "early"]);
    }
}
