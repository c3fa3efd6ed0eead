//! Change notification
//!
//! Listeners are registered together with a [`Dispatcher`] describing where
//! they want to be called. Writers hand the changed rows to every
//! registration's dispatcher; nothing in this crate runs callbacks on a
//! thread or task of its own.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::item::Item;

/// A unit of work handed to a dispatcher
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receives the rows affected by a write
pub trait ChangeListener: Send + Sync {
    /// Called with the batch of changed items
    fn on_change(&self, items: &[Item]);
}

impl<F> ChangeListener for F
where
    F: Fn(&[Item]) + Send + Sync,
{
    fn on_change(&self, items: &[Item]) {
        self(items)
    }
}

/// Execution context a listener is delivered on
pub trait Dispatcher: Send + Sync {
    /// Run `task` on this dispatcher's context
    fn dispatch(&self, task: Task);
}

/// Runs callbacks immediately on the writing caller
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task()
    }
}

/// Spawns callbacks onto a tokio runtime captured at construction
#[derive(Debug, Clone)]
pub struct RuntimeDispatcher {
    handle: Handle,
}

impl RuntimeDispatcher {
    /// Bind to the given runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Self {
        Self { handle: Handle::current() }
    }
}

impl Dispatcher for RuntimeDispatcher {
    fn dispatch(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

/// Queues callbacks for a [`DispatchQueue`] owned by the registering context
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<Task>,
}

/// Receiving end of a [`QueueDispatcher`]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl QueueDispatcher {
    /// Create a dispatcher and the queue its callbacks land in
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, task: Task) {
        // A dropped queue means nobody is listening any more
        if self.tx.send(task).is_err() {
            tracing::debug!("dispatch queue closed, dropping notification");
        }
    }
}

impl DispatchQueue {
    /// Run every queued callback, returning how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            count += 1;
        }
        count
    }

    /// Wait for the next callback and run it.
    ///
    /// Returns `false` once every dispatcher feeding this queue is gone.
    pub async fn next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

struct Registration {
    listener: Arc<dyn ChangeListener>,
    dispatcher: Arc<dyn Dispatcher>,
}

/// Registry of listeners for one storage
#[derive(Default)]
pub struct ChangeNotifier {
    registrations: Mutex<Vec<Registration>>,
}

fn same_listener(a: &Arc<dyn ChangeListener>, b: &Arc<dyn ChangeListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ChangeNotifier {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns `false` if it was already registered
    pub fn register(
        &self,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> bool {
        let mut registrations = self.registrations.lock();
        if registrations.iter().any(|r| same_listener(&r.listener, &listener)) {
            return false;
        }
        registrations.push(Registration { listener, dispatcher });
        true
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn unregister(&self, listener: &Arc<dyn ChangeListener>) -> bool {
        let mut registrations = self.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| !same_listener(&r.listener, listener));
        registrations.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }

    /// Hand `items` to every registered listener through its dispatcher
    pub fn notify(&self, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }
        // Snapshot so listeners may (un)register from inside a callback
        let targets: Vec<(Arc<dyn ChangeListener>, Arc<dyn Dispatcher>)> = self
            .registrations
            .lock()
            .iter()
            .map(|r| (Arc::clone(&r.listener), Arc::clone(&r.dispatcher)))
            .collect();
        if targets.is_empty() {
            return;
        }

        let items: Arc<[Item]> = items.into();
        for (listener, dispatcher) in targets {
            let items = Arc::clone(&items);
            dispatcher.dispatch(Box::new(move || listener.on_change(&items)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        items: AtomicUsize,
    }

    impl ChangeListener for Counting {
        fn on_change(&self, items: &[Item]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.items.fetch_add(items.len(), Ordering::SeqCst);
        }
    }

    fn item(key: &str) -> Item {
        Item::new("m", key, Some("v".to_string()), None)
    }

    #[test]
    fn test_register_once() {
        let notifier = ChangeNotifier::new();
        let listener: Arc<dyn ChangeListener> = Arc::new(Counting::default());

        assert!(notifier.register(Arc::clone(&listener), Arc::new(InlineDispatcher)));
        assert!(!notifier.register(Arc::clone(&listener), Arc::new(InlineDispatcher)));
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let notifier = ChangeNotifier::new();
        let listener: Arc<dyn ChangeListener> = Arc::new(Counting::default());

        assert!(!notifier.unregister(&listener));
        assert!(notifier.is_empty());
    }

    #[test]
    fn test_inline_delivery() {
        let notifier = ChangeNotifier::new();
        let counting = Arc::new(Counting::default());
        let listener: Arc<dyn ChangeListener> = counting.clone();
        notifier.register(Arc::clone(&listener), Arc::new(InlineDispatcher));

        notifier.notify(vec![item("a"), item("b")]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counting.items.load(Ordering::SeqCst), 2);

        notifier.unregister(&listener);
        notifier.notify(vec![item("c")]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_batch_not_delivered() {
        let notifier = ChangeNotifier::new();
        let counting = Arc::new(Counting::default());
        notifier.register(counting.clone(), Arc::new(InlineDispatcher));

        notifier.notify(Vec::new());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_queue_dispatcher_defers_until_drained() {
        let notifier = ChangeNotifier::new();
        let counting = Arc::new(Counting::default());
        let (dispatcher, mut queue) = QueueDispatcher::new();
        notifier.register(counting.clone(), Arc::new(dispatcher));

        notifier.notify(vec![item("a")]);
        notifier.notify(vec![item("b")]);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn test_closure_listener() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);
        let listener = move |items: &[Item]| {
            seen_in_listener.fetch_add(items.len(), Ordering::SeqCst);
        };
        notifier.register(Arc::new(listener), Arc::new(InlineDispatcher));

        notifier.notify(vec![item("a")]);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_queue_next() {
        let counting = Arc::new(Counting::default());
        let (dispatcher, mut queue) = QueueDispatcher::new();
        let notifier = ChangeNotifier::new();
        notifier.register(counting.clone(), Arc::new(dispatcher));

        notifier.notify(vec![item("a")]);
        assert!(queue.next().await);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        drop(notifier);
        assert!(!queue.next().await);
    }

    #[tokio::test]
    async fn test_runtime_dispatcher() {
        let notifier = ChangeNotifier::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<usize>();
        let listener = move |items: &[Item]| {
            let _ = tx.send(items.len());
        };
        notifier.register(Arc::new(listener), Arc::new(RuntimeDispatcher::current()));

        notifier.notify(vec![item("a"), item("b"), item("c")]);
        assert_eq!(rx.recv().await, Some(3));
    }
}
