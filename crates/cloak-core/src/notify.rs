//! Single-threaded notification context used by the plain stores.
//!
//! Every store owns one named worker thread. Listener delivery and deferred
//! disk writes are queued onto it and run one at a time, in submission order.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, ThreadId},
};

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// A change observed by store listeners. Carries keys only, never values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    /// The entry for `key` was written or removed.
    Changed { key: String },
    /// The store was cleared.
    Cleared,
}

pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Job = Box<dyn FnOnce() + Send + 'static>;
type Registry = Arc<Mutex<Vec<(ListenerId, Listener)>>>;

pub struct ChangeNotifier {
    listeners: Registry,
    next_id: AtomicU64,
    jobs: mpsc::UnboundedSender<Job>,
    worker: Option<ThreadId>,
}

impl ChangeNotifier {
    /// Spawn the worker thread. It exits once the notifier is dropped and
    /// the queue has drained.
    pub fn new(thread_name: impl Into<String>) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let spawned = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("notification job panicked");
                    }
                }
            });

        let worker = match spawned {
            Ok(handle) => Some(handle.thread().id()),
            Err(err) => {
                error!(%err, "failed to spawn notification thread; changes will not be delivered");
                None
            }
        };

        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            jobs,
            worker,
        }
    }

    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    /// Returns whether a listener was registered under `id`.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queue arbitrary work onto the notification thread.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.jobs.send(Box::new(job)).is_err() {
            warn!("notification thread is gone; dropping queued job");
        }
    }

    /// Deliver `events` to the listeners registered at delivery time.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        let listeners = Arc::clone(&self.listeners);
        self.execute(move || {
            let snapshot: Vec<Listener> = lock(&listeners)
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();

            for event in &events {
                for listener in &snapshot {
                    if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                        warn!("change listener panicked");
                    }
                }
            }
        });
    }

    /// Block until every job queued before this call has run.
    /// Returns immediately when called from the notification thread.
    pub fn wait_idle(&self) {
        if self.worker.is_none() || self.worker == Some(thread::current().id()) {
            return;
        }

        let (done, finished) = oneshot::channel();
        self.execute(move || {
            let _ = done.send(());
        });
        let _ = finished.blocking_recv();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listener_count())
            .field("worker", &self.worker)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;

    fn recording_listener() -> (Listener, std_mpsc::Receiver<(ChangeEvent, Option<String>)>) {
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let listener: Listener = Arc::new(move |event: &ChangeEvent| {
            let thread_name = thread::current().name().map(str::to_string);
            let _ = lock(&tx).send((event.clone(), thread_name));
        });
        (listener, rx)
    }

    #[test]
    fn delivers_in_order_on_named_thread() {
        let notifier = ChangeNotifier::new("cloak-test-notify");
        let (listener, rx) = recording_listener();
        notifier.subscribe(listener);

        notifier.publish(vec![
            ChangeEvent::Cleared,
            ChangeEvent::Changed { key: "a".into() },
        ]);
        notifier.wait_idle();

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                (ChangeEvent::Cleared, Some("cloak-test-notify".to_string())),
                (
                    ChangeEvent::Changed { key: "a".into() },
                    Some("cloak-test-notify".to_string())
                ),
            ]
        );
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let notifier = ChangeNotifier::new("cloak-test-notify");
        let (listener, rx) = recording_listener();
        let id = notifier.subscribe(listener);

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id), "second unsubscribe is a no-op");
        notifier.publish(vec![ChangeEvent::Cleared]);
        notifier.wait_idle();

        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let notifier = ChangeNotifier::new("cloak-test-notify");
        notifier.subscribe(Arc::new(|_: &ChangeEvent| panic!("boom")));
        let (listener, rx) = recording_listener();
        notifier.subscribe(listener);

        notifier.publish(vec![ChangeEvent::Changed { key: "k".into() }]);
        notifier.publish(vec![ChangeEvent::Changed { key: "k2".into() }]);

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("first event");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("second event");
        assert_eq!(first.0, ChangeEvent::Changed { key: "k".into() });
        assert_eq!(second.0, ChangeEvent::Changed { key: "k2".into() });
    }

    #[test]
    fn wait_idle_inside_job_does_not_deadlock() {
        let notifier = Arc::new(ChangeNotifier::new("cloak-test-notify"));
        let (tx, rx) = std_mpsc::channel();
        let inner = Arc::clone(&notifier);
        notifier.execute(move || {
            inner.wait_idle();
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("job should complete");
    }
}
