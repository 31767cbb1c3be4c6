use crossbeam_channel as channel;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Flush(channel::Sender<()>),
}

/// Runs removal notifications off the caller's thread, in submission order.
///
/// Cloning a dispatcher shares the underlying worker, so several caches can funnel their
/// notifications through one FIFO queue. The worker thread exits once every clone is dropped
/// and the queue has drained.
#[derive(Clone)]
pub struct EvictionDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    name: String,
    worker: Option<Worker>,
}

struct Worker {
    tx: Option<channel::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl EvictionDispatcher {
    /// Start a dedicated worker thread named `name`.
    ///
    /// If the thread cannot be spawned the dispatcher runs tasks inline on the submitting
    /// thread instead.
    pub fn spawn(name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = channel::unbounded::<Job>();
        let worker = match thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(rx))
        {
            Ok(handle) => Some(Worker {
                tx: Some(tx),
                thread_id: handle.thread().id(),
                thread: Some(handle),
            }),
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.memo",
                    dispatcher = %name,
                    error = %err,
                    "failed to spawn eviction dispatcher thread; running listeners inline"
                );
                None
            }
        };

        Self {
            inner: Arc::new(DispatcherInner { name, worker }),
        }
    }

    /// A dispatcher that runs every task immediately on the submitting thread.
    pub fn inline() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                name: "inline".to_string(),
                worker: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_inline(&self) -> bool {
        self.inner.worker.is_none()
    }

    /// Queue `task`, or run it right away if there is no worker. Panics inside `task` are
    /// caught and logged.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(deferred) = self.enqueue(task) {
            deferred.run();
        }
    }

    /// Queue `task` on the worker without ever blocking or running it.
    ///
    /// Callers holding a lock enqueue under it, so tasks reach the worker in the order the
    /// lock was taken. Without a worker the task comes back as [`Deferred`] and the caller
    /// runs it once its locks are released.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) -> Option<Deferred> {
        let task: Task = Box::new(task);
        let Some(tx) = self.inner.worker.as_ref().and_then(|w| w.tx.as_ref()) else {
            return Some(Deferred(task));
        };

        match tx.send(Job::Run(task)) {
            Ok(()) => None,
            // The worker is gone; hand the notification back instead of losing it.
            Err(channel::SendError(Job::Run(task))) => Some(Deferred(task)),
            Err(channel::SendError(Job::Flush(_))) => None,
        }
    }

    /// Block until every task submitted before this call has finished.
    ///
    /// Returns immediately for inline dispatchers and when called from the worker itself.
    pub fn flush(&self) {
        let Some(worker) = &self.inner.worker else {
            return;
        };
        if thread::current().id() == worker.thread_id {
            return;
        }
        let Some(tx) = &worker.tx else {
            return;
        };

        let (done_tx, done_rx) = channel::bounded(1);
        if tx.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

/// A task the dispatcher could not queue. Run it after releasing any lock held while enqueuing.
#[must_use = "a deferred task does nothing until it is run"]
pub struct Deferred(Task);

impl Deferred {
    pub fn run(self) {
        run_task(self.0);
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred")
    }
}

impl fmt::Debug for EvictionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvictionDispatcher")
            .field("name", &self.inner.name)
            .field("inline", &self.is_inline())
            .finish()
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let Some(worker) = &mut self.worker else {
            return;
        };
        // Closing the channel lets the worker drain the queue and exit.
        drop(worker.tx.take());
        if thread::current().id() == worker.thread_id {
            return;
        }
        if let Some(handle) = worker.thread.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: channel::Receiver<Job>) {
    for job in rx {
        match job {
            Job::Run(task) => run_task(task),
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn run_task(task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!(target: "kestrel.memo", "eviction listener panicked");
    }
}
