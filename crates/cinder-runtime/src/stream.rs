//! In-order execution streams
//!
//! A [`Stream`] owns one worker thread. Work submitted with
//! [`Stream::enqueue`] runs on that worker in submission order, each item
//! only after the events it depends on have completed. Work that fails
//! completes its event as failed, and work behind a failed dependency is
//! skipped and inherits that failure. Nothing orders
//! work on one stream against work on another unless it is made to wait
//! on the other stream's events.
//!
//! ```text
//! enqueue(deps, work) ──► [queue] ──► worker: wait(deps) ─┬─ any failed ──► fail(inherited)
//!        │                                                 └─ work() ──► signal | fail(owner)
//!        └──► returns the Queued event completed after work()
//! ```

use crate::error::{Result, RuntimeError};
use crate::event::{Event, EventFailure, EventKind};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Task {
    owner: String,
    deps: Vec<Event>,
    work: Work,
    done: Event,
}

/// Stream-side failure of enqueued work
///
/// The work's event completes as failed. Failures are also collected here
/// and drained with [`Stream::take_failures`]; work skipped behind a failed
/// dependency is not recorded again.
#[derive(Debug)]
pub struct StreamFailure {
    pub event_id: u64,
    pub owner: String,
    pub error: RuntimeError,
}

/// Sequences asynchronous work and creates events
pub struct Stream {
    id: u64,
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_enqueued: Mutex<Option<Event>>,
    failures: Arc<Mutex<Vec<StreamFailure>>>,
}

impl Stream {
    /// Create a stream and start its worker thread
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Task>();
        let failures = Arc::new(Mutex::new(Vec::new()));

        let worker_failures = Arc::clone(&failures);
        let worker = thread::Builder::new()
            .name(format!("cinder-stream-{id}"))
            .spawn(move || run_worker(id, receiver, worker_failures))
            .map_err(|err| RuntimeError::InvalidConfig(format!("cannot start stream worker: {err}")))?;

        tracing::debug!(stream = id, name = %name, "stream created");

        Ok(Self {
            id,
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            last_enqueued: Mutex::new(None),
            failures,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an event signaled only through [`Event::set`]
    pub fn create_user_event(&self, start_signaled: bool) -> Event {
        let event = Event::new(EventKind::User, start_signaled);
        tracing::trace!(stream = self.id, event = event.id(), start_signaled, "user event created");
        event
    }

    /// Submit work that runs after `deps` and after everything submitted earlier
    pub fn enqueue<F>(&self, deps: &[Event], work: F) -> Result<Event>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.enqueue_for(self.name.clone(), deps, work)
    }

    /// Like [`Stream::enqueue`], naming `owner` in any failure the work reports
    pub fn enqueue_for<F>(&self, owner: impl Into<String>, deps: &[Event], work: F) -> Result<Event>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let done = Event::new(EventKind::Queued, false);
        let task = Task {
            owner: owner.into(),
            deps: deps.to_vec(),
            work: Box::new(work),
            done: done.clone(),
        };

        // hold the slot so submission order matches last_enqueued order
        let mut last = self.last_enqueued.lock();
        let sender = self.sender.lock();
        sender
            .as_ref()
            .ok_or(RuntimeError::StreamClosed(self.id))?
            .send(task)
            .map_err(|_| RuntimeError::StreamClosed(self.id))?;
        *last = Some(done.clone());

        tracing::trace!(stream = self.id, event = done.id(), deps = deps.len(), "work enqueued");
        Ok(done)
    }

    /// Event signaled once `deps` and all earlier work have completed
    pub fn enqueue_marker(&self, deps: &[Event]) -> Result<Event> {
        self.enqueue(deps, || Ok(()))
    }

    /// Block until everything submitted so far has completed, successfully or not
    pub fn finish(&self) {
        let last = self.last_enqueued.lock().clone();
        if let Some(event) = last {
            event.wait();
        }
    }

    /// Drain failures reported by enqueued work
    pub fn take_failures(&self) -> Vec<StreamFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}

fn run_worker(id: u64, receiver: mpsc::Receiver<Task>, failures: Arc<Mutex<Vec<StreamFailure>>>) {
    while let Ok(task) = receiver.recv() {
        Event::wait_all(&task.deps);

        if let Some(inherited) = task.deps.iter().find_map(Event::failure) {
            tracing::debug!(
                stream = id,
                event = task.done.id(),
                owner = %task.owner,
                failed = %inherited.owner,
                "skipping work behind a failed dependency"
            );
            task.done.fail(inherited);
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(task.work)).unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic in enqueued work".to_string());
            Err(RuntimeError::kernel_launch("enqueued work", reason))
        });

        match outcome {
            Ok(()) => task.done.signal(),
            Err(error) => {
                tracing::error!(stream = id, event = task.done.id(), owner = %task.owner, %error, "enqueued work failed");
                // recorded before waiters wake
                let failure = EventFailure::new(task.owner.clone(), error.to_string());
                failures.lock().push(StreamFailure {
                    event_id: task.done.id(),
                    owner: task.owner,
                    error,
                });
                task.done.fail(failure);
            }
        }
    }
    tracing::debug!(stream = id, "stream worker stopped");
}

impl Drop for Stream {
    fn drop(&mut self) {
        // closing the channel lets the worker drain and exit
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::warn!(stream = self.id, "stream worker panicked");
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).field("name", &self.name).finish()
    }
}
