use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::http::Request;
use crate::registry::Handler;

/// An owned, one-shot unit of work: a request paired with the handler chosen for it and the
/// path suffix the handler should see. Consumed by [`WorkItem::execute`] exactly once.
pub struct WorkItem {
    req: Request,
    handler: Handler,
    suffix: String,
}

impl WorkItem {
    pub(crate) fn new(req: Request, handler: Handler, suffix: String) -> Self {
        Self { req, handler, suffix }
    }

    fn execute(mut self) {
        let handler = self.handler.clone();
        handler(&mut self.req, &self.suffix);
        // `self.req` is dropped here; if the handler never called `write_reply`, `Request`'s
        // `Drop` impl synthesizes the 500 "Unhandled request" response.
    }

    /// Unwraps a rejected item back into its request, discarding the handler it would have run.
    /// Used by the front end to synthesize the backpressure reply when `try_enqueue` fails.
    pub(crate) fn into_request(self) -> Request {
        self.req
    }
}

struct Inner {
    items: VecDeque<WorkItem>,
    running: bool,
    worker_count: usize,
}

/// Bounded multi-producer / multi-consumer FIFO of [`WorkItem`]s.
///
/// Every mutation of `running`, `worker_count`, and the FIFO happens under a single mutex, as
/// required by the concurrency invariants this type implements: `not_empty` is signalled on
/// enqueue and on interrupt; `exited` is signalled whenever `worker_count` reaches zero, which is
/// what lets [`WorkQueue::wait_exit`] block without polling.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    exited: Condvar,
    capacity: usize,
}

impl WorkQueue {
    /// Creates a queue with `running = true` and the given capacity (must be ≥ 1).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "work queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner { items: VecDeque::new(), running: true, worker_count: 0 }),
            not_empty: Condvar::new(),
            exited: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item` if there is spare capacity and the queue is still running; otherwise the
    /// item is handed back so the caller can synthesize a rejection reply.
    pub(crate) fn try_enqueue(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut inner = self.inner.lock();
        if !inner.running || inner.items.len() >= self.capacity {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// `true` if capacity accepted the item (ownership consumed), `false` otherwise.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        self.try_enqueue(item).is_ok()
    }

    /// Worker entry point. Blocks until an item is available or the queue is interrupted, then
    /// runs it with the queue lock released. Returns when `running` becomes false and the FIFO
    /// has been drained of whatever was in it at that instant.
    pub fn run(&self) {
        let _attendance = Attendance::enter(self);
        loop {
            let item = {
                let mut inner = self.inner.lock();
                loop {
                    if let Some(item) = inner.items.pop_front() {
                        break Some(item);
                    }
                    if !inner.running {
                        break None;
                    }
                    self.not_empty.wait(&mut inner);
                }
            };
            match item {
                Some(item) => item.execute(),
                None => break,
            }
        }
    }

    /// Sets `running = false` and wakes every waiter. Idempotent.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        drop(inner);
        self.not_empty.notify_all();
    }

    /// Blocks until `worker_count` reaches zero.
    pub fn wait_exit(&self) {
        let mut inner = self.inner.lock();
        while inner.worker_count > 0 {
            self.exited.wait(&mut inner);
        }
    }

    /// Blocks until `worker_count` reaches zero or `timeout` elapses; returns `true` if it
    /// reached zero.
    pub fn wait_exit_timeout(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;
        while inner.worker_count > 0 {
            let now = std::time::Instant::now();
            if now >= deadline {
                return inner.worker_count == 0;
            }
            let result = self.exited.wait_for(&mut inner, deadline - now);
            if result.timed_out() {
                return inner.worker_count == 0;
            }
        }
        true
    }

    /// Current queue length (advisory; may be stale the instant it's read).
    pub fn depth(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock().worker_count
    }
}

/// RAII attendance counter: increments `worker_count` on construction, decrements (and notifies
/// `exited`) on every exit path including panics, so `wait_exit` can never deadlock against a
/// worker that unwound.
struct Attendance<'a> {
    queue: &'a WorkQueue,
}

impl<'a> Attendance<'a> {
    fn enter(queue: &'a WorkQueue) -> Self {
        queue.inner.lock().worker_count += 1;
        Self { queue }
    }
}

impl Drop for Attendance<'_> {
    fn drop(&mut self) {
        let mut inner = self.queue.inner.lock();
        inner.worker_count -= 1;
        let now_empty = inner.worker_count == 0;
        drop(inner);
        if now_empty {
            self.queue.exited.notify_all();
        }
    }
}
