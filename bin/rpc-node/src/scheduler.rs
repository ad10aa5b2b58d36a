use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A scheduled callback. Boxed so the scheduler can hold a heterogeneous set of deferred work.
type Task = Box<dyn FnOnce() + Send>;

/// Deadline plus an insertion sequence number, used purely to break ties between tasks that
/// share a deadline (order among those is otherwise unspecified, per the scheduler's contract).
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
struct Key {
    deadline: Instant,
    seq: u64,
}

struct Inner {
    tasks: BTreeMap<Key, Task>,
    next_seq: u64,
    stop_requested: bool,
    stop_when_empty: bool,
    service_threads: usize,
}

/// Ordered `(fire_time, callable)` set drained by one or more service-loop threads.
///
/// Mirrors the work queue's concurrency discipline: a single mutex guards all scheduler state,
/// and one condition variable is used for both "queue became non-empty" and "deadline changed"
/// wakeups. Workers re-evaluate the wait on every wake rather than caching a computed deadline,
/// because a freshly inserted task may have shortened it.
pub struct Scheduler {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                tasks: BTreeMap::new(),
                next_seq: 0,
                stop_requested: false,
                stop_when_empty: false,
                service_threads: 0,
            }),
            cond: Condvar::new(),
        })
    }

    /// Inserts `f` to run at or after `deadline`.
    pub fn schedule(&self, deadline: Instant, f: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.insert(Key { deadline, seq }, Box::new(f));
        drop(inner);
        self.cond.notify_one();
    }

    /// Equivalent to `schedule(Instant::now() + delay, f)`.
    pub fn schedule_from_now(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        self.schedule(Instant::now() + delay, f);
    }

    /// Schedules `f` to run every `period`, starting `period` from now. There is no drift
    /// compensation: each run is scheduled `period` after the *previous run returns*, so the
    /// observed inter-start gap is `period + f`'s own runtime.
    pub fn schedule_every(self: &Arc<Self>, period: Duration, f: impl Fn() + Send + Sync + 'static) {
        let scheduler = self.clone();
        let f = Arc::new(f);
        self.schedule_from_now(period, move || Self::run_periodic(scheduler, period, f));
    }

    fn run_periodic(scheduler: Arc<Self>, period: Duration, f: Arc<dyn Fn() + Send + Sync>) {
        f();
        scheduler.schedule_from_now(period, move || Self::run_periodic(scheduler.clone(), period, f));
    }

    /// Requests shutdown. If `drain`, service loops keep running scheduled tasks until the set
    /// empties out before exiting; otherwise they exit as soon as the current task (if any)
    /// returns, leaving anything still scheduled unrun. Either way every waiter is woken.
    pub fn stop(&self, drain: bool) {
        let mut inner = self.inner.lock();
        inner.stop_requested = !drain;
        inner.stop_when_empty = drain;
        drop(inner);
        self.cond.notify_all();
    }

    /// Advisory snapshot: `(count, earliest deadline, latest deadline)`.
    pub fn queue_info(&self) -> (usize, Option<Instant>, Option<Instant>) {
        let inner = self.inner.lock();
        let earliest = inner.tasks.keys().next().map(|k| k.deadline);
        let latest = inner.tasks.keys().next_back().map(|k| k.deadline);
        (inner.tasks.len(), earliest, latest)
    }

    pub fn service_threads(&self) -> usize {
        self.inner.lock().service_threads
    }

    /// Runs the service loop on the calling thread until `should_stop()` holds.
    pub fn run(&self) {
        {
            let mut inner = self.inner.lock();
            inner.service_threads += 1;
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.service_loop()));
        {
            let mut inner = self.inner.lock();
            inner.service_threads -= 1;
        }
        self.cond.notify_all();
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    fn service_loop(&self) {
        loop {
            let mut inner = self.inner.lock();
            loop {
                if Self::should_stop(&inner) {
                    return;
                }
                if inner.tasks.is_empty() {
                    self.cond.wait(&mut inner);
                    continue;
                }
                break;
            }

            // Timed-wait until the earliest deadline, re-checking every wake: a newly inserted
            // earlier task or another worker consuming the front both invalidate a cached wait.
            // The deadline is recomputed from scratch on every iteration of the outer loop rather
            // than cached, which is what makes both invalidation cases safe.
            let earliest = *inner.tasks.keys().next().expect("non-empty checked above");
            let now = Instant::now();
            if earliest.deadline > now {
                self.cond.wait_for(&mut inner, earliest.deadline - now);
                continue;
            }

            // The deadline has passed and we still hold the lock uninterrupted since observing
            // a non-empty queue above, so the front item is still ours to take.
            let key = *inner.tasks.keys().next().expect("non-empty");
            let task = inner.tasks.remove(&key).expect("just observed");
            drop(inner);
            task();
        }
    }

    fn should_stop(inner: &Inner) -> bool {
        inner.stop_requested || (inner.stop_when_empty && inner.tasks.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::thread;

    use super::*;

    #[test]
    fn task_does_not_run_before_its_deadline() {
        let scheduler = Scheduler::new();
        let observed = Arc::new(StdMutex::new(None));
        let observed_clone = observed.clone();
        let start = Instant::now();

        scheduler.schedule_from_now(Duration::from_millis(40), move || {
            *observed_clone.lock().unwrap() = Some(Instant::now());
        });

        let worker_scheduler = scheduler.clone();
        let worker = thread::spawn(move || worker_scheduler.run());
        thread::sleep(Duration::from_millis(80));
        scheduler.stop(true);
        worker.join().unwrap();

        let fired_at = observed.lock().unwrap().expect("task should have run");
        assert!(fired_at - start >= Duration::from_millis(35));
    }

    #[test]
    fn earlier_inserted_later_task_runs_second() {
        let scheduler = Scheduler::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order_a = order.clone();
        scheduler.schedule_from_now(Duration::from_millis(50), move || {
            order_a.lock().unwrap().push('A');
        });

        thread::sleep(Duration::from_millis(10));

        let order_b = order.clone();
        scheduler.schedule_from_now(Duration::from_millis(10), move || {
            order_b.lock().unwrap().push('B');
        });

        let worker_scheduler = scheduler.clone();
        let worker = thread::spawn(move || worker_scheduler.run());
        thread::sleep(Duration::from_millis(120));
        scheduler.stop(true);
        worker.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec!['B', 'A']);
    }

    #[test]
    fn stop_false_leaves_unrun_tasks_in_place() {
        let scheduler = Scheduler::new();
        scheduler.schedule_from_now(Duration::from_secs(10), || {});
        scheduler.stop(false);
        let (count, _, _) = scheduler.queue_info();
        assert_eq!(count, 1);
    }

    #[test]
    fn periodic_task_reschedules_itself() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runs_clone = runs.clone();

        scheduler.schedule_every(Duration::from_millis(15), move || {
            runs_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let worker_scheduler = scheduler.clone();
        let worker = thread::spawn(move || worker_scheduler.run());
        thread::sleep(Duration::from_millis(70));
        scheduler.stop(false);
        worker.join().unwrap();

        // With a 15ms period over ~70ms we expect a handful of runs, not zero and not unbounded.
        let count = runs.load(std::sync::atomic::Ordering::SeqCst);
        assert!(count >= 2, "expected at least 2 periodic runs, got {count}");
    }

    #[test]
    fn service_threads_returns_to_zero_after_stop() {
        let scheduler = Scheduler::new();
        let worker_scheduler = scheduler.clone();
        let worker = thread::spawn(move || worker_scheduler.run());
        thread::sleep(Duration::from_millis(20));
        scheduler.stop(true);
        worker.join().unwrap();
        assert_eq!(scheduler.service_threads(), 0);
    }
}
