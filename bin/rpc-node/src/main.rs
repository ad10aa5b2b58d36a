mod acl;
mod commands;
mod error;
mod http;
mod metrics;
mod registry;
mod scheduler;
mod utils;
mod workqueue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, instrument, warn};

use acl::Acl;
use commands::{Cli, RpcConfig};
use error::RpcNodeError;
use http::{HttpFrontEnd, Request};
use registry::{Handler, PathHandlerRegistry};
use scheduler::Scheduler;
use workqueue::WorkQueue;

/// How long [`run`] gives the event-loop thread to observe `Stop` before abandoning it. A
/// pragmatic bound carried over from the reference runtime's own shutdown path; see DESIGN.md.
const LOOP_EXIT_TIMEOUT: Duration = Duration::from_secs(2);
/// How often the periodic metrics-refresh task (scheduled via the scheduler itself) runs.
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<(), String> {
    utils::setup_tracing()?;
    let cli = Cli::parse();
    cli.execute()
}

/// Wires C1-C5 together across the Init -> Start -> Interrupt -> Stop lifecycle and blocks the
/// calling thread until an interrupt signal (Ctrl-C) arrives, then drives the runtime through an
/// orderly shutdown.
#[instrument(target = utils::RPC_NODE_TARGET, name = "rpc_node:run", skip_all)]
pub fn run(config: RpcConfig) -> Result<(), RpcNodeError> {
    // --- Init ---
    let acl = Arc::new(Acl::from_specs(&config.rpc_allow_ip)?);
    let registry = Arc::new(PathHandlerRegistry::new());
    register_builtin_handlers(&registry);
    let work_queue = Arc::new(WorkQueue::new(config.rpc_work_queue));
    let scheduler = Scheduler::new();

    let (front_end, handle) = HttpFrontEnd::bind(&config, acl, registry, work_queue.clone())?;
    info!(
        threads = config.rpc_threads,
        work_queue_capacity = config.rpc_work_queue,
        timeout_secs = config.rpc_server_timeout_secs,
        "RPC node initialized"
    );

    // --- Start ---
    let event_loop = thread::Builder::new()
        .name("rpc-event-loop".into())
        .spawn(move || front_end.run())
        .map_err(RpcNodeError::Io)?;

    let mut worker_handles = Vec::with_capacity(config.rpc_threads);
    for idx in 0..config.rpc_threads {
        let queue = work_queue.clone();
        let handle = thread::Builder::new()
            .name(format!("rpc-worker-{idx}"))
            .spawn(move || queue.run())
            .map_err(RpcNodeError::Io)?;
        worker_handles.push(handle);
    }

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        thread::Builder::new()
            .name("rpc-scheduler".into())
            .spawn(move || scheduler.run())
            .map_err(RpcNodeError::Io)?
    };

    schedule_metrics_refresh(&scheduler, work_queue.clone());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
            .map_err(|e| RpcNodeError::SignalHandler(e.to_string()))?;
    }
    while !interrupted.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    // --- Interrupt ---
    info!("shutdown signal received; entering interrupt phase");
    handle.interrupt();
    work_queue.wait_exit();
    scheduler.stop(true);

    // --- Stop ---
    handle.stop();
    if !join_with_timeout(event_loop, LOOP_EXIT_TIMEOUT) {
        warn!(
            timeout_secs = LOOP_EXIT_TIMEOUT.as_secs(),
            "event loop did not exit within the loop-exit timeout; forcing shutdown to proceed"
        );
    }
    for worker in worker_handles {
        let _ = worker.join();
    }
    let _ = scheduler_handle.join();

    info!("RPC node stopped");
    Ok(())
}

/// Registers the handlers this runtime exposes on its own behalf (metrics, health) rather than
/// leaving the registry empty: collaborators register everything else (wallet, chain, peer RPC
/// methods) before `Start`, but a server with zero built-in routes has nowhere to point an
/// operator's monitoring at.
fn register_builtin_handlers(registry: &PathHandlerRegistry) {
    let metrics_handler: Handler = Arc::new(|req: &mut Request, _suffix: &str| {
        req.write_reply(200, metrics::render());
    });
    registry.register("/metrics", true, metrics_handler);

    let health_handler: Handler = Arc::new(|req: &mut Request, _suffix: &str| {
        req.write_reply(200, &b"ok"[..]);
    });
    registry.register("/health", true, health_handler);
}

/// Keeps the queue-depth and worker-count gauges fresh without a request having to pass through
/// the front end first. A small, self-contained demonstration of the pattern §6 describes for ops
/// modules: periodic work posted to the scheduler rather than bolted onto the HTTP path.
fn schedule_metrics_refresh(scheduler: &Arc<Scheduler>, work_queue: Arc<WorkQueue>) {
    let refresh_scheduler = scheduler.clone();
    scheduler.schedule_every(METRICS_REFRESH_INTERVAL, move || {
        metrics::QUEUE_DEPTH.set(work_queue.depth() as i64);
        metrics::WORKER_COUNT.set(work_queue.worker_count() as i64);
        let (scheduled, _earliest, _latest) = refresh_scheduler.queue_info();
        metrics::SCHEDULER_QUEUE_DEPTH.set(scheduled as i64);
        metrics::SCHEDULER_TASK_TOTAL.inc();
    });
}

/// Joins `handle`, giving up (and leaking the thread) after `timeout`. `std::thread::JoinHandle`
/// has no timed join, so the handle is moved onto a throwaway thread that joins it and signals
/// completion over a channel this thread can wait on with a deadline.
fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration) -> bool {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    rx.recv_timeout(timeout).is_ok()
}
