use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub const RPC_NODE_TARGET: &str = "rpc_node";

/// Initializes the global `tracing` subscriber for the CLI and the runtime it launches.
///
/// Mirrors the reference runtime's `setup_tracing`, minus the OpenTelemetry/OTLP exporter
/// pipeline: that pipeline ships spans to a collector across a fleet of proxy/worker processes, a
/// topology this single-process runtime does not have (see DESIGN.md for the drop). What remains
/// is an `env-filter` layer (`RUST_LOG`, defaulting to `info`) feeding a formatted console layer,
/// set as the global default exactly once before CLI parsing.
pub(crate) fn setup_tracing() -> Result<(), String> {
    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer());

    subscriber.try_init().map_err(|e| format!("failed to install tracing subscriber: {e}"))
}
