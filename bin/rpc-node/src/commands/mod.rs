use std::path::PathBuf;

use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::RpcNodeError;
use crate::utils::RPC_NODE_TARGET;

/// Default location `init` writes to and `serve` reads from when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "rpc-node.toml";
/// Prefix for environment-variable overrides, e.g. `RPCNODE_RPC_PORT=18443`.
const ENV_PREFIX: &str = "RPCNODE_";

/// Runtime configuration, one field per `-rpc*` option named in the option table this runtime
/// implements for compatibility with existing node deployments. Field names intentionally spell
/// out the original option (`rpc_bind` for `-rpcbind`, etc.) so an operator migrating an existing
/// config file can find the equivalent field by eye.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// `-rpcbind`: addresses to bind. Ignored with a warning if `rpc_allow_ip` is empty.
    pub rpc_bind: Vec<String>,
    /// `-rpcallowip`: ACL subnets, as CIDR or dotted-decimal netmask. Loopback is always allowed
    /// regardless of this list.
    pub rpc_allow_ip: Vec<String>,
    /// `-rpcport`: default port for binds that don't specify one.
    pub rpc_port: u16,
    /// `-rpcthreads`: number of work-queue worker threads.
    pub rpc_threads: usize,
    /// `-rpcworkqueue`: work-queue capacity.
    pub rpc_work_queue: usize,
    /// `-rpcservertimeout`: HTTP connection inactivity timeout, in seconds.
    pub rpc_server_timeout_secs: u64,
    /// `-rpcssl`: must remain `false`; `true` aborts initialization.
    pub rpc_ssl: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rpc_bind: Vec::new(),
            rpc_allow_ip: Vec::new(),
            rpc_port: 8332,
            rpc_threads: 4,
            rpc_work_queue: 16,
            rpc_server_timeout_secs: 30,
            rpc_ssl: false,
        }
    }
}

impl RpcConfig {
    /// Rejects configurations that can never reach the `Start` phase.
    pub fn validate(&self) -> Result<(), RpcNodeError> {
        if self.rpc_threads == 0 {
            return Err(RpcNodeError::ThreadCountZero);
        }
        if self.rpc_work_queue == 0 {
            return Err(RpcNodeError::WorkQueueCapacityZero);
        }
        if self.rpc_ssl {
            return Err(RpcNodeError::SslUnsupported);
        }
        Ok(())
    }

    /// Loads configuration by layering, in increasing precedence: compiled-in defaults, the TOML
    /// file at `path` (if it exists), then `RPCNODE_`-prefixed environment variables.
    pub fn load(path: &std::path::Path) -> Result<Self, RpcNodeError> {
        let mut figment = Figment::from(Serialized::defaults(RpcConfig::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| RpcNodeError::ConfigLoad(e.to_string()))
    }
}

/// Root CLI struct.
#[derive(Parser, Debug)]
#[command(
    name = "rpc-node",
    about = "Embedded RPC service runtime for a peer-to-peer node",
    version,
    rename_all = "kebab-case"
)]
pub struct Cli {
    #[command(subcommand)]
    action: Command,
}

/// CLI actions.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Writes a starter configuration file with default values.
    Init(InitCmd),
    /// Loads configuration and runs the RPC front end and scheduler until interrupted.
    Serve(ServeCmd),
}

impl Cli {
    #[instrument(target = RPC_NODE_TARGET, name = "cli:execute", skip_all, ret(level = "info"), err)]
    pub fn execute(&self) -> Result<(), String> {
        match &self.action {
            Command::Init(cmd) => cmd.execute(),
            Command::Serve(cmd) => cmd.execute(),
        }
    }
}

/// `init`: writes [`RpcConfig::default`] to `--config` (or [`CONFIG_FILE_NAME`]) as TOML, for
/// manual editing. Refuses to overwrite an existing file.
#[derive(Parser, Debug)]
pub struct InitCmd {
    /// Path to write the configuration file to.
    #[arg(long, default_value = "rpc-node.toml")]
    pub config: PathBuf,
}

impl InitCmd {
    pub fn execute(&self) -> Result<(), String> {
        if self.config.exists() {
            return Err(format!("{} already exists; refusing to overwrite", self.config.display()));
        }
        let rendered = toml::to_string_pretty(&RpcConfig::default())
            .map_err(|e| format!("failed to render default configuration: {e}"))?;
        std::fs::write(&self.config, rendered)
            .map_err(|e| format!("failed to write {}: {e}", self.config.display()))?;
        info!(path = %self.config.display(), "wrote starter configuration");
        Ok(())
    }
}

/// `serve`: the primary entry point. Loads configuration (file + env, with CLI flags taking
/// highest precedence) and runs [`crate::run`] until a shutdown signal arrives.
#[derive(Parser, Debug)]
pub struct ServeCmd {
    /// Path to the configuration file to load, if any.
    #[arg(long, default_value = "rpc-node.toml")]
    pub config: PathBuf,
    #[arg(long = "rpcbind")]
    pub rpc_bind: Vec<String>,
    #[arg(long = "rpcallowip")]
    pub rpc_allow_ip: Vec<String>,
    #[arg(long = "rpcport")]
    pub rpc_port: Option<u16>,
    #[arg(long = "rpcthreads")]
    pub rpc_threads: Option<usize>,
    #[arg(long = "rpcworkqueue")]
    pub rpc_work_queue: Option<usize>,
    #[arg(long = "rpcservertimeout")]
    pub rpc_server_timeout_secs: Option<u64>,
    #[arg(long = "rpcssl")]
    pub rpc_ssl: bool,
}

impl ServeCmd {
    fn resolve_config(&self) -> Result<RpcConfig, RpcNodeError> {
        let mut config = RpcConfig::load(&self.config)?;
        if !self.rpc_bind.is_empty() {
            config.rpc_bind = self.rpc_bind.clone();
        }
        if !self.rpc_allow_ip.is_empty() {
            config.rpc_allow_ip = self.rpc_allow_ip.clone();
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(threads) = self.rpc_threads {
            config.rpc_threads = threads;
        }
        if let Some(work_queue) = self.rpc_work_queue {
            config.rpc_work_queue = work_queue;
        }
        if let Some(timeout) = self.rpc_server_timeout_secs {
            config.rpc_server_timeout_secs = timeout;
        }
        if self.rpc_ssl {
            config.rpc_ssl = true;
        }
        config.validate()?;
        Ok(config)
    }

    #[instrument(target = RPC_NODE_TARGET, name = "cli:serve", skip_all, err)]
    pub fn execute(&self) -> Result<(), String> {
        let config = self.resolve_config().map_err(|e| e.to_string())?;
        crate::run(config).map_err(|e| e.to_string())
    }
}
