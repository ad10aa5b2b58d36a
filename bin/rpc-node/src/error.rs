use thiserror::Error;

// RPC NODE ERROR
// ================================================================================================

/// Errors that can prevent the runtime from reaching the `Start` phase.
#[derive(Debug, Error)]
pub enum RpcNodeError {
    #[error("invalid subnet specification '{1}': {0}")]
    InvalidSubnet(#[source] ipnetwork::IpNetworkError, String),
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
    #[error("no configured bind address could be bound")]
    NoBindAddressSucceeded,
    #[error("rpcssl is not supported by this runtime")]
    SslUnsupported,
    #[error("port {1} is already in use: {0}")]
    PortAlreadyInUse(#[source] std::io::Error, u16),
    #[error("failed to load config file: {0}")]
    ConfigLoad(String),
    #[error("failed to install shutdown signal handler: {0}")]
    SignalHandler(String),
    #[error("work queue capacity must be at least 1")]
    WorkQueueCapacityZero,
    #[error("rpc thread count must be at least 1")]
    ThreadCountZero,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<RpcNodeError> for String {
    fn from(err: RpcNodeError) -> Self {
        err.to_string()
    }
}

// HTTP ERROR
// ================================================================================================

/// Errors arising while parsing a single request off the wire. None of these are fatal to the
/// server as a whole; each just means the connection that produced it is dropped without a reply,
/// since there is no well-formed request to answer.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request line and headers exceeded the 8 KiB limit")]
    HeadersTooLarge,
    #[error("request body exceeded the configured limit")]
    BodyTooLarge,
    #[error("malformed request: {0}")]
    Malformed(String),
}
