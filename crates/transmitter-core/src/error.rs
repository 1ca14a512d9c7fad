use std::io;
use thiserror::Error;

use crate::transmitter::SendFailureReason;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving a destination or sending a message
#[derive(Error, Debug)]
pub enum Error {
    /// Conflicting or invalid configuration, e.g. `sips` together with `transport=udp`.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A URI or header value could not be parsed.
    #[error("Malformed URI: {0}")]
    MalformedUri(String),

    /// A response without a top Via header cannot be routed.
    #[error("Response has no Via header")]
    MissingVia,

    /// The next hop carries no host part.
    #[error("Missing host in {0}")]
    MissingHost(String),

    /// Address scheme the engine cannot route and nobody converted.
    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),

    /// Every resolution strategy has been exhausted.
    #[error("Destination could not be resolved: {0}")]
    ResolutionFailed(String),

    /// Buffer or queue exhaustion while preparing a send.
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    /// Send-time network failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Connection-oriented transport failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The operation is not allowed in the current state.
    #[error("Illegal action: {0}")]
    IllegalAction(String),

    /// The transmitter was terminated while the operation ran.
    #[error("Transmitter terminated")]
    Terminated,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal channel error (e.g., receiver dropped).
    #[error("Internal channel closed")]
    ChannelClosed,

    /// Other miscellaneous errors.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Reason reported with `MSG_SEND_FAILURE` when this error ends a send attempt.
    pub fn send_failure_reason(&self) -> SendFailureReason {
        match self {
            Error::Network(_) | Error::ResolutionFailed(_) | Error::Io(_) => {
                SendFailureReason::NetworkError
            }
            Error::Connection(_) => SendFailureReason::ConnectionError,
            Error::OutOfResources(_) => SendFailureReason::OutOfResources,
            _ => SendFailureReason::Undefined,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}
