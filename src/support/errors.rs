//! Error taxonomy
//!
//! Each enum below is one of the kinds named in the design: errors are
//! grouped by where they surface, not by which module raises them.
//! `SimError` is the union used at the boundaries (CLI, supervisor
//! command loop) that need a single type.

use thiserror::Error;

/// Bad command argument, invalid JSON on the local channel, unknown command.
/// Returned as `{ok:false, error}` on the originating request; never logged
/// above debug.
#[derive(Debug, Error, Clone)]
pub enum InputError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Command issued in an incompatible state. Surfaced the same way as
/// `InputError`, but recorded in state history at WARNING.
#[derive(Debug, Error, Clone)]
pub enum PreconditionError {
    #[error("connector {0} not found")]
    ConnectorNotFound(u32),

    #[error("connector {0} is not Available")]
    ConnectorNotAvailable(u32),

    #[error("connector {0} is Inoperative")]
    ConnectorInoperative(u32),

    #[error("connector {0} has no active transaction")]
    NoActiveTransaction(u32),

    #[error("connector {0} already has an active transaction")]
    TransactionAlreadyActive(u32),

    #[error("charge point is not Available (status = {0})")]
    ChargePointNotAvailable(String),

    #[error("heartbeat timer is already running")]
    HeartbeatAlreadyRunning,
}

/// Malformed OCPP frame, duplicate messageId, unexpected CallResult.
/// Logged at ERROR; never propagates past the message engine.
#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("CallResult/CallError for unknown message id {0}")]
    UnknownMessageId(String),

    #[error("duplicate message id {0}; earlier pending call rejected")]
    DuplicateMessageId(String),
}

/// Connection refused, closed mid-flight, write failed. All pending calls
/// reject with `TransportLost`; the charge point moves to Unavailable.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send backpressure exceeded")]
    Backpressure,

    #[error("transport lost: {0}")]
    TransportLost(String),
}

/// Action node threw, or a Wait timed out without a `timedOut` edge.
/// The executor transitions to `failed` and is removed from the running set.
#[derive(Debug, Error, Clone)]
pub enum ScenarioError {
    #[error("scenario {0} not found")]
    NotFound(String),

    #[error("node {0} not found in scenario graph")]
    NodeNotFound(String),

    #[error("action {action} failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("wait timed out with no `timedOut` edge")]
    WaitTimedOutNoEdge,

    #[error("scenario already running")]
    AlreadyRunning,
}

/// Cannot bind the control socket, PID collision, failure to read a
/// scenario file at startup. The only kind that ever terminates the
/// process — surfaced to stderr, exit code per §6.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("another supervisor is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to bind control socket at {path}: {source}")]
    BindFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read scenario file {path}: {source}")]
    ScenarioFileUnreadable {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error union for boundaries that need exactly one type.
#[derive(Debug, Error, Clone)]
pub enum SimError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

pub type SimResult<T> = Result<T, SimError>;
