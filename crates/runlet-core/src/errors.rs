//! Error hierarchy for runlet.
//!
//! Built on [`thiserror`]:
//!
//! - [`RunletError`]: top-level enum covering all error domains
//! - [`TransportError`]: channel lifecycle and send failures
//! - [`ProtocolError`]: undecodable or unrecognized frames
//! - [`SubmitError`]: local submission rejections, never wire traffic
//! - [`ExecError`]: backend-side staging and spawn failures
//!
//! The split mirrors the propagation policy: submit rejections and bad
//! frames are handled locally without tearing down the channel, while
//! transport failures require the caller to construct a fresh channel.

use thiserror::Error;

/// Top-level error type for runlet.
#[derive(Debug, Error)]
pub enum RunletError {
    /// Channel lifecycle or send failure.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Undecodable or unrecognized frame.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Local submission rejection.
    #[error("{0}")]
    Submit(#[from] SubmitError),

    /// Backend execution pipeline failure.
    #[error("{0}")]
    Exec(#[from] ExecError),
}

impl RunletError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::Submit(e) => e.code(),
            Self::Exec(e) => e.code(),
        }
    }
}

/// Transport channel failure.
///
/// Connectivity errors are surfaced to the caller and require a fresh
/// channel to recover; there is no automatic retry.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting to the backend failed.
    #[error("connect to {url} failed: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// Underlying failure description.
        reason: String,
    },

    /// A send was attempted on a channel that is not open.
    #[error("channel is not open ({state})")]
    NotOpen {
        /// Channel state at the time of the send.
        state: &'static str,
    },

    /// The send itself failed; the channel is now failed.
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "TRANSPORT_CONNECT_ERROR",
            Self::NotOpen { .. } => "TRANSPORT_NOT_OPEN",
            Self::Send(_) => "TRANSPORT_SEND_ERROR",
        }
    }
}

/// A frame that could not be decoded.
///
/// Protocol errors are logged and the frame dropped; they never terminate
/// the channel. Unknown kinds are kept distinct from malformed JSON so that
/// forward-compatible frames can be observed in logs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame carried a `type` tag this implementation does not know.
    #[error("unknown frame kind `{kind}`")]
    UnknownKind {
        /// The unrecognized tag value.
        kind: String,
    },

    /// The frame was not valid JSON or was missing required fields.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl ProtocolError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownKind { .. } => "PROTOCOL_UNKNOWN_KIND",
            Self::Malformed(_) => "PROTOCOL_MALFORMED_FRAME",
        }
    }
}

/// A submission that was rejected locally.
///
/// No wire traffic is produced for a rejected submit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// A run is already in flight on this session.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// The channel is not open.
    #[error("not connected")]
    NotConnected,
}

impl SubmitError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "SUBMIT_ALREADY_RUNNING",
            Self::NotConnected => "SUBMIT_NOT_CONNECTED",
        }
    }
}

/// Backend execution pipeline failure.
///
/// These are reported to the client as ordinary `error` frames rather than
/// protocol failures; the connection survives them.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Writing the source into the scratch directory failed.
    #[error("failed to stage source: {0}")]
    Stage(String),

    /// Spawning the runner process failed.
    #[error("failed to start runner: {0}")]
    Spawn(String),

    /// The runner's stdout or stderr pipe was unavailable.
    #[error("runner pipe unavailable: {0}")]
    Pipe(String),
}

impl ExecError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Stage(_) => "EXEC_STAGE_ERROR",
            Self::Spawn(_) => "EXEC_SPAWN_ERROR",
            Self::Pipe(_) => "EXEC_PIPE_ERROR",
        }
    }
}
