//! Wire frames for the run session protocol.
//!
//! The two directions are deliberately asymmetric:
//!
//! - **Client to backend**: the raw source text is the entire frame body.
//!   There is no envelope; an empty body is legal and executes as empty
//!   input. The protocol does not validate program contents.
//! - **Backend to client**: a self-describing JSON record with a `type` tag
//!   and a single text payload, modeled by [`ServerFrame`].
//!
//! Decoding is forward compatible: a frame whose `type` is unrecognized
//! fails with [`ProtocolError::UnknownKind`] and is dropped by the caller
//! without terminating the channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Frame kinds this implementation understands.
const KNOWN_KINDS: &[&str] = &["output", "error", "clear", "done"];

/// A backend-to-client protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// A chunk of program stdout. Appends to the displayed text.
    Output {
        /// The chunk text, in production order.
        data: String,
    },

    /// A chunk of program stderr, or a backend-reported failure.
    ///
    /// Rendered by clients as `"Error: " + data + "\n"`; treated as ordinary
    /// streamed output, not a protocol failure.
    Error {
        /// The error text, without trailing newline.
        data: String,
    },

    /// Reset the displayed text to empty.
    Clear,

    /// Terminal frame: the active run finished.
    Done {
        /// Textual run status, e.g. `"exit 0"` or `"timeout"`.
        #[serde(default)]
        data: String,
    },
}

impl ServerFrame {
    /// An `output` frame.
    #[must_use]
    pub fn output(data: impl Into<String>) -> Self {
        Self::Output { data: data.into() }
    }

    /// An `error` frame.
    #[must_use]
    pub fn error(data: impl Into<String>) -> Self {
        Self::Error { data: data.into() }
    }

    /// A `done` frame carrying the given status.
    #[must_use]
    pub fn done(status: &RunStatus) -> Self {
        Self::Done { data: status.to_string() }
    }

    /// Serialize to the wire representation.
    #[must_use]
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The frame's `type` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Error { .. } => "error",
            Self::Clear => "clear",
            Self::Done { .. } => "done",
        }
    }
}

/// Decode one inbound frame.
///
/// Distinguishes an unrecognized `type` tag from malformed JSON so callers
/// can log the two cases differently; both are dropped, neither is fatal.
pub fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => Ok(frame),
        Err(err) => {
            // A well-formed object with a foreign tag is an unknown kind,
            // anything else is malformed.
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) {
                    if !KNOWN_KINDS.contains(&kind) {
                        return Err(ProtocolError::UnknownKind { kind: kind.to_owned() });
                    }
                }
            }
            Err(ProtocolError::Malformed(err.to_string()))
        }
    }
}

/// Terminal status of a run, carried as the `done` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The process exited with a code.
    Exited(i32),
    /// The process was killed by the execution timeout.
    TimedOut,
    /// Any other terminal state (signal kill, unknown future statuses).
    Other(String),
}

impl RunStatus {
    /// Whether the run completed successfully.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Parse a status payload. Unrecognized text round-trips as [`Self::Other`].
    #[must_use]
    pub fn parse(data: &str) -> Self {
        if data == "timeout" {
            return Self::TimedOut;
        }
        if let Some(code) = data.strip_prefix("exit ") {
            if let Ok(code) = code.parse::<i32>() {
                return Self::Exited(code);
            }
        }
        Self::Other(data.to_owned())
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {code}"),
            Self::TimedOut => write!(f, "timeout"),
            Self::Other(text) => write!(f, "{text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn output_frame_wire_shape() {
        let frame = ServerFrame::output("1\n");
        assert_eq!(frame.encode(), r#"{"type":"output","data":"1\n"}"#);
    }

    #[test]
    fn error_frame_wire_shape() {
        let frame = ServerFrame::error("boom");
        assert_eq!(frame.encode(), r#"{"type":"error","data":"boom"}"#);
    }

    #[test]
    fn clear_frame_has_no_payload() {
        assert_eq!(ServerFrame::Clear.encode(), r#"{"type":"clear"}"#);
    }

    #[test]
    fn done_frame_carries_status() {
        let frame = ServerFrame::done(&RunStatus::Exited(0));
        assert_eq!(frame.encode(), r#"{"type":"done","data":"exit 0"}"#);
    }

    #[test]
    fn decode_output() {
        let frame = decode(r#"{"type":"output","data":"hello"}"#).unwrap();
        assert_eq!(frame, ServerFrame::output("hello"));
    }

    #[test]
    fn decode_clear_without_data() {
        let frame = decode(r#"{"type":"clear"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Clear);
    }

    #[test]
    fn decode_clear_ignores_stray_payload() {
        let frame = decode(r#"{"type":"clear","data":"ignored"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Clear);
    }

    #[test]
    fn decode_done_without_data_defaults_empty() {
        let frame = decode(r#"{"type":"done"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Done { data: String::new() });
    }

    #[test]
    fn decode_unknown_kind_is_distinct() {
        let err = decode(r#"{"type":"telemetry","data":"x"}"#).unwrap_err();
        assert_matches!(err, ProtocolError::UnknownKind { kind } if kind == "telemetry");
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let err = decode("not json at all").unwrap_err();
        assert_matches!(err, ProtocolError::Malformed(_));
    }

    #[test]
    fn decode_missing_data_on_output_is_malformed() {
        let err = decode(r#"{"type":"output"}"#).unwrap_err();
        assert_matches!(err, ProtocolError::Malformed(_));
    }

    #[test]
    fn decode_untagged_object_is_malformed() {
        let err = decode(r#"{"data":"x"}"#).unwrap_err();
        assert_matches!(err, ProtocolError::Malformed(_));
    }

    #[test]
    fn kind_names_match_wire_tags() {
        assert_eq!(ServerFrame::output("").kind(), "output");
        assert_eq!(ServerFrame::error("").kind(), "error");
        assert_eq!(ServerFrame::Clear.kind(), "clear");
        assert_eq!(ServerFrame::done(&RunStatus::TimedOut).kind(), "done");
        for frame in [
            ServerFrame::output(""),
            ServerFrame::error(""),
            ServerFrame::Clear,
            ServerFrame::Done { data: String::new() },
        ] {
            assert!(KNOWN_KINDS.contains(&frame.kind()));
        }
    }

    #[test]
    fn empty_submit_is_legal_output_payload() {
        // The protocol never validates program contents; an empty payload
        // decodes like any other.
        let frame = decode(r#"{"type":"output","data":""}"#).unwrap();
        assert_eq!(frame, ServerFrame::output(""));
    }

    #[test]
    fn run_status_display_parse_round_trip() {
        for status in [
            RunStatus::Exited(0),
            RunStatus::Exited(3),
            RunStatus::Exited(-1),
            RunStatus::TimedOut,
            RunStatus::Other("terminated".into()),
        ] {
            assert_eq!(RunStatus::parse(&status.to_string()), status);
        }
    }

    #[test]
    fn run_status_success_only_on_exit_zero() {
        assert!(RunStatus::Exited(0).success());
        assert!(!RunStatus::Exited(1).success());
        assert!(!RunStatus::TimedOut.success());
        assert!(!RunStatus::Other("exit zero".into()).success());
    }

    #[test]
    fn run_status_unknown_text_round_trips_as_other() {
        let status = RunStatus::parse("oomkilled");
        assert_eq!(status, RunStatus::Other("oomkilled".into()));
        assert_eq!(status.to_string(), "oomkilled");
    }
}
