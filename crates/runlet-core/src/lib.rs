//! # runlet-core
//!
//! Foundation types for the runlet run-session protocol.
//!
//! This crate provides the shared vocabulary the client and server crates
//! depend on:
//!
//! - **Protocol frames**: the typed backend-to-client envelope
//!   (`output` / `error` / `clear` / `done`) and its encode/decode rules
//! - **Run session**: the pure state machine tracking `Idle` / `Running` /
//!   `Closed` and the accumulated output buffer
//! - **Errors**: the `RunletError` hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber initialization for binaries
//!
//! Nothing in this crate performs I/O; the state machine is driven entirely
//! by values, which is what makes it testable without a live connection.

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod protocol;
pub mod session;

pub use errors::{ExecError, ProtocolError, RunletError, SubmitError, TransportError};
pub use protocol::{RunStatus, ServerFrame};
pub use session::{Applied, RunSession, SessionState};
