//! # runlet-server
//!
//! The execution backend of runlet: an axum WebSocket server that accepts
//! raw source text as submissions, executes each through a configurable
//! runner command in an isolated scratch directory, and streams typed
//! frames back to the client.
//!
//! - [`config`]: server configuration
//! - [`runner`]: the seam between "I have source text" and "a child process
//!   is producing bytes"
//! - [`executor`]: drives one run, chunking stdout, streaming stderr, and
//!   enforcing the kill timeout
//! - [`connection`]: per-client WebSocket session loop with heartbeat
//! - [`server`]: router, health and metrics endpoints, listener

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod executor;
pub mod runner;
pub mod server;

pub use config::ServerConfig;
pub use executor::Executor;
pub use runner::{CommandRunner, Runner, RunningChild};
pub use server::RunletServer;
