//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the runlet server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Runner argv template; `{file}` is replaced with the staged source
    /// path, or the path is appended when the placeholder is absent.
    pub runner: Vec<String>,
    /// File name the submitted source is staged under inside the scratch
    /// directory.
    pub source_file: String,
    /// Kill runs that exceed this many seconds.
    pub timeout_secs: u64,
    /// Largest accepted submission, in bytes.
    pub max_source_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            runner: vec!["go".into(), "run".into(), "{file}".into()],
            source_file: "main.go".into(),
            timeout_secs: 120,
            max_source_bytes: 1024 * 1024, // 1 MB
        }
    }
}
