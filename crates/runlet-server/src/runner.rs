//! Runner seam: turn submitted source text into a spawned child process.
//!
//! The execution pipeline only needs "a child with piped stdout/stderr";
//! everything about *how* the source runs sits behind [`Runner`] so tests
//! can inject trivial commands and operators can choose the sandbox policy.

use std::process::Stdio;

use async_trait::async_trait;

use runlet_core::errors::ExecError;

/// A spawned run and the scratch resources backing it.
#[derive(Debug)]
pub struct RunningChild {
    /// The runner process, with stdout and stderr piped and
    /// kill-on-drop set.
    pub child: tokio::process::Child,
    /// Scratch directory for the run; removed when dropped.
    pub workdir: Option<tempfile::TempDir>,
}

/// Spawns a child process executing submitted source text.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Spawn a child executing `source`, with stdout and stderr piped.
    async fn spawn(&self, source: &str) -> Result<RunningChild, ExecError>;
}

/// Executes source through a configured argv template.
///
/// The source is staged into a fresh temp directory under `source_file`,
/// `{file}` in the argv is replaced with the staged path (appended when the
/// placeholder is absent), and the child runs with the scratch directory as
/// its working directory.
pub struct CommandRunner {
    argv: Vec<String>,
    source_file: String,
}

impl CommandRunner {
    /// A runner for the given argv template and staged file name.
    #[must_use]
    pub fn new(argv: Vec<String>, source_file: impl Into<String>) -> Self {
        Self {
            argv,
            source_file: source_file.into(),
        }
    }
}

#[async_trait]
impl Runner for CommandRunner {
    async fn spawn(&self, source: &str) -> Result<RunningChild, ExecError> {
        if self.argv.is_empty() {
            return Err(ExecError::Spawn("runner argv is empty".into()));
        }

        let workdir = tempfile::Builder::new()
            .prefix("runlet-")
            .tempdir()
            .map_err(|err| ExecError::Stage(err.to_string()))?;
        let source_path = workdir.path().join(&self.source_file);
        tokio::fs::write(&source_path, source)
            .await
            .map_err(|err| ExecError::Stage(err.to_string()))?;

        let staged = source_path.display().to_string();
        let mut argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace("{file}", &staged))
            .collect();
        if !self.argv.iter().any(|arg| arg.contains("{file}")) {
            argv.push(staged);
        }

        let mut command = tokio::process::Command::new(&argv[0]);
        let _ = command
            .args(&argv[1..])
            .current_dir(workdir.path())
            // Toolchain caches stay inside the scratch dir so runs cannot
            // pollute each other (matters for the default Go runner).
            .env("GOCACHE", workdir.path().join("go-cache"))
            .env("GOPATH", workdir.path().join("go-path"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|err| ExecError::Spawn(err.to_string()))?;
        tracing::debug!(program = %argv[0], "runner spawned");

        Ok(RunningChild {
            child,
            workdir: Some(workdir),
        })
    }
}
