//! Drives one run: spawn, stream, timeout, terminal status.
//!
//! The executor turns a submission into an ordered stream of protocol
//! frames. stdout is chunked on newlines and a size threshold, with the
//! form-feed character translated into a `clear` frame (flushing pending
//! text first); stderr streams line-by-line as `error` frames. Every run
//! terminates with exactly one `done` frame, whatever went wrong.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;

use runlet_core::errors::ExecError;
use runlet_core::protocol::{RunStatus, ServerFrame};

use crate::runner::{Runner, RunningChild};

/// The clear-screen character in program output.
const FORM_FEED: u8 = 0x0c;

/// Flush pending stdout once this many bytes accumulate without a newline.
const FLUSH_THRESHOLD: usize = 1024;

/// How long to keep draining the pipes after the child is gone. Orphaned
/// grandchildren can hold the write ends open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Executes submissions through a [`Runner`] and streams frames back.
pub struct Executor {
    runner: Arc<dyn Runner>,
    timeout: Duration,
}

impl Executor {
    /// An executor over `runner` with the given kill deadline.
    #[must_use]
    pub fn new(runner: Arc<dyn Runner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Execute `source`, streaming frames into `tx` in production order.
    ///
    /// The stream always ends with a `done` frame. Dropping the returned
    /// future kills the child (the runner sets kill-on-drop).
    pub async fn run(&self, source: &str, tx: mpsc::Sender<ServerFrame>) {
        let spawned = match self.runner.spawn(source).await {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "run failed to start");
                let _ = tx.send(ServerFrame::error(err.to_string())).await;
                let _ = tx
                    .send(ServerFrame::done(&RunStatus::Other("failed to start".into())))
                    .await;
                return;
            }
        };
        let RunningChild { mut child, workdir } = spawned;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let err = ExecError::Pipe("stdout/stderr not piped".into());
            tracing::error!(code = err.code(), "runner broke the pipe contract");
            let _ = tx.send(ServerFrame::error(err.to_string())).await;
            let _ = tx
                .send(ServerFrame::done(&RunStatus::Other("failed to start".into())))
                .await;
            return;
        };

        let out_task = tokio::spawn(stream_stdout(stdout, tx.clone()));
        let err_task = tokio::spawn(stream_stderr(stderr, tx.clone()));

        let status = tokio::time::timeout(self.timeout, child.wait()).await;
        let timed_out = status.is_err();
        if timed_out {
            tracing::info!(timeout_secs = self.timeout.as_secs(), "run exceeded deadline, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        // Drain both pipes before the terminal frame so in-flight output
        // lands ahead of finalization. The drain is bounded: a grandchild
        // that inherited the pipes could otherwise keep them open forever.
        let out_abort = out_task.abort_handle();
        let err_abort = err_task.abort_handle();
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = out_task.await;
            let _ = err_task.await;
        })
        .await;
        if drained.is_err() {
            tracing::debug!("pipe drain exceeded grace period, abandoning readers");
            out_abort.abort();
            err_abort.abort();
        }

        let final_status = match status {
            Err(_) => {
                let _ = tx
                    .send(ServerFrame::error(format!(
                        "execution timed out after {}s, terminated",
                        self.timeout.as_secs()
                    )))
                    .await;
                RunStatus::TimedOut
            }
            Ok(Ok(exit)) => match exit.code() {
                Some(code) => RunStatus::Exited(code),
                None => RunStatus::Other("terminated by signal".into()),
            },
            Ok(Err(err)) => {
                let _ = tx
                    .send(ServerFrame::error(format!("failed to reap runner: {err}")))
                    .await;
                RunStatus::Other("wait failed".into())
            }
        };

        tracing::debug!(status = %final_status, "run finished");
        let _ = tx.send(ServerFrame::done(&final_status)).await;

        // The scratch dir outlives the child by construction.
        drop(workdir);
    }
}

async fn stream_stdout(mut stdout: ChildStdout, tx: mpsc::Sender<ServerFrame>) {
    let mut splitter = ChunkSplitter::new(FLUSH_THRESHOLD);
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for chunk in splitter.push(&buf[..n]) {
                    let frame = match chunk {
                        Chunk::Text(text) => ServerFrame::output(text),
                        Chunk::Clear => ServerFrame::Clear,
                    };
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "stdout read ended");
                break;
            }
        }
    }
    if let Some(Chunk::Text(text)) = splitter.finish() {
        let _ = tx.send(ServerFrame::output(text)).await;
    }
}

async fn stream_stderr(stderr: ChildStderr, tx: mpsc::Sender<ServerFrame>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(ServerFrame::error(line)).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "stderr read ended");
                break;
            }
        }
    }
}

/// One piece of chunked stdout.
#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    /// Text ready to stream.
    Text(String),
    /// A form feed was seen; the display should reset.
    Clear,
}

/// Splits a byte stream into streamable chunks.
///
/// Text flushes on newline, on the size threshold, and at end of stream; a
/// form feed flushes pending text and then yields [`Chunk::Clear`].
/// Threshold flushes cut at a UTF-8 boundary so multi-byte characters never
/// split across frames.
struct ChunkSplitter {
    pending: Vec<u8>,
    flush_at: usize,
}

impl ChunkSplitter {
    fn new(flush_at: usize) -> Self {
        Self {
            pending: Vec::new(),
            flush_at,
        }
    }

    /// Feed bytes; returns the chunks that became ready, in order.
    fn push(&mut self, bytes: &[u8]) -> Vec<Chunk> {
        let mut out = Vec::new();
        for &byte in bytes {
            if byte == FORM_FEED {
                if !self.pending.is_empty() {
                    out.push(Chunk::Text(self.drain_all()));
                }
                out.push(Chunk::Clear);
            } else {
                self.pending.push(byte);
                if byte == b'\n' {
                    out.push(Chunk::Text(self.drain_all()));
                } else if self.pending.len() >= self.flush_at {
                    if let Some(text) = self.drain_at_char_boundary() {
                        out.push(Chunk::Text(text));
                    }
                }
            }
        }
        out
    }

    /// Flush any remainder at end of stream.
    fn finish(&mut self) -> Option<Chunk> {
        if self.pending.is_empty() {
            None
        } else {
            Some(Chunk::Text(self.drain_all()))
        }
    }

    fn drain_all(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }

    /// Drain up to the last complete UTF-8 character, keeping a trailing
    /// partial sequence pending for the next push.
    fn drain_at_char_boundary(&mut self) -> Option<String> {
        match std::str::from_utf8(&self.pending) {
            Ok(_) => Some(self.drain_all()),
            Err(err) => {
                let valid = err.valid_up_to();
                if valid == 0 {
                    // Not UTF-8 at all (a char prefix is at most 4 bytes);
                    // flush lossily rather than buffer forever.
                    if self.pending.len() >= 4 {
                        Some(self.drain_all())
                    } else {
                        None
                    }
                } else {
                    let tail = self.pending.split_off(valid);
                    let text = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending = tail;
                    Some(text)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandRunner;

    // -- ChunkSplitter --

    #[test]
    fn flushes_on_newline() {
        let mut splitter = ChunkSplitter::new(1024);
        let chunks = splitter.push(b"one\ntwo\npartial");
        assert_eq!(
            chunks,
            vec![Chunk::Text("one\n".into()), Chunk::Text("two\n".into())]
        );
        assert_eq!(splitter.finish(), Some(Chunk::Text("partial".into())));
    }

    #[test]
    fn form_feed_flushes_then_clears() {
        let mut splitter = ChunkSplitter::new(1024);
        let chunks = splitter.push(b"before\x0cafter\n");
        assert_eq!(
            chunks,
            vec![
                Chunk::Text("before".into()),
                Chunk::Clear,
                Chunk::Text("after\n".into()),
            ]
        );
    }

    #[test]
    fn form_feed_with_empty_pending_emits_only_clear() {
        let mut splitter = ChunkSplitter::new(1024);
        assert_eq!(splitter.push(b"\x0c"), vec![Chunk::Clear]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn flushes_at_size_threshold() {
        let mut splitter = ChunkSplitter::new(8);
        let chunks = splitter.push(b"abcdefghij");
        assert_eq!(chunks, vec![Chunk::Text("abcdefgh".into())]);
        assert_eq!(splitter.finish(), Some(Chunk::Text("ij".into())));
    }

    #[test]
    fn threshold_flush_respects_utf8_boundaries() {
        // "é" is two bytes; place its first byte exactly at the threshold.
        let mut splitter = ChunkSplitter::new(4);
        let bytes = "abcé".as_bytes(); // a b c 0xC3 0xA9
        let chunks = splitter.push(&bytes[..4]);
        assert_eq!(chunks, vec![Chunk::Text("abc".into())]);
        let chunks = splitter.push(&bytes[4..]);
        assert!(chunks.is_empty());
        assert_eq!(splitter.finish(), Some(Chunk::Text("é".into())));
    }

    #[test]
    fn split_pushes_reassemble() {
        let mut splitter = ChunkSplitter::new(1024);
        assert!(splitter.push(b"hel").is_empty());
        let chunks = splitter.push(b"lo\n");
        assert_eq!(chunks, vec![Chunk::Text("hello\n".into())]);
    }

    #[test]
    fn non_utf8_data_flushes_lossily() {
        let mut splitter = ChunkSplitter::new(2);
        let chunks = splitter.push(&[0xff, 0xfe, 0xfd, 0xfc]);
        assert!(!chunks.is_empty());
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn finish_on_empty_is_none() {
        let mut splitter = ChunkSplitter::new(1024);
        assert_eq!(splitter.finish(), None);
    }

    // -- Executor against real processes --

    fn sh_executor(timeout: Duration) -> Executor {
        let runner = Arc::new(CommandRunner::new(
            vec!["sh".into(), "{file}".into()],
            "run.sh",
        ));
        Executor::new(runner, timeout)
    }

    async fn collect_frames(source: &str, timeout: Duration) -> Vec<ServerFrame> {
        let executor = sh_executor(timeout);
        let (tx, mut rx) = mpsc::channel(64);
        executor.run(source, tx).await;
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn streams_stdout_and_terminates_with_done() {
        let frames = collect_frames("echo hello", Duration::from_secs(10)).await;
        assert_eq!(
            frames,
            vec![
                ServerFrame::output("hello\n"),
                ServerFrame::done(&RunStatus::Exited(0)),
            ]
        );
    }

    #[tokio::test]
    async fn stderr_streams_as_error_frames() {
        let frames = collect_frames("echo oops 1>&2; exit 3", Duration::from_secs(10)).await;
        assert!(frames.contains(&ServerFrame::error("oops")));
        assert_eq!(
            frames.last(),
            Some(&ServerFrame::done(&RunStatus::Exited(3)))
        );
    }

    #[tokio::test]
    async fn form_feed_in_output_becomes_clear_frame() {
        let frames = collect_frames(
            "printf 'a\\nb'; printf '\\f'; echo after",
            Duration::from_secs(10),
        )
        .await;
        assert_eq!(
            frames,
            vec![
                ServerFrame::output("a\n"),
                ServerFrame::output("b"),
                ServerFrame::Clear,
                ServerFrame::output("after\n"),
                ServerFrame::done(&RunStatus::Exited(0)),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_output_flushes_at_eof() {
        let frames = collect_frames("printf 'no newline'", Duration::from_secs(10)).await;
        assert_eq!(frames[0], ServerFrame::output("no newline"));
        assert_eq!(
            frames.last(),
            Some(&ServerFrame::done(&RunStatus::Exited(0)))
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_run() {
        let frames = collect_frames("sleep 30", Duration::from_millis(300)).await;
        assert!(
            frames
                .iter()
                .any(|f| matches!(f, ServerFrame::Error { data } if data.contains("timed out")))
        );
        assert_eq!(frames.last(), Some(&ServerFrame::done(&RunStatus::TimedOut)));
    }

    #[tokio::test]
    async fn spawn_failure_reports_error_then_done() {
        let runner = Arc::new(CommandRunner::new(
            vec!["runlet-test-no-such-binary".into(), "{file}".into()],
            "run.sh",
        ));
        let executor = Executor::new(runner, Duration::from_secs(5));
        let (tx, mut rx) = mpsc::channel(8);
        executor.run("echo hi", tx).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ServerFrame::Error { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            ServerFrame::done(&RunStatus::Other("failed to start".into()))
        );
        assert!(rx.recv().await.is_none());
    }
}
