//! The run session state machine.
//!
//! One [`RunSession`] tracks one logical run lifecycle on one channel:
//! whether a run is outstanding, and the output accumulated so far. It is a
//! pure value type; the owning event loop feeds it local calls and inbound
//! frames in a single total order, which is what makes the machine
//! deterministic.
//!
//! Transition table:
//!
//! | Current | Event | Next | Effect |
//! |---|---|---|---|
//! | Idle | `begin_run` | Running | caller sends the submit frame |
//! | Running | `begin_run` | Running | rejected with `AlreadyRunning` |
//! | Closed | `begin_run` | Closed | rejected with `NotConnected` |
//! | Running | `output` / `error` frame | Running | payload appended |
//! | any | `clear` frame | unchanged | output buffer emptied |
//! | Running | `done` frame | Idle | run finalized |
//! | any | `channel_closed` | Closed | finalized abnormally |
//!
//! `clear` is a side effect, not a transition: output chunks that arrive
//! after a clear append to the now-empty buffer. Output, error, and done
//! frames that arrive while no run is outstanding belong to no run and are
//! ignored.

use std::time::Instant;

use crate::errors::SubmitError;
use crate::protocol::{RunStatus, ServerFrame};

/// Lifecycle state of a run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No run outstanding.
    Idle,
    /// A submit has been sent and no terminal frame has arrived.
    Running,
    /// The channel is gone; the session is dead.
    Closed,
}

impl SessionState {
    /// Lowercase name, for logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Closed => "closed",
        }
    }
}

/// What applying one inbound frame did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The rendered text was appended to the output buffer.
    Appended(String),
    /// The output buffer was reset to empty.
    Cleared,
    /// The active run finished; the session is idle again.
    Finished(RunStatus),
    /// The frame belonged to no active run and was dropped.
    Ignored,
}

/// Per-channel run session: state machine plus accumulated output.
#[derive(Debug)]
pub struct RunSession {
    state: SessionState,
    output: String,
    last_activity: Instant,
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSession {
    /// A fresh idle session with empty output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            output: String::new(),
            last_activity: Instant::now(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a run is outstanding.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// The accumulated output for the current view.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// When the session last changed.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Gate a submission.
    ///
    /// On `Ok` the session is `Running` and the caller must send exactly one
    /// submit frame. On `Err` nothing may be sent.
    pub fn begin_run(&mut self) -> Result<(), SubmitError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Running;
                self.touch();
                Ok(())
            }
            SessionState::Running => Err(SubmitError::AlreadyRunning),
            SessionState::Closed => Err(SubmitError::NotConnected),
        }
    }

    /// Apply one inbound frame, in arrival order.
    ///
    /// Returns what changed so the owner can mirror the effect to its sink.
    pub fn apply(&mut self, frame: &ServerFrame) -> Applied {
        match frame {
            ServerFrame::Clear => {
                self.output.clear();
                self.touch();
                Applied::Cleared
            }
            ServerFrame::Output { data } if self.is_running() => {
                self.output.push_str(data);
                self.touch();
                Applied::Appended(data.clone())
            }
            ServerFrame::Error { data } if self.is_running() => {
                let rendered = format!("Error: {data}\n");
                self.output.push_str(&rendered);
                self.touch();
                Applied::Appended(rendered)
            }
            ServerFrame::Done { data } if self.is_running() => {
                self.state = SessionState::Idle;
                self.touch();
                Applied::Finished(RunStatus::parse(data))
            }
            other => {
                tracing::debug!(
                    kind = other.kind(),
                    state = self.state.as_str(),
                    "dropping frame with no active run"
                );
                Applied::Ignored
            }
        }
    }

    /// Locally reset the output buffer. Always succeeds, in any state.
    pub fn clear(&mut self) {
        self.output.clear();
        self.touch();
    }

    /// Explicit session reset of the accumulated output.
    ///
    /// Same buffer effect as [`Self::clear`]; kept separate so call sites
    /// read as lifecycle management rather than a user action.
    pub fn reset_output(&mut self) {
        self.output.clear();
    }

    /// The channel closed or failed.
    ///
    /// Returns `true` on the first transition to `Closed` so the owner
    /// surfaces exactly one connectivity error, and `false` on repeats.
    pub fn channel_closed(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
