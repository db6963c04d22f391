//! One execution of a route executable for one request

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::communication::io::CapturedOutput;
use crate::error::{ErrorKind, InvocationId};
use crate::utils::logging;

/// Lifecycle of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    Idle,
    Spawning,
    WritingInput,
    AwaitingExit,
    ReadingOutput,
    Completed,
    Failed,
    TimedOut,
}

impl InvocationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::WritingInput => "writing_input",
            Self::AwaitingExit => "awaiting_exit",
            Self::ReadingOutput => "reading_output",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: Self) -> bool {
        use InvocationState::*;

        match (self, next) {
            (Idle, Spawning) | (Idle, Failed) => true,
            (Spawning, WritingInput) | (Spawning, Failed) => true,
            (WritingInput, AwaitingExit) | (WritingInput, Failed) | (WritingInput, TimedOut) => true,
            (AwaitingExit, ReadingOutput) | (AwaitingExit, Failed) | (AwaitingExit, TimedOut) => true,
            (ReadingOutput, Completed) | (ReadingOutput, Failed) | (ReadingOutput, TimedOut) => true,
            _ => false,
        }
    }
}

/// Terminal outcome of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A valid response was produced
    Completed { status: u16 },

    /// The invocation failed with the given kind
    Failed(ErrorKind),
}

impl Outcome {
    /// Stable tag for logs and statistics
    pub fn tag(self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed(kind) => kind.as_str(),
        }
    }

    /// HTTP status this outcome produces
    pub fn status_code(self) -> u16 {
        match self {
            Self::Completed { status } => status,
            Self::Failed(kind) => kind.status_code(),
        }
    }

    fn terminal_state(self) -> InvocationState {
        match self {
            Self::Completed { .. } => InvocationState::Completed,
            Self::Failed(ErrorKind::ProcessTimeout) => InvocationState::TimedOut,
            Self::Failed(_) => InvocationState::Failed,
        }
    }
}

/// Ephemeral record of one execution, owned by the executor for one request.
///
/// Dropping an unfinished invocation (for example when the client goes away)
/// kills the child.
#[derive(Debug)]
pub struct ProcessInvocation {
    id: InvocationId,
    route_path: String,
    executable: PathBuf,
    started_at: DateTime<Utc>,
    start: Instant,
    state: InvocationState,
    child: Option<Child>,
    process_group: Option<u32>,
    stdout: CapturedOutput,
    stderr: CapturedOutput,
    exit_status: Option<ExitStatus>,
    outcome: Option<Outcome>,
}

impl ProcessInvocation {
    pub fn new(id: InvocationId, route_path: &str, executable: &Path) -> Self {
        Self {
            id,
            route_path: route_path.to_string(),
            executable: executable.to_path_buf(),
            started_at: Utc::now(),
            start: Instant::now(),
            state: InvocationState::Idle,
            child: None,
            process_group: None,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            exit_status: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    pub fn route_path(&self) -> &str {
        &self.route_path
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn stdout(&self) -> &CapturedOutput {
        &self.stdout
    }

    pub fn stderr(&self) -> &CapturedOutput {
        &self.stderr
    }

    /// OS process id of the child, while it is attached
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Move to the next non-terminal state
    pub fn transition(&mut self, next: InvocationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid invocation transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        logging::log_invocation_state(self.id, &self.route_path, next.as_str());
    }

    /// Take ownership of a spawned child that leads its own process group
    pub(crate) fn attach(&mut self, child: Child) {
        self.process_group = child.id();
        self.child = Some(child);
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub(crate) fn record_output(&mut self, status: ExitStatus, stdout: CapturedOutput, stderr: CapturedOutput) {
        self.exit_status = Some(status);
        self.stdout = stdout;
        self.stderr = stderr;
    }

    /// Kill the child if it is still running and reap it
    pub async fn terminate(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if child.id().is_none() {
            // Reaped already; the group id may belong to someone else by now
            self.process_group = None;
        }

        kill_process_group(self.id, self.process_group);
        if let Err(e) = child.start_kill() {
            // Already exited
            debug!(target: "exec_router::executor", invocation_id = %self.id, "Kill skipped: {}", e);
        }
        match child.wait().await {
            Ok(status) => self.exit_status = Some(status),
            Err(e) => warn!(
                target: "exec_router::executor",
                invocation_id = %self.id,
                "Failed to reap terminated child: {}",
                e
            ),
        }
    }

    /// Record the terminal outcome
    pub fn finish(&mut self, outcome: Outcome) {
        let terminal = outcome.terminal_state();
        self.transition(terminal);
        self.outcome = Some(outcome);
        self.child = None;
    }
}

impl Drop for ProcessInvocation {
    fn drop(&mut self) {
        if self.outcome.is_some() {
            return;
        }

        if let Some(child) = self.child.as_mut() {
            warn!(
                target: "exec_router::executor",
                invocation_id = %self.id,
                route = %self.route_path,
                state = self.state.as_str(),
                elapsed_ms = self.start.elapsed().as_millis() as u64,
                "Invocation abandoned before completion; terminating child"
            );
            if child.id().is_some() {
                kill_process_group(self.id, self.process_group);
            }
            let _ = child.start_kill();
        }
    }
}

/// SIGKILL every process in the child's group, so descendants of a shell
/// route die with it
#[cfg(unix)]
fn kill_process_group(id: InvocationId, group: Option<u32>) {
    let Some(group) = group.and_then(|g| libc::pid_t::try_from(g).ok()) else {
        return;
    };

    // SAFETY: kill(2) has no memory effects; a negative pid addresses the group
    if unsafe { libc::kill(-group, libc::SIGKILL) } != 0 {
        debug!(
            target: "exec_router::executor",
            invocation_id = %id,
            "Process group kill skipped: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_id: InvocationId, _group: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use InvocationState::*;

        assert!(Idle.can_transition_to(Spawning));
        assert!(Spawning.can_transition_to(Failed));
        assert!(AwaitingExit.can_transition_to(TimedOut));
        assert!(ReadingOutput.can_transition_to(Completed));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Spawning));
        assert!(!Spawning.can_transition_to(TimedOut));
        assert!(TimedOut.is_terminal());
    }

    #[test]
    fn test_outcome_status_mapping() {
        assert_eq!(Outcome::Completed { status: 201 }.status_code(), 201);
        assert_eq!(Outcome::Failed(ErrorKind::ProcessTimeout).status_code(), 504);
        assert_eq!(Outcome::Failed(ErrorKind::MalformedOutput).status_code(), 502);
        assert_eq!(Outcome::Failed(ErrorKind::NonZeroExit).tag(), "non_zero_exit");
    }

    #[test]
    fn test_finish_sets_terminal_state() {
        let mut invocation = ProcessInvocation::new(InvocationId::new_v4(), "/slow", Path::new("/site/slow"));
        invocation.transition(InvocationState::Spawning);
        invocation.transition(InvocationState::WritingInput);
        invocation.transition(InvocationState::AwaitingExit);
        invocation.finish(Outcome::Failed(ErrorKind::ProcessTimeout));

        assert_eq!(invocation.state(), InvocationState::TimedOut);
        assert_eq!(invocation.outcome(), Some(Outcome::Failed(ErrorKind::ProcessTimeout)));
        assert!(invocation.pid().is_none());
    }
}
