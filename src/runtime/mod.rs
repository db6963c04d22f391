//! Process execution runtime
//!
//! Each request runs its route executable as a fresh child process. The
//! encoded request is written to the child's standard input, standard output
//! is decoded into the response, and standard error is kept for diagnostics.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::communication::io::{drain_capped, read_capped, write_input, CapturedOutput};
use crate::communication::{encode_request, DecodeChain};
use crate::error::{InvocationId, Result, RouterError};
use crate::message::{Request, Response};
use crate::routing::RouteEntry;
use crate::security::{EnvironmentCapability, ResourceLimits};
use crate::utils::{join_path_list, truncate_for_log};

pub mod invocation;

pub use invocation::{InvocationState, Outcome, ProcessInvocation};

/// Maximum characters of standard error carried in an error value
const STDERR_IN_ERROR: usize = 2048;

/// Anything that turns a request into a response.
///
/// Implementations never fail: errors are already rendered as error
/// responses.
#[async_trait]
pub trait RouteInvoker: Send + Sync {
    async fn invoke(&self, request: Request) -> Response;
}

/// How the child finished inside the time limit
enum Exit {
    Finished {
        status: std::process::ExitStatus,
        stdout: CapturedOutput,
        stderr: CapturedOutput,
    },
    Overflow,
}

/// Runs route executables under resource limits
pub struct ProcessExecutor {
    limits: ResourceLimits,
    environment: EnvironmentCapability,
    decoders: Arc<DecodeChain>,
}

impl ProcessExecutor {
    /// Create an executor with the standard decode chain
    pub fn new(limits: ResourceLimits, environment: EnvironmentCapability) -> Self {
        Self {
            limits,
            environment,
            decoders: Arc::new(DecodeChain::standard()),
        }
    }

    /// Replace the decode chain
    pub fn with_decoders(mut self, decoders: DecodeChain) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn environment(&self) -> &EnvironmentCapability {
        &self.environment
    }

    /// Run the executable for one request.
    ///
    /// The child is always gone when this returns: it either exited on its
    /// own or was killed and reaped. Dropping the returned future kills it
    /// as well.
    pub async fn execute(&self, entry: &RouteEntry, request: &Request) -> Result<Response> {
        let mut invocation =
            ProcessInvocation::new(request.invocation_id(), &entry.route_path, &entry.executable);

        let result = self.drive(&mut invocation, entry, request).await;

        let outcome = match &result {
            Ok(response) => Outcome::Completed {
                status: response.status(),
            },
            Err(e) => Outcome::Failed(e.kind()),
        };
        invocation.finish(outcome);

        debug!(
            target: "exec_router::executor",
            invocation_id = %invocation.id(),
            route = %entry.route_path,
            outcome = outcome.tag(),
            elapsed_ms = invocation.elapsed().as_millis() as u64,
            "Invocation finished"
        );

        result
    }

    fn command(&self, entry: &RouteEntry, request: &Request) -> Command {
        let mut command = Command::new(&entry.executable);
        self.environment.apply(&mut command);

        command
            .env("ROUTE_METHOD", request.method().as_str())
            .env("ROUTE_PATH", request.path())
            .env("ROUTE_INVOCATION_ID", request.invocation_id().to_string());

        if let Some(context) = request.context() {
            command
                .env("ROUTE_STORAGE_PATH", context.storage_path())
                .env("ROUTE_RESOURCE_PATHS", join_path_list(context.resource_paths()));
        }

        if let Some(dir) = entry.executable.parent() {
            command.current_dir(dir);
        }

        // Own group, so a timeout can take the route's descendants down too
        #[cfg(unix)]
        command.process_group(0);

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
    }

    async fn drive(
        &self,
        invocation: &mut ProcessInvocation,
        entry: &RouteEntry,
        request: &Request,
    ) -> Result<Response> {
        let id = request.invocation_id();
        let payload = encode_request(request)?;

        invocation.transition(InvocationState::Spawning);
        let spawn_failure = |reason: String| RouterError::ProcessSpawnFailure {
            executable: entry.executable.clone(),
            reason,
            invocation_id: Some(id),
        };

        let mut child = self
            .command(entry, request)
            .spawn()
            .map_err(|e| spawn_failure(e.to_string()))?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(spawn_failure("standard streams were not captured".to_string())),
        };
        invocation.attach(child);

        debug!(
            target: "exec_router::executor",
            invocation_id = %id,
            route = %entry.route_path,
            pid = ?invocation.pid(),
            "Spawned route process"
        );

        let (overflow_tx, overflow_rx) = oneshot::channel();
        let mut overflow = overflow_rx.fuse();
        let mut stdout_task = tokio::spawn(read_capped(stdout, self.limits.max_output_bytes, overflow_tx));
        let mut stderr_task = tokio::spawn(drain_capped(stderr, self.limits.max_stderr_bytes));

        let timeout = self.limits.timeout;
        let exited = tokio::time::timeout(timeout, async {
            invocation.transition(InvocationState::WritingInput);
            let consumed = tokio::select! {
                biased;
                Ok(()) = &mut overflow => return Ok(Exit::Overflow),
                written = write_input(stdin, &payload) => written?,
            };
            if !consumed {
                debug!(target: "exec_router::executor", invocation_id = %id, "Process closed its input early");
            }

            invocation.transition(InvocationState::AwaitingExit);
            let child = invocation
                .child_mut()
                .ok_or_else(|| anyhow::anyhow!("child detached before exit"))?;
            let status = tokio::select! {
                biased;
                Ok(()) = &mut overflow => return Ok(Exit::Overflow),
                status = child.wait() => status?,
            };

            invocation.transition(InvocationState::ReadingOutput);
            let stdout = (&mut stdout_task)
                .await
                .map_err(|e| anyhow::anyhow!("stdout reader failed: {}", e))??;
            let stderr = (&mut stderr_task)
                .await
                .map_err(|e| anyhow::anyhow!("stderr reader failed: {}", e))??;

            Ok::<_, RouterError>(Exit::Finished { status, stdout, stderr })
        })
        .await;

        let exit = match exited {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                self.abandon(invocation, &stdout_task, &stderr_task).await;
                return Err(e);
            }
            Err(_) => {
                warn!(
                    target: "exec_router::executor",
                    invocation_id = %id,
                    route = %entry.route_path,
                    timeout_ms = timeout.as_millis() as u64,
                    "Route process exceeded its time limit; killing"
                );
                self.abandon(invocation, &stdout_task, &stderr_task).await;
                return Err(RouterError::ProcessTimeout {
                    executable: entry.executable.clone(),
                    duration: timeout,
                    invocation_id: Some(id),
                });
            }
        };

        match exit {
            Exit::Overflow => {
                self.abandon(invocation, &stdout_task, &stderr_task).await;
                Err(self.output_overflow(entry, id))
            }
            Exit::Finished { status, stdout, stderr } => {
                invocation.record_output(status, stdout, stderr);
                self.interpret(invocation, entry)
            }
        }
    }

    fn output_overflow(&self, entry: &RouteEntry, id: InvocationId) -> RouterError {
        RouterError::MalformedOutput {
            executable: entry.executable.clone(),
            reason: format!("output exceeds {} bytes", self.limits.max_output_bytes),
            invocation_id: Some(id),
        }
    }

    /// Turn a finished process into a response or an error
    fn interpret(&self, invocation: &ProcessInvocation, entry: &RouteEntry) -> Result<Response> {
        let id = invocation.id();
        let stderr = invocation.stderr();

        let Some(status) = invocation.exit_status() else {
            return Err(anyhow::anyhow!("exit status missing for finished process").into());
        };

        if !status.success() {
            return Err(RouterError::NonZeroExit {
                executable: entry.executable.clone(),
                code: status.code(),
                stderr: truncate_for_log(&stderr.lossy(), STDERR_IN_ERROR),
                invocation_id: Some(id),
            });
        }

        // The exit can win the race against the overflow signal
        if invocation.stdout().overflowed {
            return Err(self.output_overflow(entry, id));
        }

        if stderr.total > 0 {
            debug!(
                target: "exec_router::executor",
                invocation_id = %id,
                stderr = %truncate_for_log(&stderr.lossy(), STDERR_IN_ERROR),
                "Route process wrote diagnostics"
            );
        }

        self.decoders
            .decode(&invocation.stdout().bytes)
            .map_err(|e| RouterError::MalformedOutput {
                executable: entry.executable.clone(),
                reason: match e {
                    RouterError::DecodeError { reason, attempts } if !attempts.is_empty() => {
                        format!("{} ({})", reason, attempts.join("; "))
                    }
                    other => other.to_string(),
                },
                invocation_id: Some(id),
            })
    }

    /// Kill and reap the child, then stop the stream readers
    async fn abandon<T, U>(
        &self,
        invocation: &mut ProcessInvocation,
        stdout_task: &tokio::task::JoinHandle<T>,
        stderr_task: &tokio::task::JoinHandle<U>,
    ) {
        invocation.terminate().await;
        // Descendants may still hold the pipes open
        stdout_task.abort();
        stderr_task.abort();
    }
}

impl std::fmt::Debug for ProcessExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessExecutor")
            .field("limits", &self.limits)
            .field("environment", &self.environment)
            .field("decoders", &self.decoders.names())
            .finish()
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(ResourceLimits::default(), EnvironmentCapability::default())
    }
}
