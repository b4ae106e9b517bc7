//! Tool Runner - execute external tools with a hard deadline
//!
//! Every external binary the pipeline touches goes through `ToolRunner::run`.
//! The runner never returns an error: a missing executable, a spawn failure,
//! a non-zero exit, a timeout or a cancellation all end up as fields on the
//! returned `ToolOutcome`, so the caller decides what they mean for its stage.

use crate::error::StageIssue;
use crate::store::ResultStore;
use log::{debug, info, warn};
use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Per-stream capture limit
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// How long stream readers may keep draining after the process is gone
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// One external command to run
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Duration,
    pub stdin: Option<Vec<u8>>,
}

impl ToolInvocation {
    pub fn new<S: Into<String>>(program: S, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            timeout,
            stdin: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn stdin<B: Into<Vec<u8>>>(mut self, input: B) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering for logs and output headers
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything observed about one tool execution
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolOutcome {
    pub program: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub tool_missing: bool,
    pub interrupted: bool,
    pub truncated: bool,
    pub duration: Duration,
}

impl ToolOutcome {
    fn missing(program: &str) -> Self {
        Self {
            program: program.to_string(),
            tool_missing: true,
            ..Default::default()
        }
    }

    fn interrupted(program: &str) -> Self {
        Self {
            program: program.to_string(),
            interrupted: true,
            ..Default::default()
        }
    }

    /// Ran to completion with exit status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.tool_missing && !self.interrupted
    }

    /// Whether the tool was actually started
    pub fn executed(&self) -> bool {
        !self.tool_missing
    }

    /// Stage-level reading of this outcome, `None` when it succeeded
    pub fn issue(&self) -> Option<StageIssue> {
        if self.tool_missing {
            Some(StageIssue::ToolMissing(vec![self.program.clone()]))
        } else if self.interrupted {
            Some(StageIssue::Interrupted)
        } else if self.timed_out {
            Some(StageIssue::ToolTimeout(self.program.clone()))
        } else if self.exit_code != Some(0) {
            Some(StageIssue::ToolNonZeroExit {
                tool: self.program.clone(),
                code: self.exit_code,
            })
        } else {
            None
        }
    }

    /// Section written to the stage's raw output file
    pub fn render_section(&self, invocation: &ToolInvocation) -> String {
        let status = if self.tool_missing {
            "not found".to_string()
        } else if self.interrupted {
            format!("interrupted after {:.2}s", self.duration.as_secs_f64())
        } else if self.timed_out {
            format!("timed out after {:.2}s", self.duration.as_secs_f64())
        } else {
            match self.exit_code {
                Some(code) => format!("exit={}, {:.2}s", code, self.duration.as_secs_f64()),
                None => format!("no exit status, {:.2}s", self.duration.as_secs_f64()),
            }
        };

        let mut section = format!("==> {} ({}) <==\n", invocation.command_line(), status);
        section.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') {
            section.push('\n');
        }
        if !self.stderr.trim().is_empty() {
            section.push_str("--- stderr ---\n");
            section.push_str(&self.stderr);
            if !self.stderr.ends_with('\n') {
                section.push('\n');
            }
        }
        if self.truncated {
            section.push_str("[OUTPUT TRUNCATED - SIZE LIMIT EXCEEDED]\n");
        }
        section.push('\n');
        section
    }
}

/// Execution statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub missing: usize,
    pub interrupted: usize,
}

impl RunnerStats {
    fn record(&mut self, outcome: &ToolOutcome) {
        if outcome.tool_missing {
            self.missing += 1;
            return;
        }
        self.executed += 1;
        if outcome.interrupted {
            self.interrupted += 1;
        } else if outcome.timed_out {
            self.timed_out += 1;
        } else if outcome.success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

enum Exit {
    Finished(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Bounded, cancellable executor for external tools
#[derive(Clone)]
pub struct ToolRunner {
    search_path: Option<OsString>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    stats: Arc<Mutex<RunnerStats>>,
    kill_grace: Duration,
}

impl ToolRunner {
    /// Create a runner allowing `max_concurrent` tools at once
    pub fn new(max_concurrent: usize, cancel: CancellationToken) -> Self {
        Self {
            search_path: None,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel,
            stats: Arc::new(Mutex::new(RunnerStats::default())),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Resolve executables against `path` instead of `$PATH`
    pub fn with_search_path<S: Into<OsString>>(mut self, path: S) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Absolute path of `program`, if it can be executed
    pub fn resolve(&self, program: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(program, Some(paths), cwd)
            }
            None => which::which(program),
        };
        found.ok()
    }

    pub fn is_available(&self, program: &str) -> bool {
        self.resolve(program).is_some()
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run one tool under its deadline
    pub async fn run(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let outcome = self.run_internal(invocation).await;
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&outcome);
        outcome
    }

    /// Run one tool and append its output to `file` in the run directory
    pub async fn run_captured(
        &self,
        invocation: &ToolInvocation,
        store: &ResultStore,
        file: &str,
    ) -> ToolOutcome {
        let outcome = self.run(invocation).await;
        if let Err(e) = store.append(file, outcome.render_section(invocation).as_bytes()) {
            warn!("Failed to record output of {}: {}", invocation.program, e);
        }
        outcome
    }

    async fn run_internal(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let program = invocation.program.as_str();

        let Some(path) = self.resolve(program) else {
            warn!("{} not found, skipping", program);
            return ToolOutcome::missing(program);
        };

        if self.cancel.is_cancelled() {
            return ToolOutcome::interrupted(program);
        }

        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return ToolOutcome::interrupted(program),
            },
            _ = self.cancel.cancelled() => return ToolOutcome::interrupted(program),
        };

        debug!("Executing {}", invocation.command_line());
        let start = Instant::now();

        let mut command = Command::new(&path);
        command
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.workdir {
            command.current_dir(dir);
        }
        // Own process group so a timeout can take down the whole tree
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", program, e);
                return ToolOutcome {
                    program: program.to_string(),
                    stderr: format!("failed to spawn process: {}", e),
                    duration: start.elapsed(),
                    ..Default::default()
                };
            }
        };

        // Taken now: the id is no longer available once the child is reaped
        let pid = child.id();

        if let (Some(input), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                // Broken pipe just means the tool stopped reading early
                let _ = stdin.write_all(&input).await;
            });
        }

        let stdout_buf = Arc::new(Mutex::new(Capture::default()));
        let stderr_buf = Arc::new(Mutex::new(Capture::default()));
        let mut stdout_task = spawn_capture(child.stdout.take(), Arc::clone(&stdout_buf));
        let mut stderr_task = spawn_capture(child.stderr.take(), Arc::clone(&stderr_buf));

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = tokio::time::sleep(invocation.timeout) => Exit::TimedOut,
            _ = self.cancel.cancelled() => Exit::Cancelled,
        };

        let reaped = matches!(exit, Exit::Finished(Ok(_)));
        let (exit_code, timed_out, interrupted) = match exit {
            Exit::Finished(Ok(status)) => (status.code(), false, false),
            Exit::Finished(Err(e)) => {
                warn!("Failed to wait for {}: {}", program, e);
                (None, false, false)
            }
            Exit::TimedOut => {
                warn!("{} timed out after {:?}, killing process group", program, invocation.timeout);
                (None, true, false)
            }
            Exit::Cancelled => {
                info!("Run cancelled, killing {}", program);
                (None, false, true)
            }
        };

        if reaped {
            // The group id is only known to be live while a leftover
            // background process still holds one of the output pipes
            if !drain(&mut stdout_task, &mut stderr_task, self.kill_grace).await {
                debug!("{} left background processes behind, killing process group", program);
                kill_group(pid);
                if !drain(&mut stdout_task, &mut stderr_task, self.kill_grace).await {
                    stdout_task.abort();
                    stderr_task.abort();
                }
            }
        } else {
            terminate(&mut child, pid, self.kill_grace).await;
            if !drain(&mut stdout_task, &mut stderr_task, self.kill_grace).await {
                debug!("{} output streams still open after grace period", program);
                stdout_task.abort();
                stderr_task.abort();
            }
        }

        let (stdout, out_truncated) = take_capture(&stdout_buf);
        let (stderr, err_truncated) = take_capture(&stderr_buf);
        let duration = start.elapsed();

        debug!(
            "{} finished in {:.2}s (exit={:?}, timed_out={}, interrupted={})",
            program,
            duration.as_secs_f64(),
            exit_code,
            timed_out,
            interrupted
        );

        ToolOutcome {
            program: program.to_string(),
            exit_code,
            stdout,
            stderr,
            timed_out,
            tool_missing: false,
            interrupted,
            truncated: out_truncated || err_truncated,
            duration,
        }
    }
}

/// Kill the still-running child's process group (unix) and reap the child
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    kill_group(pid);
    let _ = child.start_kill();
    if timeout(grace, child.wait()).await.is_err() {
        warn!("Child process did not exit after SIGKILL");
    }
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: killpg has no memory-safety preconditions; the group id is
        // the child's pid because it was spawned with process_group(0).
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Wait up to `grace` for both capture tasks to hit end of stream
async fn drain(stdout: &mut JoinHandle<()>, stderr: &mut JoinHandle<()>, grace: Duration) -> bool {
    let both = async {
        // a finished handle must not be polled again
        for task in [stdout, stderr] {
            if !task.is_finished() {
                let _ = task.await;
            }
        }
    };
    timeout(grace, both).await.is_ok()
}

fn spawn_capture<R>(stream: Option<R>, buffer: Arc<Mutex<Capture>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut capture = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    let room = MAX_CAPTURE_BYTES.saturating_sub(capture.data.len());
                    if n > room {
                        capture.truncated = true;
                    }
                    capture.data.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take_capture(buffer: &Arc<Mutex<Capture>>) -> (String, bool) {
    let mut capture = buffer.lock().unwrap_or_else(|e| e.into_inner());
    let data = std::mem::take(&mut capture.data);
    (String::from_utf8_lossy(&data).into_owned(), capture.truncated)
}
