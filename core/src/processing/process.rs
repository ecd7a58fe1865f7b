use std::{
    collections::VecDeque,
    ffi::{OsStr, OsString},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use camino::Utf8Path as Path;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    task::JoinHandle,
};
use tracing::{debug, instrument, warn};

/// Bytes of stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 4096;
/// Time a process gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("error starting {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} exited with code {code}: {stderr_tail}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr_tail: String,
    },
    #[error("{program} was terminated by a signal")]
    TerminatedBySignal { program: String },
    #[error("io error while running {program}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// Where the standard output of a bounded invocation goes.
#[derive(Debug, Clone, Copy)]
pub enum StdoutTarget<'a> {
    Null,
    File(&'a Path),
}

/// An external command with arguments and a wall clock budget.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl AsRef<OsStr>, timeout: Duration) -> Self {
        ProcessSpec {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Runs the process to completion. If it is still running when the
    /// timeout elapses it is terminated and `Timeout` is returned. Stderr is
    /// logged and only its tail is kept, a noisy stderr alone is not a failure.
    #[instrument(name = "run_process", skip(self), fields(program = %self.program_name()))]
    pub async fn run(&self, stdout: StdoutTarget<'_>) -> Result<(), ProcessError> {
        let program = self.program_name();
        let mut command = self.command();
        match stdout {
            StdoutTarget::Null => {
                command.stdout(Stdio::null());
            }
            StdoutTarget::File(path) => {
                let file = std::fs::File::create(path).map_err(|source| ProcessError::Io {
                    program: program.clone(),
                    source,
                })?;
                command.stdout(file);
            }
        }
        debug!(command = ?command.as_std(), "Invoking process");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stderr_task = child.stderr.take().map(collect_stderr_tail);

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(ProcessError::Io { program, source }),
            Err(_elapsed) => {
                warn!(timeout = ?self.timeout, "Process timed out, terminating");
                terminate(&mut child).await;
                return Err(ProcessError::Timeout {
                    program,
                    timeout: self.timeout,
                });
            }
        };
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        check_status(program, status, stderr_tail)
    }

    /// Like `run`, but collects stdout in memory. Meant for probes with
    /// small output.
    #[instrument(name = "run_process_capture", skip(self), fields(program = %self.program_name()))]
    pub async fn run_capture(&self) -> Result<Vec<u8>, ProcessError> {
        let program = self.program_name();
        let mut command = self.command();
        command.stdout(Stdio::piped());
        debug!(command = ?command.as_std(), "Invoking process");
        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        // on timeout the child is dropped with the future, which kills it
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                check_status(program, output.status, tail_of(&output.stderr))?;
                Ok(output.stdout)
            }
            Ok(Err(source)) => Err(ProcessError::Io { program, source }),
            Err(_elapsed) => Err(ProcessError::Timeout {
                program,
                timeout: self.timeout,
            }),
        }
    }

    /// Starts the process with stdout exposed as a stream. The timeout does
    /// not apply, the caller owns the lifetime of the returned process.
    #[instrument(name = "spawn_streaming", skip(self), fields(program = %self.program_name()))]
    pub fn spawn_streaming(&self) -> Result<StreamingProcess, ProcessError> {
        let program = self.program_name();
        let mut command = self.command();
        command.stdout(Stdio::piped());
        debug!(command = ?command.as_std(), "Invoking streaming process");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io {
            program: program.clone(),
            source: std::io::Error::other("stdout was not captured"),
        })?;
        let stderr_task = child.stderr.take().map(collect_stderr_tail);
        Ok(StreamingProcess {
            program,
            child,
            stdout: Some(stdout),
            _stderr_task: stderr_task,
        })
    }
}

fn check_status(program: String, status: ExitStatus, stderr_tail: String) -> Result<(), ProcessError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ProcessError::NonZeroExit {
            program,
            code,
            stderr_tail,
        }),
        None => Err(ProcessError::TerminatedBySignal { program }),
    }
}

fn tail_of(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    let s = s.trim_end();
    let mut start = s.len().saturating_sub(STDERR_TAIL_BYTES);
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_owned()
}

/// Logs stderr line by line and returns the last `STDERR_TAIL_BYTES` of it.
fn collect_stderr_tail(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::new();
        let mut tail_len = 0;
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!(stderr = %line);
            tail_len += line.len() + 1;
            tail.push_back(line);
            while tail_len > STDERR_TAIL_BYTES && tail.len() > 1 {
                if let Some(dropped) = tail.pop_front() {
                    tail_len -= dropped.len() + 1;
                }
            }
        }
        Vec::from(tail).join("\n")
    })
}

/// SIGTERM, then SIGKILL if the process ignores it for `TERMINATE_GRACE`.
async fn terminate(child: &mut Child) {
    #[cfg(target_family = "unix")]
    if let Some(pid) = child.id() {
        use nix::{
            sys::signal::{kill, Signal},
            unistd::Pid,
        };
        let pid = Pid::from_raw(pid as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                if let Ok(Ok(_)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                    return;
                }
            }
            Err(err) => {
                tracing::error!(%err, %pid, "Error sending SIGTERM to process");
            }
        }
    }
    if let Err(err) = child.kill().await {
        tracing::error!(%err, "Error killing process");
    }
}

/// A running process whose stdout is consumed by the caller. Dropping it
/// kills the process.
pub struct StreamingProcess {
    program: String,
    child: Child,
    stdout: Option<ChildStdout>,
    _stderr_task: Option<JoinHandle<String>>,
}

impl StreamingProcess {
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Sends SIGKILL without waiting, the child is reaped in the background.
    pub fn kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            // already exited processes end up here too
            tracing::trace!(%err, program = %self.program, "start_kill failed");
        }
    }
}

impl Drop for StreamingProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
