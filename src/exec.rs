//! Blocking external commands with captured output, an optional timeout,
//! and a shared cancellation token.
//!
//! - stdout/stderr are drained on reader threads so a chatty child cannot
//!   fill its pipe and stall while we wait.
//! - A non-zero exit is a normal `CommandOutput`; only spawn/wait failures,
//!   timeouts and cancellation are errors.
//! - On timeout or cancellation the child is killed and reaped before the
//!   error is returned.

use crate::error::CommandError;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, as recorded in waivers.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        CommandRunner {
            timeout,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run `argv` in `cwd` with extra environment `envs`, blocking until it
    /// exits, times out, or is cancelled.
    pub fn run(
        &self,
        argv: &[String],
        cwd: &Path,
        envs: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(CommandError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        if self.cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                program: program.clone(),
            });
        }
        debug!(command = %argv.join(" "), cwd = %cwd.display(), "running");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in envs {
            cmd.env(k, v);
        }
        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                warn!(program = %program, "command cancelled");
                return Err(CommandError::Cancelled {
                    program: program.clone(),
                });
            }
            let slice = match self.timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!(program = %program, secs = limit.as_secs(), "command timed out");
                        return Err(CommandError::TimedOut {
                            program: program.clone(),
                            secs: limit.as_secs(),
                        });
                    }
                    (limit - elapsed).min(POLL)
                }
                None => POLL,
            };
            match child.wait_timeout(slice) {
                Ok(Some(status)) => break status,
                Ok(None) => continue,
                Err(source) => {
                    return Err(CommandError::Wait {
                        program: program.clone(),
                        source,
                    })
                }
            }
        };

        let stdout = stdout_rx.recv().unwrap_or_default();
        let stderr = stderr_rx.recv().unwrap_or_default();
        debug!(program = %program, code = ?status.code(), "finished");
        Ok(CommandOutput {
            code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Read a pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                if let Err(e) = pipe.read_to_end(&mut buf) {
                    warn!(error = %e, "failed to read command output");
                }
                let _ = tx.send(buf);
            });
        }
        None => {
            let _ = tx.send(Vec::new());
        }
    }
    rx
}
