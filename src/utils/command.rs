//! Command execution primitives with consistent error handling.
//!
//! Every command runs as `sh -c <command>` in its own process group, so a
//! timeout or interrupt can kill the whole tree (composer, npm and php all
//! fork helpers).

use std::io::{Read, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::interrupt::CancelToken;
use crate::utils::shell;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit status `sh` uses when the program is not on PATH.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Result of an executed command.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl CommandOutput {
    pub fn command_not_found(&self) -> bool {
        self.exit_code == EXIT_COMMAND_NOT_FOUND
    }

    /// Prefers stderr, falls back to stdout if stderr is empty.
    pub fn error_text(&self) -> String {
        if !self.stderr.trim().is_empty() {
            last_lines(self.stderr.trim(), 20)
        } else {
            last_lines(self.stdout.trim(), 20)
        }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

type InputSource = Box<dyn Read + Send>;

pub struct ShellCommand {
    command: String,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
    stdin: Option<InputSource>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            current_dir: None,
            envs: Vec::new(),
            deadline: None,
            cancel: None,
            stdin: None,
        }
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Absolute deadline, shared by several commands of one stage.
    pub fn deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn cancel_token(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Feed the reader into the child's stdin.
    pub fn stdin(mut self, reader: impl Read + Send + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Run and capture stdout and stderr.
    pub fn run(self) -> Result<CommandOutput> {
        let (output, captured) = self.run_with_sink(Vec::new())?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&captured).to_string(),
            ..output
        })
    }

    /// Run with stdout streamed into `sink`. The sink is handed back so the
    /// caller can finish it (e.g. write a gzip trailer).
    pub fn run_streaming<W: Write + Send + 'static>(self, sink: W) -> Result<(CommandOutput, W)> {
        self.run_with_sink(sink)
    }

    fn run_with_sink<W: Write + Send + 'static>(mut self, sink: W) -> Result<(CommandOutput, W)> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::internal_io(
                format!("Failed to spawn shell: {}", e),
                Some(self.context()),
            )
        })?;

        let stdin_thread = match (self.stdin.take(), child.stdin.take()) {
            (Some(mut reader), Some(mut pipe)) => Some(thread::spawn(move || {
                // EPIPE here means the child exited early; its status reports that.
                let _ = std::io::copy(&mut reader, &mut pipe);
            })),
            _ => None,
        };
        let stdout_thread = child.stdout.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut sink = sink;
                let copied = std::io::copy(&mut pipe, &mut sink).and_then(|_| sink.flush());
                (sink, copied)
            })
        });
        let stderr_thread = child.stderr.take().map(|pipe| spawn_capture(pipe));

        let (status, timed_out, interrupted) = self.wait(&mut child)?;

        if let Some(handle) = stdin_thread {
            let _ = handle.join();
        }
        let stderr = stderr_thread
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default();
        let (sink, copied) = match stdout_thread {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::internal_unexpected("stdout reader thread panicked"))?,
            None => return Err(Error::internal_unexpected("stdout pipe was not captured")),
        };
        copied.map_err(|e| Error::internal_io(e.to_string(), Some(self.context())))?;

        let exit_code = status.code().unwrap_or(-1);
        Ok((
            CommandOutput {
                stdout: String::new(),
                stderr,
                success: status.success() && !timed_out && !interrupted,
                exit_code,
                timed_out,
                interrupted,
            },
            sink,
        ))
    }

    /// Error context for this command. Names the program only: rendered
    /// templates carry credentials such as `{{db_password}}`.
    fn context(&self) -> String {
        format!("run {}", shell::program_name(&self.command).unwrap_or("sh"))
    }

    fn wait(&self, child: &mut Child) -> Result<(ExitStatus, bool, bool)> {
        let io_err = |e: std::io::Error| Error::internal_io(e.to_string(), Some(self.context()));
        loop {
            if let Some(status) = child.try_wait().map_err(io_err)? {
                return Ok((status, false, false));
            }

            let timed_out = self.deadline.is_some_and(|d| Instant::now() >= d);
            let interrupted = self.cancel.as_ref().is_some_and(CancelToken::is_cancelled);
            if timed_out || interrupted {
                kill_group(child);
                let status = child.wait().map_err(io_err)?;
                return Ok((status, timed_out, interrupted && !timed_out));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_capture(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn kill_group(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    // The child leads its own group (process_group(0)), so -pid targets the tree.
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

/// Convenience wrapper: run a command line in `dir` and capture output.
pub fn run_in(dir: &Path, command: &str) -> Result<CommandOutput> {
    ShellCommand::new(command).current_dir(dir).run()
}

/// Require a command operation to have succeeded.
pub fn require_success(output: &CommandOutput, operation: &str) -> Result<()> {
    if output.success {
        Ok(())
    } else {
        Err(Error::internal_io(
            format!("{} failed: {}", operation, output.error_text()),
            Some(operation.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout_and_exit_code() {
        let out = ShellCommand::new("echo hello; echo oops >&2; exit 3").run().unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success);
    }

    #[test]
    fn missing_program_reports_127() {
        let out = ShellCommand::new("definitely_not_a_tool_xyz --flag").run().unwrap();
        assert!(out.command_not_found());
    }

    #[test]
    fn env_and_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let out = ShellCommand::new("echo $GREETING; pwd")
            .current_dir(dir.path())
            .env("GREETING", "hi")
            .run()
            .unwrap();
        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines[0], "hi");
        assert!(lines[1].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let started = Instant::now();
        let out = ShellCommand::new("sleep 30 & sleep 30; wait")
            .timeout(Duration::from_millis(200))
            .run()
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancelled_token_interrupts_command() {
        let token = CancelToken::detached();
        token.cancel();
        let out = ShellCommand::new("sleep 30").cancel_token(&token).run().unwrap();
        assert!(out.interrupted);
        assert!(!out.success);
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn io_errors_name_the_program_not_the_command_line() {
        let err = ShellCommand::new("echo dump --password='hunter2'")
            .run_streaming(BrokenSink)
            .map(|_| ())
            .unwrap_err();
        assert!(!err.describe().contains("hunter2"));
        assert!(!err.details.to_string().contains("hunter2"));
        assert!(err.details.to_string().contains("run echo"));
    }

    #[test]
    fn stdin_and_streaming_stdout() {
        let input = std::io::Cursor::new(b"line one\nline two\n".to_vec());
        let (out, sink) = ShellCommand::new("cat")
            .stdin(input)
            .run_streaming(Vec::new())
            .unwrap();
        assert!(out.success);
        assert_eq!(sink, b"line one\nline two\n");
    }
}
