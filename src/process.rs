//! Bounded execution of external commands.
//!
//! Every command gets an explicit working directory, a null stdin and
//! piped output. The caller's deadline and cancel token are polled while
//! the child runs; on either, the child's process group is killed and the
//! child reaped before returning, so nothing keeps running after the run ends.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::cancel::OpContext;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL_LINES: usize = 3;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", describe_code(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out")]
    TimedOut { program: String },

    #[error("{program} cancelled")]
    Cancelled { program: String },

    #[error("waiting on {program} failed: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Build a `git` command that runs inside `dir` and never prompts.
pub fn git_command(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir);
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    if std::env::var_os("GIT_SSH_COMMAND").is_none() {
        cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
    }
    cmd
}

/// Run `cmd` to completion within the limits of `ctx`.
///
/// The child leads its own process group. On timeout or cancellation the
/// whole group is killed, so helpers such as `git-remote-https` or `ssh`
/// do not outlive it. Output is collected under the same deadline: a
/// grandchild that keeps the pipes open past it fails the command.
pub fn run(mut cmd: Command, ctx: &OpContext) -> Result<CommandOutput, ProcessError> {
    let program = cmd.get_program().to_string_lossy().to_string();
    if ctx.cancel.is_cancelled() {
        return Err(ProcessError::Cancelled { program });
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    trace!(?cmd, "spawning");
    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (pipe_tx, pipe_rx) = unbounded();
    let mut open_pipes = 0;
    if let Some(pipe) = child.stdout.take() {
        drain(pipe, Stream::Stdout, pipe_tx.clone());
        open_pipes += 1;
    }
    if let Some(pipe) = child.stderr.take() {
        drain(pipe, Stream::Stderr, pipe_tx.clone());
        open_pipes += 1;
    }
    drop(pipe_tx);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                terminate(&mut child, &program);
                return Err(ProcessError::Wait { program, source });
            }
        }
        if let Some(err) = interrupted(&program, ctx) {
            terminate(&mut child, &program);
            return Err(err);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut output = CommandOutput::default();
    while open_pipes > 0 {
        let wake = (Instant::now() + POLL_INTERVAL).min(ctx.deadline);
        match pipe_rx.recv_deadline(wake) {
            Ok((stream, buf)) => {
                let text = String::from_utf8_lossy(&buf).into_owned();
                match stream {
                    Stream::Stdout => output.stdout = text,
                    Stream::Stderr => output.stderr = text,
                }
                open_pipes -= 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(err) = interrupted(&program, ctx) {
                    debug!("{} exited but its output is still held open", program);
                    terminate(&mut child, &program);
                    return Err(err);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    check_status(&program, status, output)
}

fn interrupted(program: &str, ctx: &OpContext) -> Option<ProcessError> {
    let program = program.to_string();
    if ctx.cancel.is_cancelled() {
        Some(ProcessError::Cancelled { program })
    } else if ctx.is_expired() {
        Some(ProcessError::TimedOut { program })
    } else {
        None
    }
}

fn check_status(
    program: &str,
    status: ExitStatus,
    output: CommandOutput,
) -> Result<CommandOutput, ProcessError> {
    if status.success() {
        return Ok(output);
    }
    Err(ProcessError::Failed {
        program: program.to_string(),
        code: status.code(),
        stderr: tail(&output.stderr, STDERR_TAIL_LINES),
    })
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

// Detached: a reader only finishes once every holder of the pipe has closed it.
fn drain<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<(Stream, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = kill_group(child) {
        warn!("failed to kill process group of {} (pid {}): {}", program, child.id(), e);
        if let Err(e) = child.kill() {
            warn!("failed to kill {} (pid {}): {}", program, child.id(), e);
        }
    }
    match child.wait() {
        Ok(status) => debug!("{} (pid {}) terminated: {}", program, child.id(), status),
        Err(e) => warn!("failed to reap {} (pid {}): {}", program, child.id(), e),
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // Leader and members already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

/// Last `lines` non-empty lines of `text`, joined with "; ".
pub fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("; ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_run_captures_stdout() {
        let ctx = OpContext::new(Duration::from_secs(10), CancelToken::new());
        let output = run(sh("echo hello"), &ctx).unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn test_run_reports_failure_with_stderr_tail() {
        let ctx = OpContext::new(Duration::from_secs(10), CancelToken::new());
        let err = run(sh("echo one >&2; echo two >&2; exit 3"), &ctx).unwrap_err();
        match err {
            ProcessError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "one; two");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_kills_on_timeout() {
        let ctx = OpContext::new(Duration::from_millis(200), CancelToken::new());
        let started = Instant::now();
        let err = run(sh("sleep 30"), &ctx).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_output_held_by_background_child_is_bounded() {
        let ctx = OpContext::new(Duration::from_millis(300), CancelToken::new());
        let started = Instant::now();
        let err = run(sh("sleep 6 & echo started"), &ctx).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        // Zombies are dead already, they only wait to be reaped
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_grandchildren() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("sleeper.pid");
        let script = format!(
            "sleep 30 >/dev/null 2>&1 & echo $! > '{}'; wait",
            pid_file.display()
        );

        let ctx = OpContext::new(Duration::from_millis(300), CancelToken::new());
        let err = run(sh(&script), &ctx).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_running(pid), "background sleep {pid} survived the timeout");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_cancellation_kills_grandchildren() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let pid_file = temp_dir.path().join("sleeper.pid");
        let script = format!(
            "sleep 30 >/dev/null 2>&1 & echo $! > '{}'; wait",
            pid_file.display()
        );

        let token = CancelToken::new();
        let ctx = OpContext::new(Duration::from_secs(60), token.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            token.cancel();
        });
        let err = run(sh(&script), &ctx).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ProcessError::Cancelled { .. }));

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!is_running(pid), "background sleep {pid} survived cancellation");
    }

    #[test]
    fn test_run_honours_cancellation() {
        let token = CancelToken::new();
        let ctx = OpContext::new(Duration::from_secs(60), token.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        });
        let err = run(sh("sleep 30"), &ctx).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[test]
    fn test_run_refuses_to_start_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let ctx = OpContext::new(Duration::from_secs(60), token);
        let err = run(sh("echo never"), &ctx).unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let ctx = OpContext::new(Duration::from_secs(10), CancelToken::new());
        let err = run(Command::new("definitely-not-a-real-binary-xyz"), &ctx).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\n\nb\nc\nd\n", 2), "c; d");
        assert_eq!(tail("", 3), "");
        assert_eq!(tail("only\n", 3), "only");
    }
}
