//! Helpers for running child processes with timeouts and bounded output.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for output readers after a timeout kill before giving up on them.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Exit of a child whose stdout/stderr were inherited.
#[derive(Debug)]
pub struct InheritedOutput {
    pub status: ExitStatus,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest<'a> {
    pub stdin: Option<&'a [u8]>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    /// Mirror each output line to this process's stdout/stderr as it arrives.
    pub echo: bool,
}

#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Run a command, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read on dedicated threads while the child runs and stdin is fed
/// from another, so a child that never reads its input cannot stall the
/// timeout. On timeout the child is killed and the call returns once it has
/// been reaped.
#[instrument(skip_all, fields(timeout_secs = req.timeout.map(|t| t.as_secs()), output_limit_bytes = req.output_limit_bytes, echo = req.echo))]
pub fn run_captured(mut cmd: Command, req: &CaptureRequest<'_>) -> Result<CommandOutput> {
    if req.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = spawn(&mut cmd)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = req.output_limit_bytes;
    let (stdout_echo, stderr_echo) = if req.echo {
        (Some(Echo::Stdout), Some(Echo::Stderr))
    } else {
        (None, None)
    };
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit, stdout_echo));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit, stderr_echo));

    feed_stdin(&mut child, req.stdin)?;

    let (status, timed_out) = wait_or_kill(&mut child, req.timeout)?;

    let grace = timed_out.then_some(READER_GRACE);
    let (stdout, stdout_truncated) = join_output(stdout_handle, grace).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, grace).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run a command attached to the caller's terminal; only stdin is piped.
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs())))]
pub fn run_inherited(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<InheritedOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::inherit());
    }
    cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

    let mut child = spawn(&mut cmd)?;
    feed_stdin(&mut child, stdin)?;
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(InheritedOutput { status, timed_out })
}

fn spawn(cmd: &mut Command) -> Result<Child> {
    debug!(program = ?cmd.get_program(), "spawning child process");
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            Err(e).with_context(|| format!("spawn {}", cmd.get_program().to_string_lossy()))
        }
    }
}

/// Write `input` on a background thread and close stdin when done.
///
/// A child that exits without reading all of its input closes the pipe;
/// that is logged, not treated as an error.
fn feed_stdin(child: &mut Child, input: Option<&[u8]>) -> Result<()> {
    let Some(input) = input else {
        return Ok(());
    };
    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let input = input.to_vec();
    thread::spawn(move || {
        if let Err(e) = child_stdin.write_all(&input) {
            if e.kind() == ErrorKind::BrokenPipe {
                warn!("child closed stdin before reading all input");
            } else {
                warn!(err = %e, "failed to write child stdin");
            }
        }
    });
    Ok(())
}

fn wait_or_kill(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let waited = match timeout {
        Some(timeout) => child.wait_timeout(timeout).context("wait for command")?,
        None => Some(child.wait().context("wait for command")?),
    };
    match waited {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.map(|t| t.as_secs()),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

/// Join a reader thread. With a grace period, a reader still blocked after it
/// elapses (e.g. a grandchild holds the pipe open) is abandoned.
fn join_output(
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
    grace: Option<Duration>,
) -> Result<(Vec<u8>, usize)> {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("output reader still blocked after kill, abandoning it");
                return Ok((Vec::new(), 0));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally mirroring each line.
fn read_stream_limited<R: Read>(
    reader: R,
    limit: usize,
    echo: Option<Echo>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read output")?;
        if n == 0 {
            break;
        }

        if let Some(echo) = echo {
            let written = match echo {
                Echo::Stdout => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(&line).and_then(|()| out.flush())
                }
                Echo::Stderr => {
                    let mut out = std::io::stderr().lock();
                    out.write_all(&line).and_then(|()| out.flush())
                }
            };
            if let Err(e) = written {
                debug!(err = %e, "failed to echo child output");
            }
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn request(stdin: Option<&[u8]>, timeout: Option<Duration>, limit: usize) -> CaptureRequest<'_> {
        CaptureRequest {
            stdin,
            timeout,
            output_limit_bytes: limit,
            echo: false,
        }
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let out = run_captured(sh("cat; echo err >&2"), &request(Some(b"hello\n"), None, 1024))
            .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout, b"hello\n");
        assert_eq!(out.stderr, b"err\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_captured(sh("printf 'abcdefghij'"), &request(None, None, 4)).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
        assert!(out.stdout_truncated_notice("agent").contains("6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let out = run_captured(
            sh("sleep 5"),
            &request(None, Some(Duration::from_millis(100)), 1024),
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn child_ignoring_stdin_does_not_fail() {
        let input = vec![b'x'; 1 << 20];
        let out = run_captured(sh("exit 0"), &request(Some(&input), None, 1024)).expect("run");
        assert!(out.status.success());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_captured(
            Command::new("/nonexistent/issueops-agent"),
            &request(None, None, 1024),
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }
}
