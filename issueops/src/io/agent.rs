//! Agent invocation.
//!
//! The [`AgentInvoker`] trait decouples the lifecycle from the actual agent
//! CLI. Tests use scripted invokers that return predetermined output without
//! spawning processes.
//!
//! Invocation never returns `Err`: spawn failures, non-zero exits and
//! timeouts all come back as an [`AgentInvocationResult`] with
//! `success == false` and a diagnostic in `stderr`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentInvocationResult;
use crate::io::config::AgentConfig;
use crate::io::process::{CaptureRequest, CommandOutput, run_captured, run_inherited};

/// Stdout placeholder for headed sessions, whose output goes to the terminal.
pub const HEADED_STDOUT_PLACEHOLDER: &str = "[headed session: output not captured]";

const HEADLESS_FLAG: &str = "--print";
const SKIP_PERMISSIONS_FLAG: &str = "--dangerously-skip-permissions";

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub instructions_path: PathBuf,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Attach the agent to the terminal for human supervision.
    pub headed: bool,
    pub skip_permissions: bool,
    /// Working directory for the agent process.
    pub workdir: Option<PathBuf>,
    /// Where to write captured stdout/stderr (headless only).
    pub log_path: Option<PathBuf>,
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    fn invoke(&self, request: &InvocationRequest) -> AgentInvocationResult;

    /// Best-effort: may report `false` for a usable agent, never `true` for an unusable one.
    fn is_available(&self) -> bool;
}

/// Invoker that spawns a coding-agent CLI and pipes the instructions to its stdin.
#[derive(Debug, Clone)]
pub struct CliAgentInvoker {
    pub command: String,
    pub extra_args: Vec<String>,
    pub output_limit_bytes: usize,
    /// Mirror headless output to the console while capturing it.
    pub echo: bool,
}

impl CliAgentInvoker {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            extra_args: cfg.extra_args.clone(),
            output_limit_bytes: cfg.output_limit_bytes,
            echo: true,
        }
    }

    fn build_command(&self, request: &InvocationRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.extra_args);
        if !request.headed {
            cmd.arg(HEADLESS_FLAG);
        }
        if request.skip_permissions {
            cmd.arg(SKIP_PERMISSIONS_FLAG);
        }
        if let Some(workdir) = &request.workdir {
            cmd.current_dir(workdir);
        }
        cmd
    }

    fn invoke_headless(&self, request: &InvocationRequest, instructions: &str) -> AgentInvocationResult {
        let cmd = self.build_command(request);
        let capture = CaptureRequest {
            stdin: Some(instructions.as_bytes()),
            timeout: request.timeout,
            output_limit_bytes: self.output_limit_bytes,
            echo: self.echo,
        };
        let output = match run_captured(cmd, &capture) {
            Ok(output) => output,
            Err(err) => return self.spawn_failure(&err),
        };

        if let Some(log_path) = &request.log_path
            && let Err(err) = write_agent_log(log_path, &output)
        {
            warn!(err = %format!("{err:#}"), path = %log_path.display(), "failed to write agent log");
        }

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout.push_str(&output.stdout_truncated_notice("agent"));
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        stderr.push_str(&output.stderr_truncated_notice("agent"));

        finish(output.status.code(), output.timed_out, request.timeout, stdout, stderr)
    }

    fn invoke_headed(&self, request: &InvocationRequest, instructions: &str) -> AgentInvocationResult {
        let cmd = self.build_command(request);
        match run_inherited(cmd, Some(instructions.as_bytes()), request.timeout) {
            Ok(output) => finish(
                output.status.code(),
                output.timed_out,
                request.timeout,
                HEADED_STDOUT_PLACEHOLDER.to_string(),
                String::new(),
            ),
            Err(err) => self.spawn_failure(&err),
        }
    }

    fn spawn_failure(&self, err: &anyhow::Error) -> AgentInvocationResult {
        warn!(command = %self.command, err = %format!("{err:#}"), "agent could not be started");
        AgentInvocationResult::failure(format!(
            "failed to start agent '{}': {err:#}",
            self.command
        ))
    }
}

impl AgentInvoker for CliAgentInvoker {
    #[instrument(skip_all, fields(command = %self.command, headed = request.headed, timeout_secs = request.timeout.map(|t| t.as_secs())))]
    fn invoke(&self, request: &InvocationRequest) -> AgentInvocationResult {
        let instructions = match fs::read_to_string(&request.instructions_path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %request.instructions_path.display(), err = %err, "instructions file unreadable");
                return AgentInvocationResult::failure(format!(
                    "instructions file not found: {} ({err})",
                    request.instructions_path.display()
                ));
            }
        };

        info!(bytes = instructions.len(), "starting agent");
        let result = if request.headed {
            self.invoke_headed(request, &instructions)
        } else {
            self.invoke_headless(request, &instructions)
        };
        if result.success {
            debug!("agent completed successfully");
        } else {
            warn!(exit_code = ?result.exit_code, timed_out = result.timed_out, "agent failed");
        }
        result
    }

    fn is_available(&self) -> bool {
        let command = Path::new(&self.command);
        if command.components().count() > 1 || command.is_absolute() {
            return command.is_file();
        }
        Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn finish(
    exit_code: Option<i32>,
    timed_out: bool,
    timeout: Option<Duration>,
    stdout: String,
    mut stderr: String,
) -> AgentInvocationResult {
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        match timeout {
            Some(timeout) => stderr.push_str(&format!("agent timed out after {timeout:?}")),
            None => stderr.push_str("agent timed out"),
        }
    }
    AgentInvocationResult {
        exit_code,
        stdout,
        stderr,
        success: !timed_out && exit_code == Some(0),
        timed_out,
    }
}

fn write_agent_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice("agent"));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice("agent"));
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}
