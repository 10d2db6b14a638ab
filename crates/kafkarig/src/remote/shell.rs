//! [`RemoteNode`] backed by `sh -c`, optionally tunnelled through `ssh`.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::LinesStream;

use super::{LineStream, RemoteNode, shell_quote};
use crate::{HarnessError, debug};

/// Runs commands locally, or on `ssh_target` when one is configured.
#[derive(Debug, Clone)]
pub struct ShellNode {
    hostname: String,
    ssh_target: Option<String>,
}

impl ShellNode {
    pub fn new(hostname: impl Into<String>, ssh_target: Option<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ssh_target,
        }
    }

    /// A node that runs commands on this machine.
    pub fn local() -> Self {
        Self::new("localhost", None)
    }

    /// A node reached with `ssh <target>`; `hostname` is what clients connect to.
    pub fn ssh(hostname: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ssh_target: Some(target.into()),
        }
    }

    pub fn ssh_target(&self) -> Option<&str> {
        self.ssh_target.as_deref()
    }

    fn command(&self, cmd: &str) -> Command {
        let mut command = match &self.ssh_target {
            Some(target) => {
                let mut c = Command::new("ssh");
                c.args(["-o", "BatchMode=yes", target.as_str(), "--", cmd]);
                c
            }
            None => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(cmd);
                c
            }
        };
        command.stdin(Stdio::null());
        command
    }

    fn command_failed(&self, cmd: &str, status: ExitStatus, stderr: String) -> HarnessError {
        HarnessError::CommandFailed {
            host: self.hostname.clone(),
            command: cmd.to_string(),
            exit_code: status.code(),
            stderr,
        }
    }
}

struct CaptureState {
    lines: LinesStream<BufReader<ChildStdout>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    node: ShellNode,
    command: String,
    allow_fail: bool,
    done: bool,
}

impl CaptureState {
    async fn finish(&mut self) -> Option<HarnessError> {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Some(HarnessError::from_io_error(e, "waiting for captured command")),
        };
        if status.success() || self.allow_fail {
            return None;
        }
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        Some(self.node.command_failed(&self.command, status, stderr))
    }
}

#[async_trait]
impl RemoteNode for ShellNode {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn run(&self, cmd: &str, allow_fail: bool) -> Result<(), HarnessError> {
        debug!("[{}] run: {cmd}", self.hostname);
        let output = self
            .command(cmd)
            .output()
            .await
            .map_err(|e| HarnessError::from_io_error(e, "spawning remote command"))?;

        if !output.status.success() && !allow_fail {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(self.command_failed(cmd, output.status, stderr));
        }
        Ok(())
    }

    async fn capture(&self, cmd: &str, allow_fail: bool) -> Result<LineStream, HarnessError> {
        debug!("[{}] capture: {cmd}", self.hostname);
        let mut child = self
            .command(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::from_io_error(e, "spawning captured command"))?;

        let stdout = child.stdout.take().ok_or_else(|| HarnessError::Io {
            context: "capturing command output".to_string(),
            reason: "stdout was not piped".to_string(),
        })?;
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf).await;
                buf
            })
        });

        let state = CaptureState {
            lines: LinesStream::new(BufReader::new(stdout).lines()),
            child,
            stderr,
            node: self.clone(),
            command: cmd.to_string(),
            allow_fail,
            done: false,
        };

        let lines = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            match state.lines.next().await {
                Some(Ok(line)) => Some((Ok(line), state)),
                Some(Err(e)) => {
                    state.done = true;
                    Some((
                        Err(HarnessError::from_io_error(e, "reading command output")),
                        state,
                    ))
                }
                None => {
                    state.done = true;
                    let failure = state.finish().await?;
                    Some((Err(failure), state))
                }
            }
        });
        Ok(lines.boxed())
    }

    async fn create_file(&self, path: &str, contents: &str) -> Result<(), HarnessError> {
        debug!("[{}] create file {path}", self.hostname);
        let cmd = format!("cat > {}", shell_quote(path));
        let mut child = self
            .command(&cmd)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::from_io_error(e, "spawning file writer"))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .await
                .map_err(|e| HarnessError::from_io_error(e, "writing remote file"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| HarnessError::from_io_error(e, "waiting for file writer"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(self.command_failed(&cmd, output.status, stderr));
        }
        Ok(())
    }
}
