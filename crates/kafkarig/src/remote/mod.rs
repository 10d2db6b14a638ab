//! Remote execution contract.
//!
//! Every interaction with a cluster node goes through [`RemoteNode`]: running a
//! command, streaming its output line by line, writing a file, enumerating
//! process ids, and delivering signals. Members and probes only depend on this
//! trait, so tests substitute a scripted node and the CLI uses [`ShellNode`].

pub mod shell;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::{HarnessError, types::Signal};

pub use shell::ShellNode;

/// Output lines of a running command, yielded as they arrive (without trailing newline).
pub type LineStream = BoxStream<'static, Result<String, HarnessError>>;

#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Hostname clients use to reach services on this node.
    fn hostname(&self) -> &str;

    /// Run a command to completion. A non-zero exit is an error unless `allow_fail` is set.
    async fn run(&self, cmd: &str, allow_fail: bool) -> Result<(), HarnessError>;

    /// Run a command and stream its stdout.
    ///
    /// When the command exits non-zero and `allow_fail` is not set, the stream
    /// ends with a [`HarnessError::CommandFailed`] item.
    async fn capture(&self, cmd: &str, allow_fail: bool) -> Result<LineStream, HarnessError>;

    /// Write `contents` to `path`, replacing any existing file.
    async fn create_file(&self, path: &str, contents: &str) -> Result<(), HarnessError>;

    /// Run a command and collect its whole output, one line per captured line.
    async fn capture_all(&self, cmd: &str, allow_fail: bool) -> Result<String, HarnessError> {
        let mut lines = self.capture(cmd, allow_fail).await?;
        let mut output = String::new();
        while let Some(line) = lines.next().await {
            output.push_str(&line?);
            output.push('\n');
        }
        Ok(output)
    }

    async fn signal(&self, pid: u32, signal: Signal, allow_fail: bool) -> Result<(), HarnessError> {
        self.run(&format!("kill -{} {pid}", signal.name()), allow_fail)
            .await
    }

    /// Enumerate process ids printed by a shell-level filter such as [`process_filter`].
    async fn pids(&self, filter: &str) -> Result<Vec<u32>, HarnessError> {
        let output = self
            .capture_all(filter, true)
            .await
            .map_err(|e| HarnessError::ProcessQuery {
                host: self.hostname().to_string(),
                reason: e.to_string(),
            })?;
        parse_pids(&output).map_err(|reason| HarnessError::ProcessQuery {
            host: self.hostname().to_string(),
            reason,
        })
    }

    /// Signal every process whose command line matches `pattern`.
    async fn kill_process(
        &self,
        pattern: &str,
        clean: bool,
        allow_fail: bool,
    ) -> Result<(), HarnessError> {
        let cmd = format!(
            "{} | xargs -r kill -{}",
            process_filter(pattern),
            Signal::for_shutdown(clean).name()
        );
        self.run(&cmd, allow_fail).await
    }
}

/// Shell pipeline printing the pid of every process whose command line matches `pattern`.
pub fn process_filter(pattern: &str) -> String {
    format!(
        "ps ax | grep -i {} | grep -v grep | awk '{{print $1}}'",
        shell_quote(pattern)
    )
}

/// Shell command printing those of `pids` that are still running.
pub fn live_pid_filter(pids: &[u32]) -> String {
    let list = pids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("ps -o pid= -p {list}")
}

/// Shell command printing the pid recorded in `pid_file`, or nothing if there is none.
pub fn pid_file_reader(pid_file: &str) -> String {
    format!("cat {} 2>/dev/null", shell_quote(pid_file))
}

/// Quote a string for safe interpolation into a POSIX shell command.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn parse_pids(output: &str) -> Result<Vec<u32>, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u32>()
                .map_err(|e| format!("unexpected pid '{line}': {e}"))
        })
        .collect()
}
