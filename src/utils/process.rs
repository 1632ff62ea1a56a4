// src/utils/process.rs
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AgentError, Result};

const PIPE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run `program args..` to completion, capturing its output.
///
/// The child is killed when `timeout` elapses or `cancel` fires; a timeout
/// keeps whatever the child printed so far. A non-zero exit is returned as
/// `SubprocessFailure`.
pub async fn run_captured(
    program: &str,
    args: &[&str],
    workdir: Option<&Path>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    let rendered = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %rendered, "running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| AgentError::SubprocessFailure {
        command: rendered.clone(),
        code: None,
        output: format!("failed to start: {}", e),
    })?;

    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let readers = vec![
        drain(child.stdout.take(), stdout.clone()),
        drain(child.stderr.take(), stderr.clone()),
    ];

    let finish = tokio::select! {
        biased;
        _ = cancel.cancelled() => Finish::Cancelled,
        result = tokio::time::timeout(timeout, child.wait()) => match result {
            Ok(status) => Finish::Exited(status?),
            Err(_) => Finish::TimedOut,
        },
    };
    if !matches!(finish, Finish::Exited(_)) {
        if let Err(e) = child.kill().await {
            debug!(command = %rendered, error = %e, "kill failed");
        }
    }
    // descendants may keep the pipes open after the child is gone
    let _ = tokio::time::timeout(PIPE_GRACE, futures::future::join_all(readers)).await;

    let captured = CommandOutput {
        code: match &finish {
            Finish::Exited(status) => status.code(),
            _ => None,
        },
        stdout: take_text(&stdout),
        stderr: take_text(&stderr),
    };

    match finish {
        Finish::Cancelled => Err(AgentError::Cancelled),
        Finish::TimedOut => Err(AgentError::SubprocessTimeout {
            command: rendered,
            after: timeout,
            output: captured.combined(),
        }),
        Finish::Exited(_) => {
            debug!(command = %rendered, code = ?captured.code, "command finished");
            if !captured.success() {
                return Err(AgentError::SubprocessFailure {
                    command: rendered,
                    code: captured.code,
                    output: captured.combined(),
                });
            }
            Ok(captured)
        }
    }
}

enum Finish {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Copy `pipe` into `sink` as it arrives so a killed child leaves its
/// partial output behind.
fn drain<R>(pipe: Option<R>, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut buffer = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    buffer.extend_from_slice(&chunk[..n]);
                }
            }
        }
    })
}

fn take_text(sink: &Mutex<Vec<u8>>) -> String {
    let bytes = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let out = run_captured(
            "sh",
            &["-c", "echo out; echo err >&2"],
            None,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.combined(), "out\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_subprocess_failure() {
        let err = run_captured(
            "sh",
            &["-c", "echo boom >&2; exit 3"],
            None,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            AgentError::SubprocessFailure { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(output, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out_with_partial_output() {
        let err = run_captured(
            "sh",
            &["-c", "echo waiting for api server; exec sleep 5"],
            None,
            Duration::from_millis(500),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            AgentError::SubprocessTimeout { output, .. } => {
                assert_eq!(output, "waiting for api server\n")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_stops_command() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_captured("sh", &["-c", "sleep 5"], None, Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
