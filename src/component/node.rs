// src/component/node.rs
use std::path::Path;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::JOIN_PREFIX;
use crate::config::NodeConfig;
use crate::error::{AgentError, Result};
use crate::storage::{FileMapping, SecretStore};
use crate::types::ConfigureRequest;
use crate::utils::{run_captured, CommandOutput, ExponentialBackoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Waiting,
    Attempting,
    Succeeded,
    /// Retry budget spent
    Exhausted,
    /// Stopped by a refusal or an interrupt
    Aborted,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub attempts: u32,
    pub elapsed: Duration,
    /// Combined stdout and stderr of the successful run
    pub output: String,
}

/// Fetches the join script and runs it until it succeeds or the backoff
/// budget runs out.
pub struct JoinRetryDriver<'a> {
    store: &'a SecretStore,
    config: &'a NodeConfig,
    cancel: CancellationToken,
    state: JoinState,
}

impl<'a> JoinRetryDriver<'a> {
    pub fn new(store: &'a SecretStore, config: &'a NodeConfig, cancel: CancellationToken) -> Self {
        Self {
            store,
            config,
            cancel,
            state: JoinState::Waiting,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    fn transition(&mut self, next: JoinState) {
        debug!(from = ?self.state, to = ?next, "join state change");
        self.state = next;
    }

    pub async fn configure(&mut self, request: ConfigureRequest) -> Result<JoinOutcome> {
        let node_name = resolve_node_name(self.config)?;
        info!(node = %node_name, script = %self.config.script_name, "joining cluster");

        let start = Instant::now();
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);
        let mut overwrite = request.overwrite;
        let mut attempts = 0u32;

        loop {
            self.transition(JoinState::Attempting);
            attempts += 1;

            let last_output = match self.attempt(&node_name, overwrite).await {
                Ok(output) => {
                    self.transition(JoinState::Succeeded);
                    info!(attempts, "node joined the cluster");
                    return Ok(JoinOutcome {
                        attempts,
                        elapsed: start.elapsed(),
                        output: output.combined(),
                    });
                }
                Err(e) if !e.is_retryable() => {
                    self.transition(JoinState::Aborted);
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "join attempt failed");
                    e.diagnostic_output()
                }
            };

            // from here on the local script is our own copy
            overwrite = true;

            let elapsed = start.elapsed();
            let Some(wait) = backoff.next_interval(elapsed) else {
                self.transition(JoinState::Exhausted);
                return Err(AgentError::Exhausted {
                    attempts,
                    elapsed,
                    last_output,
                });
            };

            self.transition(JoinState::Waiting);
            debug!(wait_ms = wait.as_millis() as u64, "waiting before next join attempt");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.transition(JoinState::Aborted);
                    return Err(AgentError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn attempt(&self, node_name: &str, overwrite: bool) -> Result<CommandOutput> {
        let dir = &self.config.join_dir;
        self.store
            .download_files_to_directory(
                &[FileMapping::same(&self.config.script_name)],
                dir,
                JOIN_PREFIX,
                overwrite,
            )
            .await?;

        let script_path = dir.join(&self.config.script_name);
        patch_script(&script_path, &self.config.node_name_flag, node_name).await?;

        run_captured(
            &self.config.shell,
            &[self.config.script_name.as_str()],
            Some(dir.as_path()),
            self.config.attempt_timeout(),
            &self.cancel,
        )
        .await
    }
}

fn resolve_node_name(config: &NodeConfig) -> Result<String> {
    if let Some(name) = &config.node_name {
        return Ok(name.clone());
    }
    hostname::get()
        .map_err(|e| AgentError::Config(format!("cannot resolve host name: {}", e)))?
        .into_string()
        .map_err(|_| AgentError::Config("host name is not valid UTF-8".to_string()))
}

async fn patch_script(path: &Path, flag: &str, node_name: &str) -> Result<()> {
    let script = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AgentError::local_file(path, e))?;
    if let Some(patched) = ensure_node_name_argument(&script, flag, node_name) {
        tokio::fs::write(path, patched)
            .await
            .map_err(|e| AgentError::local_file(path, e))?;
        debug!(path = %path.display(), "added node name to join command");
    }
    Ok(())
}

/// Append `flag node_name` to the last command line of `script` unless the
/// flag is already there. `None` when nothing changes.
pub fn ensure_node_name_argument(script: &str, flag: &str, node_name: &str) -> Option<String> {
    let lines: Vec<&str> = script.lines().collect();
    let index = lines.iter().rposition(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })?;

    let already = lines[index]
        .split_whitespace()
        .any(|token| token == flag || token.starts_with(&format!("{}=", flag)));
    if already {
        return None;
    }

    let mut out = String::with_capacity(script.len() + flag.len() + node_name.len() + 2);
    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        if i == index {
            out.push_str(&format!(" {} {}", flag, node_name));
        }
        out.push('\n');
    }
    Some(out)
}
