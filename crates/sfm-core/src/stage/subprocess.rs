//! Subprocess plumbing for the Python bridge.
//!
//! stdout is parsed as JSON reply lines while stderr is drained concurrently
//! and logged at debug level, keeping a short tail for error messages.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Result, SfmError};

const STDERR_TAIL_LINES: usize = 20;

/// JSON line emitted by the bridge script.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BridgeReply {
    pub kind: String,
    #[serde(default)]
    pub params: Option<Vec<String>>,
    #[serde(default)]
    pub conf: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BridgeOutput {
    pub status: ExitStatus,
    pub replies: Vec<BridgeReply>,
    pub stderr_tail: Vec<String>,
}

impl BridgeOutput {
    pub fn reply(&self, kind: &str) -> Option<&BridgeReply> {
        self.replies.iter().rev().find(|r| r.kind == kind)
    }

    /// Best available description of a failure.
    pub fn failure_message(&self) -> String {
        if let Some(message) = self.replies.iter().rev().find_map(|r| r.message.clone()) {
            return message;
        }
        match self.stderr_tail.last() {
            Some(line) => format!(
                "exited with status {}: {}",
                self.status.code().unwrap_or(-1),
                line
            ),
            None => format!("exited with status {}", self.status.code().unwrap_or(-1)),
        }
    }
}

/// Run `python script args...`, optionally feeding `stdin`, and collect replies.
pub(crate) async fn run_bridge(
    python: &Path,
    script: &Path,
    args: &[&str],
    stdin: Option<String>,
    label: &str,
) -> Result<BridgeOutput> {
    let mut child = Command::new(python)
        .arg(script)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SfmError::Bridge {
            message: format!("failed to spawn {} for {}: {}", python.display(), label, e),
        })?;

    if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(payload.as_bytes())
            .await
            .map_err(|e| SfmError::Bridge {
                message: format!("failed to send payload to {}: {}", label, e),
            })?;
        // Dropping the pipe closes stdin so the script sees EOF.
    }

    let stdout = child.stdout.take().ok_or_else(|| SfmError::Bridge {
        message: format!("{}: stdout was not captured", label),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| SfmError::Bridge {
        message: format!("{}: stderr was not captured", label),
    })?;

    let (replies, stderr_tail) = tokio::join!(
        collect_replies(stdout, label),
        drain_stderr(stderr, label)
    );

    let status = child.wait().await.map_err(|e| SfmError::Bridge {
        message: format!("{} process error: {}", label, e),
    })?;

    Ok(BridgeOutput {
        status,
        replies,
        stderr_tail,
    })
}

async fn collect_replies<R: AsyncRead + Unpin>(stdout: R, label: &str) -> Vec<BridgeReply> {
    let mut reader = BufReader::new(stdout).lines();
    let mut replies = Vec::new();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<BridgeReply>(&line) {
                Ok(reply) => replies.push(reply),
                Err(_) => debug!("[{}] stdout: {}", label, line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} stdout: {}", label, e);
                break;
            }
        }
    }
    replies
}

async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R, label: &str) -> Vec<String> {
    let mut reader = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                debug!("[{}] stderr: {}", label, line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} stderr: {}", label, e);
                break;
            }
        }
    }
    tail.into_iter().collect()
}
