// Subprocess transport: newline-delimited JSON-RPC over the child's stdio.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};

use crate::mcp::error::McpError;

/// How long `close` waits for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct StdioTransport {
    server_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Value>>,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Spawn `command args...` with `env` layered over the ambient environment.
    pub fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        tracing::debug!(server_id, command, ?args, "MCP: spawning stdio server");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connect {
                server_id: server_id.to_string(),
                reason: format!("failed to spawn '{}': {}", command, e),
            })?;

        let missing = |what: &str| McpError::Connect {
            server_id: server_id.to_string(),
            reason: format!("child {} was not captured", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        spawn_stdout_reader(server_id.to_string(), stdout, tx, alive.clone());
        spawn_stderr_drain(server_id.to_string(), stderr);

        Ok(Self {
            server_id: server_id.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            inbound: Mutex::new(rx),
            alive,
        })
    }

    pub async fn send(&self, message: &Value) -> Result<(), McpError> {
        let mut payload = serde_json::to_vec(message)
            .map_err(|e| McpError::Transport(format!("failed to encode message: {}", e)))?;
        payload.push(b'\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdio transport is closed".into()))?;

        let written = async {
            stdin.write_all(&payload).await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| {
            self.alive.store(false, Ordering::Release);
            McpError::Transport(format!("write to '{}' failed: {}", self.server_id, e))
        })
    }

    pub async fn receive(&self) -> Option<Value> {
        self.inbound.lock().await.recv().await
    }

    pub async fn close(&self) {
        self.alive.store(false, Ordering::Release);
        // Dropping stdin sends EOF; well-behaved servers exit on their own.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!(server_id = %self.server_id, "MCP: kill failed (already exited?): {}", e);
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server_id = %self.server_id, %status, "MCP: stdio server exited")
            }
            Ok(Err(e)) => tracing::warn!(server_id = %self.server_id, "MCP: wait failed: {}", e),
            Err(_) => tracing::warn!(
                server_id = %self.server_id,
                "MCP: stdio server not reaped within {}s",
                REAP_TIMEOUT.as_secs()
            ),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// OS process id, while the child is still owned by the transport.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(|c| c.id())
    }
}

fn spawn_stdout_reader(
    server_id: String,
    stdout: ChildStdout,
    tx: mpsc::UnboundedSender<Value>,
    alive: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match super::decode_messages(line) {
                        Ok(messages) => {
                            for message in messages {
                                if tx.send(message).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => tracing::warn!(
                            server_id = %server_id,
                            "MCP: discarding non-JSON stdout line: {}",
                            e
                        ),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(server_id = %server_id, "MCP: stdout read failed: {}", e);
                    break;
                }
            }
        }
        alive.store(false, Ordering::Release);
        tracing::debug!(server_id = %server_id, "MCP: stdio server closed stdout");
    });
}

fn spawn_stderr_drain(server_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server_id = %server_id, "MCP stderr: {}", line);
        }
    });
}
