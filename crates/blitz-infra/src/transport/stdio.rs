//! Stdio channel opener.
//!
//! Spawns the tool server as a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is forwarded to the log. The child
//! is killed when the channel shuts down or the opener's tasks are dropped.

use std::collections::BTreeMap;
use std::process::Stdio;

use blitz_core::transport::{Channel, ChannelOpener};
use blitz_types::error::TransportError;
use blitz_types::tool::TransportKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 64;

pub struct StdioOpener {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl StdioOpener {
    pub fn new(command: &str, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
        }
    }
}

impl ChannelOpener for StdioOpener {
    async fn open(&self) -> Result<Channel, TransportError> {
        let spawn_err = |message: String| TransportError::Connection {
            attempts: 1,
            message,
        };

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_err(format!("failed to spawn '{}': {e}", self.command)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("child stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();
        tracing::info!(command = %self.command, pid = child.id(), "tool server process started");

        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    frame = out_rx.recv() => {
                        let Some(mut line) = frame else { break };
                        line.push('\n');
                        let written = async {
                            stdin.write_all(line.as_bytes()).await?;
                            stdin.flush().await
                        }
                        .await;
                        if let Err(e) = written {
                            tracing::warn!(error = %e, "write to tool server stdin failed");
                            break;
                        }
                    }
                }
            }
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) if line.trim().is_empty() => {}
                        Ok(Some(line)) => {
                            if in_tx.send(line).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::info!("tool server closed stdout");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "read from tool server stdout failed");
                            break;
                        }
                    },
                }
            }
            drop(in_tx);
            let _ = child.start_kill();
            match child.wait().await {
                Ok(status) => tracing::info!(%status, "tool server process exited"),
                Err(e) => tracing::warn!(error = %e, "failed to reap tool server process"),
            }
        });

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "blitz::tool_server", "{line}");
                }
            });
        }

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn endpoint(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cat_echoes_lines() {
        let opener = StdioOpener::new("cat", Vec::new(), BTreeMap::new());
        let mut channel = opener.open().await.unwrap();
        channel
            .outbound
            .send(r#"{"jsonrpc":"2.0","id":7,"result":null}"#.to_string())
            .await
            .unwrap();
        let line = channel.inbound.recv().await.unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":7,"result":null}"#);

        channel.shutdown.cancel();
        assert!(channel.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_exit_ends_inbound() {
        let opener = StdioOpener::new("true", Vec::new(), BTreeMap::new());
        let mut channel = opener.open().await.unwrap();
        assert!(channel.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let opener = StdioOpener::new("/nonexistent/blitz-tool-server", Vec::new(), BTreeMap::new());
        assert!(matches!(
            opener.open().await,
            Err(TransportError::Connection { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_endpoint_label() {
        let opener = StdioOpener::new("uvx", vec!["mcp-server".into(), "--stdio".into()], BTreeMap::new());
        assert_eq!(opener.endpoint(), "uvx mcp-server --stdio");
    }
}
