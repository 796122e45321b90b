//! Stdio transport: line-framed JSON on standard in/out.
//!
//! Stdout is reserved for protocol traffic; all logging goes to stderr
//! (the tracing subscriber is configured that way at startup). The loop
//! is serial by design: one request is fully consumed and answered
//! before the next line is read, so no request overtakes another.

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::{RpcResponse, PARSE_ERROR};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct StdioTransport {
    dispatcher: Arc<Dispatcher>,
}

impl StdioTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Handle one input line; the returned string is already a complete
    /// JSON value to be written with a trailing newline.
    pub async fn process_line(dispatcher: &Dispatcher, line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                debug!("unparseable frame: {e}");
                let response =
                    RpcResponse::failure(None, PARSE_ERROR, format!("parse error: {e}"));
                return serde_json::to_string(&response).ok();
            }
        };

        let response = dispatcher.handle_envelope(value).await?;
        serde_json::to_string(&response).ok()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn name(&self) -> &'static str {
        "stdio"
    }

    async fn serve(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("stdio transport ready");
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("stdio transport shutting down");
                    break;
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if let Some(response) =
                                Self::process_line(&self.dispatcher, &line).await
                            {
                                stdout.write_all(response.as_bytes()).await?;
                                stdout.write_all(b"\n").await?;
                                stdout.flush().await?;
                            }
                        }
                        None => {
                            info!("stdin closed, stdio transport exiting");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
