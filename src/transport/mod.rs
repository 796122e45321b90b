//! Wire transports.
//!
//! Three servers multiplex the same dispatcher: line-framed stdio,
//! the two-endpoint SSE dialect, and the stateful streamable-HTTP
//! dialect with sessions and event-replay ids. No transport carries
//! its own method handling.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub mod sse;
pub mod stdio;
pub mod streamable_http;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable_http::StreamableHttpTransport;

#[async_trait]
pub trait Transport: Send {
    fn name(&self) -> &'static str;

    /// Serve until the shutdown signal fires or the peer goes away.
    async fn serve(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> Result<()>;
}
