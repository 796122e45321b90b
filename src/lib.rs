//! Omnigate library.
//!
//! An MCP gateway: JSON-RPC 2.0 over stdio, SSE, or streamable-HTTP on
//! the client side; SSH hosts and HTTP endpoints on the backend side,
//! addressed either directly or through registered resources.
//! This library can be embedded in other applications.

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod resource;
pub mod security;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
