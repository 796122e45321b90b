//! Backend executors: direct HTTP requests and SSH command execution.

use std::time::Duration;

pub mod http;
pub mod ssh;

pub use http::{HttpExecutor, HttpRequestSpec, HttpResponseData};
pub use ssh::{ExecOutput, SshConnector, SshExecutor, SshSession, SshTarget};

/// Exponential backoff delay: `base * factor^attempt`, capped.
/// Deterministic on purpose so retry behavior is testable.
pub fn backoff_delay(base_ms: u64, factor: f64, attempt: u32, cap_ms: u64) -> Duration {
    let raw = (base_ms as f64) * factor.powi(attempt as i32);
    Duration::from_millis((raw as u64).min(cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay(200, 2.0, 0, 5_000).as_millis(), 200);
        assert_eq!(backoff_delay(200, 2.0, 1, 5_000).as_millis(), 400);
        assert_eq!(backoff_delay(200, 2.0, 2, 5_000).as_millis(), 800);
        assert_eq!(backoff_delay(200, 2.0, 10, 5_000).as_millis(), 5_000);
    }
}
