//! Prometheus metrics following the usual naming conventions.
//!
//! The registry is process-global; exposition is left to the embedding
//! host, which can call [`gather_text`] from whatever surface it owns.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_counter, register_counter_vec, register_int_gauge, Counter, CounterVec,
    Encoder, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref MCP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "omnigate_mcp_requests_total",
            "MCP requests processed, by method and outcome"
        ),
        &["method", "status"]
    )
    .unwrap();

    pub static ref TOOL_EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        opts!(
            "omnigate_tool_executions_total",
            "Tool executions, by tool name and outcome"
        ),
        &["tool", "status"]
    )
    .unwrap();

    pub static ref CONFIG_RELOADS_TOTAL: Counter = register_counter!(
        "omnigate_config_reloads_total",
        "Successful configuration hot reloads"
    )
    .unwrap();

    pub static ref CONFIG_RELOAD_ERRORS: Counter = register_counter!(
        "omnigate_config_reload_errors_total",
        "Configuration reloads rejected, previous tree kept"
    )
    .unwrap();

    pub static ref SSH_POOL_CONNECTIONS: IntGauge = register_int_gauge!(
        "omnigate_ssh_pool_connections",
        "Open SSH connections held by the pool"
    )
    .unwrap();

    pub static ref ACTIVE_SESSIONS: IntGauge = register_int_gauge!(
        "omnigate_active_sessions",
        "Live streamable-HTTP sessions"
    )
    .unwrap();
}

/// Encode the default registry in Prometheus text format.
pub fn gather_text() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_encode() {
        MCP_REQUESTS_TOTAL
            .with_label_values(&["tools/list", "ok"])
            .inc();
        CONFIG_RELOADS_TOTAL.inc();
        let text = gather_text();
        assert!(text.contains("omnigate_mcp_requests_total"));
        assert!(text.contains("omnigate_config_reloads_total"));
    }
}
