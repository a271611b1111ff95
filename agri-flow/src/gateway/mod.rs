//! Tool Gateway – uniform, resilient invocation of the external capabilities.
//!
//! Every call goes through [`ToolGateway::invoke`] (or
//! [`ToolGateway::invoke_side_effect`] for calls that create something
//! externally). The gateway applies the per-tool timeout, retries transient
//! failures with exponential backoff and always returns a [`ToolResult`];
//! it never hands an error back to the caller.

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{config::GatewayConfig, error::FlowError};

/// Argument name used to forward idempotency keys to the backend.
pub const IDEMPOTENCY_KEY_ARG: &str = "idempotency_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Classify,
    Prescribe,
    Insure,
    FindVendor,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Classify => "classify",
            ToolName::Prescribe => "prescribe",
            ToolName::Insure => "insure",
            ToolName::FindVendor => "find_vendor",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The per-tool timeout elapsed - retryable
    Timeout,
    /// Could not reach the service - retryable
    Connection,
    /// 5xx-equivalent - retryable
    Server,
    /// 4xx-equivalent, the request itself is wrong - not retryable
    Client,
    /// Response could not be understood - not retryable
    Malformed,
    /// Pre-flight health probe failed
    Unhealthy,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection | Self::Server)
    }
}

/// Error reported by a transport for a single attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Server, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Client, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }
}

/// Outcome of a gateway invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success {
        data: Value,
        attempts: u32,
    },
    Failure {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },
}

impl ToolResult {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Convert into the crate error type so handlers can use `?`.
    pub fn into_data(self, tool: ToolName) -> crate::Result<Value> {
        match self {
            Self::Success { data, .. } => Ok(data),
            Self::Failure { message, .. } => {
                Err(FlowError::tool_unavailable(tool.as_str(), message))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Success,
    Failure { kind: FailureKind },
}

/// Bookkeeping for one gateway invocation. Logged, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    pub tool: ToolName,
    pub arguments: Value,
    pub attempts: u32,
    pub outcome: InvocationOutcome,
    pub latency_ms: u128,
}

/// Transport to the external capabilities, one request/response per call.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(&self, tool: ToolName, arguments: &Value) -> Result<Value, ToolError>;

    /// Pre-flight probe; transports without a health endpoint report healthy.
    async fn health(&self, _tool: ToolName) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct ToolGateway {
    transport: Arc<dyn ToolTransport>,
    config: GatewayConfig,
}

impl ToolGateway {
    pub fn new(transport: Arc<dyn ToolTransport>, config: GatewayConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Invoke a tool that is safe to repeat.
    pub async fn invoke(&self, tool: ToolName, arguments: Value) -> ToolResult {
        self.run(tool, arguments, self.config.max_attempts.max(1))
            .await
    }

    /// Invoke a tool that creates something externally (e.g. a certificate).
    ///
    /// Without an idempotency key the call is attempted exactly once. With a
    /// key, the key is forwarded to the backend and transient failures are
    /// retried like any other call.
    pub async fn invoke_side_effect(
        &self,
        tool: ToolName,
        mut arguments: Value,
        idempotency_key: Option<&str>,
    ) -> ToolResult {
        match idempotency_key {
            Some(key) => {
                if let Value::Object(map) = &mut arguments {
                    map.insert(IDEMPOTENCY_KEY_ARG.to_string(), Value::String(key.to_string()));
                }
                self.run(tool, arguments, self.config.max_attempts.max(1))
                    .await
            }
            None => {
                warn!(tool = %tool, "Side-effecting call without idempotency key, retries disabled");
                self.run(tool, arguments, 1).await
            }
        }
    }

    /// Delay before retry number `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .base_delay()
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn run(&self, tool: ToolName, arguments: Value, max_attempts: u32) -> ToolResult {
        let started = Instant::now();

        if self.config.health_check && !self.transport.health(tool).await {
            warn!(tool = %tool, "Health probe failed, skipping invocation");
            let result = ToolResult::Failure {
                kind: FailureKind::Unhealthy,
                message: format!("{tool} failed its health check"),
                attempts: 0,
            };
            self.record(tool, arguments, &result, started);
            return result;
        }

        let timeout = self.config.timeout_for(tool);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            debug!(tool = %tool, attempt, "Invoking tool");

            let outcome = match tokio::time::timeout(timeout, self.transport.call(tool, &arguments))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::timeout(format!(
                    "{tool} did not answer within {}s",
                    timeout.as_secs_f32()
                ))),
            };

            match outcome {
                Ok(data) => {
                    break ToolResult::Success {
                        data,
                        attempts: attempt,
                    };
                }
                Err(e) if e.kind.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        tool = %tool,
                        attempt,
                        max_attempts,
                        kind = ?e.kind,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient tool failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        tool = %tool,
                        attempt,
                        kind = ?e.kind,
                        error = %e,
                        "Tool invocation failed"
                    );
                    break ToolResult::Failure {
                        kind: e.kind,
                        message: e.message,
                        attempts: attempt,
                    };
                }
            }
        };

        self.record(tool, arguments, &result, started);
        result
    }

    fn record(&self, tool: ToolName, arguments: Value, result: &ToolResult, started: Instant) {
        let record = InvocationRecord {
            tool,
            arguments: redact(arguments),
            attempts: result.attempts(),
            outcome: match result {
                ToolResult::Success { .. } => InvocationOutcome::Success,
                ToolResult::Failure { kind, .. } => InvocationOutcome::Failure { kind: *kind },
            },
            latency_ms: started.elapsed().as_millis(),
        };
        info!(
            tool = %record.tool,
            attempts = record.attempts,
            latency_ms = record.latency_ms as u64,
            outcome = ?record.outcome,
            arguments = %record.arguments,
            "Tool invocation finished"
        );
    }
}

/// Drop image payloads from logged arguments.
fn redact(mut arguments: Value) -> Value {
    if let Some(image) = arguments.get_mut("image") {
        if let Some(data) = image.as_str() {
            *image = Value::String(format!("<{} bytes base64>", data.len()));
        }
    }
    arguments
}
