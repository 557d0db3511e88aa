//! Concurrent tool execution with per-call timeouts
//!
//! Each call runs under its own timeout inside a semaphore that bounds
//! parallelism. The timeout covers queueing for a permit as well, so a
//! batch of N calls never takes longer than the largest individual timeout
//! regardless of N. Failures never propagate as errors; every call yields a
//! `ToolResult` with an explicit status.

use super::ToolRegistry;
use crate::domain::{ToolCall, ToolResult, ToolStatus};
use chrono::Utc;
use deskwise_common::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Bounded-parallelism executor over an injected registry
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_concurrency: usize, default_timeout: Duration) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            default_timeout,
        }
    }

    /// Execute all calls concurrently; result order matches call order.
    pub async fn execute_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let pending = calls.into_iter().map(|call| self.execute_one(call));
        futures::future::join_all(pending).await
    }

    /// Execute a single call, converting every failure mode into a result
    async fn execute_one(&self, call: ToolCall) -> ToolResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let Some(tool) = self.registry.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Unknown tool requested");
            metrics::record_tool(&call.tool_name, 0.0, ToolStatus::Error.as_str());
            return ToolResult {
                tool_name: call.tool_name.clone(),
                arguments: call.arguments,
                started_at,
                completed_at: Utc::now(),
                status: ToolStatus::Error,
                payload: None,
                error_message: Some(format!("unknown tool: {}", call.tool_name)),
            };
        };

        let timeout = if tool.default_timeout() > Duration::ZERO {
            tool.default_timeout()
        } else {
            self.default_timeout
        };

        // Timeout covers permit wait + execution, so queueing can never
        // stretch a batch past the largest individual timeout
        let outcome = tokio::time::timeout(timeout, async {
            let _permit = self.semaphore.acquire().await.ok();
            tool.execute(&call.arguments).await
        })
        .await;

        let duration = start.elapsed();
        let completed_at = Utc::now();

        let (status, payload, error_message) = match outcome {
            Ok(Ok(payload)) => (ToolStatus::Success, Some(payload), None),
            Ok(Err(e)) => {
                warn!(tool = %call.tool_name, error = %e, "Tool execution failed");
                (ToolStatus::Error, None, Some(e.to_string()))
            }
            Err(_) => {
                warn!(
                    tool = %call.tool_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Tool execution timed out"
                );
                (
                    ToolStatus::Timeout,
                    None,
                    Some(format!("timed out after {}ms", timeout.as_millis())),
                )
            }
        };

        metrics::record_tool(&call.tool_name, duration.as_secs_f64(), status.as_str());
        debug!(
            tool = %call.tool_name,
            status = status.as_str(),
            duration_ms = duration.as_millis() as u64,
            "Tool call finished"
        );

        ToolResult {
            tool_name: call.tool_name,
            arguments: call.arguments,
            started_at,
            completed_at,
            status,
            payload,
            error_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use deskwise_common::errors::{AppError, Result};
    use serde_json::json;

    struct FastTool;

    #[async_trait::async_trait]
    impl Tool for FastTool {
        fn name(&self) -> &str {
            "fast"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _: &serde_json::Value) -> Result<serde_json::Value> {
            Ok(json!({ "ok": true }))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        fn default_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
        async fn execute(&self, _: &serde_json::Value) -> Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({ "never": "reached" }))
        }
    }

    struct BrokenTool;

    #[async_trait::async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _: &serde_json::Value) -> Result<serde_json::Value> {
            Err(AppError::Internal {
                message: "boom".into(),
            })
        }
    }

    fn executor() -> ToolExecutor {
        let registry = ToolRegistry::new()
            .register(Arc::new(FastTool))
            .register(Arc::new(SlowTool))
            .register(Arc::new(BrokenTool));
        ToolExecutor::new(Arc::new(registry), 4, Duration::from_secs(10))
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            tool_name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let results = executor().execute_all(vec![call("nonexistent")]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ToolStatus::Error);
        assert!(results[0].error_message.as_ref().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_others() {
        // The slow call times out; the fast ones still complete
        let results = executor()
            .execute_all(vec![call("slow"), call("fast"), call("fast")])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ToolStatus::Timeout);
        assert_eq!(results[1].status, ToolStatus::Success);
        assert_eq!(results[2].status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn test_batch_never_blocks_past_max_timeout() {
        let registry = ToolRegistry::new().register(Arc::new(SlowTool));
        // Concurrency 1 forces queueing; the timeout still caps the batch
        let executor = ToolExecutor::new(Arc::new(registry), 1, Duration::from_secs(10));

        let start = Instant::now();
        let results = executor
            .execute_all((0..6).map(|_| call("slow")).collect())
            .await;

        assert!(results.iter().all(|r| r.status == ToolStatus::Timeout));
        // Max individual timeout is 50ms; allow generous scheduling slack
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_error_is_captured_not_propagated() {
        let results = executor().execute_all(vec![call("broken"), call("fast")]).await;
        assert_eq!(results[0].status, ToolStatus::Error);
        assert_eq!(results[0].error_message.as_deref(), Some("Internal server error: boom"));
        assert_eq!(results[1].status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn test_result_order_matches_call_order() {
        let results = executor()
            .execute_all(vec![call("fast"), call("broken"), call("fast")])
            .await;
        assert_eq!(results[0].tool_name, "fast");
        assert_eq!(results[1].tool_name, "broken");
        assert_eq!(results[2].tool_name, "fast");
    }

    #[tokio::test]
    async fn test_timestamps_are_ordered() {
        let results = executor().execute_all(vec![call("fast")]).await;
        assert!(results[0].completed_at >= results[0].started_at);
    }
}
