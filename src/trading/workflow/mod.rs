//! 外部工作流引擎契约
//!
//! 只依赖两个接口：触发（trigger）与执行状态查询（status）。工作流内部结构不在本服务范围内。

pub mod n8n_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExternalError;
use crate::trading::model::{Confidence, Signal, SignalType};

pub use n8n_client::N8nClient;

pub const DEFAULT_FAILURE_MESSAGE: &str = "N8N execution failed";

/// 触发请求体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub signal_id: i64,
    pub strategy_id: i64,
    pub symbol: String,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub quantity: f64,
    pub target_price: Option<f64>,
    pub callback_url: String,
}

impl TriggerPayload {
    pub fn from_signal(signal: &Signal, callback_url: String) -> Self {
        Self {
            signal_id: signal.id,
            strategy_id: signal.strategy_id,
            symbol: signal.symbol.clone(),
            signal_type: signal.signal_type,
            confidence: signal.confidence,
            confidence_score: signal.confidence_score,
            quantity: signal.quantity,
            target_price: signal.target_price,
            callback_url,
        }
    }
}

/// 执行状态
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStatus {
    pub finished: bool,
    pub success: bool,
    pub error: Option<String>,
    /// 原始响应，落库到 execution_response
    pub raw: Value,
}

impl ExecutionStatus {
    pub fn running(raw: Value) -> Self {
        Self {
            finished: false,
            success: false,
            error: None,
            raw,
        }
    }

    /// 解析状态响应
    ///
    /// 兼容 `{finished, success, error}` 与 n8n 原生的 `{finished, status: "success" | "error" | ...}` 两种形式。
    pub fn from_value(raw: Value) -> Self {
        let status = raw.get("status").and_then(Value::as_str).map(str::to_lowercase);
        // n8n 失败的执行仍返回 finished=false，终态以 status 为准
        let terminal_status = matches!(status.as_deref(), Some("success" | "error" | "crashed" | "canceled"));
        let finished = terminal_status || raw.get("finished").and_then(Value::as_bool).unwrap_or(false);
        let success = match raw.get("success").and_then(Value::as_bool) {
            Some(success) => success,
            None => status.as_deref() == Some("success"),
        };
        let error = extract_error(&raw);
        Self {
            finished,
            success,
            error,
            raw,
        }
    }

    /// 失败时写入 error_message 的内容
    pub fn failure_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string())
    }
}

fn extract_error(raw: &Value) -> Option<String> {
    match raw.get("error") {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Object(obj)) => {
            if let Some(msg) = obj.get("message").and_then(Value::as_str) {
                return Some(msg.to_string());
            }
        }
        _ => {}
    }
    raw.pointer("/data/resultData/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 从触发响应中取出执行 id，兼容字符串与数字
pub fn extract_execution_id(raw: &Value) -> Option<String> {
    let candidates = [
        "/executionId",
        "/execution_id",
        "/id",
        "/data/executionId",
        "/data/id",
    ];
    candidates.iter().find_map(|p| match raw.pointer(p) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// 触发工作流，返回外部执行 id
    async fn trigger(&self, workflow_id: &str, payload: &TriggerPayload) -> Result<String, ExternalError>;

    /// 查询执行状态
    async fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, ExternalError>;
}
