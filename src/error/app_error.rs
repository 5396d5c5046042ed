use std::fmt;
use thiserror::Error;

use crate::trading::model::signal::SignalStatus;

/// 应用错误
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置错误（非法区间、缺失的必填项等）
    #[error("配置错误: {0}")]
    Config(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    DbError(String),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

/// 外部调用的分类结果：临时错误下次调度重试，终态错误直接落库
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    /// 网络、超时、5xx、限流
    #[error("外部服务暂时不可用 [{service}]: {message}")]
    Transient { service: &'static str, message: String },

    /// 明确的失败状态或无法解析的响应
    #[error("外部服务返回失败 [{service}]: {message}")]
    Terminal { service: &'static str, message: String },
}

impl ExternalError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    pub fn terminal(service: &'static str, message: impl Into<String>) -> Self {
        Self::Terminal {
            service,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Terminal { message, .. } => message,
        }
    }

    /// 把 reqwest 错误归类：超时、连接、请求发送阶段的失败都视为临时错误
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::transient(service, err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::terminal(service, err.to_string())
        } else {
            Self::transient(service, err.to_string())
        }
    }

    /// 根据 HTTP 状态码归类：429 与 5xx 可重试
    pub fn from_status(service: &'static str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 256));
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::transient(service, message)
        } else {
            Self::terminal(service, message)
        }
    }
}

/// 非法或倒退的状态迁移
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataIntegrityViolation {
    #[error("非法状态迁移: signal={signal_id} {from:?} -> {to:?}")]
    InvalidTransition {
        signal_id: i64,
        from: SignalStatus,
        to: SignalStatus,
    },

    #[error("external_execution_id 已存在，拒绝重复赋值: signal={signal_id}")]
    ExecutionIdAlreadySet { signal_id: i64 },
}

/// 仓储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityViolation),

    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("数据库错误: {0}")]
    Db(String),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rbatis::Error> for StoreError {
    fn from(err: rbatis::Error) -> Self {
        StoreError::Db(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::DbError(err.to_string())
    }
}

/// 截断过长的响应体，避免日志与 error_message 被撑爆
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// 把任何错误转换为 AppError
pub fn to_err<E: std::error::Error + Send + Sync + 'static>(err: E) -> AppError {
    AppError::Unknown(err.to_string())
}

/// 错误级别展示用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    TransientExternal,
    TerminalExternal,
    DataIntegrity,
    Configuration,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::TransientExternal => "TransientExternalError",
            ErrorClass::TerminalExternal => "TerminalExternalError",
            ErrorClass::DataIntegrity => "DataIntegrityViolation",
            ErrorClass::Configuration => "ConfigurationError",
        };
        f.write_str(s)
    }
}

impl From<&ExternalError> for ErrorClass {
    fn from(err: &ExternalError) -> Self {
        if err.is_transient() {
            ErrorClass::TransientExternal
        } else {
            ErrorClass::TerminalExternal
        }
    }
}
