//! 审计日志
//!
//! 写入失败只记录进程日志，不向调用方传播，审计不能拖垮业务流程。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::trading::model::{LogCategory, LogLevel, NewAuditLogEntry};
use crate::trading::store::AuditLogStore;

#[derive(Clone)]
pub struct AuditLogger {
    store: Arc<dyn AuditLogStore>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditLogStore>) -> Self {
        Self { store }
    }

    pub async fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        strategy_id: Option<i64>,
        message: impl Into<String>,
        context: Value,
    ) {
        let message = message.into();
        let context = if context.is_null() { json!({}) } else { context };
        match level {
            LogLevel::Debug => debug!(category = category.as_str(), ?strategy_id, %context, "{}", message),
            LogLevel::Info => info!(category = category.as_str(), ?strategy_id, %context, "{}", message),
            LogLevel::Warn => warn!(category = category.as_str(), ?strategy_id, %context, "{}", message),
            LogLevel::Error => error!(category = category.as_str(), ?strategy_id, %context, "{}", message),
        }

        let entry = NewAuditLogEntry {
            strategy_id,
            level,
            category,
            message,
            context,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append(entry).await {
            error!("审计日志写入失败: category={}, err={}", category.as_str(), e);
        }
    }

    pub async fn debug(&self, category: LogCategory, strategy_id: Option<i64>, message: impl Into<String>, context: Value) {
        self.log(LogLevel::Debug, category, strategy_id, message, context).await
    }

    pub async fn info(&self, category: LogCategory, strategy_id: Option<i64>, message: impl Into<String>, context: Value) {
        self.log(LogLevel::Info, category, strategy_id, message, context).await
    }

    pub async fn warn(&self, category: LogCategory, strategy_id: Option<i64>, message: impl Into<String>, context: Value) {
        self.log(LogLevel::Warn, category, strategy_id, message, context).await
    }

    pub async fn error(&self, category: LogCategory, strategy_id: Option<i64>, message: impl Into<String>, context: Value) {
        self.log(LogLevel::Error, category, strategy_id, message, context).await
    }
}
