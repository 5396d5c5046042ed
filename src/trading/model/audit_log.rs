//! 审计日志实体，写入后不可修改，只允许保留策略清理

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// 可被保留策略清理的低级别日志
    pub fn is_low_severity(&self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Info)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    StrategyExecution,
    SignalGeneration,
    Dispatch,
    Reconciliation,
    Webhook,
    Portfolio,
    Scheduler,
    Maintenance,
    DailyReport,
    Configuration,
    DataIntegrity,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::StrategyExecution => "STRATEGY_EXECUTION",
            LogCategory::SignalGeneration => "SIGNAL_GENERATION",
            LogCategory::Dispatch => "DISPATCH",
            LogCategory::Reconciliation => "RECONCILIATION",
            LogCategory::Webhook => "WEBHOOK",
            LogCategory::Portfolio => "PORTFOLIO",
            LogCategory::Scheduler => "SCHEDULER",
            LogCategory::Maintenance => "MAINTENANCE",
            LogCategory::DailyReport => "DAILY_REPORT",
            LogCategory::Configuration => "CONFIGURATION",
            LogCategory::DataIntegrity => "DATA_INTEGRITY",
        }
    }
}

impl std::str::FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let c = match s.to_uppercase().as_str() {
            "STRATEGY_EXECUTION" => LogCategory::StrategyExecution,
            "SIGNAL_GENERATION" => LogCategory::SignalGeneration,
            "DISPATCH" => LogCategory::Dispatch,
            "RECONCILIATION" => LogCategory::Reconciliation,
            "WEBHOOK" => LogCategory::Webhook,
            "PORTFOLIO" => LogCategory::Portfolio,
            "SCHEDULER" => LogCategory::Scheduler,
            "MAINTENANCE" => LogCategory::Maintenance,
            "DAILY_REPORT" => LogCategory::DailyReport,
            "CONFIGURATION" => LogCategory::Configuration,
            "DATA_INTEGRITY" => LogCategory::DataIntegrity,
            _ => return Err(format!("Unknown log category: {}", s)),
        };
        Ok(c)
    }
}

/// 待写入的审计日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditLogEntry {
    pub strategy_id: Option<i64>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}

impl NewAuditLogEntry {
    pub fn into_entry(self, id: i64) -> AuditLogEntry {
        AuditLogEntry {
            id,
            strategy_id: self.strategy_id,
            level: self.level,
            category: self.category,
            message: self.message,
            context: self.context,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub strategy_id: Option<i64>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: Value,
    pub timestamp: DateTime<Utc>,
}
