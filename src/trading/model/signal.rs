//! 交易信号与其状态机
//!
//! ```text
//! PENDING --派发成功--> SENT --对账成功--> EXECUTED
//! PENDING --派发成功--> SENT --对账失败--> FAILED
//! PENDING --重试耗尽--> FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DataIntegrityViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
        }
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "STRONG_BUY" | "STRONG BUY" => Ok(SignalType::Buy),
            "SELL" | "STRONG_SELL" | "STRONG SELL" => Ok(SignalType::Sell),
            "HOLD" => Ok(SignalType::Hold),
            _ => Err(format!("Unknown signal type: {}", s)),
        }
    }
}

/// 置信度等级，外部工作流按 HIGH 分支
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
            Confidence::VeryHigh => "VERY_HIGH",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(Confidence::Low),
            "MEDIUM" => Ok(Confidence::Medium),
            "HIGH" => Ok(Confidence::High),
            "VERY_HIGH" => Ok(Confidence::VeryHigh),
            _ => Err(format!("Unknown confidence: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Pending,
    Sent,
    Executed,
    Failed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "PENDING",
            SignalStatus::Sent => "SENT",
            SignalStatus::Executed => "EXECUTED",
            SignalStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalStatus::Executed | SignalStatus::Failed)
    }

    /// 状态迁移表，只允许向前推进
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        matches!(
            (self, next),
            (SignalStatus::Pending, SignalStatus::Sent)
                | (SignalStatus::Pending, SignalStatus::Failed)
                | (SignalStatus::Sent, SignalStatus::Executed)
                | (SignalStatus::Sent, SignalStatus::Failed)
        )
    }
}

impl std::str::FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(SignalStatus::Pending),
            "SENT" => Ok(SignalStatus::Sent),
            "EXECUTED" => Ok(SignalStatus::Executed),
            "FAILED" => Ok(SignalStatus::Failed),
            _ => Err(format!("Unknown signal status: {}", s)),
        }
    }
}

/// 交易信号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub strategy_id: i64,
    pub symbol: String,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub target_price: Option<f64>,
    pub quantity: f64,
    pub status: SignalStatus,
    /// 仅在 PENDING -> SENT 时赋值一次
    pub external_execution_id: Option<String>,
    pub execution_response: Option<Value>,
    pub error_message: Option<String>,
    pub technical_data: Value,
    /// 连续派发失败次数
    pub dispatch_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 新建信号的入参，状态固定为 PENDING
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub strategy_id: i64,
    pub symbol: String,
    pub signal_type: SignalType,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub target_price: Option<f64>,
    pub quantity: f64,
    pub technical_data: Value,
    pub created_at: DateTime<Utc>,
}

impl NewSignal {
    pub fn into_signal(self, id: i64) -> Signal {
        Signal {
            id,
            strategy_id: self.strategy_id,
            symbol: self.symbol,
            signal_type: self.signal_type,
            confidence: self.confidence,
            confidence_score: self.confidence_score,
            target_price: self.target_price,
            quantity: self.quantity,
            status: SignalStatus::Pending,
            external_execution_id: None,
            execution_response: None,
            error_message: None,
            technical_data: self.technical_data,
            dispatch_attempts: 0,
            created_at: self.created_at,
            sent_at: None,
            executed_at: None,
            updated_at: self.created_at,
        }
    }
}

/// 比较并设置（CAS）时携带的变更
#[derive(Debug, Clone, PartialEq)]
pub enum SignalUpdate {
    /// PENDING -> SENT
    MarkSent { execution_id: String, at: DateTime<Utc> },
    /// SENT -> EXECUTED
    MarkExecuted { at: DateTime<Utc>, response: Value },
    /// PENDING/SENT -> FAILED
    MarkFailed {
        error: String,
        response: Option<Value>,
        at: DateTime<Utc>,
    },
    /// 保持 PENDING，失败计数加一
    RecordDispatchFailure { error: String, at: DateTime<Utc> },
}

impl SignalUpdate {
    pub fn target_status(&self, expected: SignalStatus) -> SignalStatus {
        match self {
            SignalUpdate::MarkSent { .. } => SignalStatus::Sent,
            SignalUpdate::MarkExecuted { .. } => SignalStatus::Executed,
            SignalUpdate::MarkFailed { .. } => SignalStatus::Failed,
            SignalUpdate::RecordDispatchFailure { .. } => expected,
        }
    }

    /// 校验变更本身是否合法，与行的当前状态无关
    pub fn validate(&self, signal_id: i64, expected: SignalStatus) -> Result<(), DataIntegrityViolation> {
        let target = self.target_status(expected);
        let ok = match self {
            SignalUpdate::RecordDispatchFailure { .. } => expected == SignalStatus::Pending,
            _ => expected.can_transition_to(target),
        };
        if ok {
            Ok(())
        } else {
            Err(DataIntegrityViolation::InvalidTransition {
                signal_id,
                from: expected,
                to: target,
            })
        }
    }
}

impl Signal {
    /// 在内存中应用 CAS 变更；调用方保证 `self.status == expected`
    pub fn apply_update(&mut self, expected: SignalStatus, update: SignalUpdate) -> Result<(), DataIntegrityViolation> {
        update.validate(self.id, expected)?;
        match update {
            SignalUpdate::MarkSent { execution_id, at } => {
                if self.external_execution_id.is_some() {
                    return Err(DataIntegrityViolation::ExecutionIdAlreadySet { signal_id: self.id });
                }
                self.status = SignalStatus::Sent;
                self.external_execution_id = Some(execution_id);
                self.sent_at = Some(at);
                self.updated_at = at;
            }
            SignalUpdate::MarkExecuted { at, response } => {
                self.status = SignalStatus::Executed;
                self.executed_at = Some(at);
                self.execution_response = Some(response);
                self.updated_at = at;
            }
            SignalUpdate::MarkFailed { error, response, at } => {
                self.status = SignalStatus::Failed;
                self.error_message = Some(error);
                if response.is_some() {
                    self.execution_response = response;
                }
                self.updated_at = at;
            }
            SignalUpdate::RecordDispatchFailure { error, at } => {
                self.dispatch_attempts += 1;
                self.error_message = Some(error);
                self.updated_at = at;
            }
        }
        Ok(())
    }
}
