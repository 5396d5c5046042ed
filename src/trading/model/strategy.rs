//! 自动交易策略与机器人配置
//!
//! 两者都由用户在本服务之外维护，这里只读取（`last_executed` 除外）。

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// 策略状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    /// 运行中
    Active,
    /// 已停止
    #[default]
    Stopped,
    /// 暂停
    Paused,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "ACTIVE",
            StrategyStatus::Stopped => "STOPPED",
            StrategyStatus::Paused => "PAUSED",
        }
    }
}

impl std::str::FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(StrategyStatus::Active),
            "STOPPED" => Ok(StrategyStatus::Stopped),
            "PAUSED" => Ok(StrategyStatus::Paused),
            _ => Err(format!("Unknown strategy status: {}", s)),
        }
    }
}

pub const DEFAULT_COOLDOWN_SECONDS: u64 = 300;
pub const DEFAULT_TRADE_QUANTITY: f64 = 10.0;

fn default_cooldown_seconds() -> u64 {
    DEFAULT_COOLDOWN_SECONDS
}

fn default_trade_quantity() -> f64 {
    DEFAULT_TRADE_QUANTITY
}

/// 自动交易策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    #[serde(default)]
    pub status: StrategyStatus,
    /// 跟踪的标的，有序；ACTIVE 时不为空
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub portfolio_id: Option<i64>,
    #[serde(default)]
    pub max_daily_trades: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// 生成信号时使用的下单数量
    #[serde(default = "default_trade_quantity")]
    pub trade_quantity: f64,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_workflow_id: Option<String>,
    #[serde(default)]
    pub external_webhook_url: Option<String>,
}

impl Strategy {
    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }
}

fn default_trading_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_trading_end() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// 用户级机器人配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub owner_id: i64,
    #[serde(default)]
    pub is_enabled: bool,
    /// 本地墙上时间，默认 09:00
    #[serde(default = "default_trading_start")]
    pub trading_start_time: NaiveTime,
    /// 本地墙上时间，默认 16:00
    #[serde(default = "default_trading_end")]
    pub trading_end_time: NaiveTime,
    /// 用户时区（相对 UTC 的秒数），缺省使用全局默认时区
    #[serde(default)]
    pub utc_offset_secs: Option<i32>,
}

impl BotConfiguration {
    pub fn new(owner_id: i64, is_enabled: bool) -> Self {
        Self {
            owner_id,
            is_enabled,
            trading_start_time: default_trading_start(),
            trading_end_time: default_trading_end(),
            utc_offset_secs: None,
        }
    }

    /// 交易时段是否合法（开始不晚于结束）
    pub fn has_valid_window(&self) -> bool {
        self.trading_start_time <= self.trading_end_time
    }

    pub fn offset_or(&self, default_offset_secs: i32) -> i32 {
        self.utc_offset_secs.unwrap_or(default_offset_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_defaults_from_json() {
        let s: Strategy = serde_json::from_str(
            r#"{"id":1,"owner_id":7,"name":"demo","status":"ACTIVE","symbols":["AAPL"],"max_daily_trades":5}"#,
        )
        .unwrap();
        assert!(s.is_active());
        assert_eq!(s.cooldown_seconds, 300);
        assert_eq!(s.trade_quantity, 10.0);
        assert!(s.last_executed.is_none());
    }

    #[test]
    fn test_bot_configuration_defaults() {
        let c: BotConfiguration = serde_json::from_str(r#"{"owner_id":7,"is_enabled":true}"#).unwrap();
        assert_eq!(c.trading_start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(c.trading_end_time, NaiveTime::from_hms_opt(16, 0, 0).unwrap());
        assert!(c.has_valid_window());
        assert_eq!(c.offset_or(10800), 10800);
    }
}
