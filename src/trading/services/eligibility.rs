//! 策略是否可以在本次调度执行
//!
//! [`evaluate`] 是纯函数，"现在" 由调用方注入；[`EligibilityEvaluator`] 负责取数、
//! 计算当日计数，并对配置问题按 (用户, 自然日) 只记录一次。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::error::StoreError;
use crate::time_util;
use crate::trading::model::{BotConfiguration, LogCategory, SignalStatus, Strategy, StrategyStatus};
use crate::trading::services::audit_logger::AuditLogger;
use crate::trading::store::Stores;

/// 计入当日交易上限的信号状态
pub const DAILY_LIMIT_STATUSES: [SignalStatus; 2] = [SignalStatus::Sent, SignalStatus::Executed];

/// 不可执行的原因，按检查顺序排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    NotActive(StrategyStatus),
    MissingBotConfig,
    BotDisabled,
    InvalidTradingWindow { start: NaiveTime, end: NaiveTime },
    OutsideTradingHours { local_time: NaiveTime },
    DailyLimitReached { count: u64, max: u32 },
    CoolingDown { remaining_secs: i64 },
}

impl Ineligible {
    /// 属于配置错误（ConfigurationError）
    pub fn is_config_issue(&self) -> bool {
        matches!(self, Ineligible::MissingBotConfig | Ineligible::InvalidTradingWindow { .. })
    }
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligible::NotActive(s) => write!(f, "策略状态为 {}", s.as_str()),
            Ineligible::MissingBotConfig => write!(f, "缺少机器人配置"),
            Ineligible::BotDisabled => write!(f, "机器人未启用"),
            Ineligible::InvalidTradingWindow { start, end } => write!(f, "交易时段非法: {} > {}", start, end),
            Ineligible::OutsideTradingHours { local_time } => write!(f, "不在交易时段内: {}", local_time),
            Ineligible::DailyLimitReached { count, max } => write!(f, "已达当日上限: {}/{}", count, max),
            Ineligible::CoolingDown { remaining_secs } => write!(f, "冷却中，剩余 {}s", remaining_secs),
        }
    }
}

/// 五道门依次检查：状态、配置、交易时段（两端闭区间）、当日上限、冷却
pub fn evaluate(
    strategy: &Strategy,
    now: DateTime<Utc>,
    bot_config: Option<&BotConfiguration>,
    today_count: u64,
    default_utc_offset_secs: i32,
) -> Result<(), Ineligible> {
    if strategy.status != StrategyStatus::Active {
        return Err(Ineligible::NotActive(strategy.status));
    }

    let config = bot_config.ok_or(Ineligible::MissingBotConfig)?;
    if !config.is_enabled {
        return Err(Ineligible::BotDisabled);
    }
    if !config.has_valid_window() {
        return Err(Ineligible::InvalidTradingWindow {
            start: config.trading_start_time,
            end: config.trading_end_time,
        });
    }

    let local_time = time_util::local_time_of_day(now, config.offset_or(default_utc_offset_secs));
    if local_time < config.trading_start_time || local_time > config.trading_end_time {
        return Err(Ineligible::OutsideTradingHours { local_time });
    }

    if today_count >= strategy.max_daily_trades as u64 {
        return Err(Ineligible::DailyLimitReached {
            count: today_count,
            max: strategy.max_daily_trades,
        });
    }

    if let Some(last) = strategy.last_executed {
        let elapsed = (now - last).num_seconds();
        let cooldown = strategy.cooldown_seconds as i64;
        if elapsed < cooldown {
            return Err(Ineligible::CoolingDown {
                remaining_secs: cooldown - elapsed,
            });
        }
    }

    Ok(())
}

pub fn is_eligible(
    strategy: &Strategy,
    now: DateTime<Utc>,
    bot_config: Option<&BotConfiguration>,
    today_count: u64,
    default_utc_offset_secs: i32,
) -> bool {
    evaluate(strategy, now, bot_config, today_count, default_utc_offset_secs).is_ok()
}

/// 同一用户同一天的配置问题只报一次
#[derive(Default)]
pub struct ConfigIssueTracker {
    reported: Mutex<HashMap<i64, NaiveDate>>,
}

impl ConfigIssueTracker {
    /// 返回 true 表示当天第一次遇到，需要记录
    pub fn first_today(&self, owner_id: i64, day: NaiveDate) -> bool {
        let mut reported = match self.reported.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match reported.get(&owner_id) {
            Some(d) if *d == day => false,
            _ => {
                reported.insert(owner_id, day);
                true
            }
        }
    }
}

/// 一次评估的结果，附带用户当日的 UTC 区间供后续统计复用
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub verdict: Result<(), Ineligible>,
    pub utc_offset_secs: i32,
    pub day_start: DateTime<Utc>,
    pub day_end: DateTime<Utc>,
}

impl Assessment {
    pub fn is_eligible(&self) -> bool {
        self.verdict.is_ok()
    }
}

pub struct EligibilityEvaluator {
    stores: Stores,
    audit: AuditLogger,
    default_utc_offset_secs: i32,
    config_issues: Arc<ConfigIssueTracker>,
}

impl EligibilityEvaluator {
    pub fn new(stores: Stores, audit: AuditLogger, default_utc_offset_secs: i32) -> Self {
        Self {
            stores,
            audit,
            default_utc_offset_secs,
            config_issues: Arc::new(ConfigIssueTracker::default()),
        }
    }

    pub async fn assess(&self, strategy: &Strategy, now: DateTime<Utc>) -> Result<Assessment, StoreError> {
        let bot_config = self.stores.bot_configs.get_for_owner(strategy.owner_id).await?;
        let offset = bot_config
            .as_ref()
            .map(|c| c.offset_or(self.default_utc_offset_secs))
            .unwrap_or(self.default_utc_offset_secs);
        let (day_start, day_end) = time_util::today_bounds(now, offset);

        let today_count = self
            .stores
            .signals
            .count_for_strategy_between(strategy.id, &DAILY_LIMIT_STATUSES, day_start, day_end)
            .await?;

        let verdict = evaluate(strategy, now, bot_config.as_ref(), today_count, self.default_utc_offset_secs);
        if let Err(reason) = &verdict {
            self.report_ineligible(strategy, reason, now, offset).await;
        }

        Ok(Assessment {
            verdict,
            utc_offset_secs: offset,
            day_start,
            day_end,
        })
    }

    async fn report_ineligible(&self, strategy: &Strategy, reason: &Ineligible, now: DateTime<Utc>, offset: i32) {
        if !reason.is_config_issue() {
            debug!("策略 {} 本次不执行: {}", strategy.id, reason);
            return;
        }
        let day = time_util::local_date(now, offset);
        if !self.config_issues.first_today(strategy.owner_id, day) {
            return;
        }
        let context = json!({
            "owner_id": strategy.owner_id,
            "reason": reason.to_string(),
            "error_class": "ConfigurationError",
        });
        match reason {
            Ineligible::MissingBotConfig => {
                self.audit
                    .info(
                        LogCategory::Configuration,
                        Some(strategy.id),
                        format!("owner {} has no bot configuration, strategy skipped", strategy.owner_id),
                        context,
                    )
                    .await
            }
            _ => {
                self.audit
                    .warn(
                        LogCategory::Configuration,
                        Some(strategy.id),
                        format!("owner {} has an invalid trading window, strategy skipped", strategy.owner_id),
                        context,
                    )
                    .await
            }
        }
    }
}
