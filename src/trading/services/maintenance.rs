//! 日志保留清理与每日报表

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::time_util;
use crate::trading::model::LogLevel;
use crate::trading::store::Stores;

/// 只清理低级别日志，WARN / ERROR 永久保留
pub const CLEANUP_LEVELS: [LogLevel; 2] = [LogLevel::Debug, LogLevel::Info];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub active_strategies: u64,
    pub signals_generated: u64,
    pub signals_executed: u64,
    /// 百分比，保留两位小数
    pub success_rate: f64,
}

/// 执行数 / 生成数 * 100，保留两位小数；没有生成时为 0
pub fn success_rate(generated: u64, executed: u64) -> f64 {
    if generated == 0 {
        return 0.0;
    }
    let rate = executed as f64 / generated as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

pub struct MaintenanceJobs {
    stores: Stores,
    retention: Duration,
    report_utc_offset_secs: i32,
}

impl MaintenanceJobs {
    pub fn new(stores: Stores, retention_days: i64, report_utc_offset_secs: i32) -> Self {
        Self {
            stores,
            retention: Duration::days(retention_days),
            report_utc_offset_secs,
        }
    }

    /// 删除保留期之外的 DEBUG / INFO 审计日志
    pub async fn cleanup_old_logs(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let cutoff = now - self.retention;
        let deleted = self.stores.audit_logs.delete_older_than(cutoff, &CLEANUP_LEVELS).await?;
        info!("清理审计日志 {} 条, cutoff={}", deleted, cutoff);
        Ok(deleted)
    }

    /// 汇总 `now` 所在自然日（报表时区）的统计
    pub async fn daily_report(&self, now: DateTime<Utc>) -> anyhow::Result<DailyReport> {
        let date = time_util::local_date(now, self.report_utc_offset_secs);
        self.report_for(date).await
    }

    pub async fn report_for(&self, date: NaiveDate) -> anyhow::Result<DailyReport> {
        let (start, end) = time_util::local_day_bounds(date, self.report_utc_offset_secs);
        let active_strategies = self.stores.strategies.list_active().await?.len() as u64;
        let signals_generated = self.stores.signals.count_created_between(&[], start, end).await?;
        let signals_executed = self.stores.signals.count_executed_between(start, end).await?;

        let report = DailyReport {
            date,
            active_strategies,
            signals_generated,
            signals_executed,
            success_rate: success_rate(signals_generated, signals_executed),
        };
        info!("每日报表: {:?}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_success_rate_rounding() {
        assert_relative_eq!(success_rate(3, 1), 33.33);
        assert_relative_eq!(success_rate(3, 2), 66.67);
        assert_relative_eq!(success_rate(4, 4), 100.0);
        assert_relative_eq!(success_rate(0, 0), 0.0);
    }
}
