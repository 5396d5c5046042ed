pub mod jobs;
pub mod orchestrator;
pub mod task_scheduler;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::app_config::env::parse_or_default;
use crate::error::AppError;
use crate::trading::model::LogCategory;
use crate::trading::services::RunStats;

pub use orchestrator::{Collaborators, Orchestrator};
pub use task_scheduler::TaskScheduler;

/// 周期任务类型，每种类型各自独立计时、单飞运行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    GenerateSignals,
    DispatchSignals,
    ReconcileExecutions,
    RefreshPortfolios,
    CleanupLogs,
    DailyReport,
}

impl JobKind {
    pub const ALL: [JobKind; 6] = [
        JobKind::GenerateSignals,
        JobKind::DispatchSignals,
        JobKind::ReconcileExecutions,
        JobKind::RefreshPortfolios,
        JobKind::CleanupLogs,
        JobKind::DailyReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::GenerateSignals => "generate",
            JobKind::DispatchSignals => "dispatch",
            JobKind::ReconcileExecutions => "reconcile",
            JobKind::RefreshPortfolios => "portfolio",
            JobKind::CleanupLogs => "cleanup",
            JobKind::DailyReport => "report",
        }
    }

    /// 默认调度间隔（秒）
    pub fn default_interval_secs(&self) -> u64 {
        match self {
            JobKind::GenerateSignals => 300,
            JobKind::DispatchSignals => 60,
            JobKind::ReconcileExecutions => 120,
            JobKind::RefreshPortfolios => 600,
            JobKind::CleanupLogs => 604_800,
            JobKind::DailyReport => 86_400,
        }
    }

    fn env_prefix(&self) -> String {
        format!("JOB_{}", self.as_str().to_ascii_uppercase())
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Config(format!("未知任务类型: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub kind: JobKind,
    pub interval: Duration,
    pub enabled: bool,
}

impl JobDefinition {
    pub fn new(kind: JobKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            enabled: true,
        }
    }
}

/// 调度配置，启动时显式传给编排器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub jobs: Vec<JobDefinition>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jobs: JobKind::ALL
                .into_iter()
                .map(|k| JobDefinition::new(k, Duration::from_secs(k.default_interval_secs())))
                .collect(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `JOB_<KIND>_INTERVAL_SECS` / `JOB_<KIND>_ENABLED`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut jobs = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            let prefix = kind.env_prefix();
            let interval_key = format!("{}_INTERVAL_SECS", prefix);
            let enabled_key = format!("{}_ENABLED", prefix);
            let secs: u64 = parse_or_default(&interval_key, lookup(&interval_key), kind.default_interval_secs())?;
            let enabled = lookup(&enabled_key)
                .map(|v| {
                    let v = v.trim();
                    v.eq_ignore_ascii_case("true") || v == "1"
                })
                .unwrap_or(true);
            jobs.push(JobDefinition {
                kind,
                interval: Duration::from_secs(secs),
                enabled,
            });
        }
        let config = Self { jobs };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for job in &self.jobs {
            if job.enabled && job.interval < task_scheduler::MIN_INTERVAL {
                return Err(AppError::Config(format!(
                    "任务 {} 的调度间隔 {:?} 小于 {:?}",
                    job.kind, job.interval, task_scheduler::MIN_INTERVAL
                )));
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.enabled)
    }
}

/// 一次任务调用的摘要，每次调用恰好写一条审计
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub kind: JobKind,
    pub run_id: Uuid,
    pub processed_count: u64,
    pub error_count: u64,
    pub details: Value,
}

#[async_trait]
pub trait Job: Send + Sync {
    fn kind(&self) -> JobKind;

    /// 摘要写入的审计分类
    fn category(&self) -> LogCategory {
        LogCategory::Scheduler
    }

    async fn execute(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_intervals() {
        let config = SchedulerConfig::from_lookup(|_| None).unwrap();
        let dispatch = config.jobs.iter().find(|j| j.kind == JobKind::DispatchSignals).unwrap();
        assert_eq!(dispatch.interval, Duration::from_secs(60));
        assert_eq!(config.enabled().count(), 6);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("JOB_RECONCILE_INTERVAL_SECS", "30"),
            ("JOB_PORTFOLIO_ENABLED", "false"),
        ]
        .into_iter()
        .collect();
        let config = SchedulerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let reconcile = config.jobs.iter().find(|j| j.kind == JobKind::ReconcileExecutions).unwrap();
        assert_eq!(reconcile.interval, Duration::from_secs(30));
        assert!(!config.enabled().any(|j| j.kind == JobKind::RefreshPortfolios));
    }

    #[test]
    fn test_zero_interval_is_config_error() {
        let err = SchedulerConfig::from_lookup(|k| (k == "JOB_GENERATE_INTERVAL_SECS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_unparsable_interval_is_config_error() {
        let err = SchedulerConfig::from_lookup(|k| (k == "JOB_REPORT_INTERVAL_SECS").then(|| "daily".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_job_kind_from_str() {
        assert_eq!("Reconcile".parse::<JobKind>().unwrap(), JobKind::ReconcileExecutions);
        assert!("backtest".parse::<JobKind>().is_err());
    }
}
