//! 把各个服务包装成可调度的任务

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::job::{Job, JobKind};
use crate::trading::model::LogCategory;
use crate::trading::services::{
    ExecutionDispatcher, MaintenanceJobs, PortfolioRefresher, ReconciliationLoop, RunStats, SignalGenerator,
};

pub struct GenerateSignalsJob {
    generator: Arc<SignalGenerator>,
}

impl GenerateSignalsJob {
    pub fn new(generator: Arc<SignalGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Job for GenerateSignalsJob {
    fn kind(&self) -> JobKind {
        JobKind::GenerateSignals
    }

    async fn execute(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        self.generator.run(now).await
    }
}

pub struct DispatchSignalsJob {
    dispatcher: Arc<ExecutionDispatcher>,
}

impl DispatchSignalsJob {
    pub fn new(dispatcher: Arc<ExecutionDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Job for DispatchSignalsJob {
    fn kind(&self) -> JobKind {
        JobKind::DispatchSignals
    }

    async fn execute(&self, _now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        self.dispatcher.run().await
    }
}

pub struct ReconcileExecutionsJob {
    reconciler: Arc<ReconciliationLoop>,
}

impl ReconcileExecutionsJob {
    pub fn new(reconciler: Arc<ReconciliationLoop>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Job for ReconcileExecutionsJob {
    fn kind(&self) -> JobKind {
        JobKind::ReconcileExecutions
    }

    async fn execute(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        self.reconciler.run(now).await
    }
}

pub struct RefreshPortfoliosJob {
    refresher: Arc<PortfolioRefresher>,
}

impl RefreshPortfoliosJob {
    pub fn new(refresher: Arc<PortfolioRefresher>) -> Self {
        Self { refresher }
    }
}

#[async_trait]
impl Job for RefreshPortfoliosJob {
    fn kind(&self) -> JobKind {
        JobKind::RefreshPortfolios
    }

    fn category(&self) -> LogCategory {
        LogCategory::Portfolio
    }

    async fn execute(&self, _now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        self.refresher.run().await
    }
}

pub struct CleanupLogsJob {
    maintenance: Arc<MaintenanceJobs>,
}

impl CleanupLogsJob {
    pub fn new(maintenance: Arc<MaintenanceJobs>) -> Self {
        Self { maintenance }
    }
}

#[async_trait]
impl Job for CleanupLogsJob {
    fn kind(&self) -> JobKind {
        JobKind::CleanupLogs
    }

    fn category(&self) -> LogCategory {
        LogCategory::Maintenance
    }

    async fn execute(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        let deleted = self.maintenance.cleanup_old_logs(now).await?;
        Ok(RunStats {
            processed: deleted,
            errors: 0,
            details: json!({ "deleted": deleted }),
        })
    }
}

/// 报表只写进本次调用的摘要，不产生新的业务数据
pub struct DailyReportJob {
    maintenance: Arc<MaintenanceJobs>,
}

impl DailyReportJob {
    pub fn new(maintenance: Arc<MaintenanceJobs>) -> Self {
        Self { maintenance }
    }
}

#[async_trait]
impl Job for DailyReportJob {
    fn kind(&self) -> JobKind {
        JobKind::DailyReport
    }

    fn category(&self) -> LogCategory {
        LogCategory::DailyReport
    }

    async fn execute(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        let report = self.maintenance.daily_report(now).await?;
        Ok(RunStats {
            processed: 1,
            errors: 0,
            details: json!({ "report": serde_json::to_value(&report)? }),
        })
    }
}
