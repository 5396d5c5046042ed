//! 任务编排：按配置把各任务挂到调度器上，并为每次调用写一条摘要审计

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::app_config::AppSettings;
use crate::error::AppError;
use crate::job::jobs::{
    CleanupLogsJob, DailyReportJob, DispatchSignalsJob, GenerateSignalsJob, ReconcileExecutionsJob,
    RefreshPortfoliosJob,
};
use crate::job::task_scheduler::TaskScheduler;
use crate::job::{Job, JobKind, JobSummary, SchedulerConfig};
use crate::trading::model::LogLevel;
use crate::trading::services::{
    AuditLogger, DispatchConfig, EligibilityEvaluator, ExecutionDispatcher, GeneratorConfig, MaintenanceJobs,
    PortfolioRefresher, PortfolioValuer, ReconcileConfig, ReconciliationLoop, SignalGenerator, SignalSource,
};
use crate::trading::store::Stores;
use crate::trading::workflow::WorkflowEngine;

/// 外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn WorkflowEngine>,
    pub source: Arc<dyn SignalSource>,
    pub valuer: Arc<dyn PortfolioValuer>,
}

pub struct Orchestrator {
    jobs: HashMap<JobKind, Arc<dyn Job>>,
    audit: AuditLogger,
    reconciler: Option<Arc<ReconciliationLoop>>,
}

impl Orchestrator {
    pub fn new(audit: AuditLogger) -> Self {
        Self {
            jobs: HashMap::new(),
            audit,
            reconciler: None,
        }
    }

    /// 按配置组装全部服务与任务
    pub fn wire(stores: Stores, collaborators: Collaborators, settings: &AppSettings) -> Self {
        let audit = AuditLogger::new(stores.audit_logs.clone());
        let evaluator = Arc::new(EligibilityEvaluator::new(
            stores.clone(),
            audit.clone(),
            settings.default_utc_offset_secs,
        ));
        let generator = Arc::new(SignalGenerator::new(
            stores.clone(),
            audit.clone(),
            evaluator,
            collaborators.source,
            GeneratorConfig {
                max_symbols_per_tick: settings.max_symbols_per_tick,
            },
        ));
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            stores.clone(),
            audit.clone(),
            collaborators.engine.clone(),
            DispatchConfig {
                max_attempts: settings.dispatch_max_attempts,
                batch_size: settings.dispatch_batch_size,
                callback_base_url: settings.callback_base_url.clone(),
            },
        ));
        let reconciler = Arc::new(ReconciliationLoop::new(
            stores.clone(),
            audit.clone(),
            collaborators.engine,
            ReconcileConfig {
                batch_size: settings.reconcile_batch_size,
                sent_timeout: chrono::Duration::seconds(settings.sent_timeout_secs),
            },
        ));
        let refresher = Arc::new(PortfolioRefresher::new(stores.clone(), audit.clone(), collaborators.valuer));
        let maintenance = Arc::new(MaintenanceJobs::new(
            stores,
            settings.log_retention_days,
            settings.report_utc_offset_secs,
        ));

        let mut orchestrator = Self::new(audit);
        orchestrator.reconciler = Some(reconciler.clone());
        orchestrator.register(Arc::new(GenerateSignalsJob::new(generator)));
        orchestrator.register(Arc::new(DispatchSignalsJob::new(dispatcher)));
        orchestrator.register(Arc::new(ReconcileExecutionsJob::new(reconciler)));
        orchestrator.register(Arc::new(RefreshPortfoliosJob::new(refresher)));
        orchestrator.register(Arc::new(CleanupLogsJob::new(maintenance.clone())));
        orchestrator.register(Arc::new(DailyReportJob::new(maintenance)));
        orchestrator
    }

    pub fn register(&mut self, job: Arc<dyn Job>) {
        self.jobs.insert(job.kind(), job);
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// webhook 复用同一个对账器
    pub fn reconciler(&self) -> Option<Arc<ReconciliationLoop>> {
        self.reconciler.clone()
    }

    pub async fn run_job(&self, kind: JobKind) -> Result<JobSummary, AppError> {
        self.run_job_at(kind, Utc::now()).await
    }

    /// 执行一次任务并写入恰好一条摘要审计，任务本身的失败也折算进摘要
    pub async fn run_job_at(&self, kind: JobKind, now: DateTime<Utc>) -> Result<JobSummary, AppError> {
        let job = self
            .jobs
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("任务 {} 未注册", kind)))?;

        let run_id = Uuid::new_v4();
        let span = info_span!("job", kind = kind.as_str(), run_id = %run_id);
        let started = Utc::now();
        let result = job.execute(now).instrument(span).await;
        let elapsed_ms = (Utc::now() - started).num_milliseconds();

        let (summary, level) = match result {
            Ok(stats) => {
                let level = if stats.errors == 0 { LogLevel::Info } else { LogLevel::Warn };
                (
                    JobSummary {
                        kind,
                        run_id,
                        processed_count: stats.processed,
                        error_count: stats.errors,
                        details: stats.details,
                    },
                    level,
                )
            }
            Err(e) => {
                error!("任务 {} 执行失败 run_id={}: {:?}", kind, run_id, e);
                (
                    JobSummary {
                        kind,
                        run_id,
                        processed_count: 0,
                        error_count: 1,
                        details: json!({ "error": e.to_string() }),
                    },
                    LogLevel::Error,
                )
            }
        };

        self.audit
            .log(
                level,
                job.category(),
                None,
                format!(
                    "{} job finished: processed={}, errors={}",
                    kind, summary.processed_count, summary.error_count
                ),
                json!({
                    "job": kind.as_str(),
                    "run_id": run_id.to_string(),
                    "processed_count": summary.processed_count,
                    "error_count": summary.error_count,
                    "elapsed_ms": elapsed_ms,
                    "details": summary.details,
                }),
            )
            .await;
        Ok(summary)
    }

    /// 把启用的任务挂到调度器上，返回的调度器负责关闭
    pub fn start(self: Arc<Self>, config: &SchedulerConfig) -> Result<TaskScheduler, AppError> {
        config.validate()?;
        let mut scheduler = TaskScheduler::new();
        for def in config.enabled() {
            if !self.jobs.contains_key(&def.kind) {
                return Err(AppError::Config(format!("任务 {} 已启用但未注册", def.kind)));
            }
            let kind = def.kind;
            let orchestrator = Arc::clone(&self);
            scheduler.add_periodic_task(kind.as_str().to_string(), def.interval, move || {
                let orchestrator = Arc::clone(&orchestrator);
                async move {
                    if let Err(e) = orchestrator.run_job(kind).await {
                        error!("任务 {} 调度失败: {}", kind, e);
                    }
                }
            })?;
            info!("已注册周期任务 {}，间隔 {:?}", kind, def.interval);
        }
        Ok(scheduler)
    }
}
