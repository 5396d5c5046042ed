mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use common::{bot_config, harness, noon, strategy, FakeEngine, FakeSource, FakeValuer};
use rust_autotrade::app_config::AppSettings;
use rust_autotrade::job::task_scheduler::TaskScheduler;
use rust_autotrade::job::{Collaborators, Job, JobDefinition, JobKind, Orchestrator, SchedulerConfig};
use rust_autotrade::trading::model::{LogCategory, LogLevel, SignalStatus};
use rust_autotrade::trading::services::RunStats;

fn wired(h: &common::Harness) -> (Arc<Orchestrator>, Arc<FakeEngine>, Arc<FakeValuer>) {
    let engine = FakeEngine::new();
    let valuer = FakeValuer::new();
    let collaborators = Collaborators {
        engine: engine.clone(),
        source: FakeSource::new(),
        valuer: valuer.clone(),
    };
    let settings = AppSettings {
        default_utc_offset_secs: 0,
        report_utc_offset_secs: 0,
        ..AppSettings::default()
    };
    (
        Arc::new(Orchestrator::wire(h.stores.clone(), collaborators, &settings)),
        engine,
        valuer,
    )
}

#[tokio::test]
async fn test_each_invocation_writes_exactly_one_summary() {
    let h = harness();
    h.memory.upsert_strategy(strategy(1, 10, &["AAPL", "MSFT"])).await;
    h.memory.upsert_bot_config(bot_config(10)).await;
    let (orchestrator, _, _) = wired(&h);

    let summary = orchestrator.run_job_at(JobKind::GenerateSignals, noon()).await.unwrap();
    assert_eq!(summary.kind, JobKind::GenerateSignals);
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.error_count, 0);
    assert_eq!(summary.details["signals_generated"], json!(2));

    orchestrator.run_job_at(JobKind::DispatchSignals, noon()).await.unwrap();

    let summaries: Vec<_> = h
        .memory
        .all_audit_logs()
        .await
        .into_iter()
        .filter(|e| e.category == LogCategory::Scheduler)
        .collect();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].context["job"], "generate");
    assert_eq!(summaries[0].context["run_id"], summary.run_id.to_string());
    assert_eq!(summaries[1].context["job"], "dispatch");
    assert_eq!(summaries[1].context["processed_count"], 2);
    assert!(h
        .memory
        .all_signals()
        .await
        .iter()
        .all(|s| s.status == SignalStatus::Sent));
}

#[tokio::test]
async fn test_portfolio_job_refreshes_each_portfolio_once() {
    let h = harness();
    let mut a = strategy(1, 10, &["AAPL"]);
    a.portfolio_id = Some(100);
    let mut b = strategy(2, 10, &["MSFT"]);
    b.portfolio_id = Some(100);
    let mut c = strategy(3, 20, &["TSLA"]);
    c.portfolio_id = Some(200);
    for s in [a, b, c] {
        h.memory.upsert_strategy(s).await;
    }
    let (orchestrator, _, valuer) = wired(&h);
    valuer.fail_for(200);

    let summary = orchestrator.run_job_at(JobKind::RefreshPortfolios, noon()).await.unwrap();
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.error_count, 1);
    assert_eq!(*valuer.refreshed.lock().unwrap(), vec![100]);

    let logs = h.memory.all_audit_logs().await;
    let summary_entry = logs.iter().find(|e| e.category == LogCategory::Portfolio && e.context["job"] == "portfolio");
    assert_eq!(summary_entry.map(|e| e.level), Some(LogLevel::Warn));
}

#[tokio::test]
async fn test_daily_report_goes_into_summary() {
    let h = harness();
    h.memory.upsert_strategy(strategy(1, 10, &["AAPL", "MSFT", "NVDA"])).await;
    h.memory.upsert_bot_config(bot_config(10)).await;
    let (orchestrator, engine, _) = wired(&h);

    orchestrator.run_job_at(JobKind::GenerateSignals, noon()).await.unwrap();
    orchestrator.run_job_at(JobKind::DispatchSignals, noon()).await.unwrap();
    let first = h.memory.all_signals().await[0].clone();
    let exec = first.external_execution_id.clone().unwrap();
    engine.set_status(&exec, Ok(FakeEngine::finished(&exec, true, None)));
    orchestrator.run_job_at(JobKind::ReconcileExecutions, noon()).await.unwrap();

    let summary = orchestrator.run_job_at(JobKind::DailyReport, noon()).await.unwrap();
    let report = &summary.details["report"];
    assert_eq!(report["date"], "2024-03-04");
    assert_eq!(report["active_strategies"], 1);
    assert_eq!(report["signals_generated"], 3);
    assert_eq!(report["signals_executed"], 1);
    assert_eq!(report["success_rate"], 33.33);

    let report_entries = h
        .memory
        .all_audit_logs()
        .await
        .into_iter()
        .filter(|e| e.category == LogCategory::DailyReport)
        .count();
    assert_eq!(report_entries, 1);
}

struct FailingJob;

#[async_trait]
impl Job for FailingJob {
    fn kind(&self) -> JobKind {
        JobKind::CleanupLogs
    }

    async fn execute(&self, _now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        Err(anyhow::anyhow!("store unavailable"))
    }
}

#[tokio::test]
async fn test_job_error_is_folded_into_summary() {
    let h = harness();
    let mut orchestrator = Orchestrator::new(h.audit.clone());
    orchestrator.register(Arc::new(FailingJob));

    let summary = orchestrator.run_job_at(JobKind::CleanupLogs, noon()).await.unwrap();
    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.error_count, 1);

    let logs = h.memory.all_audit_logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].context["details"]["error"], "store unavailable");

    assert!(orchestrator.run_job_at(JobKind::DailyReport, noon()).await.is_err());
}

#[tokio::test]
async fn test_start_rejects_enabled_but_unregistered_job() {
    let h = harness();
    let orchestrator = Arc::new(Orchestrator::new(h.audit.clone()));
    let config = SchedulerConfig {
        jobs: vec![JobDefinition::new(JobKind::DispatchSignals, Duration::from_secs(60))],
    };
    assert!(orchestrator.start(&config).is_err());
}

#[tokio::test]
async fn test_scheduler_skips_ticks_while_running() {
    let mut scheduler = TaskScheduler::new();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    {
        let running = running.clone();
        let max_running = max_running.clone();
        let runs = runs.clone();
        scheduler
            .add_periodic_task("slow".to_string(), Duration::from_millis(100), move || {
                let running = running.clone();
                let max_running = max_running.clone();
                let runs = runs.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(350)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let stats = scheduler.task_stats("slow").unwrap();
    scheduler.shutdown().await;

    assert_eq!(max_running.load(Ordering::SeqCst), 1);
    // 约 10 个 tick，每次执行 350ms，最多 3 次左右
    let total = runs.load(Ordering::SeqCst);
    assert!((2..=4).contains(&total), "runs = {}", total);
    assert!(stats.skipped.load(Ordering::SeqCst) > 0);
    // 关闭时等待进行中的一次结束
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_distinct_jobs_run_concurrently() {
    let mut scheduler = TaskScheduler::new();
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for name in ["a", "b"] {
        let concurrent = concurrent.clone();
        let peak = peak.clone();
        scheduler
            .add_periodic_task(name.to_string(), Duration::from_millis(100), move || {
                let concurrent = concurrent.clone();
                let peak = peak.clone();
                async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    scheduler.shutdown().await;
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}
