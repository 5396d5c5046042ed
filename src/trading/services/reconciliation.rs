//! 轮询外部引擎，推进 SENT 信号到 EXECUTED / FAILED
//!
//! 每个写入都是以 SENT 为期望旧状态的 CAS，已到终态的信号重复对账是空操作。
//! 长时间收不到完成状态的 SENT 信号按超时判定 FAILED。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ErrorClass, StoreError};
use crate::trading::model::{LogCategory, Signal, SignalStatus, SignalUpdate};
use crate::trading::services::audit_logger::AuditLogger;
use crate::trading::services::RunStats;
use crate::trading::store::{CasOutcome, Stores};
use crate::trading::workflow::{ExecutionStatus, WorkflowEngine};

pub const STATUS_TIMEOUT_MESSAGE: &str = "execution status timeout";

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub batch_size: usize,
    /// SENT 超过该时长仍未完成即判定失败
    pub sent_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sent_timeout: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// 外部仍在执行，不做变更
    Running,
    Executed,
    Failed,
    TimedOut,
    /// 查询失败，下次轮询再试
    QueryFailed,
    /// 行已被推进，写入丢弃
    Stale,
    /// 不是可对账的信号（非 SENT 或缺少执行 id）
    Skipped,
}

pub struct ReconciliationLoop {
    stores: Stores,
    audit: AuditLogger,
    engine: Arc<dyn WorkflowEngine>,
    config: ReconcileConfig,
}

impl ReconciliationLoop {
    pub fn new(stores: Stores, audit: AuditLogger, engine: Arc<dyn WorkflowEngine>, config: ReconcileConfig) -> Self {
        Self {
            stores,
            audit,
            engine,
            config,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        let sent = self
            .stores
            .signals
            .list_by_status(SignalStatus::Sent, self.config.batch_size)
            .await?;
        debug!("待对账信号 {} 条", sent.len());

        let mut stats = RunStats::default();
        let (mut executed, mut failed, mut running) = (0u64, 0u64, 0u64);
        for signal in sent.iter().filter(|s| s.external_execution_id.is_some()) {
            match self.reconcile(signal, now).await {
                Ok(ReconcileOutcome::Executed) => {
                    stats.processed += 1;
                    executed += 1;
                }
                Ok(ReconcileOutcome::Failed) | Ok(ReconcileOutcome::TimedOut) => {
                    stats.processed += 1;
                    failed += 1;
                }
                Ok(ReconcileOutcome::Running) => running += 1,
                Ok(ReconcileOutcome::QueryFailed) => stats.errors += 1,
                Ok(ReconcileOutcome::Stale) | Ok(ReconcileOutcome::Skipped) => {}
                Err(e) => {
                    stats.errors += 1;
                    let category = match &e {
                        StoreError::DataIntegrity(_) => LogCategory::DataIntegrity,
                        _ => LogCategory::Reconciliation,
                    };
                    self.audit
                        .error(
                            category,
                            Some(signal.strategy_id),
                            format!("reconciliation of signal {} rejected: {}", signal.id, e),
                            json!({"signal_id": signal.id, "error": e.to_string()}),
                        )
                        .await;
                }
            }
        }

        info!(
            "对账完成: executed={}, failed={}, running={}, errors={}",
            executed, failed, running, stats.errors
        );
        stats.details = json!({ "executed": executed, "failed": failed, "running": running });
        Ok(stats)
    }

    /// 按 id 对账单个信号，供 webhook 触发
    pub async fn reconcile_signal(&self, signal_id: i64, now: DateTime<Utc>) -> Result<ReconcileOutcome, StoreError> {
        match self.stores.signals.get(signal_id).await? {
            Some(signal) if signal.status == SignalStatus::Sent && signal.external_execution_id.is_some() => {
                self.reconcile(&signal, now).await
            }
            _ => Ok(ReconcileOutcome::Skipped),
        }
    }

    async fn reconcile(&self, signal: &Signal, now: DateTime<Utc>) -> Result<ReconcileOutcome, StoreError> {
        let Some(execution_id) = signal.external_execution_id.as_deref() else {
            return Ok(ReconcileOutcome::Skipped);
        };

        match self.engine.execution_status(execution_id).await {
            Ok(status) if !status.finished => {
                if self.is_abandoned(signal, now) {
                    return self.mark_timed_out(signal, Some(status), now).await;
                }
                Ok(ReconcileOutcome::Running)
            }
            Ok(status) if status.success => self.mark_executed(signal, status, now).await,
            Ok(status) => self.mark_failed(signal, status, now).await,
            Err(e) => {
                if self.is_abandoned(signal, now) {
                    return self.mark_timed_out(signal, None, now).await;
                }
                self.audit
                    .warn(
                        LogCategory::Reconciliation,
                        Some(signal.strategy_id),
                        format!("status query for signal {} failed: {}", signal.id, e),
                        json!({
                            "signal_id": signal.id,
                            "execution_id": execution_id,
                            "error": e.message(),
                            "error_class": ErrorClass::from(&e).to_string(),
                        }),
                    )
                    .await;
                Ok(ReconcileOutcome::QueryFailed)
            }
        }
    }

    fn is_abandoned(&self, signal: &Signal, now: DateTime<Utc>) -> bool {
        let sent_at = signal.sent_at.unwrap_or(signal.created_at);
        now - sent_at >= self.config.sent_timeout
    }

    async fn mark_executed(
        &self,
        signal: &Signal,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let update = SignalUpdate::MarkExecuted {
            at: now,
            response: status.raw,
        };
        match self.stores.signals.compare_and_set(signal.id, SignalStatus::Sent, update).await? {
            CasOutcome::Applied(_) => {
                self.audit
                    .info(
                        LogCategory::Reconciliation,
                        Some(signal.strategy_id),
                        format!("signal {} executed", signal.id),
                        json!({"signal_id": signal.id, "symbol": signal.symbol}),
                    )
                    .await;
                Ok(ReconcileOutcome::Executed)
            }
            CasOutcome::Stale { actual } => Ok(self.stale(signal, actual)),
        }
    }

    async fn mark_failed(
        &self,
        signal: &Signal,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let error = status.failure_message();
        let update = SignalUpdate::MarkFailed {
            error: error.clone(),
            response: Some(status.raw),
            at: now,
        };
        match self.stores.signals.compare_and_set(signal.id, SignalStatus::Sent, update).await? {
            CasOutcome::Applied(_) => {
                self.audit
                    .error(
                        LogCategory::Reconciliation,
                        Some(signal.strategy_id),
                        format!("signal {} execution failed: {}", signal.id, error),
                        json!({
                            "signal_id": signal.id,
                            "symbol": signal.symbol,
                            "error": error,
                            "error_class": ErrorClass::TerminalExternal.to_string(),
                        }),
                    )
                    .await;
                Ok(ReconcileOutcome::Failed)
            }
            CasOutcome::Stale { actual } => Ok(self.stale(signal, actual)),
        }
    }

    async fn mark_timed_out(
        &self,
        signal: &Signal,
        status: Option<ExecutionStatus>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let update = SignalUpdate::MarkFailed {
            error: STATUS_TIMEOUT_MESSAGE.to_string(),
            response: status.map(|s| s.raw),
            at: now,
        };
        match self.stores.signals.compare_and_set(signal.id, SignalStatus::Sent, update).await? {
            CasOutcome::Applied(_) => {
                self.audit
                    .error(
                        LogCategory::Reconciliation,
                        Some(signal.strategy_id),
                        format!("signal {} abandoned: {}", signal.id, STATUS_TIMEOUT_MESSAGE),
                        json!({
                            "signal_id": signal.id,
                            "sent_at": signal.sent_at,
                            "timeout_secs": self.config.sent_timeout.num_seconds(),
                            "error_class": ErrorClass::TerminalExternal.to_string(),
                        }),
                    )
                    .await;
                Ok(ReconcileOutcome::TimedOut)
            }
            CasOutcome::Stale { actual } => Ok(self.stale(signal, actual)),
        }
    }

    fn stale(&self, signal: &Signal, actual: Option<SignalStatus>) -> ReconcileOutcome {
        warn!(
            "信号 {} 已不是 SENT (当前 {:?})，丢弃对账结果",
            signal.id,
            actual.map(|s| s.as_str())
        );
        ReconcileOutcome::Stale
    }
}
