//! 把 PENDING 信号派发到外部工作流引擎
//!
//! 成功：CAS PENDING -> SENT 并写入执行 id。
//! 失败：保持 PENDING 并累加失败次数，达到上限后 CAS PENDING -> FAILED。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ErrorClass, StoreError};
use crate::trading::model::{LogCategory, Signal, SignalStatus, SignalUpdate, Strategy};
use crate::trading::services::audit_logger::AuditLogger;
use crate::trading::services::RunStats;
use crate::trading::store::{CasOutcome, Stores};
use crate::trading::workflow::{TriggerPayload, WorkflowEngine};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 连续失败多少次后判定 FAILED
    pub max_attempts: u32,
    pub batch_size: usize,
    /// 回调地址前缀，实际地址为 `{callback_base_url}/webhooks/n8n/`
    pub callback_base_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            batch_size: 100,
            callback_base_url: "http://localhost:8088".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn callback_url(&self) -> String {
        format!("{}/webhooks/n8n/", self.callback_base_url.trim_end_matches('/'))
    }
}

/// 单个信号的派发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { execution_id: String },
    /// 失败但仍在重试额度内
    Retrying { attempts: u32 },
    Failed,
    /// 行已被其它流程推进，写入被丢弃
    Stale,
}

pub struct ExecutionDispatcher {
    stores: Stores,
    audit: AuditLogger,
    engine: Arc<dyn WorkflowEngine>,
    config: DispatchConfig,
}

impl ExecutionDispatcher {
    pub fn new(stores: Stores, audit: AuditLogger, engine: Arc<dyn WorkflowEngine>, config: DispatchConfig) -> Self {
        Self {
            stores,
            audit,
            engine,
            config,
        }
    }

    pub async fn run(&self) -> anyhow::Result<RunStats> {
        let pending = self
            .stores
            .signals
            .list_by_status(SignalStatus::Pending, self.config.batch_size)
            .await?;
        debug!("待派发信号 {} 条", pending.len());

        let mut strategies: HashMap<i64, Option<Strategy>> = HashMap::new();
        let mut stats = RunStats::default();
        let mut sent = 0u64;
        let mut failed = 0u64;

        for signal in pending {
            if !strategies.contains_key(&signal.strategy_id) {
                match self.stores.strategies.get(signal.strategy_id).await {
                    Ok(s) => {
                        strategies.insert(signal.strategy_id, s);
                    }
                    Err(e) => {
                        stats.errors += 1;
                        warn!("读取策略 {} 失败，跳过信号 {}: {}", signal.strategy_id, signal.id, e);
                        continue;
                    }
                }
            }
            let strategy = strategies.get(&signal.strategy_id).and_then(|s| s.as_ref());

            match self.dispatch_one(&signal, strategy).await {
                Ok(DispatchOutcome::Sent { .. }) => {
                    stats.processed += 1;
                    sent += 1;
                }
                Ok(DispatchOutcome::Retrying { .. }) => stats.errors += 1,
                Ok(DispatchOutcome::Failed) => {
                    stats.errors += 1;
                    failed += 1;
                }
                Ok(DispatchOutcome::Stale) => {}
                Err(e) => {
                    stats.errors += 1;
                    self.report_store_error(&signal, &e).await;
                }
            }
        }

        stats.details = json!({ "sent": sent, "failed": failed });
        Ok(stats)
    }

    /// 派发单个信号；外部调用期间不持有任何锁
    pub async fn dispatch_one(&self, signal: &Signal, strategy: Option<&Strategy>) -> Result<DispatchOutcome, StoreError> {
        let workflow_id = match strategy.and_then(|s| s.external_workflow_id.as_deref()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let msg = format!("strategy {} has no external workflow id", signal.strategy_id);
                return self.record_failure(signal, &msg, ErrorClass::Configuration).await;
            }
        };

        let payload = TriggerPayload::from_signal(signal, self.config.callback_url());
        match self.engine.trigger(&workflow_id, &payload).await {
            Ok(execution_id) => {
                let update = SignalUpdate::MarkSent {
                    execution_id: execution_id.clone(),
                    at: Utc::now(),
                };
                match self.stores.signals.compare_and_set(signal.id, SignalStatus::Pending, update).await? {
                    CasOutcome::Applied(_) => {
                        info!("信号 {} 已派发, execution_id={}", signal.id, execution_id);
                        self.audit
                            .info(
                                LogCategory::Dispatch,
                                Some(signal.strategy_id),
                                format!("signal {} sent to workflow {}", signal.id, workflow_id),
                                json!({
                                    "signal_id": signal.id,
                                    "symbol": signal.symbol,
                                    "execution_id": execution_id,
                                }),
                            )
                            .await;
                        Ok(DispatchOutcome::Sent { execution_id })
                    }
                    CasOutcome::Stale { actual } => {
                        self.report_stale(signal, actual);
                        Ok(DispatchOutcome::Stale)
                    }
                }
            }
            Err(e) => self.record_failure(signal, e.message(), ErrorClass::from(&e)).await,
        }
    }

    async fn record_failure(
        &self,
        signal: &Signal,
        error: &str,
        class: ErrorClass,
    ) -> Result<DispatchOutcome, StoreError> {
        let attempts = signal.dispatch_attempts + 1;
        let context = json!({
            "signal_id": signal.id,
            "symbol": signal.symbol,
            "attempt": attempts,
            "max_attempts": self.config.max_attempts,
            "error": error,
            "error_class": class.to_string(),
        });

        if attempts >= self.config.max_attempts {
            let update = SignalUpdate::MarkFailed {
                error: format!("dispatch failed after {} attempts: {}", attempts, error),
                response: None,
                at: Utc::now(),
            };
            return match self.stores.signals.compare_and_set(signal.id, SignalStatus::Pending, update).await? {
                CasOutcome::Applied(_) => {
                    self.audit
                        .error(
                            LogCategory::Dispatch,
                            Some(signal.strategy_id),
                            format!("signal {} failed after {} dispatch attempts", signal.id, attempts),
                            context,
                        )
                        .await;
                    Ok(DispatchOutcome::Failed)
                }
                CasOutcome::Stale { actual } => {
                    self.report_stale(signal, actual);
                    Ok(DispatchOutcome::Stale)
                }
            };
        }

        let update = SignalUpdate::RecordDispatchFailure {
            error: error.to_string(),
            at: Utc::now(),
        };
        match self.stores.signals.compare_and_set(signal.id, SignalStatus::Pending, update).await? {
            CasOutcome::Applied(_) => {
                self.audit
                    .warn(
                        LogCategory::Dispatch,
                        Some(signal.strategy_id),
                        format!("dispatch of signal {} failed, will retry: {}", signal.id, error),
                        context,
                    )
                    .await;
                Ok(DispatchOutcome::Retrying { attempts })
            }
            CasOutcome::Stale { actual } => {
                self.report_stale(signal, actual);
                Ok(DispatchOutcome::Stale)
            }
        }
    }

    fn report_stale(&self, signal: &Signal, actual: Option<SignalStatus>) {
        warn!(
            "信号 {} 已不是 PENDING (当前 {:?})，丢弃本次写入",
            signal.id,
            actual.map(|s| s.as_str())
        );
    }

    async fn report_store_error(&self, signal: &Signal, err: &StoreError) {
        let class = match err {
            StoreError::DataIntegrity(_) => ErrorClass::DataIntegrity.to_string(),
            _ => "StoreError".to_string(),
        };
        let category = match err {
            StoreError::DataIntegrity(_) => LogCategory::DataIntegrity,
            _ => LogCategory::Dispatch,
        };
        self.audit
            .error(
                category,
                Some(signal.strategy_id),
                format!("dispatch of signal {} rejected: {}", signal.id, err),
                json!({"signal_id": signal.id, "error": err.to_string(), "error_class": class}),
            )
            .await;
    }
}
