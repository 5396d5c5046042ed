#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};

use rust_autotrade::error::ExternalError;
use rust_autotrade::trading::model::{
    BotConfiguration, Confidence, NewSignal, Signal, SignalType, Strategy, StrategyStatus,
};
use rust_autotrade::trading::services::{AuditLogger, PortfolioValuer, SignalSource, SourceSignal};
use rust_autotrade::trading::store::{MemoryStore, SignalStore, Stores};
use rust_autotrade::trading::workflow::{ExecutionStatus, TriggerPayload, WorkflowEngine};

/// 2024-03-04 12:00:00 UTC，周一，落在默认 09:00-16:00 窗口内（偏移 0）
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
}

pub fn strategy(id: i64, owner_id: i64, symbols: &[&str]) -> Strategy {
    Strategy {
        id,
        owner_id,
        name: format!("strategy-{}", id),
        status: StrategyStatus::Active,
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        portfolio_id: None,
        max_daily_trades: 5,
        cooldown_seconds: 300,
        trade_quantity: 10.0,
        last_executed: None,
        external_workflow_id: Some(format!("wf-{}", id)),
        external_webhook_url: None,
    }
}

/// 偏移固定为 UTC，方便用 UTC 时间表达本地时刻
pub fn bot_config(owner_id: i64) -> BotConfiguration {
    BotConfiguration {
        utc_offset_secs: Some(0),
        ..BotConfiguration::new(owner_id, true)
    }
}

pub fn window(owner_id: i64, start: (u32, u32), end: (u32, u32)) -> BotConfiguration {
    BotConfiguration {
        trading_start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        trading_end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        ..bot_config(owner_id)
    }
}

pub fn new_signal(strategy_id: i64, symbol: &str, created_at: DateTime<Utc>) -> NewSignal {
    NewSignal {
        strategy_id,
        symbol: symbol.to_string(),
        signal_type: SignalType::Buy,
        confidence: Confidence::High,
        confidence_score: 0.8,
        target_price: Some(100.0),
        quantity: 10.0,
        technical_data: json!({}),
        created_at,
    }
}

pub struct Harness {
    pub memory: Arc<MemoryStore>,
    pub stores: Stores,
    pub audit: AuditLogger,
}

pub fn harness() -> Harness {
    let memory = Arc::new(MemoryStore::new());
    let stores = Stores::from_memory(memory.clone());
    let audit = AuditLogger::new(stores.audit_logs.clone());
    Harness { memory, stores, audit }
}

impl Harness {
    pub async fn signal(&self, id: i64) -> Signal {
        SignalStore::get(self.memory.as_ref(), id).await.unwrap().unwrap()
    }

    pub async fn insert_signal(&self, strategy_id: i64, symbol: &str, created_at: DateTime<Utc>) -> Signal {
        self.stores
            .signals
            .insert(new_signal(strategy_id, symbol, created_at))
            .await
            .unwrap()
    }
}

/// 工作流引擎替身：按 workflow id 预置触发结果，按执行 id 预置状态
#[derive(Default)]
pub struct FakeEngine {
    trigger_results: Mutex<HashMap<String, Result<String, ExternalError>>>,
    statuses: Mutex<HashMap<String, Result<ExecutionStatus, ExternalError>>>,
    pub triggered: Mutex<Vec<(String, TriggerPayload)>>,
    pub status_calls: AtomicUsize,
    seq: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_trigger(&self, workflow_id: &str, result: Result<String, ExternalError>) {
        self.trigger_results
            .lock()
            .unwrap()
            .insert(workflow_id.to_string(), result);
    }

    pub fn set_status(&self, execution_id: &str, result: Result<ExecutionStatus, ExternalError>) {
        self.statuses.lock().unwrap().insert(execution_id.to_string(), result);
    }

    pub fn finished(execution_id: &str, success: bool, error: Option<&str>) -> ExecutionStatus {
        ExecutionStatus::from_value(json!({
            "id": execution_id,
            "finished": true,
            "success": success,
            "error": error,
        }))
    }

    pub fn trigger_count(&self) -> usize {
        self.triggered.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkflowEngine for FakeEngine {
    async fn trigger(&self, workflow_id: &str, payload: &TriggerPayload) -> Result<String, ExternalError> {
        self.triggered
            .lock()
            .unwrap()
            .push((workflow_id.to_string(), payload.clone()));
        let preset = self.trigger_results.lock().unwrap().get(workflow_id).cloned();
        match preset {
            Some(result) => result,
            None => Ok(format!("exec-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1)),
        }
    }

    async fn execution_status(&self, execution_id: &str) -> Result<ExecutionStatus, ExternalError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let preset = self.statuses.lock().unwrap().get(execution_id).cloned();
        preset.unwrap_or_else(|| Ok(ExecutionStatus::running(json!({"id": execution_id, "finished": false}))))
    }
}

/// 信号来源替身：未预置的标的返回 BUY
#[derive(Default)]
pub struct FakeSource {
    failures: Mutex<HashMap<String, ExternalError>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, symbol: &str, err: ExternalError) {
        self.failures.lock().unwrap().insert(symbol.to_string(), err);
    }

    pub fn called(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalSource for FakeSource {
    async fn get_signal(&self, symbol: &str) -> Result<SourceSignal, ExternalError> {
        self.calls.lock().unwrap().push(symbol.to_string());
        if let Some(err) = self.failures.lock().unwrap().get(symbol).cloned() {
            return Err(err);
        }
        Ok(SourceSignal {
            signal_type: SignalType::Buy,
            confidence: Confidence::High,
            confidence_score: 0.82,
            target_price: Some(187.5),
            technical_indicators: json!({"rsi": 61.2}),
        })
    }
}

#[derive(Default)]
pub struct FakeValuer {
    pub refreshed: Mutex<Vec<i64>>,
    failing: Mutex<Vec<i64>>,
}

impl FakeValuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, portfolio_id: i64) {
        self.failing.lock().unwrap().push(portfolio_id);
    }
}

#[async_trait]
impl PortfolioValuer for FakeValuer {
    async fn refresh_portfolio_value(&self, portfolio_id: i64) -> Result<(), ExternalError> {
        if self.failing.lock().unwrap().contains(&portfolio_id) {
            return Err(ExternalError::transient("portfolio", "connection refused"));
        }
        self.refreshed.lock().unwrap().push(portfolio_id);
        Ok(())
    }
}

pub fn context_of(v: &Value, key: &str) -> Value {
    v.get(key).cloned().unwrap_or(Value::Null)
}
