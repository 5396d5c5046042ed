//! 内存仓储，用于测试与本地演示
//!
//! 每张表一把 `RwLock`，CAS 在写锁内完成比较与写入。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AuditLogStore, BotConfigStore, CasOutcome, SignalStore, StrategyStore};
use crate::error::StoreError;
use crate::trading::model::{
    AuditLogEntry, BotConfiguration, LogLevel, NewAuditLogEntry, NewSignal, Signal, SignalStatus, SignalUpdate,
    Strategy, StrategyStatus,
};

/// 种子文件格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub bot_configurations: Vec<BotConfiguration>,
}

#[derive(Default)]
pub struct MemoryStore {
    strategies: RwLock<BTreeMap<i64, Strategy>>,
    bot_configs: RwLock<HashMap<i64, BotConfiguration>>,
    signals: RwLock<BTreeMap<i64, Signal>>,
    audit_logs: RwLock<BTreeMap<i64, AuditLogEntry>>,
    signal_seq: AtomicI64,
    audit_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Self {
        let strategies = seed.strategies.into_iter().map(|s| (s.id, s)).collect();
        let bot_configs = seed.bot_configurations.into_iter().map(|c| (c.owner_id, c)).collect();
        Self {
            strategies: RwLock::new(strategies),
            bot_configs: RwLock::new(bot_configs),
            ..Self::default()
        }
    }

    /// 从 JSON 种子文件加载策略与机器人配置
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::NotFound(format!("种子文件读取失败 {}: {}", path.display(), e)))?;
        let seed: SeedData = serde_json::from_str(&raw)?;
        info!(
            "加载种子数据: strategies={}, bot_configurations={}",
            seed.strategies.len(),
            seed.bot_configurations.len()
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn upsert_strategy(&self, strategy: Strategy) {
        self.strategies.write().await.insert(strategy.id, strategy);
    }

    pub async fn upsert_bot_config(&self, config: BotConfiguration) {
        self.bot_configs.write().await.insert(config.owner_id, config);
    }

    pub async fn remove_bot_config(&self, owner_id: i64) {
        self.bot_configs.write().await.remove(&owner_id);
    }

    /// 直接写入一条完整信号（绕过状态机），测试构造历史数据用
    pub async fn put_signal(&self, signal: Signal) {
        self.signal_seq.fetch_max(signal.id, Ordering::SeqCst);
        self.signals.write().await.insert(signal.id, signal);
    }

    pub async fn all_signals(&self) -> Vec<Signal> {
        self.signals.read().await.values().cloned().collect()
    }

    pub async fn all_audit_logs(&self) -> Vec<AuditLogEntry> {
        self.audit_logs.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl StrategyStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Strategy>, StoreError> {
        Ok(self
            .strategies
            .read()
            .await
            .values()
            .filter(|s| s.status == StrategyStatus::Active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<Strategy>, StoreError> {
        Ok(self.strategies.read().await.get(&id).cloned())
    }

    async fn advance_last_executed(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut strategies = self.strategies.write().await;
        let strategy = strategies
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("strategy {}", id)))?;
        match strategy.last_executed {
            Some(prev) if prev >= at => Ok(false),
            _ => {
                strategy.last_executed = Some(at);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl BotConfigStore for MemoryStore {
    async fn get_for_owner(&self, owner_id: i64) -> Result<Option<BotConfiguration>, StoreError> {
        Ok(self.bot_configs.read().await.get(&owner_id).cloned())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert(&self, signal: NewSignal) -> Result<Signal, StoreError> {
        let id = self.signal_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let signal = signal.into_signal(id);
        self.signals.write().await.insert(id, signal.clone());
        debug!("新建信号: id={}, symbol={}", id, signal.symbol);
        Ok(signal)
    }

    async fn get(&self, id: i64) -> Result<Option<Signal>, StoreError> {
        Ok(self.signals.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, status: SignalStatus, limit: usize) -> Result<Vec<Signal>, StoreError> {
        Ok(self
            .signals
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_for_strategy_between(
        &self,
        strategy_id: i64,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .signals
            .read()
            .await
            .values()
            .filter(|s| s.strategy_id == strategy_id)
            .filter(|s| statuses.contains(&s.status))
            .filter(|s| s.created_at >= start && s.created_at < end)
            .count() as u64)
    }

    async fn count_created_between(
        &self,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .signals
            .read()
            .await
            .values()
            .filter(|s| statuses.is_empty() || statuses.contains(&s.status))
            .filter(|s| s.created_at >= start && s.created_at < end)
            .count() as u64)
    }

    async fn count_executed_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .signals
            .read()
            .await
            .values()
            .filter(|s| s.status == SignalStatus::Executed)
            .filter(|s| s.executed_at.map_or(false, |t| t >= start && t < end))
            .count() as u64)
    }

    async fn compare_and_set(
        &self,
        id: i64,
        expected: SignalStatus,
        update: SignalUpdate,
    ) -> Result<CasOutcome, StoreError> {
        let mut signals = self.signals.write().await;
        let Some(signal) = signals.get_mut(&id) else {
            return Ok(CasOutcome::Stale { actual: None });
        };
        if signal.status != expected {
            // 非法变更即使行已离开期望状态也要报出来
            update.validate(id, expected)?;
            return Ok(CasOutcome::Stale {
                actual: Some(signal.status),
            });
        }
        // 先在副本上应用，失败时原行不变
        let mut next = signal.clone();
        next.apply_update(expected, update)?;
        *signal = next.clone();
        Ok(CasOutcome::Applied(next))
    }
}

#[async_trait]
impl AuditLogStore for MemoryStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, StoreError> {
        let id = self.audit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = entry.into_entry(id);
        self.audit_logs.write().await.insert(id, entry.clone());
        Ok(entry)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>, levels: &[LogLevel]) -> Result<u64, StoreError> {
        let mut logs = self.audit_logs.write().await;
        let before = logs.len();
        logs.retain(|_, e| !(e.timestamp < cutoff && levels.contains(&e.level)));
        Ok((before - logs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataIntegrityViolation;
    use crate::trading::model::{Confidence, SignalType};
    use chrono::Duration;
    use serde_json::json;

    fn new_signal(strategy_id: i64, created_at: DateTime<Utc>) -> NewSignal {
        NewSignal {
            strategy_id,
            symbol: "AAPL".to_string(),
            signal_type: SignalType::Buy,
            confidence: Confidence::High,
            confidence_score: 80.0,
            target_price: Some(150.0),
            quantity: 10.0,
            technical_data: json!({}),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_cas_stale_when_status_moved() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let s = store.insert(new_signal(1, now)).await.unwrap();

        let first = store
            .compare_and_set(
                s.id,
                SignalStatus::Pending,
                SignalUpdate::MarkSent { execution_id: "exec-1".into(), at: now },
            )
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = store
            .compare_and_set(
                s.id,
                SignalStatus::Pending,
                SignalUpdate::MarkSent { execution_id: "exec-2".into(), at: now },
            )
            .await
            .unwrap();
        assert_eq!(second, CasOutcome::Stale { actual: Some(SignalStatus::Sent) });

        let stored = SignalStore::get(&store, s.id).await.unwrap().unwrap();
        assert_eq!(stored.external_execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_cas_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let s = store.insert(new_signal(1, Utc::now())).await.unwrap();
        let err = store
            .compare_and_set(
                s.id,
                SignalStatus::Pending,
                SignalUpdate::MarkExecuted { at: Utc::now(), response: json!({}) },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DataIntegrity(DataIntegrityViolation::InvalidTransition { .. })
        ));
        let stored = SignalStore::get(&store, s.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::Pending);
    }

    #[tokio::test]
    async fn test_last_executed_is_monotonic() {
        let store = MemoryStore::new();
        let strategy: Strategy = serde_json::from_value(json!({
            "id": 1, "owner_id": 1, "name": "s", "status": "ACTIVE", "symbols": ["AAPL"]
        }))
        .unwrap();
        store.upsert_strategy(strategy).await;
        let now = Utc::now();
        assert!(store.advance_last_executed(1, now).await.unwrap());
        assert!(!store.advance_last_executed(1, now - Duration::seconds(10)).await.unwrap());
        let s = StrategyStore::get(&store, 1).await.unwrap().unwrap();
        assert_eq!(s.last_executed, Some(now));
    }

    #[tokio::test]
    async fn test_delete_older_than_respects_levels() {
        let store = MemoryStore::new();
        let old = Utc::now() - Duration::days(40);
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            store
                .append(NewAuditLogEntry {
                    strategy_id: None,
                    level,
                    category: crate::trading::model::LogCategory::Maintenance,
                    message: "old".into(),
                    context: json!({}),
                    timestamp: old,
                })
                .await
                .unwrap();
        }
        let deleted = store
            .delete_older_than(Utc::now() - Duration::days(30), &[LogLevel::Debug, LogLevel::Info])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let left: Vec<LogLevel> = store.all_audit_logs().await.iter().map(|e| e.level).collect();
        assert_eq!(left, vec![LogLevel::Warn, LogLevel::Error]);
    }
}
