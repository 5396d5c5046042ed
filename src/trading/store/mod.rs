//! 仓储接口
//!
//! 所有信号状态写入都通过 [`SignalStore::compare_and_set`]，以 (id, 期望旧状态) 为键原子提交，
//! 观察到的状态与期望不符时返回 [`CasOutcome::Stale`]，调用方直接丢弃，不做盲目重试。

pub mod memory;
pub mod mysql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::trading::model::{
    AuditLogEntry, BotConfiguration, LogLevel, NewAuditLogEntry, NewSignal, Signal, SignalStatus, SignalUpdate,
    Strategy,
};

pub use memory::MemoryStore;
pub use mysql::MysqlStore;

/// CAS 结果
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// 已提交，返回更新后的行
    Applied(Signal),
    /// 行已不在期望状态；`actual` 为 None 表示行不存在
    Stale { actual: Option<SignalStatus> },
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }
}

#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Strategy>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Strategy>, StoreError>;

    /// 只向前推进 last_executed，返回是否实际发生了更新
    async fn advance_last_executed(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait BotConfigStore: Send + Sync {
    async fn get_for_owner(&self, owner_id: i64) -> Result<Option<BotConfiguration>, StoreError>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// 新建信号，状态固定为 PENDING
    async fn insert(&self, signal: NewSignal) -> Result<Signal, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<Signal>, StoreError>;

    /// 按 id 升序返回指定状态的信号，最多 `limit` 条
    async fn list_by_status(&self, status: SignalStatus, limit: usize) -> Result<Vec<Signal>, StoreError>;

    /// 统计某策略在 [start, end) 内创建、且状态属于 `statuses` 的信号数
    async fn count_for_strategy_between(
        &self,
        strategy_id: i64,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// 统计 [start, end) 内创建的信号数；`statuses` 为空表示不限状态
    async fn count_created_between(
        &self,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// 统计 executed_at 落在 [start, end) 内的 EXECUTED 信号数
    async fn count_executed_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError>;

    /// 比较并设置
    ///
    /// 变更本身非法（倒退、终态再迁移、重复写入 execution id）时返回
    /// `StoreError::DataIntegrity`，行保持不变。
    async fn compare_and_set(
        &self,
        id: i64,
        expected: SignalStatus,
        update: SignalUpdate,
    ) -> Result<CasOutcome, StoreError>;
}

#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, StoreError>;

    /// 删除早于 `cutoff` 且级别属于 `levels` 的日志，返回删除条数
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, levels: &[LogLevel]) -> Result<u64, StoreError>;
}

/// 各服务共享的仓储集合
#[derive(Clone)]
pub struct Stores {
    pub strategies: Arc<dyn StrategyStore>,
    pub bot_configs: Arc<dyn BotConfigStore>,
    pub signals: Arc<dyn SignalStore>,
    pub audit_logs: Arc<dyn AuditLogStore>,
}

impl Stores {
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            strategies: store.clone(),
            bot_configs: store.clone(),
            signals: store.clone(),
            audit_logs: store,
        }
    }

    pub fn from_mysql(store: Arc<MysqlStore>) -> Self {
        Self {
            strategies: store.clone(),
            bot_configs: store.clone(),
            signals: store.clone(),
            audit_logs: store,
        }
    }
}
