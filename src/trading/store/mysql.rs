extern crate rbatis;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use rbatis::RBatis;
use rbs::Value;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AuditLogStore, BotConfigStore, CasOutcome, SignalStore, StrategyStore};
use crate::app_config::db;
use crate::error::{DataIntegrityViolation, StoreError};
use crate::time_util::{from_millis, to_millis};
use crate::trading::model::{
    AuditLogEntry, BotConfiguration, LogLevel, NewAuditLogEntry, NewSignal, Signal, SignalStatus, SignalUpdate,
    Strategy,
};

const STRATEGY_TABLE: &str = "auto_trading_strategy";
const BOT_CONFIG_TABLE: &str = "bot_configuration";
const SIGNAL_TABLE: &str = "trading_signal";
const AUDIT_LOG_TABLE: &str = "trading_audit_log";

const SIGNAL_COLUMNS: &str = "id, strategy_id, symbol, signal_type, confidence, confidence_score, target_price, quantity, status, external_execution_id, execution_response, error_message, technical_data, dispatch_attempts, created_at, sent_at, executed_at, updated_at";

/// table auto_trading_strategy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyRow {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub status: String,
    /// JSON 数组文本
    pub symbols: Option<String>,
    pub portfolio_id: Option<i64>,
    pub max_daily_trades: i64,
    pub cooldown_seconds: i64,
    pub trade_quantity: f64,
    pub last_executed: Option<i64>,
    pub external_workflow_id: Option<String>,
    pub external_webhook_url: Option<String>,
}

impl TryFrom<StrategyRow> for Strategy {
    type Error = StoreError;

    fn try_from(row: StrategyRow) -> Result<Self, Self::Error> {
        let symbols = match row.symbols.as_deref() {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
            _ => Vec::new(),
        };
        Ok(Strategy {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            status: row.status.parse().map_err(StoreError::Db)?,
            symbols,
            portfolio_id: row.portfolio_id,
            max_daily_trades: row.max_daily_trades.max(0) as u32,
            cooldown_seconds: row.cooldown_seconds.max(0) as u64,
            trade_quantity: row.trade_quantity,
            last_executed: row.last_executed.and_then(from_millis),
            external_workflow_id: row.external_workflow_id,
            external_webhook_url: row.external_webhook_url,
        })
    }
}

/// table bot_configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotConfigRow {
    pub owner_id: i64,
    pub is_enabled: i32,
    pub trading_start_time: String,
    pub trading_end_time: String,
    pub utc_offset_secs: Option<i32>,
}

fn parse_wall_clock(raw: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|e| StoreError::Db(format!("非法交易时间 {}: {}", raw, e)))
}

impl TryFrom<BotConfigRow> for BotConfiguration {
    type Error = StoreError;

    fn try_from(row: BotConfigRow) -> Result<Self, Self::Error> {
        Ok(BotConfiguration {
            owner_id: row.owner_id,
            is_enabled: row.is_enabled != 0,
            trading_start_time: parse_wall_clock(&row.trading_start_time)?,
            trading_end_time: parse_wall_clock(&row.trading_end_time)?,
            utc_offset_secs: row.utc_offset_secs,
        })
    }
}

/// table trading_signal，时间列统一为毫秒时间戳
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: i64,
    pub strategy_id: i64,
    pub symbol: String,
    pub signal_type: String,
    pub confidence: String,
    pub confidence_score: f64,
    pub target_price: Option<f64>,
    pub quantity: f64,
    pub status: String,
    pub external_execution_id: Option<String>,
    pub execution_response: Option<String>,
    pub error_message: Option<String>,
    pub technical_data: Option<String>,
    pub dispatch_attempts: i64,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub executed_at: Option<i64>,
    pub updated_at: i64,
}

fn required_time(ms: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    from_millis(ms).ok_or_else(|| StoreError::Db(format!("非法时间戳 {}={}", column, ms)))
}

impl TryFrom<SignalRow> for Signal {
    type Error = StoreError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        let execution_response = match row.execution_response.as_deref() {
            Some(raw) if !raw.is_empty() => Some(serde_json::from_str(raw)?),
            _ => None,
        };
        let technical_data = match row.technical_data.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => serde_json::Value::Null,
        };
        Ok(Signal {
            id: row.id,
            strategy_id: row.strategy_id,
            symbol: row.symbol,
            signal_type: row.signal_type.parse().map_err(StoreError::Db)?,
            confidence: row.confidence.parse().map_err(StoreError::Db)?,
            confidence_score: row.confidence_score,
            target_price: row.target_price,
            quantity: row.quantity,
            status: row.status.parse().map_err(StoreError::Db)?,
            external_execution_id: row.external_execution_id,
            execution_response,
            error_message: row.error_message,
            technical_data,
            dispatch_attempts: row.dispatch_attempts.max(0) as u32,
            created_at: required_time(row.created_at, "created_at")?,
            sent_at: row.sent_at.and_then(from_millis),
            executed_at: row.executed_at.and_then(from_millis),
            updated_at: required_time(row.updated_at, "updated_at")?,
        })
    }
}

fn opt_i64(v: Option<i64>) -> Value {
    v.map(Value::I64).unwrap_or(Value::Null)
}

fn opt_f64(v: Option<f64>) -> Value {
    v.map(Value::F64).unwrap_or(Value::Null)
}

fn opt_string(v: Option<String>) -> Value {
    v.map(Value::String).unwrap_or(Value::Null)
}

fn status_placeholders(statuses: &[SignalStatus], params: &mut Vec<Value>) -> String {
    let marks: Vec<&str> = statuses.iter().map(|_| "?").collect();
    for s in statuses {
        params.push(s.as_str().to_string().into());
    }
    marks.join(", ")
}

/// MySQL 仓储，CAS 通过 `UPDATE ... WHERE id = ? AND status = ?` 加 `rows_affected` 判定
pub struct MysqlStore {
    db: &'static RBatis,
}

impl MysqlStore {
    pub fn new(db: &'static RBatis) -> Self {
        Self { db }
    }

    /// 使用全局连接池，需先调用 `db::init_db`
    pub fn from_global() -> Result<Self, StoreError> {
        let db = db::get_db_client().ok_or_else(|| StoreError::Db("DB_CLIENT 未初始化".to_string()))?;
        Ok(Self::new(db))
    }

    async fn fetch_signal(&self, id: i64) -> Result<Option<Signal>, StoreError> {
        let sql = format!("SELECT {} FROM `{}` WHERE id = ? LIMIT 1", SIGNAL_COLUMNS, SIGNAL_TABLE);
        let rows: Vec<SignalRow> = self.db.query_decode(&sql, vec![Value::I64(id)]).await?;
        rows.into_iter().next().map(Signal::try_from).transpose()
    }

    async fn count(&self, sql: &str, params: Vec<Value>) -> Result<u64, StoreError> {
        let count: u64 = self.db.query_decode(sql, params).await?;
        Ok(count)
    }
}

#[async_trait]
impl StrategyStore for MysqlStore {
    async fn list_active(&self) -> Result<Vec<Strategy>, StoreError> {
        let sql = format!("SELECT * FROM `{}` WHERE status = 'ACTIVE' ORDER BY id", STRATEGY_TABLE);
        let rows: Vec<StrategyRow> = self.db.query_decode(&sql, vec![]).await?;
        rows.into_iter().map(Strategy::try_from).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<Strategy>, StoreError> {
        let sql = format!("SELECT * FROM `{}` WHERE id = ? LIMIT 1", STRATEGY_TABLE);
        let rows: Vec<StrategyRow> = self.db.query_decode(&sql, vec![Value::I64(id)]).await?;
        rows.into_iter().next().map(Strategy::try_from).transpose()
    }

    async fn advance_last_executed(&self, id: i64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE `{}` SET last_executed = ? WHERE id = ? AND (last_executed IS NULL OR last_executed < ?)",
            STRATEGY_TABLE
        );
        let at_ms = to_millis(at);
        let result = self
            .db
            .exec(&sql, vec![Value::I64(at_ms), Value::I64(id), Value::I64(at_ms)])
            .await?;
        debug!("更新策略 {} last_executed 影响行数 {}", id, result.rows_affected);
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl BotConfigStore for MysqlStore {
    async fn get_for_owner(&self, owner_id: i64) -> Result<Option<BotConfiguration>, StoreError> {
        let sql = format!("SELECT * FROM `{}` WHERE owner_id = ? LIMIT 1", BOT_CONFIG_TABLE);
        let rows: Vec<BotConfigRow> = self.db.query_decode(&sql, vec![Value::I64(owner_id)]).await?;
        rows.into_iter().next().map(BotConfiguration::try_from).transpose()
    }
}

#[async_trait]
impl SignalStore for MysqlStore {
    async fn insert(&self, signal: NewSignal) -> Result<Signal, StoreError> {
        let sql = format!(
            "INSERT INTO `{}` (strategy_id, symbol, signal_type, confidence, confidence_score, target_price, quantity, status, technical_data, dispatch_attempts, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
            SIGNAL_TABLE
        );
        let created_ms = to_millis(signal.created_at);
        let params = vec![
            Value::I64(signal.strategy_id),
            signal.symbol.to_string().into(),
            signal.signal_type.as_str().to_string().into(),
            signal.confidence.as_str().to_string().into(),
            Value::F64(signal.confidence_score),
            opt_f64(signal.target_price),
            Value::F64(signal.quantity),
            SignalStatus::Pending.as_str().to_string().into(),
            serde_json::to_string(&signal.technical_data)?.into(),
            Value::I64(created_ms),
            Value::I64(created_ms),
        ];
        let data = self.db.exec(&sql, params).await?;
        let id = data
            .last_insert_id
            .as_i64()
            .ok_or_else(|| StoreError::Db("插入信号未返回 last_insert_id".to_string()))?;
        Ok(signal.into_signal(id))
    }

    async fn get(&self, id: i64) -> Result<Option<Signal>, StoreError> {
        self.fetch_signal(id).await
    }

    async fn list_by_status(&self, status: SignalStatus, limit: usize) -> Result<Vec<Signal>, StoreError> {
        let sql = format!(
            "SELECT {} FROM `{}` WHERE status = ? ORDER BY id LIMIT ?",
            SIGNAL_COLUMNS, SIGNAL_TABLE
        );
        let rows: Vec<SignalRow> = self
            .db
            .query_decode(&sql, vec![status.as_str().to_string().into(), Value::I64(limit as i64)])
            .await?;
        let mut signals = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match Signal::try_from(row) {
                Ok(s) => signals.push(s),
                // 单行脏数据不影响整批
                Err(e) => warn!("信号 {} 解析失败，跳过: {}", id, e),
            }
        }
        Ok(signals)
    }

    async fn count_for_strategy_between(
        &self,
        strategy_id: i64,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let mut params = vec![Value::I64(strategy_id)];
        let marks = status_placeholders(statuses, &mut params);
        params.push(Value::I64(to_millis(start)));
        params.push(Value::I64(to_millis(end)));
        let sql = format!(
            "SELECT COUNT(1) AS count FROM `{}` WHERE strategy_id = ? AND status IN ({}) AND created_at >= ? AND created_at < ?",
            SIGNAL_TABLE, marks
        );
        self.count(&sql, params).await
    }

    async fn count_created_between(
        &self,
        statuses: &[SignalStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(1) AS count FROM `{}` WHERE ", SIGNAL_TABLE);
        if !statuses.is_empty() {
            let marks = status_placeholders(statuses, &mut params);
            sql.push_str(&format!("status IN ({}) AND ", marks));
        }
        sql.push_str("created_at >= ? AND created_at < ?");
        params.push(Value::I64(to_millis(start)));
        params.push(Value::I64(to_millis(end)));
        self.count(&sql, params).await
    }

    async fn count_executed_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(1) AS count FROM `{}` WHERE status = 'EXECUTED' AND executed_at >= ? AND executed_at < ?",
            SIGNAL_TABLE
        );
        self.count(&sql, vec![Value::I64(to_millis(start)), Value::I64(to_millis(end))])
            .await
    }

    async fn compare_and_set(
        &self,
        id: i64,
        expected: SignalStatus,
        update: SignalUpdate,
    ) -> Result<CasOutcome, StoreError> {
        update.validate(id, expected)?;
        let target = update.target_status(expected);
        let is_mark_sent = matches!(update, SignalUpdate::MarkSent { .. });

        let (set_clause, mut params): (&str, Vec<Value>) = match update {
            SignalUpdate::MarkSent { execution_id, at } => (
                "status = ?, external_execution_id = ?, sent_at = ?, updated_at = ?",
                vec![
                    target.as_str().to_string().into(),
                    execution_id.into(),
                    Value::I64(to_millis(at)),
                    Value::I64(to_millis(at)),
                ],
            ),
            SignalUpdate::MarkExecuted { at, response } => (
                "status = ?, executed_at = ?, execution_response = ?, updated_at = ?",
                vec![
                    target.as_str().to_string().into(),
                    Value::I64(to_millis(at)),
                    serde_json::to_string(&response)?.into(),
                    Value::I64(to_millis(at)),
                ],
            ),
            SignalUpdate::MarkFailed { error, response, at } => {
                let response = response.map(|r| serde_json::to_string(&r)).transpose()?;
                (
                    "status = ?, error_message = ?, execution_response = COALESCE(?, execution_response), updated_at = ?",
                    vec![
                        target.as_str().to_string().into(),
                        error.into(),
                        opt_string(response),
                        Value::I64(to_millis(at)),
                    ],
                )
            }
            SignalUpdate::RecordDispatchFailure { error, at } => (
                "dispatch_attempts = dispatch_attempts + 1, error_message = ?, updated_at = ?",
                vec![error.into(), Value::I64(to_millis(at))],
            ),
        };

        let mut sql = format!("UPDATE `{}` SET {} WHERE id = ? AND status = ?", SIGNAL_TABLE, set_clause);
        if is_mark_sent {
            sql.push_str(" AND external_execution_id IS NULL");
        }
        params.push(Value::I64(id));
        params.push(expected.as_str().to_string().into());

        let result = self.db.exec(&sql, params).await?;
        debug!(
            "CAS signal={} {:?}->{:?} 影响行数 {}",
            id, expected, target, result.rows_affected
        );

        let current = self.fetch_signal(id).await?;
        if result.rows_affected > 0 {
            return match current {
                Some(signal) => Ok(CasOutcome::Applied(signal)),
                None => Err(StoreError::NotFound(format!("signal {}", id))),
            };
        }
        match current {
            None => Ok(CasOutcome::Stale { actual: None }),
            Some(signal) if is_mark_sent && signal.status == expected && signal.external_execution_id.is_some() => {
                Err(DataIntegrityViolation::ExecutionIdAlreadySet { signal_id: id }.into())
            }
            Some(signal) => Ok(CasOutcome::Stale {
                actual: Some(signal.status),
            }),
        }
    }
}

#[async_trait]
impl AuditLogStore for MysqlStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, StoreError> {
        let sql = format!(
            "INSERT INTO `{}` (strategy_id, level, category, message, context, ts) VALUES (?, ?, ?, ?, ?, ?)",
            AUDIT_LOG_TABLE
        );
        let params = vec![
            opt_i64(entry.strategy_id),
            entry.level.as_str().to_string().into(),
            entry.category.as_str().to_string().into(),
            entry.message.to_string().into(),
            serde_json::to_string(&entry.context)?.into(),
            Value::I64(to_millis(entry.timestamp)),
        ];
        let data = self.db.exec(&sql, params).await?;
        let id = data
            .last_insert_id
            .as_i64()
            .ok_or_else(|| StoreError::Db("插入审计日志未返回 last_insert_id".to_string()))?;
        Ok(entry.into_entry(id))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>, levels: &[LogLevel]) -> Result<u64, StoreError> {
        if levels.is_empty() {
            return Ok(0);
        }
        let mut params = vec![Value::I64(to_millis(cutoff))];
        let marks: Vec<&str> = levels.iter().map(|_| "?").collect();
        for level in levels {
            params.push(level.as_str().to_string().into());
        }
        let sql = format!(
            "DELETE FROM `{}` WHERE ts < ? AND level IN ({})",
            AUDIT_LOG_TABLE,
            marks.join(", ")
        );
        let result = self.db.exec(&sql, params).await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_row_conversion() {
        let row = StrategyRow {
            id: 3,
            owner_id: 9,
            name: "momentum".into(),
            status: "ACTIVE".into(),
            symbols: Some(r#"["AAPL","MSFT"]"#.into()),
            portfolio_id: Some(2),
            max_daily_trades: 5,
            cooldown_seconds: 300,
            trade_quantity: 10.0,
            last_executed: None,
            external_workflow_id: Some("wf-1".into()),
            external_webhook_url: None,
        };
        let s = Strategy::try_from(row).unwrap();
        assert_eq!(s.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert!(s.is_active());
    }

    #[test]
    fn test_bot_config_row_accepts_short_time() {
        let row = BotConfigRow {
            owner_id: 1,
            is_enabled: 1,
            trading_start_time: "09:00".into(),
            trading_end_time: "16:00:00".into(),
            utc_offset_secs: None,
        };
        let c = BotConfiguration::try_from(row).unwrap();
        assert!(c.is_enabled);
        assert_eq!(c.trading_end_time, NaiveTime::from_hms_opt(16, 0, 0).unwrap());
    }
}
