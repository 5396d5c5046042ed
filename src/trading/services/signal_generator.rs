//! 为可执行的策略生成 PENDING 信号
//!
//! 单个标的失败只写一条 ERROR 审计并继续，不影响同一策略的其它标的，也不影响其它策略。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{ErrorClass, StoreError};
use crate::trading::model::{LogCategory, NewSignal, SignalStatus, Strategy};
use crate::trading::services::audit_logger::AuditLogger;
use crate::trading::services::eligibility::{Assessment, EligibilityEvaluator};
use crate::trading::services::signal_source::SignalSource;
use crate::trading::services::RunStats;
use crate::trading::store::Stores;

/// 计入每日额度的全部状态，含尚未派发的 PENDING
const QUOTA_STATUSES: [SignalStatus; 3] = [SignalStatus::Pending, SignalStatus::Sent, SignalStatus::Executed];

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// 每个策略每次最多处理的标的数
    pub max_symbols_per_tick: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { max_symbols_per_tick: 5 }
    }
}

/// 单个策略的生成结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyGeneration {
    pub attempted: usize,
    pub generated: Vec<i64>,
    pub failed: usize,
}

pub struct SignalGenerator {
    stores: Stores,
    audit: AuditLogger,
    evaluator: Arc<EligibilityEvaluator>,
    source: Arc<dyn SignalSource>,
    config: GeneratorConfig,
}

impl SignalGenerator {
    pub fn new(
        stores: Stores,
        audit: AuditLogger,
        evaluator: Arc<EligibilityEvaluator>,
        source: Arc<dyn SignalSource>,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            stores,
            audit,
            evaluator,
            source,
            config,
        }
    }

    /// 遍历全部 ACTIVE 策略
    pub async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<RunStats> {
        let strategies = self.stores.strategies.list_active().await?;
        let mut stats = RunStats::default();
        let mut generated_total = 0usize;

        for strategy in strategies {
            let span = info_span!("strategy", strategy_id = strategy.id);
            match self.process_strategy(&strategy, now).instrument(span).await {
                Ok(Some(outcome)) => {
                    stats.processed += 1;
                    stats.errors += outcome.failed as u64;
                    generated_total += outcome.generated.len();
                }
                Ok(None) => {}
                Err(e) => {
                    stats.errors += 1;
                    self.audit
                        .error(
                            LogCategory::StrategyExecution,
                            Some(strategy.id),
                            format!("Error processing strategy: {}", e),
                            json!({"error": e.to_string(), "task": "generate_signals"}),
                        )
                        .await;
                }
            }
        }

        stats.details = json!({ "signals_generated": generated_total });
        Ok(stats)
    }

    /// 不可执行时返回 `Ok(None)`
    pub async fn process_strategy(
        &self,
        strategy: &Strategy,
        now: DateTime<Utc>,
    ) -> Result<Option<StrategyGeneration>, StoreError> {
        let assessment = self.evaluator.assess(strategy, now).await?;
        if !assessment.is_eligible() {
            return Ok(None);
        }
        let outcome = self.generate(strategy, &assessment, now).await?;
        Ok(Some(outcome))
    }

    async fn generate(
        &self,
        strategy: &Strategy,
        assessment: &Assessment,
        now: DateTime<Utc>,
    ) -> Result<StrategyGeneration, StoreError> {
        let used = self
            .stores
            .signals
            .count_for_strategy_between(strategy.id, &QUOTA_STATUSES, assessment.day_start, assessment.day_end)
            .await?;
        let remaining = (strategy.max_daily_trades as u64).saturating_sub(used) as usize;
        let limit = self.config.max_symbols_per_tick.min(remaining);

        let mut outcome = StrategyGeneration::default();
        if strategy.symbols.is_empty() || limit == 0 {
            debug!(
                "策略 {} 无可处理标的: symbols={}, remaining_quota={}",
                strategy.id,
                strategy.symbols.len(),
                remaining
            );
            return Ok(outcome);
        }

        for symbol in strategy.symbols.iter().take(limit) {
            outcome.attempted += 1;
            match self.source.get_signal(symbol).await {
                Ok(src) => {
                    let new_signal = NewSignal {
                        strategy_id: strategy.id,
                        symbol: symbol.clone(),
                        signal_type: src.signal_type,
                        confidence: src.confidence,
                        confidence_score: src.confidence_score,
                        target_price: src.target_price,
                        quantity: strategy.trade_quantity,
                        technical_data: src.technical_indicators,
                        created_at: now,
                    };
                    match self.stores.signals.insert(new_signal).await {
                        Ok(signal) => {
                            debug!("生成信号: strategy={}, symbol={}, id={}", strategy.id, symbol, signal.id);
                            outcome.generated.push(signal.id);
                        }
                        Err(e) => {
                            outcome.failed += 1;
                            self.symbol_failed(strategy, symbol, &e.to_string(), None).await;
                        }
                    }
                }
                Err(e) => {
                    outcome.failed += 1;
                    self.symbol_failed(strategy, symbol, e.message(), Some(ErrorClass::from(&e)))
                        .await;
                }
            }
        }

        // 每个策略每次调度只推进一次
        self.stores.strategies.advance_last_executed(strategy.id, now).await?;

        let count = outcome.generated.len();
        info!("策略 {} 处理完成，生成 {} 个信号", strategy.id, count);
        self.audit
            .info(
                LogCategory::StrategyExecution,
                Some(strategy.id),
                format!("Strategy processed successfully, generated {} signals", count),
                json!({
                    "signals_count": count,
                    "symbols_attempted": outcome.attempted,
                    "symbols_failed": outcome.failed,
                    "task": "generate_signals",
                }),
            )
            .await;
        Ok(outcome)
    }

    async fn symbol_failed(&self, strategy: &Strategy, symbol: &str, error: &str, class: Option<ErrorClass>) {
        self.audit
            .error(
                LogCategory::SignalGeneration,
                Some(strategy.id),
                format!("signal generation failed for {}: {}", symbol, error),
                json!({
                    "symbol": symbol,
                    "error": error,
                    "error_class": class.map(|c| c.to_string()),
                }),
            )
            .await;
    }
}
