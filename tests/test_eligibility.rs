mod common;

use chrono::Duration;

use common::{at, bot_config, harness, noon, strategy, window};
use rust_autotrade::trading::model::{LogCategory, LogLevel, SignalStatus, SignalUpdate, StrategyStatus};
use rust_autotrade::trading::services::eligibility::{evaluate, is_eligible, Ineligible};
use rust_autotrade::trading::services::EligibilityEvaluator;

#[test]
fn test_daily_limit_blocks_regardless_of_other_gates() {
    let mut s = strategy(1, 10, &["AAPL"]);
    s.max_daily_trades = 2;
    let cfg = bot_config(10);
    assert!(is_eligible(&s, noon(), Some(&cfg), 1, 0));
    assert_eq!(
        evaluate(&s, noon(), Some(&cfg), 2, 0),
        Err(Ineligible::DailyLimitReached { count: 2, max: 2 })
    );
}

#[test]
fn test_cooldown() {
    let mut s = strategy(1, 10, &["AAPL"]);
    let cfg = bot_config(10);

    s.last_executed = Some(noon() - Duration::seconds(180));
    assert!(!is_eligible(&s, noon(), Some(&cfg), 0, 0));

    s.last_executed = Some(noon() - Duration::seconds(360));
    assert!(is_eligible(&s, noon(), Some(&cfg), 0, 0));

    // 刚好等于冷却时长
    s.last_executed = Some(noon() - Duration::seconds(300));
    assert!(is_eligible(&s, noon(), Some(&cfg), 0, 0));
}

#[test]
fn test_trading_hours_boundaries_are_inclusive() {
    let s = strategy(1, 10, &["AAPL"]);
    let cfg = window(10, (9, 0), (16, 0));
    assert!(!is_eligible(&s, at(8, 59), Some(&cfg), 0, 0));
    assert!(is_eligible(&s, at(9, 0), Some(&cfg), 0, 0));
    assert!(is_eligible(&s, at(16, 0), Some(&cfg), 0, 0));
    assert!(!is_eligible(&s, at(16, 1), Some(&cfg), 0, 0));
    assert!(!is_eligible(&s, at(16, 0) + Duration::seconds(30), Some(&cfg), 0, 0));
}

#[test]
fn test_trading_hours_follow_owner_offset() {
    let s = strategy(1, 10, &["AAPL"]);
    let mut cfg = window(10, (9, 0), (16, 0));
    // UTC+3：UTC 06:30 是本地 09:30
    cfg.utc_offset_secs = Some(3 * 3600);
    assert!(is_eligible(&s, at(6, 30), Some(&cfg), 0, 0));
    assert!(!is_eligible(&s, at(13, 30), Some(&cfg), 0, 0));

    // 配置没写时区时使用默认偏移
    cfg.utc_offset_secs = None;
    assert!(is_eligible(&s, at(6, 30), Some(&cfg), 0, 3 * 3600));
}

#[test]
fn test_status_and_config_gates() {
    let mut s = strategy(1, 10, &["AAPL"]);
    assert_eq!(evaluate(&s, noon(), None, 0, 0), Err(Ineligible::MissingBotConfig));

    let mut cfg = bot_config(10);
    cfg.is_enabled = false;
    assert_eq!(evaluate(&s, noon(), Some(&cfg), 0, 0), Err(Ineligible::BotDisabled));

    cfg.is_enabled = true;
    s.status = StrategyStatus::Paused;
    assert!(matches!(
        evaluate(&s, noon(), Some(&cfg), 0, 0),
        Err(Ineligible::NotActive(StrategyStatus::Paused))
    ));
}

#[tokio::test]
async fn test_evaluator_counts_only_sent_and_executed_today() {
    let h = harness();
    let mut s = strategy(1, 10, &["AAPL"]);
    s.max_daily_trades = 2;
    h.memory.upsert_strategy(s.clone()).await;
    h.memory.upsert_bot_config(bot_config(10)).await;

    // 两条 PENDING 不计入门控
    let a = h.insert_signal(1, "AAPL", noon() - Duration::hours(1)).await;
    let b = h.insert_signal(1, "MSFT", noon() - Duration::hours(1)).await;
    // 昨天的 SENT 不计入
    let old = h.insert_signal(1, "TSLA", noon() - Duration::days(1)).await;
    h.stores
        .signals
        .compare_and_set(
            old.id,
            SignalStatus::Pending,
            SignalUpdate::MarkSent {
                execution_id: "exec-old".to_string(),
                at: noon() - Duration::days(1),
            },
        )
        .await
        .unwrap();

    let evaluator = EligibilityEvaluator::new(h.stores.clone(), h.audit.clone(), 0);
    assert!(evaluator.assess(&s, noon()).await.unwrap().is_eligible());

    for (i, id) in [a.id, b.id].into_iter().enumerate() {
        h.stores
            .signals
            .compare_and_set(
                id,
                SignalStatus::Pending,
                SignalUpdate::MarkSent {
                    execution_id: format!("exec-{}", i),
                    at: noon(),
                },
            )
            .await
            .unwrap();
    }
    let assessment = evaluator.assess(&s, noon()).await.unwrap();
    assert!(matches!(
        assessment.verdict,
        Err(Ineligible::DailyLimitReached { count: 2, max: 2 })
    ));
}

#[tokio::test]
async fn test_missing_config_is_logged_once_per_day() {
    let h = harness();
    let s = strategy(1, 10, &["AAPL"]);
    let evaluator = EligibilityEvaluator::new(h.stores.clone(), h.audit.clone(), 0);

    for minutes in [0, 5, 10] {
        let a = evaluator.assess(&s, noon() + Duration::minutes(minutes)).await.unwrap();
        assert_eq!(a.verdict, Err(Ineligible::MissingBotConfig));
    }
    let config_logs: Vec<_> = h
        .memory
        .all_audit_logs()
        .await
        .into_iter()
        .filter(|e| e.category == LogCategory::Configuration)
        .collect();
    assert_eq!(config_logs.len(), 1);
    assert_eq!(config_logs[0].level, LogLevel::Info);

    // 第二天再报一次
    evaluator.assess(&s, noon() + Duration::days(1)).await.unwrap();
    let count = h
        .memory
        .all_audit_logs()
        .await
        .iter()
        .filter(|e| e.category == LogCategory::Configuration)
        .count();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_invalid_window_is_warned_once() {
    let h = harness();
    let s = strategy(1, 10, &["AAPL"]);
    h.memory.upsert_bot_config(window(10, (17, 0), (9, 0))).await;
    let evaluator = EligibilityEvaluator::new(h.stores.clone(), h.audit.clone(), 0);

    evaluator.assess(&s, noon()).await.unwrap();
    evaluator.assess(&s, noon() + Duration::minutes(5)).await.unwrap();

    let warns: Vec<_> = h
        .memory
        .all_audit_logs()
        .await
        .into_iter()
        .filter(|e| e.category == LogCategory::Configuration && e.level == LogLevel::Warn)
        .collect();
    assert_eq!(warns.len(), 1);
}
