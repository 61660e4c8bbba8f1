use chrono::{Duration, TimeZone, Utc};
use miharu_core::common::{Clock, ManualClock};
use miharu_core::rule::entity::TradingRule;
use miharu_core::rule::port::RuleStore;
use miharu_core::trade::entity::{ExecutionDraft, ExecutionSide, ExecutionStatus};
use miharu_core::trade::port::{ExecutionLedger, ExecutionStore, TradeError};
use miharu_store::memory::{MemoryExecutionStore, MemoryRuleStore};
use miharu_trade::service::ExecutionService;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn fixture() -> (
    ExecutionService,
    Arc<MemoryExecutionStore>,
    Arc<MemoryRuleStore>,
    Arc<ManualClock>,
) {
    let executions = Arc::new(MemoryExecutionStore::new());
    let rules = Arc::new(MemoryRuleStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).single().unwrap(),
    ));
    let service = ExecutionService::new(executions.clone(), rules.clone(), clock.clone());
    (service, executions, rules, clock)
}

fn draft(symbol: &str, side: ExecutionSide, quantity: Decimal, price: Decimal) -> ExecutionDraft {
    ExecutionDraft {
        rule_id: None,
        user_id: "user-1".to_string(),
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
        total_amount: None,
        status: ExecutionStatus::Executed,
        executed_at: None,
        exchange: None,
        external_order_id: None,
        dedup_key: None,
    }
}

#[tokio::test]
async fn invalid_drafts_never_reach_the_store() {
    let (service, executions, _, _) = fixture();

    let mut bad_quantity = draft("AAPL", ExecutionSide::Buy, dec!(0), dec!(150));
    bad_quantity.quantity = dec!(0);
    let mut bad_price = draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(0));
    bad_price.price = dec!(-1);
    let mut no_user = draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(150));
    no_user.user_id = String::new();
    let mut no_symbol = draft("", ExecutionSide::Buy, dec!(10), dec!(150));
    no_symbol.symbol = "  ".to_string();

    for bad in [bad_quantity, bad_price, no_user, no_symbol] {
        match service.create_execution(bad).await {
            Err(TradeError::InvalidExecution(_)) => {}
            other => panic!("校验未拦截非法草稿: {:?}", other),
        }
    }

    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn total_amount_defaults_to_price_times_quantity() {
    let (service, _, _, _) = fixture();

    let recorded = service
        .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(150)))
        .await
        .unwrap();
    assert_eq!(recorded.total_amount, dec!(1500));

    // 显式给出 0 与未给出等价
    let mut zero_total = draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(150));
    zero_total.total_amount = Some(Decimal::ZERO);
    let recorded = service.create_execution(zero_total).await.unwrap();
    assert_eq!(recorded.total_amount, dec!(1500));

    // 显式给出的非零总额原样保留
    let mut explicit = draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(150));
    explicit.total_amount = Some(dec!(1490));
    let recorded = service.create_execution(explicit).await.unwrap();
    assert_eq!(recorded.total_amount, dec!(1490));
}

#[tokio::test]
async fn executed_at_defaults_to_clock_now() {
    let (service, _, _, clock) = fixture();
    let now = clock.now();

    let recorded = service
        .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(1), dec!(100)))
        .await
        .unwrap();
    assert_eq!(recorded.executed_at, now);
}

#[tokio::test]
async fn process_execution_marks_the_source_rule() {
    let (service, _, rules, clock) = fixture();
    let rule = TradingRule::new(
        "rule-1".to_string(),
        "user-1".to_string(),
        "AAPL 止损".to_string(),
        String::new(),
        "AAPL".to_string(),
        "stop_loss".to_string(),
        Vec::new(),
        clock.now(),
    );
    rules.save(&rule).await.unwrap();

    let mut linked = draft("AAPL", ExecutionSide::Sell, dec!(10), dec!(149));
    linked.rule_id = Some("rule-1".to_string());
    let recorded = service.process_execution(linked).await.unwrap();

    let stored = rules.get("rule-1").await.unwrap();
    assert_eq!(stored.last_triggered_at, Some(recorded.executed_at));
}

#[tokio::test]
async fn missing_rule_errors_but_keeps_the_execution() {
    let (service, executions, _, _) = fixture();

    let mut linked = draft("AAPL", ExecutionSide::Sell, dec!(10), dec!(149));
    linked.rule_id = Some("ghost-rule".to_string());

    match service.process_execution(linked).await {
        Err(TradeError::RuleNotFound(id)) => assert_eq!(id, "ghost-rule"),
        other => panic!("缺失规则未按 RuleNotFound 上抛: {:?}", other),
    }
    // 已落账的执行不回滚
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_dedup_key_records_only_once() {
    let (service, executions, _, _) = fixture();

    let mut first = draft("AAPL", ExecutionSide::Buy, dec!(10), dec!(150));
    first.dedup_key = Some("rule-1:29193780".to_string());
    let mut replay = first.clone();
    replay.price = dec!(151); // 重放时行情略有漂移, 不应产生第二笔

    let recorded = service.process_execution(first).await.unwrap();
    let replayed = service.process_execution(replay).await.unwrap();

    assert_eq!(recorded.id, replayed.id);
    assert_eq!(replayed.price, dec!(150));
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
}

#[tokio::test]
async fn paging_defaults_are_forgiving() {
    let (service, _, _, clock) = fixture();
    for _ in 0..3 {
        clock.advance(Duration::seconds(1));
        service
            .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();
    }

    let listed = service.list_user_executions("user-1", 0, 0).await.unwrap();
    assert_eq!(listed.len(), 3);
    // 最新在前
    assert!(listed[0].executed_at > listed[2].executed_at);
}

#[tokio::test]
async fn stats_aggregate_matches_the_recorded_batch() {
    let (service, _, _, clock) = fixture();

    // AAPL 买 ×3, AAPL 卖 ×1, MSFT 买 ×2, 全部落在窗口内
    let batch = [
        ("AAPL", ExecutionSide::Buy, dec!(10), dec!(100)),
        ("AAPL", ExecutionSide::Buy, dec!(5), dec!(110)),
        ("AAPL", ExecutionSide::Buy, dec!(2), dec!(120)),
        ("AAPL", ExecutionSide::Sell, dec!(4), dec!(130)),
        ("MSFT", ExecutionSide::Buy, dec!(1), dec!(300)),
        ("MSFT", ExecutionSide::Buy, dec!(2), dec!(310)),
    ];
    for (symbol, side, quantity, price) in batch {
        clock.advance(Duration::minutes(1));
        service
            .create_execution(draft(symbol, side, quantity, price))
            .await
            .unwrap();
    }

    let stats = service
        .user_execution_stats("user-1", Duration::days(7))
        .await
        .unwrap();

    assert_eq!(stats.total_executions, 6);
    assert_eq!(stats.buy_count, 5);
    assert_eq!(stats.sell_count, 1);
    assert_eq!(stats.symbol_breakdown.get("AAPL"), Some(&4));
    assert_eq!(stats.symbol_breakdown.get("MSFT"), Some(&2));

    let expected_volume = dec!(1000) + dec!(550) + dec!(240) + dec!(520) + dec!(300) + dec!(620);
    assert_eq!(stats.total_volume, expected_volume);
    assert_eq!(stats.average_trade_size, expected_volume / dec!(6));

    assert_eq!(stats.top_symbols[0].symbol, "AAPL");
    assert_eq!(stats.top_symbols[0].count, 4);
    assert_eq!(stats.top_symbols[0].buy_count, 3);
    assert_eq!(stats.top_symbols[0].sell_count, 1);
    assert_eq!(stats.recent_executions.len(), 5);
}

#[tokio::test]
async fn stats_are_idempotent_without_new_executions() {
    let (service, _, _, clock) = fixture();
    for _ in 0..4 {
        clock.advance(Duration::minutes(1));
        service
            .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(1), dec!(100)))
            .await
            .unwrap();
    }

    let first = service
        .user_execution_stats("user-1", Duration::days(1))
        .await
        .unwrap();
    let second = service
        .user_execution_stats("user-1", Duration::days(1))
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn stats_window_excludes_old_executions() {
    let (service, _, _, clock) = fixture();

    service
        .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(1), dec!(100)))
        .await
        .unwrap();
    clock.advance(Duration::days(10));
    service
        .create_execution(draft("AAPL", ExecutionSide::Buy, dec!(1), dec!(100)))
        .await
        .unwrap();

    let stats = service
        .user_execution_stats("user-1", Duration::days(1))
        .await
        .unwrap();
    assert_eq!(stats.total_executions, 1);
}
