
use chrono::{DateTime, TimeZone, Utc};
use miharu_core::common::{Clock, ManualClock, TimeFrame};
use miharu_core::market::entity::MarketBar;
use miharu_core::market::port::MarketDataOracle;
use miharu_core::portfolio::port::{PortfolioAccount, PortfolioError};
use miharu_core::rule::entity::{
    Action, ActionKind, CompareOp, Condition, ConditionKind, ConditionParam, OrderKind, RuleBody,
    TradingRule,
};
use miharu_core::rule::port::RuleStore;
use miharu_core::trade::port::ExecutionStore;
use miharu_manager::scheduler::{CycleReport, RuleScheduler, SchedulerError};
use miharu_store::memory::{
    MemoryExecutionStore, MemoryMarketStore, MemoryPortfolioStore, MemoryRuleStore,
};
use miharu_trade::portfolio::PortfolioService;
use miharu_trade::service::ExecutionService;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type Stack = (
    Arc<MemoryRuleStore>,
    Arc<MemoryExecutionStore>,
    Arc<PortfolioService>,
    Arc<ManualClock>,
    Arc<RuleScheduler>,
);

fn build(oracle: Arc<dyn MarketDataOracle>, tick_interval: Duration) -> Stack {
    let rules = Arc::new(MemoryRuleStore::new());
    let executions = Arc::new(MemoryExecutionStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).single().unwrap(),
    ));
    let ledger = Arc::new(ExecutionService::new(
        executions.clone(),
        rules.clone(),
        clock.clone(),
    ));
    let portfolio = Arc::new(PortfolioService::new(
        Arc::new(MemoryPortfolioStore::new()),
        clock.clone(),
    ));
    let scheduler = RuleScheduler::new(
        rules.clone(),
        oracle,
        ledger,
        portfolio.clone(),
        clock.clone(),
        tick_interval,
    );
    (rules, executions, portfolio, clock, scheduler)
}

fn fixture() -> (Stack, Arc<MemoryMarketStore>) {
    let market = Arc::new(MemoryMarketStore::new());
    (build(market.clone(), Duration::from_secs(60)), market)
}

fn bar(symbol: &str, time_frame: TimeFrame, at: DateTime<Utc>, close: f64) -> MarketBar {
    MarketBar {
        symbol: symbol.to_string(),
        time_frame,
        timestamp: at,
        open: close,
        high: close,
        low: close,
        close,
        volume: 1000.0,
        source: "test-feed".to_string(),
    }
}

fn price_condition(symbol: &str, operator: CompareOp, value: f64) -> Condition {
    Condition {
        kind: ConditionKind::Price,
        symbol: symbol.to_string(),
        operator,
        value,
        time_frame: None,
        param: None,
        combinator: None,
    }
}

fn market_action(kind: ActionKind, symbol: &str, quantity: f64) -> Action {
    Action {
        kind,
        symbol: symbol.to_string(),
        quantity,
        order_type: OrderKind::Market,
        limit: None,
        stop: None,
    }
}

fn rule_with_body(id: &str, symbol: &str, body: &RuleBody, created_at: DateTime<Utc>) -> TradingRule {
    TradingRule::new(
        id.to_string(),
        "user-1".to_string(),
        format!("规则 {}", id),
        String::new(),
        symbol.to_string(),
        "stop_loss".to_string(),
        body.encode().unwrap(),
        created_at,
    )
}

#[tokio::test]
async fn triggered_rule_records_execution_and_updates_holdings() {
    let ((rules, executions, portfolio, clock, scheduler), market) = fixture();
    portfolio.create_portfolio("user-1", dec!(10000)).await.unwrap();

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 10.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;
    clock.advance(chrono::Duration::seconds(5));

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            evaluated: 1,
            triggered: 1,
            failed: 0
        }
    );

    let recorded = executions.list_by_rule("rule-1").await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].quantity, dec!(10));
    assert_eq!(recorded[0].price, dec!(149));
    assert_eq!(recorded[0].total_amount, dec!(1490));
    assert_eq!(recorded[0].executed_at, clock.now());

    // 触发簿记回写到规则上
    let rule = rules.get("rule-1").await.unwrap();
    assert_eq!(rule.last_triggered_at, Some(clock.now()));

    let holdings = portfolio.holdings("user-1").await.unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].quantity, dec!(10));
    assert_eq!(holdings[0].average_cost, dec!(149));
}

#[tokio::test]
async fn below_boundary_never_triggers_at_or_above_threshold() {
    let ((rules, executions, _portfolio, clock, scheduler), market) = fixture();

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Sell, "AAPL", 10.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();

    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 151.0))
        .await;
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 0);

    clock.advance(chrono::Duration::minutes(1));
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 150.0))
        .await;
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 0);

    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn empty_condition_rule_never_triggers() {
    let ((rules, executions, _portfolio, clock, scheduler), market) = fixture();

    let body = RuleBody::new(Vec::new(), vec![market_action(ActionKind::Buy, "AAPL", 1.0)]);
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 1.0))
        .await;

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.triggered, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn price_fetch_failure_is_isolated_per_rule() {
    let oracle = Arc::new(mock_market::FlakyOracle {
        prices: HashMap::from([("AAPL".to_string(), 149.0)]),
        failing: vec!["FAIL".to_string()],
    });
    let (rules, executions, _portfolio, clock, scheduler) =
        build(oracle, Duration::from_secs(60));

    let sell = RuleBody::new(
        vec![price_condition("FAIL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Sell, "FAIL", 5.0)],
    );
    let buy = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 5.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "FAIL", &sell, clock.now()))
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    rules
        .save(&rule_with_body("rule-2", "AAPL", &buy, clock.now()))
        .await
        .unwrap();

    // rule-1 行情故障，rule-2 照常评估并触发
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            evaluated: 2,
            triggered: 1,
            failed: 1
        }
    );
    assert_eq!(executions.list_by_rule("rule-2").await.unwrap().len(), 1);
    assert!(executions.list_by_rule("rule-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_observation_fails_only_that_rule() {
    let ((rules, executions, _portfolio, clock, scheduler), market) = fixture();

    let ghost = RuleBody::new(
        vec![price_condition("GHOST", CompareOp::Above, 1.0)],
        vec![market_action(ActionKind::Buy, "GHOST", 1.0)],
    );
    let buy = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 5.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "GHOST", &ghost, clock.now()))
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    rules
        .save(&rule_with_body("rule-2", "AAPL", &buy, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.triggered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(executions.list_by_rule("rule-2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_body_skips_only_that_rule() {
    let ((rules, executions, _portfolio, clock, scheduler), market) = fixture();

    let good = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 5.0)],
    );
    let mut broken = rule_with_body("rule-bad", "AAPL", &good, clock.now());
    broken.body = b"not a rule body".to_vec();
    rules.save(&broken).await.unwrap();
    clock.advance(chrono::Duration::seconds(1));
    rules
        .save(&rule_with_body("rule-good", "AAPL", &good, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.triggered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(executions.list_by_rule("rule-good").await.unwrap().len(), 1);
}

#[tokio::test]
async fn rule_fetch_failure_aborts_the_cycle() {
    let market = Arc::new(MemoryMarketStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).single().unwrap(),
    ));
    let executions = Arc::new(MemoryExecutionStore::new());
    let ledger = Arc::new(ExecutionService::new(
        executions.clone(),
        Arc::new(MemoryRuleStore::new()),
        clock.clone(),
    ));
    let portfolio = Arc::new(PortfolioService::new(
        Arc::new(MemoryPortfolioStore::new()),
        clock.clone(),
    ));
    let scheduler = RuleScheduler::new(
        Arc::new(mock_market::FailingRuleStore),
        market,
        ledger,
        portfolio,
        clock,
        Duration::from_secs(60),
    );

    match scheduler.run_cycle().await {
        Err(SchedulerError::Store(_)) => {}
        other => panic!("取批次失败未放弃周期: {:?}", other),
    }
}

#[tokio::test]
async fn replay_within_the_dedup_bucket_records_once() {
    let ((rules, executions, portfolio, clock, scheduler), market) = fixture();
    portfolio.create_portfolio("user-1", dec!(10000)).await.unwrap();

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 10.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;

    scheduler.run_cycle().await.unwrap();
    // 同一个去重桶内的重放：既不二次落账也不二次记仓
    clock.advance(chrono::Duration::seconds(10));
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 1);

    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
    let holdings = portfolio.holdings("user-1").await.unwrap();
    assert_eq!(holdings[0].quantity, dec!(10));
}

#[tokio::test]
async fn sell_rule_reduces_the_position() {
    let ((rules, _executions, portfolio, clock, scheduler), market) = fixture();
    portfolio.create_portfolio("user-1", dec!(10000)).await.unwrap();
    portfolio
        .apply_trade("user-1", "AAPL", dec!(10), dec!(150))
        .await
        .unwrap();

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 155.0)],
        vec![market_action(ActionKind::Sell, "AAPL", 4.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 150.0))
        .await;
    clock.advance(chrono::Duration::seconds(5));

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 1);

    let holdings = portfolio.holdings("user-1").await.unwrap();
    assert_eq!(holdings[0].quantity, dec!(6));
    assert_eq!(holdings[0].average_cost, dec!(150));
    assert_eq!(holdings[0].current_price, dec!(150));
}

#[tokio::test]
async fn execution_survives_a_failed_holdings_update() {
    // 用户没有组合：执行照常落账，持仓更新失败只被记录
    let ((rules, executions, portfolio, clock, scheduler), market) = fixture();

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 150.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 10.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
    assert!(matches!(
        portfolio.get_portfolio("user-1").await,
        Err(PortfolioError::PortfolioNotFound(_))
    ));
}

#[tokio::test]
async fn moving_average_condition_needs_a_full_window() {
    let ((rules, executions, _portfolio, clock, scheduler), market) = fixture();

    let body = RuleBody::new(
        vec![Condition {
            kind: ConditionKind::MovingAverage,
            symbol: "AAPL".to_string(),
            operator: CompareOp::Above,
            value: 100.0,
            time_frame: None,
            param: Some(ConditionParam {
                name: "period".to_string(),
                value: 3.0,
            }),
            combinator: None,
        }],
        vec![market_action(ActionKind::Buy, "AAPL", 1.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();

    let day = |n: i64| clock.now() - chrono::Duration::days(n);
    market.record_bar(bar("AAPL", TimeFrame::Day1, day(2), 110.0)).await;
    market.record_bar(bar("AAPL", TimeFrame::Day1, day(1), 112.0)).await;

    // 只有两根日线，凑不满 3 期均线：降级为未满足，而不是失败
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 0);
    assert_eq!(report.failed, 0);

    clock.advance(chrono::Duration::minutes(5));
    market.record_bar(bar("AAPL", TimeFrame::Day1, day(0), 114.0)).await;
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.triggered, 1);
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_terminates_the_spawned_scheduler() {
    let market = Arc::new(MemoryMarketStore::new());
    let (rules, executions, _portfolio, clock, scheduler) =
        build(market.clone(), Duration::from_millis(20));

    let body = RuleBody::new(
        vec![price_condition("AAPL", CompareOp::Below, 1000.0)],
        vec![market_action(ActionKind::Buy, "AAPL", 1.0)],
    );
    rules
        .save(&rule_with_body("rule-1", "AAPL", &body, clock.now()))
        .await
        .unwrap();
    market
        .record_bar(bar("AAPL", TimeFrame::Minute1, clock.now(), 149.0))
        .await;

    let handle = scheduler.spawn();
    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
        .await
        .expect("shutdown should complete promptly");

    // 跑了多个周期，但同一个去重桶内只落账一笔
    assert_eq!(executions.count_by_user("user-1").await.unwrap(), 1);
}
