use chrono::{TimeZone, Utc};
use miharu_core::common::{Clock, ManualClock};
use miharu_core::portfolio::port::{PortfolioAccount, PortfolioError};
use miharu_store::memory::MemoryPortfolioStore;
use miharu_trade::portfolio::PortfolioService;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn fixture() -> (PortfolioService, Arc<ManualClock>) {
    let store = Arc::new(MemoryPortfolioStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).single().unwrap(),
    ));
    (PortfolioService::new(store, clock.clone()), clock)
}

#[tokio::test]
async fn portfolio_is_unique_per_user() {
    let (service, _) = fixture();

    let created = service.create_portfolio("user-1", dec!(10000)).await.unwrap();
    assert_eq!(created.cash_balance, dec!(10000));
    assert_eq!(created.total_value, dec!(10000));

    match service.create_portfolio("user-1", dec!(500)).await {
        Err(PortfolioError::AlreadyExists(user)) => assert_eq!(user, "user-1"),
        other => panic!("重复创建未被拒绝: {:?}", other),
    }
}

#[tokio::test]
async fn first_trade_creates_the_holding() {
    let (service, clock) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(100))
        .await
        .unwrap();

    let holdings = service.holdings("user-1").await.unwrap();
    assert_eq!(holdings.len(), 1);
    let holding = &holdings[0];
    assert_eq!(holding.quantity, dec!(10));
    assert_eq!(holding.average_cost, dec!(100));
    assert_eq!(holding.current_price, dec!(100));
    assert_eq!(holding.last_updated, clock.now());
}

#[tokio::test]
async fn repeated_buys_compute_weighted_average_cost() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(100))
        .await
        .unwrap();
    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(200))
        .await
        .unwrap();

    let holdings = service.holdings("user-1").await.unwrap();
    let holding = &holdings[0];
    // (10×100 + 10×200) / 20
    assert_eq!(holding.quantity, dec!(20));
    assert_eq!(holding.average_cost, dec!(150));
    // 现价永远覆盖为最近一笔成交价
    assert_eq!(holding.current_price, dec!(200));
}

#[tokio::test]
async fn partial_sell_keeps_the_weighted_formula() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(100))
        .await
        .unwrap();
    service
        .apply_trade("user-1", "AAPL", dec!(-4), dec!(100))
        .await
        .unwrap();

    let holdings = service.holdings("user-1").await.unwrap();
    let holding = &holdings[0];
    // (10×100 − 4×100) / 6
    assert_eq!(holding.quantity, dec!(6));
    assert_eq!(holding.average_cost, dec!(100));
}

#[tokio::test]
async fn closing_or_overselling_removes_the_holding() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(100))
        .await
        .unwrap();
    service
        .apply_trade("user-1", "AAPL", dec!(-10), dec!(120))
        .await
        .unwrap();
    assert!(service.holdings("user-1").await.unwrap().is_empty());

    // 超卖同样直接清除
    service
        .apply_trade("user-1", "MSFT", dec!(5), dec!(300))
        .await
        .unwrap();
    service
        .apply_trade("user-1", "MSFT", dec!(-8), dec!(290))
        .await
        .unwrap();
    assert!(service.holdings("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    assert!(matches!(
        service.apply_trade("user-1", "AAPL", dec!(0), dec!(100)).await,
        Err(PortfolioError::ZeroQuantity)
    ));
}

#[tokio::test]
async fn reducing_an_absent_position_is_rejected() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(10000)).await.unwrap();

    assert!(matches!(
        service.apply_trade("user-1", "AAPL", dec!(-5), dec!(100)).await,
        Err(PortfolioError::HoldingNotFound { .. })
    ));
}

#[tokio::test]
async fn trades_require_an_existing_portfolio() {
    let (service, _) = fixture();

    assert!(matches!(
        service.apply_trade("ghost", "AAPL", dec!(5), dec!(100)).await,
        Err(PortfolioError::PortfolioNotFound(_))
    ));
}

#[tokio::test]
async fn refresh_totals_is_idempotent() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(1000)).await.unwrap();
    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(50))
        .await
        .unwrap();

    let first = service.refresh_totals("user-1").await.unwrap();
    assert_eq!(first.total_value, dec!(1500));
    assert_eq!(first.cash_balance, dec!(1000));

    let second = service.refresh_totals("user-1").await.unwrap();
    assert_eq!(second.total_value, first.total_value);
    assert_eq!(second.cash_balance, first.cash_balance);
}

#[tokio::test]
async fn remove_holding_deletes_the_position() {
    let (service, _) = fixture();
    service.create_portfolio("user-1", dec!(1000)).await.unwrap();
    service
        .apply_trade("user-1", "AAPL", dec!(10), dec!(50))
        .await
        .unwrap();

    service.remove_holding("user-1", "AAPL").await.unwrap();
    assert!(service.holdings("user-1").await.unwrap().is_empty());

    assert!(matches!(
        service.remove_holding("user-1", "AAPL").await,
        Err(PortfolioError::HoldingNotFound { .. })
    ));
}
