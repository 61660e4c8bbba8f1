use async_trait::async_trait;
use miharu_core::common::Clock;
use miharu_core::portfolio::entity::{Portfolio, PortfolioHolding};
use miharu_core::portfolio::port::{PortfolioAccount, PortfolioError, PortfolioStore};
use miharu_core::store::error::StoreError;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// # Summary
/// `PortfolioService` 是组合持仓核算的入口，实现了 `PortfolioAccount`。
/// 持仓的加权平均成本在这里维护；同一组合的写入串行化
/// 由持仓存储承担，本服务不持任何进程内锁。
pub struct PortfolioService {
    store: Arc<dyn PortfolioStore>,
    clock: Arc<dyn Clock>,
}

impl PortfolioService {
    pub fn new(store: Arc<dyn PortfolioStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn portfolio_of(&self, user_id: &str) -> Result<Portfolio, PortfolioError> {
        self.store.get_by_user(user_id).await.map_err(|e| match e {
            StoreError::NotFound => PortfolioError::PortfolioNotFound(user_id.to_string()),
            other => PortfolioError::Store(other),
        })
    }
}

#[async_trait]
impl PortfolioAccount for PortfolioService {
    async fn create_portfolio(
        &self,
        user_id: &str,
        initial_balance: Decimal,
    ) -> Result<Portfolio, PortfolioError> {
        match self.store.get_by_user(user_id).await {
            Ok(_) => return Err(PortfolioError::AlreadyExists(user_id.to_string())),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(PortfolioError::Store(e)),
        }

        let now = self.clock.now();
        let portfolio = Portfolio {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            total_value: initial_balance,
            cash_balance: initial_balance,
            created_at: now,
            updated_at: now,
        };
        self.store.create_portfolio(&portfolio).await?;
        info!("Created portfolio {} for user {}", portfolio.id, user_id);
        Ok(portfolio)
    }

    async fn get_portfolio(&self, user_id: &str) -> Result<Portfolio, PortfolioError> {
        self.portfolio_of(user_id).await
    }

    async fn holdings(&self, user_id: &str) -> Result<Vec<PortfolioHolding>, PortfolioError> {
        let portfolio = self.portfolio_of(user_id).await?;
        Ok(self.store.list_holdings(&portfolio.id).await?)
    }

    /// # Logic
    /// 1. 数量为 0 直接报错；价格必须为正。
    /// 2. 标的无持仓：正数量新建持仓（数量取输入值，均价与现价取成交价），
    ///    负数量意味着在减一个不存在的仓位，按 `HoldingNotFound` 拒绝。
    /// 3. 已有持仓：加权平均重算成本
    ///    (旧数量 × 旧均价 + 输入数量 × 成交价) / (旧数量 + 输入数量)，
    ///    现价无条件覆盖为本次成交价。
    /// 4. 结果数量 ≤ 0 时删除持仓，绝不落库非正数量。
    /// 5. 对持仓存储恰好一次创建、更新或删除。
    async fn apply_trade(
        &self,
        user_id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), PortfolioError> {
        if quantity.is_zero() {
            return Err(PortfolioError::ZeroQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(PortfolioError::InvalidPrice(price.to_string()));
        }

        let portfolio = self.portfolio_of(user_id).await?;
        let now = self.clock.now();

        let holding = match self.store.get_holding(&portfolio.id, symbol).await {
            Ok(holding) => holding,
            Err(StoreError::NotFound) => {
                if quantity < Decimal::ZERO {
                    return Err(PortfolioError::HoldingNotFound {
                        portfolio_id: portfolio.id.clone(),
                        symbol: symbol.to_string(),
                    });
                }
                let holding = PortfolioHolding {
                    id: Uuid::new_v4().to_string(),
                    portfolio_id: portfolio.id.clone(),
                    symbol: symbol.to_string(),
                    quantity,
                    average_cost: price,
                    current_price: price,
                    last_updated: now,
                };
                self.store.create_holding(&holding).await?;
                return Ok(());
            }
            Err(e) => return Err(PortfolioError::Store(e)),
        };

        let new_quantity = holding.quantity + quantity;
        if new_quantity <= Decimal::ZERO {
            // 平仓或超卖, 直接清除持仓
            self.store.delete_holding(&holding.id).await?;
            return Ok(());
        }

        let total_cost = holding.quantity * holding.average_cost + quantity * price;
        let updated = PortfolioHolding {
            quantity: new_quantity,
            average_cost: total_cost / new_quantity,
            current_price: price,
            last_updated: now,
            ..holding
        };
        self.store.update_holding(&updated).await?;
        Ok(())
    }

    async fn remove_holding(&self, user_id: &str, symbol: &str) -> Result<(), PortfolioError> {
        let portfolio = self.portfolio_of(user_id).await?;
        let holding = self
            .store
            .get_holding(&portfolio.id, symbol)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => PortfolioError::HoldingNotFound {
                    portfolio_id: portfolio.id.clone(),
                    symbol: symbol.to_string(),
                },
                other => PortfolioError::Store(other),
            })?;
        Ok(self.store.delete_holding(&holding.id).await?)
    }

    /// # Logic
    /// 幂等重算: total_value = cash_balance + Σ 持仓数量 × 现价。
    /// 重复调用在持仓不变时得到完全相同的结果。
    async fn refresh_totals(&self, user_id: &str) -> Result<Portfolio, PortfolioError> {
        let mut portfolio = self.portfolio_of(user_id).await?;
        let holdings = self.store.list_holdings(&portfolio.id).await?;

        let market_value: Decimal = holdings
            .iter()
            .map(|h| h.quantity * h.current_price)
            .sum();

        portfolio.total_value = portfolio.cash_balance + market_value;
        portfolio.updated_at = self.clock.now();
        self.store.update_portfolio(&portfolio).await?;
        Ok(portfolio)
    }
}
