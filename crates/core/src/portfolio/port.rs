use crate::portfolio::entity::{Portfolio, PortfolioHolding};
use crate::store::error::StoreError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// # Summary
/// 组合持仓核算环节可能发生的错误。
#[derive(Error, Debug)]
pub enum PortfolioError {
    /// 用户已存在组合，拒绝重复创建
    #[error("用户已存在组合: {0}")]
    AlreadyExists(String),
    /// 用户名下没有组合
    #[error("组合不存在: {0}")]
    PortfolioNotFound(String),
    /// 组合内没有该标的的持仓
    #[error("持仓不存在: 组合 {portfolio_id} 标的 {symbol}")]
    HoldingNotFound {
        portfolio_id: String,
        symbol: String,
    },
    /// 数量为 0 的成交是无效操作
    #[error("成交数量不能为 0")]
    ZeroQuantity,
    /// 价格非法（非正或非有限值）
    #[error("非法的成交价格: {0}")]
    InvalidPrice(String),
    /// 底层存储故障（可由调用方重试）
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// # Summary
/// 组合与持仓的持久化接口。
///
/// # Invariants
/// - `get_by_user` / `get_holding` 对缺失记录返回 `StoreError::NotFound`。
/// - 同一组合的持仓变更由存储实现串行化（行级锁或单写事务），
///   以保证并行评估下加权成本的正确性。
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// # Summary
    /// 创建组合。
    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError>;

    /// # Summary
    /// 按归属用户获取组合。
    async fn get_by_user(&self, user_id: &str) -> Result<Portfolio, StoreError>;

    /// # Summary
    /// 整体更新组合。
    async fn update_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError>;

    /// # Summary
    /// 新建持仓记录。
    async fn create_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError>;

    /// # Summary
    /// 获取组合内指定标的的持仓。
    async fn get_holding(
        &self,
        portfolio_id: &str,
        symbol: &str,
    ) -> Result<PortfolioHolding, StoreError>;

    /// # Summary
    /// 列出组合的全部持仓。
    async fn list_holdings(&self, portfolio_id: &str) -> Result<Vec<PortfolioHolding>, StoreError>;

    /// # Summary
    /// 整体更新持仓记录。
    async fn update_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError>;

    /// # Summary
    /// 删除持仓记录。
    async fn delete_holding(&self, id: &str) -> Result<(), StoreError>;
}

/// # Summary
/// 组合持仓核算服务接口。成交事实通过 `apply_trade` 进入持仓，
/// 维护加权平均成本并在仓位归零时清除持仓。
///
/// # Invariants
/// - 一次 `apply_trade` 对持仓存储恰好产生一次创建、更新或删除。
/// - 同样输入重复调用会继续叠加仓位（非幂等）；
///   重试安全由执行台账的去重键负责，调用方不得盲目重放。
#[async_trait]
pub trait PortfolioAccount: Send + Sync {
    /// # Summary
    /// 为用户创建组合并注入初始现金。
    ///
    /// # Returns
    /// * 已存在组合时返回 `PortfolioError::AlreadyExists`。
    async fn create_portfolio(
        &self,
        user_id: &str,
        initial_balance: Decimal,
    ) -> Result<Portfolio, PortfolioError>;

    /// # Summary
    /// 获取用户的组合。
    async fn get_portfolio(&self, user_id: &str) -> Result<Portfolio, PortfolioError>;

    /// # Summary
    /// 列出用户组合的全部持仓。
    async fn holdings(&self, user_id: &str) -> Result<Vec<PortfolioHolding>, PortfolioError>;

    /// # Summary
    /// 将一笔成交记入用户持仓。
    ///
    /// # Logic
    /// 1. `quantity` 为带符号数量：正数加仓，负数减仓；0 直接报错。
    /// 2. 标的无持仓时新建：数量取输入值，均价与现价都取成交价。
    /// 3. 已有持仓时按加权平均重算成本：
    ///    (旧数量 × 旧均价 + 输入数量 × 成交价) / (旧数量 + 输入数量)，
    ///    现价无条件覆盖为本次成交价。
    /// 4. 结果数量 ≤ 0 时删除持仓（平仓或超卖）。
    ///
    /// # Arguments
    /// * `user_id` - 归属用户。
    /// * `symbol` - 标的代码。
    /// * `quantity` - 带符号成交数量。
    /// * `price` - 成交价。
    async fn apply_trade(
        &self,
        user_id: &str,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), PortfolioError>;

    /// # Summary
    /// 手工移除组合内指定标的的持仓。
    async fn remove_holding(&self, user_id: &str, symbol: &str) -> Result<(), PortfolioError>;

    /// # Summary
    /// 幂等重算组合总市值（现金 + Σ 持仓数量 × 现价）并落库。
    ///
    /// # Returns
    /// 返回重算后的组合。
    async fn refresh_totals(&self, user_id: &str) -> Result<Portfolio, PortfolioError>;
}
