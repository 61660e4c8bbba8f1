use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 用户的资产组合聚合根。
///
/// # Invariants
/// - 每个用户至多持有一个组合（`user_id` 全局唯一）。
/// - `total_value` 是幂等重算的派生值：现金加全部持仓市值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub user_id: String,
    /// 组合总市值（现金 + Σ 持仓数量 × 现价）
    pub total_value: Decimal,
    /// 现金余额
    pub cash_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 组合内单个标的的持仓记录。
///
/// # Invariants
/// - 同一组合内 `symbol` 唯一。
/// - 存在期内 `quantity` 与 `average_cost` 恒为正；
///   任何将数量压到 0 及以下的成交都会直接删除该持仓，
///   绝不落库非正数量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioHolding {
    pub id: String,
    pub portfolio_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    /// 加权平均持仓成本
    pub average_cost: Decimal,
    /// 最近一次成交覆盖写入的现价
    pub current_price: Decimal,
    pub last_updated: DateTime<Utc>,
}
