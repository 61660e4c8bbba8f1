use crate::common::TimeFrame;
use crate::market::entity::PricePoint;
use crate::market::error::MarketError;
use async_trait::async_trait;

/// # Summary
/// 行情数据只读预言机接口。评估循环通过它获取最新成交价
/// 和计算派生指标所需的近期收盘序列。
///
/// # Invariants
/// - 纯只读：实现不得因查询产生任何可观测副作用。
/// - 无观测值的标的必须返回 `MarketError::NotFound`，
///   不得以 0 或陈旧值冒充。
#[async_trait]
pub trait MarketDataOracle: Send + Sync {
    /// # Summary
    /// 获取标的的最近一次成交观测。
    ///
    /// # Arguments
    /// * `symbol` - 标的代码。
    ///
    /// # Returns
    /// 成功返回最新观测，缺数据返回 `MarketError::NotFound`。
    async fn latest_price(&self, symbol: &str) -> Result<PricePoint, MarketError>;

    /// # Summary
    /// 获取标的在指定周期下最近 `limit` 个收盘价。
    ///
    /// # Logic
    /// 1. 按时间倒序取最近 `limit` 条收盘记录。
    /// 2. 翻转为时间正序后返回（最新值在末尾）。
    ///
    /// # Arguments
    /// * `symbol` - 标的代码。
    /// * `time_frame` - 采样周期。
    /// * `limit` - 回溯条数上限。
    ///
    /// # Returns
    /// 返回时间正序的收盘价序列；可短于 `limit`。
    async fn recent_closes(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        limit: usize,
    ) -> Result<Vec<f64>, MarketError>;
}
