use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 某个标的最近一次成交观测。行情侧统一使用 `f64`，
/// 进入交易域时再转换为定点数。
///
/// # Invariants
/// - `timestamp` 是观测落库时刻而非查询时刻。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    // 标的代码
    pub symbol: String,
    // 最新成交价
    pub price: f64,
    // 观测时间
    pub timestamp: DateTime<Utc>,
}

/// # Summary
/// 单根行情采样记录，由外部采集链路写入、预言机只读消费。
///
/// # Invariants
/// - `(symbol, time_frame, timestamp)` 组合唯一。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub time_frame: crate::common::TimeFrame,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// 数据来源标记（采集通道名）
    pub source: String,
}
