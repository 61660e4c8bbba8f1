use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// # Summary
/// 执行记录的交易方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSide {
    /// 买入
    Buy,
    /// 卖出
    Sell,
}

impl std::fmt::Display for ExecutionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionSide::Buy => write!(f, "buy"),
            ExecutionSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for ExecutionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(ExecutionSide::Buy),
            "sell" => Ok(ExecutionSide::Sell),
            _ => Err(format!("Unknown ExecutionSide: {}", s)),
        }
    }
}

/// # Summary
/// 执行记录的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// 已登记但尚未确认成交
    Pending,
    /// 已成交
    Executed,
    /// 执行失败（留档不删除）
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "Pending"),
            ExecutionStatus::Executed => write!(f, "Executed"),
            ExecutionStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ExecutionStatus::Pending),
            "Executed" => Ok(ExecutionStatus::Executed),
            "Failed" => Ok(ExecutionStatus::Failed),
            _ => Err(format!("Unknown ExecutionStatus: {}", s)),
        }
    }
}

/// # Summary
/// 一笔已落账的真实交易记录，可以由用户手工登记，
/// 也可以由规则触发自动生成（此时携带来源规则 id）。
///
/// # Invariants
/// - `quantity` 与 `price` 恒为正；`total_amount` 恒等于落账时的
///   price × quantity（除非登记方显式给出其他总额）。
/// - 核心层从不删除执行记录；审计与软删除是存储侧的事。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    /// 来源规则 id（手工登记为空）
    pub rule_id: Option<String>,
    pub user_id: String,
    pub symbol: String,
    pub side: ExecutionSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
    pub status: ExecutionStatus,
    pub executed_at: DateTime<Utc>,
    /// 成交所在交易所（可选）
    pub exchange: Option<String>,
    /// 外部券商订单号（可选）
    pub external_order_id: Option<String>,
    /// 幂等去重键；同键的重复登记只落账一次
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 执行登记的输入草稿。总额与成交时间允许缺省，
/// 由执行台账在校验通过后补全。
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDraft {
    pub rule_id: Option<String>,
    pub user_id: String,
    pub symbol: String,
    pub side: ExecutionSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// 总额；None 或 0 都视为未给出，按 price × quantity 推导
    pub total_amount: Option<Decimal>,
    pub status: ExecutionStatus,
    /// 成交时间；None 取台账时钟的当前时间
    pub executed_at: Option<DateTime<Utc>>,
    pub exchange: Option<String>,
    pub external_order_id: Option<String>,
    pub dedup_key: Option<String>,
}

/// # Summary
/// 单日的成交活跃度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub count: u64,
}

/// # Summary
/// 单个标的的成交统计切片。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStat {
    pub symbol: String,
    pub count: u64,
    pub volume: Decimal,
    pub buy_count: u64,
    pub sell_count: u64,
}

/// # Summary
/// 用户在回看窗口内的成交统计聚合。纯读取时派生，从不落库。
///
/// # Invariants
/// - `top_symbols` 按 count 降序、同 count 按 symbol 升序，
///   截断为至多 5 项；`recent_executions` 为窗口内最新的至多 5 笔。
/// - `executions_by_day` 按日期升序。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub buy_count: u64,
    pub sell_count: u64,
    /// 窗口内全部 total_amount 之和
    pub total_volume: Decimal,
    /// 平均每笔金额（无成交时为 0）
    pub average_trade_size: Decimal,
    pub symbol_breakdown: HashMap<String, u64>,
    pub executions_by_day: Vec<DailyActivity>,
    pub top_symbols: Vec<SymbolStat>,
    pub recent_executions: Vec<Execution>,
}
