use chrono::{DateTime, Utc};
use miharu_core::rule::entity::{Action, ActionKind, OrderKind, TradingRule};
use miharu_core::trade::entity::{ExecutionDraft, ExecutionSide, ExecutionStatus};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// # Summary
/// 把触发动作换算成执行草稿时可能发生的错误。
#[derive(Error, Debug)]
pub enum IntentError {
    #[error("动作数量不是有效精度数值: {0}")]
    InvalidQuantity(f64),
    #[error("成交价不是有效精度数值: {0}")]
    InvalidPrice(f64),
}

/// # Summary
/// 规则触发的确定性去重键：同一规则在同一个调度桶内
/// 无论被重放多少次，键都相同。
///
/// # Logic
/// 1. 桶宽取调度周期（秒），下限 1 秒。
/// 2. 触发时刻的 Unix 秒数整除桶宽得到桶号。
pub fn dedup_key(rule_id: &str, executed_at: DateTime<Utc>, tick_interval: Duration) -> String {
    let bucket_secs = i64::try_from(tick_interval.as_secs()).unwrap_or(60).max(1);
    let bucket = executed_at.timestamp().div_euclid(bucket_secs);
    format!("{}:{}", rule_id, bucket)
}

/// # Summary
/// 由触发规则的动作模板和观测价组装执行草稿。
///
/// # Logic
/// 1. 方向、标的、数量来自动作模板。
/// 2. 成交价：市价单取观测价；限价单给出限价时取限价，否则回落观测价。
/// 3. 行情侧的 f64 在此转换为定点数，非有限值直接报错。
/// 4. 草稿携带来源规则 id 与确定性去重键，总额留空由台账推导。
pub fn execution_from_action(
    rule: &TradingRule,
    action: &Action,
    observed_price: f64,
    executed_at: DateTime<Utc>,
    tick_interval: Duration,
) -> Result<ExecutionDraft, IntentError> {
    let quantity = Decimal::from_f64_retain(action.quantity)
        .ok_or(IntentError::InvalidQuantity(action.quantity))?;

    let fill_price = match action.order_type {
        OrderKind::Market => observed_price,
        OrderKind::Limit => action.limit.unwrap_or(observed_price),
    };
    let price =
        Decimal::from_f64_retain(fill_price).ok_or(IntentError::InvalidPrice(fill_price))?;

    let side = match action.kind {
        ActionKind::Buy => ExecutionSide::Buy,
        ActionKind::Sell => ExecutionSide::Sell,
    };

    Ok(ExecutionDraft {
        rule_id: Some(rule.id.clone()),
        user_id: rule.user_id.clone(),
        symbol: action.symbol.clone(),
        side,
        quantity,
        price,
        total_amount: None,
        status: ExecutionStatus::Executed,
        executed_at: Some(executed_at),
        exchange: None,
        external_order_id: None,
        dedup_key: Some(dedup_key(&rule.id, executed_at, tick_interval)),
    })
}
