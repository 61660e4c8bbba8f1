use miharu_core::common::TimeFrame;
use miharu_core::rule::entity::{CompareOp, Condition, ConditionKind, LogicalOperator};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

/// Equal 比较的浮点容差
pub const EPSILON: f64 = 1e-9;

/// 均线条件缺省回看周期
pub const DEFAULT_MA_PERIOD: usize = 20;

/// # Summary
/// 观测值的定位键。同一标的在不同类别（最新价 / 均线）、
/// 不同周期、不同均线参数下是互不混用的观测值。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub kind: ConditionKind,
    pub symbol: String,
    pub time_frame: Option<TimeFrame>,
    /// 均线周期；最新价观测为 None
    pub period: Option<usize>,
}

impl ObservationKey {
    /// # Logic
    /// 从条件推导它所需要的观测值定位键。
    pub fn for_condition(condition: &Condition) -> Self {
        let period = match condition.kind {
            ConditionKind::Price => None,
            ConditionKind::MovingAverage => Some(ma_period(condition)),
        };
        Self {
            kind: condition.kind,
            symbol: condition.symbol.clone(),
            time_frame: condition.time_frame,
            period,
        }
    }
}

/// # Summary
/// 条件的均线回看周期：取附加参数值四舍五入，缺省 20，下限 1。
/// 非有限、小于 1 或超出可表示范围的参数一律回落缺省值。
pub fn ma_period(condition: &Condition) -> usize {
    condition
        .param
        .as_ref()
        .filter(|p| p.value.is_finite() && p.value >= 1.0)
        .and_then(|p| Decimal::from_f64_retain(p.value.round()))
        .and_then(|v| v.to_usize())
        .unwrap_or(DEFAULT_MA_PERIOD)
}

/// # Summary
/// 一次评估内可用的全部观测值快照。
/// 键缺失即视为"该观测当前不可得"。
#[derive(Debug, Default)]
pub struct Observations {
    values: HashMap<ObservationKey, f64>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ObservationKey, value: f64) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &ObservationKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn contains(&self, key: &ObservationKey) -> bool {
        self.values.contains_key(key)
    }
}

/// # Summary
/// 对规则的条件序列给出单一触发判定。
///
/// # Logic
/// 1. 空条件序列恒为 false（这样的规则永远不触发）。
/// 2. 首个条件的结果作为累计判定的种子。
/// 3. 其后每个条件按自身的连接符并入累计判定（缺省 And）：
///    - And：累计判定已为 false 时立即短路返回 false；
///    - Or：累计判定已为 true 时立即短路返回 true。
/// 4. 任何条件缺观测值都按"未满足"计，评估本身从不失败。
pub fn evaluate(conditions: &[Condition], observations: &Observations) -> bool {
    let Some(first) = conditions.first() else {
        return false;
    };

    let mut verdict = eval_condition(first, observations);

    for condition in &conditions[1..] {
        match condition.combinator.unwrap_or(LogicalOperator::And) {
            LogicalOperator::And => {
                if !verdict {
                    return false;
                }
                verdict = eval_condition(condition, observations);
            }
            LogicalOperator::Or => {
                if verdict {
                    return true;
                }
                verdict = eval_condition(condition, observations);
            }
        }
    }

    verdict
}

/// # Summary
/// 单个条件的布尔判定：观测值对阈值按算子比较，缺观测值即 false。
pub fn eval_condition(condition: &Condition, observations: &Observations) -> bool {
    let key = ObservationKey::for_condition(condition);
    let Some(observed) = observations.get(&key) else {
        // 该标的/周期当前没有可用观测值，按未满足降级
        return false;
    };

    match condition.operator {
        CompareOp::Above => observed > condition.value,
        CompareOp::Below => observed < condition.value,
        CompareOp::AboveOrEqual => observed >= condition.value,
        CompareOp::BelowOrEqual => observed <= condition.value,
        CompareOp::Equal => (observed - condition.value).abs() < EPSILON,
    }
}
