use crate::common::TimeFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 规则体编码的当前模式版本。读取端拒绝一切未知版本。
pub const RULE_BODY_VERSION: u32 = 1;

/// # Summary
/// 规则的启停状态。只有 Active 状态的规则会进入评估批次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleStatus::Active => write!(f, "Active"),
            RuleStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" | "active" => Ok(RuleStatus::Active),
            "Inactive" | "inactive" => Ok(RuleStatus::Inactive),
            _ => Err(format!("Unknown RuleStatus: {}", s)),
        }
    }
}

/// # Summary
/// 条件所观测的数值来源类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// 最新成交价
    Price,
    /// 近 N 根收盘价的简单均值
    MovingAverage,
}

/// # Summary
/// 观测值与阈值之间的比较算子。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Above,
    Below,
    AboveOrEqual,
    BelowOrEqual,
    Equal,
}

/// # Summary
/// 同一规则内相邻条件的逻辑连接符。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

/// # Summary
/// 条件附带的可选命名参数（例如均线周期）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionParam {
    pub name: String,
    pub value: f64,
}

/// # Summary
/// 单个布尔判据：对指定标的在某周期下的观测值和阈值做一次比较。
///
/// # Invariants
/// - `symbol` 可以不同于规则的主标的；若该标的没有可用观测值，
///   判据按"未满足"处理，绝不抛错中断整批评估。
/// - `combinator` 描述本条件与"已累计判定"之间的连接方式，
///   序列中第一个条件的连接符被忽略；缺省按 And 处理。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// 观测值类别
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// 目标标的
    pub symbol: String,
    /// 比较算子
    pub operator: CompareOp,
    /// 主阈值
    pub value: f64,
    /// 观测周期（可选，缺省视为最新值）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_frame: Option<TimeFrame>,
    /// 附加参数对（可选，如 {"period": 20}）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<ConditionParam>,
    /// 与前序判定的逻辑连接符（可选，缺省 And）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combinator: Option<LogicalOperator>,
}

/// # Summary
/// 动作模板的交易方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Buy,
    Sell,
}

/// # Summary
/// 动作模板的委托类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

/// # Summary
/// 规则触发时用于生成执行记录的动作模板。
/// 模板本身不是执行；只有规则真正触发时才会被消费。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub symbol: String,
    pub quantity: f64,
    pub order_type: OrderKind,
    /// 限价（限价单使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    /// 止损价（预留）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
}

/// # Summary
/// 规则体解码失败的错误枚举。
#[derive(Error, Debug)]
pub enum RuleBodyError {
    /// 字节流不是合法的规则体编码
    #[error("Rule body parse error: {0}")]
    Parse(String),
    /// 模式版本不被当前读取端支持
    #[error("Unsupported rule body version: {0}")]
    UnsupportedVersion(u32),
}

/// # Summary
/// 规则的条件与动作序列，作为带版本号的不透明编码挂在规则记录上。
///
/// # Invariants
/// - 持久化形态是 JSON 字节流；读取端必须能完整解码出合法序列，
///   否则整条规则在评估时被跳过。
/// - `conditions` 为空的规则永远不触发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBody {
    pub version: u32,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl RuleBody {
    /// # Logic
    /// 以当前模式版本组装规则体。
    pub fn new(conditions: Vec<Condition>, actions: Vec<Action>) -> Self {
        Self {
            version: RULE_BODY_VERSION,
            conditions,
            actions,
        }
    }

    /// # Summary
    /// 将规则体编码为持久化字节流。
    pub fn encode(&self) -> Result<Vec<u8>, RuleBodyError> {
        serde_json::to_vec(self).map_err(|e| RuleBodyError::Parse(e.to_string()))
    }

    /// # Summary
    /// 从持久化字节流解码并校验规则体。
    ///
    /// # Logic
    /// 1. 按 JSON 反序列化，失败即 `Parse`。
    /// 2. 校验 `version` 与当前读取端支持的版本一致，不符即 `UnsupportedVersion`。
    ///
    /// # Returns
    /// 成功返回完整的条件/动作序列。
    pub fn decode(bytes: &[u8]) -> Result<Self, RuleBodyError> {
        let body: RuleBody =
            serde_json::from_slice(bytes).map_err(|e| RuleBodyError::Parse(e.to_string()))?;
        if body.version != RULE_BODY_VERSION {
            return Err(RuleBodyError::UnsupportedVersion(body.version));
        }
        Ok(body)
    }
}

/// # Summary
/// `TradingRule` 聚合根：用户定义的自动交易规则。
///
/// # Invariants
/// - 规则只由用户操作（创建、启停、删除）修改定义；
///   评估循环只读取定义并回写 `last_triggered_at` 这一项簿记。
/// - `body` 必须始终能通过 `RuleBody::decode` 还原。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingRule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    /// 规则的主标的；缺省的观测与成交都落在它上面
    pub symbol: String,
    /// 规则用途标签（stop_loss、take_profit 等），仅作展示分类
    pub rule_type: String,
    /// 条件与动作序列的版本化编码
    pub body: Vec<u8>,
    pub status: RuleStatus,
    /// 最近一次触发产生执行记录的时间
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradingRule {
    /// # Logic
    /// 组装一条新规则，缺省为 Active 状态且从未触发过。
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        user_id: String,
        name: String,
        description: String,
        symbol: String,
        rule_type: String,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            name,
            description,
            symbol,
            rule_type,
            body,
            status: RuleStatus::Active,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
