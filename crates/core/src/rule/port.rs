use crate::rule::entity::{RuleStatus, TradingRule};
use crate::store::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 交易规则的持久化接口。
///
/// # Invariants
/// - `get` 对不存在的 id 必须返回 `StoreError::NotFound`，
///   与传输/存储故障严格区分。
/// - 实现类必须保证线程安全 (`Send` + `Sync`)。
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// # Summary
    /// 保存（插入或整体覆盖）一条规则。
    ///
    /// # Arguments
    /// * `rule` - 待保存的规则聚合根。
    ///
    /// # Returns
    /// * `Result<(), StoreError>`
    async fn save(&self, rule: &TradingRule) -> Result<(), StoreError>;

    /// # Summary
    /// 按 id 获取规则。
    ///
    /// # Returns
    /// * 找到返回实体，否则 `StoreError::NotFound`。
    async fn get(&self, id: &str) -> Result<TradingRule, StoreError>;

    /// # Summary
    /// 列出指定用户的全部规则。
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<TradingRule>, StoreError>;

    /// # Summary
    /// 列出全体用户当前处于 Active 状态的规则。
    ///
    /// # Logic
    /// 评估循环每个周期调用一次，返回的就是本周期的待评估批次。
    async fn list_active(&self) -> Result<Vec<TradingRule>, StoreError>;

    /// # Summary
    /// 整体更新一条已存在的规则。
    ///
    /// # Returns
    /// * 目标不存在时返回 `StoreError::NotFound`。
    async fn update(&self, rule: &TradingRule) -> Result<(), StoreError>;

    /// # Summary
    /// 单独更新规则的启停状态。
    async fn update_status(&self, id: &str, status: RuleStatus) -> Result<(), StoreError>;

    /// # Summary
    /// 回写规则的最近触发时间簿记。
    ///
    /// # Arguments
    /// * `id` - 规则 id。
    /// * `at` - 本次触发对应的执行时间。
    async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// # Summary
    /// 删除一条规则。
    ///
    /// # Returns
    /// * 目标不存在时返回 `StoreError::NotFound`。
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
