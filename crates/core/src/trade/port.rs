use crate::store::error::StoreError;
use crate::trade::entity::{Execution, ExecutionDraft, ExecutionStats};
use async_trait::async_trait;
use thiserror::Error;

/// # Summary
/// 执行登记环节可能发生的错误。
#[derive(Error, Debug)]
pub enum TradeError {
    /// 输入校验失败（数量/价格非正、用户或标的缺失）
    #[error("非法的执行数据: {0}")]
    InvalidExecution(String),
    /// 草稿引用的来源规则不存在
    #[error("规则不存在: {0}")]
    RuleNotFound(String),
    /// 按 id 查询的执行记录不存在
    #[error("执行记录不存在: {0}")]
    ExecutionNotFound(String),
    /// 底层存储故障（可由调用方重试）
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// # Summary
/// 执行记录的持久化接口。
///
/// # Invariants
/// - `list_by_user` 与 `list_recent` 均按 `executed_at` 倒序返回。
/// - `get` 对不存在的 id 返回 `StoreError::NotFound`。
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// # Summary
    /// 落账一条新的执行记录。
    async fn save(&self, execution: &Execution) -> Result<(), StoreError>;

    /// # Summary
    /// 按 id 获取执行记录。
    async fn get(&self, id: &str) -> Result<Execution, StoreError>;

    /// # Summary
    /// 分页列出指定用户的执行记录（最新在前）。
    ///
    /// # Arguments
    /// * `user_id` - 用户标识符。
    /// * `limit` - 单页条数。
    /// * `offset` - 起始偏移。
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// # Summary
    /// 列出由指定规则触发的全部执行记录（最新在前）。
    async fn list_by_rule(&self, rule_id: &str) -> Result<Vec<Execution>, StoreError>;

    /// # Summary
    /// 列出全体用户最近的执行记录（最新在前）。
    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError>;

    /// # Summary
    /// 统计指定用户的执行记录总数。
    async fn count_by_user(&self, user_id: &str) -> Result<u64, StoreError>;

    /// # Summary
    /// 按幂等去重键查找已落账的执行记录。
    ///
    /// # Returns
    /// 命中返回 `Some(Execution)`，否则 `None`。
    async fn find_by_dedup_key(&self, key: &str) -> Result<Option<Execution>, StoreError>;

    /// # Summary
    /// 整体更新一条已存在的执行记录。
    async fn update(&self, execution: &Execution) -> Result<(), StoreError>;
}

/// # Summary
/// 执行台账服务接口：登记执行、维护规则触发簿记并派生统计。
/// 调度循环和外围接入层都通过此端口写入成交事实。
///
/// # Invariants
/// - 校验失败的草稿绝不触达存储。
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)。
#[async_trait]
pub trait ExecutionLedger: Send + Sync {
    /// # Summary
    /// 校验并登记一笔执行。
    ///
    /// # Logic
    /// 1. 校验用户、标的非空且数量、价格为正，否则 `InvalidExecution`。
    /// 2. 补全缺省总额（price × quantity）与成交时间。
    /// 3. 持久化并返回完整记录。
    async fn create_execution(&self, draft: ExecutionDraft) -> Result<Execution, TradeError>;

    /// # Summary
    /// 登记一笔执行并完成来源规则的触发簿记。
    ///
    /// # Logic
    /// 1. 同 `create_execution` 的校验与补全。
    /// 2. 草稿携带去重键且已有同键记录时，直接返回既有记录。
    /// 3. 持久化后，若携带来源规则 id，则回写该规则的最近触发时间；
    ///    规则缺失按 `RuleNotFound` 上抛，但已落账的执行不回滚。
    async fn process_execution(&self, draft: ExecutionDraft) -> Result<Execution, TradeError>;

    /// # Summary
    /// 按 id 获取执行记录。
    async fn get_execution(&self, id: &str) -> Result<Execution, TradeError>;

    /// # Summary
    /// 分页获取用户的执行记录（page 从 1 起，最新在前）。
    async fn list_user_executions(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Execution>, TradeError>;

    /// # Summary
    /// 获取由指定规则触发的执行记录。
    async fn list_rule_executions(&self, rule_id: &str) -> Result<Vec<Execution>, TradeError>;

    /// # Summary
    /// 获取全体用户最近的执行记录（监控用途）。
    async fn list_recent_executions(&self, limit: usize) -> Result<Vec<Execution>, TradeError>;

    /// # Summary
    /// 统计用户的执行记录总数。
    async fn count_user_executions(&self, user_id: &str) -> Result<u64, TradeError>;

    /// # Summary
    /// 聚合用户在回看窗口内的成交统计。
    ///
    /// # Arguments
    /// * `user_id` - 用户标识符。
    /// * `lookback` - 回看窗口长度，起点为当前时间减去该值。
    async fn user_execution_stats(
        &self,
        user_id: &str,
        lookback: chrono::Duration,
    ) -> Result<ExecutionStats, TradeError>;
}
