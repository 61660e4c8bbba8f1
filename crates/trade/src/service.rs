use crate::stats;
use async_trait::async_trait;
use miharu_core::common::Clock;
use miharu_core::rule::port::RuleStore;
use miharu_core::store::error::StoreError;
use miharu_core::trade::entity::{Execution, ExecutionDraft, ExecutionStats};
use miharu_core::trade::port::{ExecutionLedger, ExecutionStore, TradeError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 分页缺省单页条数
const DEFAULT_PAGE_SIZE: usize = 10;
/// 最近成交监控的缺省条数
const DEFAULT_RECENT_LIMIT: usize = 10;

/// # Summary
/// `ExecutionService` 是执行台账的入口调度者，实现了 `ExecutionLedger`。
/// 负责草稿校验、缺省补全、幂等去重以及来源规则的触发簿记。
pub struct ExecutionService {
    executions: Arc<dyn ExecutionStore>,
    rules: Arc<dyn RuleStore>,
    clock: Arc<dyn Clock>,
}

impl ExecutionService {
    pub fn new(
        executions: Arc<dyn ExecutionStore>,
        rules: Arc<dyn RuleStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executions,
            rules,
            clock,
        }
    }

    /// # Logic
    /// 草稿校验与补全，产出可落账的完整执行记录。
    /// 1. 用户与标的必须非空，数量与价格必须为正，否则 `InvalidExecution`
    ///    —— 校验失败的草稿绝不触达存储。
    /// 2. 总额缺省（None 或 0）按 price × quantity 推导。
    /// 3. 成交时间缺省取台账时钟的当前时间。
    fn materialize(&self, draft: ExecutionDraft) -> Result<Execution, TradeError> {
        if draft.user_id.trim().is_empty() {
            return Err(TradeError::InvalidExecution("缺少用户标识".into()));
        }
        if draft.symbol.trim().is_empty() {
            return Err(TradeError::InvalidExecution("缺少标的代码".into()));
        }
        if draft.quantity <= Decimal::ZERO {
            return Err(TradeError::InvalidExecution(format!(
                "数量必须为正: {}",
                draft.quantity
            )));
        }
        if draft.price <= Decimal::ZERO {
            return Err(TradeError::InvalidExecution(format!(
                "价格必须为正: {}",
                draft.price
            )));
        }

        let total_amount = match draft.total_amount {
            Some(total) if !total.is_zero() => total,
            _ => draft.price * draft.quantity,
        };
        let now = self.clock.now();
        let executed_at = draft.executed_at.unwrap_or(now);

        Ok(Execution {
            id: Uuid::new_v4().to_string(),
            rule_id: draft.rule_id,
            user_id: draft.user_id,
            symbol: draft.symbol,
            side: draft.side,
            quantity: draft.quantity,
            price: draft.price,
            total_amount,
            status: draft.status,
            executed_at,
            exchange: draft.exchange,
            external_order_id: draft.external_order_id,
            dedup_key: draft.dedup_key,
            created_at: now,
            updated_at: now,
        })
    }
}

#[async_trait]
impl ExecutionLedger for ExecutionService {
    async fn create_execution(&self, draft: ExecutionDraft) -> Result<Execution, TradeError> {
        let execution = self.materialize(draft)?;
        self.executions.save(&execution).await?;
        Ok(execution)
    }

    /// # Logic
    /// 1. 同 `create_execution` 的校验与补全。
    /// 2. 草稿携带去重键且已有同键记录时直接返回既有记录，
    ///    保证调度重放不产生重复落账。
    /// 3. 落账后若携带来源规则 id，回查该规则并回写最近触发时间；
    ///    规则缺失按 `RuleNotFound` 上抛，已落账的执行不回滚。
    async fn process_execution(&self, draft: ExecutionDraft) -> Result<Execution, TradeError> {
        let execution = self.materialize(draft)?;

        if let Some(key) = &execution.dedup_key
            && let Some(existing) = self.executions.find_by_dedup_key(key).await?
        {
            debug!("Dedup key {} already recorded, returning execution {}", key, existing.id);
            return Ok(existing);
        }

        self.executions.save(&execution).await?;

        if let Some(rule_id) = &execution.rule_id {
            let rule = self.rules.get(rule_id).await.map_err(|e| match e {
                StoreError::NotFound => TradeError::RuleNotFound(rule_id.clone()),
                other => TradeError::Store(other),
            })?;
            self.rules
                .mark_triggered(&rule.id, execution.executed_at)
                .await?;
        }

        Ok(execution)
    }

    async fn get_execution(&self, id: &str) -> Result<Execution, TradeError> {
        self.executions.get(id).await.map_err(|e| match e {
            StoreError::NotFound => TradeError::ExecutionNotFound(id.to_string()),
            other => TradeError::Store(other),
        })
    }

    async fn list_user_executions(
        &self,
        user_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Execution>, TradeError> {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        let offset = (page - 1) * page_size;
        Ok(self.executions.list_by_user(user_id, page_size, offset).await?)
    }

    async fn list_rule_executions(&self, rule_id: &str) -> Result<Vec<Execution>, TradeError> {
        Ok(self.executions.list_by_rule(rule_id).await?)
    }

    async fn list_recent_executions(&self, limit: usize) -> Result<Vec<Execution>, TradeError> {
        let limit = if limit == 0 { DEFAULT_RECENT_LIMIT } else { limit };
        Ok(self.executions.list_recent(limit).await?)
    }

    async fn count_user_executions(&self, user_id: &str) -> Result<u64, TradeError> {
        Ok(self.executions.count_by_user(user_id).await?)
    }

    /// # Logic
    /// 取用户最近的一个分析批次（最新在前，上限 1000 条），
    /// 以当前时间减回看窗口为起点交给纯聚合函数。
    async fn user_execution_stats(
        &self,
        user_id: &str,
        lookback: chrono::Duration,
    ) -> Result<ExecutionStats, TradeError> {
        let batch = self
            .executions
            .list_by_user(user_id, stats::STATS_BATCH_LIMIT, 0)
            .await?;
        let window_start = self.clock.now() - lookback;
        Ok(stats::aggregate(batch, window_start))
    }
}
