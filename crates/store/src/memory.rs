use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miharu_core::common::TimeFrame;
use miharu_core::market::entity::{MarketBar, PricePoint};
use miharu_core::market::error::MarketError;
use miharu_core::market::port::MarketDataOracle;
use miharu_core::portfolio::entity::{Portfolio, PortfolioHolding};
use miharu_core::portfolio::port::PortfolioStore;
use miharu_core::rule::entity::{RuleStatus, TradingRule};
use miharu_core::rule::port::RuleStore;
use miharu_core::store::error::StoreError;
use miharu_core::trade::entity::Execution;
use miharu_core::trade::port::ExecutionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// # Summary
/// 基于内存的规则仓储实现，供测试与免持久化运行模式使用。
///
/// # Invariants
/// - 与 SQLite 实现保持同样的查询语义：缺失记录返回 `NotFound`，
///   `list_active` 按创建时间正序、`list_by_user` 按创建时间倒序。
pub struct MemoryRuleStore {
    rules: Arc<RwLock<HashMap<String, TradingRule>>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save(&self, rule: &TradingRule) -> Result<(), StoreError> {
        self.rules
            .write()
            .await
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<TradingRule, StoreError> {
        self.rules
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<TradingRule>, StoreError> {
        let guard = self.rules.read().await;
        let mut rules: Vec<TradingRule> = guard
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }

    async fn list_active(&self) -> Result<Vec<TradingRule>, StoreError> {
        let guard = self.rules.read().await;
        let mut rules: Vec<TradingRule> = guard
            .values()
            .filter(|r| r.status == RuleStatus::Active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn update(&self, rule: &TradingRule) -> Result<(), StoreError> {
        let mut guard = self.rules.write().await;
        if !guard.contains_key(&rule.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, status: RuleStatus) -> Result<(), StoreError> {
        let mut guard = self.rules.write().await;
        let rule = guard.get_mut(id).ok_or(StoreError::NotFound)?;
        rule.status = status;
        rule.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.rules.write().await;
        let rule = guard.get_mut(id).ok_or(StoreError::NotFound)?;
        rule.last_triggered_at = Some(at);
        rule.updated_at = at;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.rules
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

/// # Summary
/// 基于内存的执行台账仓储实现。
///
/// # Invariants
/// - 列表查询按 `executed_at` 倒序，与 SQLite 实现一致。
/// - 非空 `dedup_key` 全表唯一，重复落账返回 `Database` 错误，
///   对齐 SQLite 的部分唯一索引。
pub struct MemoryExecutionStore {
    executions: Arc<RwLock<HashMap<String, Execution>>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sorted_filtered<F>(&self, pred: F) -> Vec<Execution>
    where
        F: Fn(&Execution) -> bool,
    {
        let guard = self.executions.read().await;
        let mut batch: Vec<Execution> = guard.values().filter(|e| pred(e)).cloned().collect();
        batch.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        batch
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut guard = self.executions.write().await;
        if let Some(key) = &execution.dedup_key
            && guard.values().any(|e| e.dedup_key.as_ref() == Some(key))
        {
            return Err(StoreError::Database(format!(
                "UNIQUE constraint failed: executions.dedup_key ({})",
                key
            )));
        }
        guard.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let batch = self.sorted_filtered(|e| e.user_id == user_id).await;
        Ok(batch.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_by_rule(&self, rule_id: &str) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .sorted_filtered(|e| e.rule_id.as_deref() == Some(rule_id))
            .await)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let batch = self.sorted_filtered(|_| true).await;
        Ok(batch.into_iter().take(limit).collect())
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let guard = self.executions.read().await;
        let count = guard.values().filter(|e| e.user_id == user_id).count();
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_by_dedup_key(&self, key: &str) -> Result<Option<Execution>, StoreError> {
        let guard = self.executions.read().await;
        Ok(guard
            .values()
            .find(|e| e.dedup_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut guard = self.executions.write().await;
        if !guard.contains_key(&execution.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(execution.id.clone(), execution.clone());
        Ok(())
    }
}

/// # Summary
/// 基于内存的组合与持仓仓储实现。
///
/// # Invariants
/// - `user_id` 在组合间唯一、`(portfolio_id, symbol)` 在持仓间唯一，
///   与 SQLite 的唯一约束对齐。
pub struct MemoryPortfolioStore {
    portfolios: Arc<RwLock<HashMap<String, Portfolio>>>,
    holdings: Arc<RwLock<HashMap<String, PortfolioHolding>>>,
}

impl MemoryPortfolioStore {
    pub fn new() -> Self {
        Self {
            portfolios: Arc::new(RwLock::new(HashMap::new())),
            holdings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryPortfolioStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortfolioStore for MemoryPortfolioStore {
    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let mut guard = self.portfolios.write().await;
        if guard.values().any(|p| p.user_id == portfolio.user_id) {
            return Err(StoreError::Database(format!(
                "UNIQUE constraint failed: portfolios.user_id ({})",
                portfolio.user_id
            )));
        }
        guard.insert(portfolio.id.clone(), portfolio.clone());
        Ok(())
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Portfolio, StoreError> {
        let guard = self.portfolios.read().await;
        guard
            .values()
            .find(|p| p.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let mut guard = self.portfolios.write().await;
        if !guard.contains_key(&portfolio.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(portfolio.id.clone(), portfolio.clone());
        Ok(())
    }

    async fn create_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError> {
        let mut guard = self.holdings.write().await;
        if guard
            .values()
            .any(|h| h.portfolio_id == holding.portfolio_id && h.symbol == holding.symbol)
        {
            return Err(StoreError::Database(format!(
                "UNIQUE constraint failed: holdings.portfolio_id, holdings.symbol ({}, {})",
                holding.portfolio_id, holding.symbol
            )));
        }
        guard.insert(holding.id.clone(), holding.clone());
        Ok(())
    }

    async fn get_holding(
        &self,
        portfolio_id: &str,
        symbol: &str,
    ) -> Result<PortfolioHolding, StoreError> {
        let guard = self.holdings.read().await;
        guard
            .values()
            .find(|h| h.portfolio_id == portfolio_id && h.symbol == symbol)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_holdings(&self, portfolio_id: &str) -> Result<Vec<PortfolioHolding>, StoreError> {
        let guard = self.holdings.read().await;
        let mut holdings: Vec<PortfolioHolding> = guard
            .values()
            .filter(|h| h.portfolio_id == portfolio_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(holdings)
    }

    async fn update_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError> {
        let mut guard = self.holdings.write().await;
        if !guard.contains_key(&holding.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(holding.id.clone(), holding.clone());
        Ok(())
    }

    async fn delete_holding(&self, id: &str) -> Result<(), StoreError> {
        self.holdings
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

/// # Summary
/// 基于内存的行情存储，作为 `MarketDataOracle` 的测试替身
/// 与免持久化运行模式的行情后端。
///
/// # Invariants
/// - 同一 `(time_frame, timestamp)` 的采样覆盖写入，
///   与 SQLite 实现的 `INSERT OR REPLACE` 对齐。
pub struct MemoryMarketStore {
    bars: Arc<RwLock<HashMap<String, Vec<MarketBar>>>>,
}

impl MemoryMarketStore {
    pub fn new() -> Self {
        Self {
            bars: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// # Summary
    /// 写入一条行情采样，键冲突时覆盖。
    pub async fn record_bar(&self, bar: MarketBar) {
        let mut guard = self.bars.write().await;
        let series = guard.entry(bar.symbol.clone()).or_default();
        if let Some(existing) = series
            .iter_mut()
            .find(|b| b.time_frame == bar.time_frame && b.timestamp == bar.timestamp)
        {
            *existing = bar;
        } else {
            series.push(bar);
        }
    }
}

impl Default for MemoryMarketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataOracle for MemoryMarketStore {
    async fn latest_price(&self, symbol: &str) -> Result<PricePoint, MarketError> {
        let guard = self.bars.read().await;
        let series = guard.get(symbol).ok_or(MarketError::NotFound)?;
        let latest = series
            .iter()
            .max_by_key(|b| b.timestamp)
            .ok_or(MarketError::NotFound)?;
        Ok(PricePoint {
            symbol: symbol.to_string(),
            price: latest.close,
            timestamp: latest.timestamp,
        })
    }

    async fn recent_closes(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        limit: usize,
    ) -> Result<Vec<f64>, MarketError> {
        let guard = self.bars.read().await;
        let Some(series) = guard.get(symbol) else {
            return Ok(Vec::new());
        };
        let mut bars: Vec<&MarketBar> = series
            .iter()
            .filter(|b| b.time_frame == time_frame)
            .collect();
        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = bars.len().saturating_sub(limit);
        Ok(bars.into_iter().skip(skip).map(|b| b.close).collect())
    }
}
