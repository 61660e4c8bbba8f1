use miharu_core::common::{Clock, TimeFrame};
use miharu_core::market::entity::PricePoint;
use miharu_core::market::error::MarketError;
use miharu_core::market::port::MarketDataOracle;
use miharu_core::portfolio::port::{PortfolioAccount, PortfolioError};
use miharu_core::rule::entity::{Condition, ConditionKind, RuleBody, RuleBodyError, TradingRule};
use miharu_core::rule::port::RuleStore;
use miharu_core::store::error::StoreError;
use miharu_core::trade::entity::ExecutionSide;
use miharu_core::trade::port::{ExecutionLedger, TradeError};
use miharu_engine::eval::{self, ObservationKey, Observations};
use miharu_engine::indicator::simple_moving_average;
use miharu_engine::intent::{self, IntentError};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// # Summary
/// 调度层的统一错误类型。
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Market error: {0}")]
    Market(#[from] MarketError),
    #[error("Trade error: {0}")]
    Trade(#[from] TradeError),
    #[error("Portfolio error: {0}")]
    Portfolio(#[from] PortfolioError),
    #[error("Rule body error: {0}")]
    Body(#[from] RuleBodyError),
    #[error("Intent error: {0}")]
    Intent(#[from] IntentError),
}

/// # Summary
/// 单个评估周期的结果汇总，只用于日志与测试观察。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 本周期进入评估的规则数
    pub evaluated: usize,
    /// 触发并走完执行链路的规则数
    pub triggered: usize,
    /// 因单规则故障被跳过的规则数
    pub failed: usize,
}

/// # Summary
/// 规则评估调度器，系统的应用服务层门面 (Facade)。
/// 以固定周期驱动评估循环：取活跃规则批次 → 向预言机取观测值 →
/// 评估条件链 → 触发则经执行台账落账并记入持仓。
/// 编译期仅依赖 `miharu-core` 中的 Trait 定义，所有具体实现通过构造函数注入。
///
/// # Invariants
/// - 任意时刻至多一个周期在途：周期超时只会顺延下一个 tick，
///   绝不并发评估（tick 合并）。
/// - 单规则的故障只影响该规则本周期的处理；取规则批次失败
///   才会放弃整个周期（下个 tick 从头重试）。
/// - 调度器只读规则定义，触发簿记与执行落账都经由注入的端口回写。
pub struct RuleScheduler {
    // 规则持久化接口
    rules: Arc<dyn RuleStore>,
    // 行情只读预言机
    oracle: Arc<dyn MarketDataOracle>,
    // 执行台账服务
    ledger: Arc<dyn ExecutionLedger>,
    // 组合持仓核算服务
    portfolio: Arc<dyn PortfolioAccount>,
    // 时钟端口
    clock: Arc<dyn Clock>,
    // 评估周期
    tick_interval: Duration,
}

/// # Summary
/// 运行中调度协程的句柄。`shutdown` 发出协作式停机信号并等待
/// 协程退出；`abort` 是不等待的强制中止，仅供异常兜底。
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// # Summary
    /// 协作式停机：置位停机标志并等待调度协程自行退出。
    ///
    /// # Logic
    /// 停机标志只在 tick 边界和每条规则之间被检查，
    /// 因此不会打断一条规则处理中途的外部调用。
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            debug!("Scheduler task already finished before shutdown signal");
        }
        if let Err(e) = self.task.await {
            warn!("Scheduler task join failed: {}", e);
        }
    }

    /// # Summary
    /// 强制中止调度协程，不等待当前周期收尾。
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl RuleScheduler {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        oracle: Arc<dyn MarketDataOracle>,
        ledger: Arc<dyn ExecutionLedger>,
        portfolio: Arc<dyn PortfolioAccount>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            rules,
            oracle,
            ledger,
            portfolio,
            clock,
            tick_interval,
        })
    }

    /// # Summary
    /// 启动周期评估协程。
    ///
    /// # Logic
    /// 1. 以固定间隔 tick，`MissedTickBehavior::Delay` 保证慢周期
    ///    顺延而不补课，任意时刻至多一个在途周期。
    /// 2. 每个 tick 执行一个完整周期；取批次失败记日志后等下个 tick。
    /// 3. 停机信号到达时在 tick 边界退出；周期进行中则在
    ///    下一条规则开始前退出。
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        let (tx, mut rx) = watch::channel(false);
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                "Rule scheduler started, tick interval {:?}",
                scheduler.tick_interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.run_batch(Some(&rx)).await {
                            Ok(report) => info!(
                                "Evaluation cycle finished: {} evaluated, {} triggered, {} failed",
                                report.evaluated, report.triggered, report.failed
                            ),
                            Err(e) => error!("Evaluation cycle aborted: {}", e),
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
                if *rx.borrow() {
                    break;
                }
            }
            info!("Rule scheduler stopped");
        });

        SchedulerHandle { shutdown: tx, task }
    }

    /// # Summary
    /// 执行一个完整评估周期（测试与手工驱动入口）。
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        self.run_batch(None).await
    }

    /// # Logic
    /// 1. 取全体 Active 规则作为本周期批次；取批次失败放弃整个周期。
    /// 2. 规则逐条顺序处理：单条失败计入 `failed` 并继续下一条，
    ///    循环本身绝不因单规则错误终止。
    /// 3. 每条规则开始前检查停机标志，置位即提前收束。
    async fn run_batch(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<CycleReport, SchedulerError> {
        let batch = self.rules.list_active().await?;
        let mut report = CycleReport::default();

        for rule in &batch {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                info!(
                    "Shutdown requested, cycle cut short after {} of {} rules",
                    report.evaluated,
                    batch.len()
                );
                break;
            }
            report.evaluated += 1;
            match self.process_rule(rule).await {
                Ok(true) => report.triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!("Rule {} skipped this cycle: {}", rule.id, e);
                }
            }
        }

        Ok(report)
    }

    /// # Summary
    /// 处理单条规则：解码、观测、评估，触发则落账并记入持仓。
    ///
    /// # Logic
    /// 1. 规则体解码失败按错误上抛，由周期循环记失败并跳过。
    /// 2. 主标的最新价取不到同样视为本条规则失败（条件无从评估）。
    /// 3. 条件链判负直接返回；判正只消费第一个动作模板。
    /// 4. 台账返回既有记录（去重键命中重放）时不再重复记入持仓。
    /// 5. 已落账执行的持仓更新失败只记日志，不回滚、不重试。
    ///
    /// # Returns
    /// 触发并落账返回 `Ok(true)`，未触发返回 `Ok(false)`。
    async fn process_rule(&self, rule: &TradingRule) -> Result<bool, SchedulerError> {
        let body = RuleBody::decode(&rule.body)?;
        if body.conditions.is_empty() {
            // 空条件序列的规则永远不触发
            return Ok(false);
        }

        let point = self.oracle.latest_price(&rule.symbol).await?;
        let observations = self.collect_observations(&body.conditions, &point).await;

        if !eval::evaluate(&body.conditions, &observations) {
            return Ok(false);
        }

        let Some(action) = body.actions.first() else {
            warn!("Rule {} triggered but carries no action", rule.id);
            return Ok(false);
        };
        if body.actions.len() > 1 {
            debug!(
                "Rule {} carries {} actions, only the first executes",
                rule.id,
                body.actions.len()
            );
        }

        let now = self.clock.now();
        let draft = intent::execution_from_action(rule, action, point.price, now, self.tick_interval)?;
        let signed_quantity = match draft.side {
            ExecutionSide::Buy => draft.quantity,
            ExecutionSide::Sell => -draft.quantity,
        };
        let fill_price: Decimal = draft.price;

        let execution = self.ledger.process_execution(draft).await?;
        if execution.executed_at != now {
            // 去重键命中：返回的是既有记录，持仓已在首次落账时更新过
            debug!(
                "Rule {} replayed within its dedup bucket, execution {} reused",
                rule.id, execution.id
            );
            return Ok(true);
        }
        info!(
            "Rule {} triggered at price {}, recorded execution {}",
            rule.id, point.price, execution.id
        );

        if let Err(e) = self
            .portfolio
            .apply_trade(&rule.user_id, &action.symbol, signed_quantity, fill_price)
            .await
        {
            warn!(
                "Execution {} recorded but holdings update failed: {}",
                execution.id, e
            );
        }

        Ok(true)
    }

    /// # Summary
    /// 为条件链收集本周期可用的观测值快照。
    ///
    /// # Logic
    /// 1. 主标的的最新价来自已取到的 `point`，直接写入。
    /// 2. 跨标的最新价、带周期的收盘价和均线按需向预言机补取；
    ///    取不到（缺数据或故障）只记 debug 并留空，条件按
    ///    "未满足" 降级，绝不让补取失败中断本条规则。
    async fn collect_observations(
        &self,
        conditions: &[Condition],
        point: &PricePoint,
    ) -> Observations {
        let mut observations = Observations::new();

        for condition in conditions {
            let key = ObservationKey::for_condition(condition);
            if observations.contains(&key) {
                continue;
            }

            match condition.kind {
                ConditionKind::Price => match condition.time_frame {
                    None if condition.symbol == point.symbol => {
                        observations.insert(key, point.price);
                    }
                    None => match self.oracle.latest_price(&condition.symbol).await {
                        Ok(other) => observations.insert(key, other.price),
                        Err(e) => {
                            debug!("No latest price for {}: {}", condition.symbol, e);
                        }
                    },
                    Some(time_frame) => {
                        match self.last_close(&condition.symbol, time_frame).await {
                            Some(close) => observations.insert(key, close),
                            None => debug!(
                                "No {} close for {}",
                                time_frame, condition.symbol
                            ),
                        }
                    }
                },
                ConditionKind::MovingAverage => {
                    let period = eval::ma_period(condition);
                    let time_frame = condition.time_frame.unwrap_or(TimeFrame::Day1);
                    match self
                        .oracle
                        .recent_closes(&condition.symbol, time_frame, period)
                        .await
                    {
                        Ok(closes) => {
                            if let Some(average) = simple_moving_average(&closes, period) {
                                observations.insert(key, average);
                            } else {
                                debug!(
                                    "Insufficient history for {}-bar average of {}",
                                    period, condition.symbol
                                );
                            }
                        }
                        Err(e) => {
                            debug!("No close history for {}: {}", condition.symbol, e);
                        }
                    }
                }
            }
        }

        observations
    }

    async fn last_close(&self, symbol: &str, time_frame: TimeFrame) -> Option<f64> {
        match self.oracle.recent_closes(symbol, time_frame, 1).await {
            Ok(closes) => closes.last().copied(),
            Err(e) => {
                debug!("No recent close for {}: {}", symbol, e);
                None
            }
        }
    }
}
