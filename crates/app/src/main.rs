use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miharu_core::common::SystemClock;
use miharu_core::config::AppConfig;
use miharu_manager::scheduler::RuleScheduler;
use miharu_store::execution::SqliteExecutionStore;
use miharu_store::market::SqliteMarketStore;
use miharu_store::portfolio::SqlitePortfolioStore;
use miharu_store::rule::SqliteRuleStore;
use miharu_trade::portfolio::PortfolioService;
use miharu_trade::service::ExecutionService;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// # Summary
/// 加载应用配置：可选的 `config` 文件叠加 `MIHARU_*` 环境变量，
/// 任何一步失败都回落到内置缺省值。
fn load_config() -> AppConfig {
    let loaded = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(config::Environment::with_prefix("MIHARU").separator("__"))
        .build()
        .and_then(|settings| settings.try_deserialize::<AppConfig>());

    match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!("Config load failed, using defaults: {}", e);
            AppConfig::default()
        }
    }
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 Arc<dyn Trait> 注入到 RuleScheduler。
///
/// # Logic
/// 1. 初始化全局日志。
/// 2. 加载配置并钉死数据根目录。
/// 3. 实例化基础设施层（各域的 SQLite Store）。
/// 4. 实例化应用服务层（执行台账、组合核算）。
/// 5. 启动规则评估调度器，挂起等待退出信号。
/// 6. 收到信号后协作式停机。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Miharu engine starting...");

    // 2. 配置与数据根目录
    let config = load_config();
    miharu_store::config::set_root_dir(PathBuf::from(&config.database.data_dir));

    // 3. 实例化基础设施层
    let clock = Arc::new(SystemClock);
    let rule_store = Arc::new(SqliteRuleStore::new()?);
    let execution_store = Arc::new(SqliteExecutionStore::new()?);
    let portfolio_store = Arc::new(SqlitePortfolioStore::new()?);
    let oracle = Arc::new(SqliteMarketStore::new()?);

    // 4. 实例化应用服务层（注入 Core Trait 抽象）
    let ledger = Arc::new(ExecutionService::new(
        execution_store,
        rule_store.clone(),
        clock.clone(),
    ));
    let portfolio = Arc::new(PortfolioService::new(portfolio_store, clock.clone()));

    // 5. 启动调度器
    let tick_interval = Duration::from_secs(config.engine.tick_interval_secs);
    let scheduler = RuleScheduler::new(rule_store, oracle, ledger, portfolio, clock, tick_interval);
    let handle = scheduler.spawn();
    info!(
        "Rule scheduler running, evaluating every {}s. Waiting for signals...",
        config.engine.tick_interval_secs
    );

    // 6. 挂起主线程，等待外部退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    handle.shutdown().await;

    Ok(())
}
