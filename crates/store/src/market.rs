use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use miharu_core::common::TimeFrame;
use miharu_core::market::entity::{MarketBar, PricePoint};
use miharu_core::market::error::MarketError;
use miharu_core::market::port::MarketDataOracle;
use miharu_core::store::error::StoreError;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;

/// # Summary
/// 行情采样的 SQLite 存储，采用“一库一标的”策略：
/// 每个标的一个独立数据库文件，物理隔离互不影响。
/// 对外同时承担两个角色：外部采集链路的写入端（`save_bars`）
/// 与评估循环的只读预言机（`MarketDataOracle`）。
///
/// # Invariants
/// - 数据库文件存放在数据根目录的 `market` 子目录下。
/// - 连接池按标的缓存，避免反复打开文件。
/// - 同一 `(time_frame, timestamp)` 的采样覆盖写入。
pub struct SqliteMarketStore {
    base_path: PathBuf,
    pools: DashMap<String, SqlitePool>,
}

impl SqliteMarketStore {
    /// # Summary
    /// 创建实例并确保 `market` 子目录存在。
    pub fn new() -> Result<Self, StoreError> {
        let base_path = crate::config::get_root_dir().join("market");
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            base_path,
            pools: DashMap::new(),
        })
    }

    /// # Summary
    /// 获取或初始化指定标的的连接池。
    ///
    /// # Logic
    /// 1. 命中缓存直接返回。
    /// 2. 未命中则以 `create_if_missing` 打开该标的的数据库文件，
    ///    初始化 `bars` 表后放入缓存。
    async fn get_or_init_pool(&self, symbol: &str) -> Result<SqlitePool, StoreError> {
        if let Some(pool) = self.pools.get(symbol) {
            return Ok(pool.clone());
        }

        let db_path = self.base_path.join(format!("{}.db", symbol));
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bars (
                time_frame TEXT NOT NULL,
                timestamp DATETIME NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                source TEXT NOT NULL,
                PRIMARY KEY (time_frame, timestamp)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.pools.insert(symbol.to_string(), pool.clone());
        Ok(pool)
    }

    /// # Summary
    /// 批量写入一个标的的行情采样（采集链路调用）。
    ///
    /// # Logic
    /// 1. 获取该标的的连接池。
    /// 2. 逐条 `INSERT OR REPLACE`，同键采样覆盖为最新值。
    pub async fn save_bars(&self, symbol: &str, bars: &[MarketBar]) -> Result<(), StoreError> {
        let pool = self.get_or_init_pool(symbol).await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO bars
                (time_frame, timestamp, open, high, low, close, volume, source)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(bar.time_frame.to_string())
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .bind(&bar.source)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataOracle for SqliteMarketStore {
    /// # Logic
    /// 取该标的全部周期中时间最新的一根采样，收盘价即最新成交观测。
    /// 没有任何采样的标的返回 `MarketError::NotFound`。
    async fn latest_price(&self, symbol: &str) -> Result<PricePoint, MarketError> {
        let pool = self
            .get_or_init_pool(symbol)
            .await
            .map_err(|e| MarketError::Unknown(e.to_string()))?;

        let row = sqlx::query_as::<_, (f64, DateTime<Utc>)>(
            "SELECT close, timestamp FROM bars ORDER BY timestamp DESC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .map_err(|e| MarketError::Unknown(e.to_string()))?
        .ok_or(MarketError::NotFound)?;

        Ok(PricePoint {
            symbol: symbol.to_string(),
            price: row.0,
            timestamp: row.1,
        })
    }

    /// # Logic
    /// 按时间倒序取指定周期最近 `limit` 条收盘价，翻转为正序返回。
    async fn recent_closes(
        &self,
        symbol: &str,
        time_frame: TimeFrame,
        limit: usize,
    ) -> Result<Vec<f64>, MarketError> {
        let pool = self
            .get_or_init_pool(symbol)
            .await
            .map_err(|e| MarketError::Unknown(e.to_string()))?;

        let mut closes: Vec<f64> = sqlx::query_scalar(
            "SELECT close FROM bars WHERE time_frame = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(time_frame.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&pool)
        .await
        .map_err(|e| MarketError::Unknown(e.to_string()))?;

        closes.reverse();
        Ok(closes)
    }
}
