use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miharu_core::store::error::StoreError;
use miharu_core::trade::entity::Execution;
use miharu_core::trade::port::ExecutionStore;
use rust_decimal::Decimal;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::OnceCell;

type ExecutionRow = (
    String,                // id
    Option<String>,        // rule_id
    String,                // user_id
    String,                // symbol
    String,                // side
    String,                // quantity
    String,                // price
    String,                // total_amount
    String,                // status
    DateTime<Utc>,         // executed_at
    Option<String>,        // exchange
    Option<String>,        // external_order_id
    Option<String>,        // dedup_key
    DateTime<Utc>,         // created_at
    DateTime<Utc>,         // updated_at
);

const SELECT_COLUMNS: &str = "id, rule_id, user_id, symbol, side, quantity, price, total_amount, \
                              status, executed_at, exchange, external_order_id, dedup_key, \
                              created_at, updated_at";

/// # Summary
/// `ExecutionStore` 的 SQLite 实现。执行记录是只增台账，
/// 定点数字段一律按十进制字符串落库避免精度损失。
///
/// # Invariants
/// - `dedup_key` 非空时全表唯一（部分唯一索引兜底，
///   即使上层检查被并发穿透也不会出现重复落账）。
pub struct SqliteExecutionStore {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteExecutionStore {
    pub fn new() -> Result<Self, StoreError> {
        let base_path = crate::config::get_root_dir();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            db_path: base_path.join("executions.db"),
            pool: OnceCell::new(),
        })
    }

    async fn pool(&self) -> Result<&SqlitePool, StoreError> {
        self.pool
            .get_or_try_init(|| async {
                let options = SqliteConnectOptions::new()
                    .filename(&self.db_path)
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                    .busy_timeout(std::time::Duration::from_secs(5));

                let pool = SqlitePoolOptions::new()
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Database(e.to_string()))?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS executions (
                        id TEXT PRIMARY KEY,
                        rule_id TEXT,
                        user_id TEXT NOT NULL,
                        symbol TEXT NOT NULL,
                        side TEXT NOT NULL,
                        quantity TEXT NOT NULL,
                        price TEXT NOT NULL,
                        total_amount TEXT NOT NULL,
                        status TEXT NOT NULL,
                        executed_at DATETIME NOT NULL,
                        exchange TEXT,
                        external_order_id TEXT,
                        dedup_key TEXT,
                        created_at DATETIME NOT NULL,
                        updated_at DATETIME NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_exec_user_time
                        ON executions (user_id, executed_at DESC);
                    CREATE INDEX IF NOT EXISTS idx_exec_rule ON executions (rule_id);
                    CREATE UNIQUE INDEX IF NOT EXISTS idx_exec_dedup
                        ON executions (dedup_key) WHERE dedup_key IS NOT NULL;
                    "#,
                )
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

                Ok(pool)
            })
            .await
    }
}

fn row_to_execution(row: ExecutionRow) -> Result<Execution, StoreError> {
    Ok(Execution {
        id: row.0,
        rule_id: row.1,
        user_id: row.2,
        symbol: row.3,
        side: row.4.parse().map_err(StoreError::Database)?,
        quantity: Decimal::from_str(&row.5).unwrap_or_default(),
        price: Decimal::from_str(&row.6).unwrap_or_default(),
        total_amount: Decimal::from_str(&row.7).unwrap_or_default(),
        status: row.8.parse().map_err(StoreError::Database)?,
        executed_at: row.9,
        exchange: row.10,
        external_order_id: row.11,
        dedup_key: row.12,
        created_at: row.13,
        updated_at: row.14,
    })
}

fn to_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO executions
            (id, rule_id, user_id, symbol, side, quantity, price, total_amount,
             status, executed_at, exchange, external_order_id, dedup_key,
             created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.rule_id)
        .bind(&execution.user_id)
        .bind(&execution.symbol)
        .bind(execution.side.to_string())
        .bind(execution.quantity.to_string())
        .bind(execution.price.to_string())
        .bind(execution.total_amount.to_string())
        .bind(execution.status.to_string())
        .bind(execution.executed_at)
        .bind(&execution.exchange)
        .bind(&execution.external_order_id)
        .bind(&execution.dedup_key)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Execution, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::NotFound)?;
        row_to_execution(row)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE user_id = ? \
             ORDER BY executed_at DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .bind(to_limit(limit))
        .bind(to_limit(offset))
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_execution).collect()
    }

    async fn list_by_rule(&self, rule_id: &str) -> Result<Vec<Execution>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE rule_id = ? ORDER BY executed_at DESC",
            SELECT_COLUMNS
        ))
        .bind(rule_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_execution).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions ORDER BY executed_at DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(to_limit(limit))
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_execution).collect()
    }

    async fn count_by_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM executions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_by_dedup_key(&self, key: &str) -> Result<Option<Execution>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM executions WHERE dedup_key = ?",
            SELECT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        row.map(row_to_execution).transpose()
    }

    async fn update(&self, execution: &Execution) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET rule_id = ?, user_id = ?, symbol = ?, side = ?, quantity = ?,
                price = ?, total_amount = ?, status = ?, executed_at = ?,
                exchange = ?, external_order_id = ?, dedup_key = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&execution.rule_id)
        .bind(&execution.user_id)
        .bind(&execution.symbol)
        .bind(execution.side.to_string())
        .bind(execution.quantity.to_string())
        .bind(execution.price.to_string())
        .bind(execution.total_amount.to_string())
        .bind(execution.status.to_string())
        .bind(execution.executed_at)
        .bind(&execution.exchange)
        .bind(&execution.external_order_id)
        .bind(&execution.dedup_key)
        .bind(execution.updated_at)
        .bind(&execution.id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
