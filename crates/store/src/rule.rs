use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miharu_core::rule::entity::{RuleStatus, TradingRule};
use miharu_core::rule::port::RuleStore;
use miharu_core::store::error::StoreError;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;
use tokio::sync::OnceCell;

type RuleRow = (
    String,                // id
    String,                // user_id
    String,                // name
    String,                // description
    String,                // symbol
    String,                // rule_type
    Vec<u8>,               // body
    String,                // status
    Option<DateTime<Utc>>, // last_triggered_at
    DateTime<Utc>,         // created_at
    DateTime<Utc>,         // updated_at
);

const SELECT_COLUMNS: &str = "id, user_id, name, description, symbol, rule_type, body, status, \
                              last_triggered_at, created_at, updated_at";

/// # Summary
/// `RuleStore` 的 SQLite 实现，全量规则集中在单个 `rules.db`。
/// 评估批次 (`list_active`) 是跨用户查询，因此不做分库。
pub struct SqliteRuleStore {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqliteRuleStore {
    /// # Summary
    /// 创建实例并确保数据目录存在；连接延迟到首次访问时建立。
    pub fn new() -> Result<Self, StoreError> {
        let base_path = crate::config::get_root_dir();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            db_path: base_path.join("rules.db"),
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
                    CREATE TABLE IF NOT EXISTS trading_rules (
                        id TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL,
                        name TEXT NOT NULL,
                        description TEXT NOT NULL DEFAULT '',
                        symbol TEXT NOT NULL,
                        rule_type TEXT NOT NULL,
                        body BLOB NOT NULL,
                        status TEXT NOT NULL,
                        last_triggered_at DATETIME,
                        created_at DATETIME NOT NULL,
                        updated_at DATETIME NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_rules_user ON trading_rules (user_id);
                    CREATE INDEX IF NOT EXISTS idx_rules_status ON trading_rules (status);
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

fn row_to_rule(row: RuleRow) -> Result<TradingRule, StoreError> {
    Ok(TradingRule {
        id: row.0,
        user_id: row.1,
        name: row.2,
        description: row.3,
        symbol: row.4,
        rule_type: row.5,
        body: row.6,
        status: row.7.parse().map_err(StoreError::Database)?,
        last_triggered_at: row.8,
        created_at: row.9,
        updated_at: row.10,
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn save(&self, rule: &TradingRule) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO trading_rules
            (id, user_id, name, description, symbol, rule_type, body, status,
             last_triggered_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.user_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.symbol)
        .bind(&rule.rule_type)
        .bind(&rule.body)
        .bind(rule.status.to_string())
        .bind(rule.last_triggered_at)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<TradingRule, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM trading_rules WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::NotFound)?;
        row_to_rule(row)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<TradingRule>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM trading_rules WHERE user_id = ? ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_rule).collect()
    }

    async fn list_active(&self) -> Result<Vec<TradingRule>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM trading_rules WHERE status = ? ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(RuleStatus::Active.to_string())
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_rule).collect()
    }

    async fn update(&self, rule: &TradingRule) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            r#"
            UPDATE trading_rules
            SET user_id = ?, name = ?, description = ?, symbol = ?, rule_type = ?,
                body = ?, status = ?, last_triggered_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&rule.user_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.symbol)
        .bind(&rule.rule_type)
        .bind(&rule.body)
        .bind(rule.status.to_string())
        .bind(rule.last_triggered_at)
        .bind(rule.updated_at)
        .bind(&rule.id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: RuleStatus) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result =
            sqlx::query("UPDATE trading_rules SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.to_string())
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            "UPDATE trading_rules SET last_triggered_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM trading_rules WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
