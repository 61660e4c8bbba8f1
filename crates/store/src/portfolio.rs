use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miharu_core::portfolio::entity::{Portfolio, PortfolioHolding};
use miharu_core::portfolio::port::PortfolioStore;
use miharu_core::store::error::StoreError;
use rust_decimal::Decimal;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::OnceCell;

type PortfolioRow = (
    String,        // id
    String,        // user_id
    String,        // total_value
    String,        // cash_balance
    DateTime<Utc>, // created_at
    DateTime<Utc>, // updated_at
);

type HoldingRow = (
    String,        // id
    String,        // portfolio_id
    String,        // symbol
    String,        // quantity
    String,        // average_cost
    String,        // current_price
    DateTime<Utc>, // last_updated
);

/// # Summary
/// `PortfolioStore` 的 SQLite 实现。组合与持仓同库，
/// 同组合的持仓写入由 SQLite 的单写者事务串行化。
///
/// # Invariants
/// - `portfolios.user_id` 全局唯一；`holdings` 的 (portfolio_id, symbol)
///   组合唯一，库层面兜住重复持仓。
pub struct SqlitePortfolioStore {
    db_path: PathBuf,
    pool: OnceCell<SqlitePool>,
}

impl SqlitePortfolioStore {
    pub fn new() -> Result<Self, StoreError> {
        let base_path = crate::config::get_root_dir();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        Ok(Self {
            db_path: base_path.join("portfolio.db"),
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
                    CREATE TABLE IF NOT EXISTS portfolios (
                        id TEXT PRIMARY KEY,
                        user_id TEXT NOT NULL UNIQUE,
                        total_value TEXT NOT NULL,
                        cash_balance TEXT NOT NULL,
                        created_at DATETIME NOT NULL,
                        updated_at DATETIME NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS holdings (
                        id TEXT PRIMARY KEY,
                        portfolio_id TEXT NOT NULL,
                        symbol TEXT NOT NULL,
                        quantity TEXT NOT NULL,
                        average_cost TEXT NOT NULL,
                        current_price TEXT NOT NULL,
                        last_updated DATETIME NOT NULL,
                        UNIQUE (portfolio_id, symbol)
                    );
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

fn row_to_portfolio(row: PortfolioRow) -> Portfolio {
    Portfolio {
        id: row.0,
        user_id: row.1,
        total_value: Decimal::from_str(&row.2).unwrap_or_default(),
        cash_balance: Decimal::from_str(&row.3).unwrap_or_default(),
        created_at: row.4,
        updated_at: row.5,
    }
}

fn row_to_holding(row: HoldingRow) -> PortfolioHolding {
    PortfolioHolding {
        id: row.0,
        portfolio_id: row.1,
        symbol: row.2,
        quantity: Decimal::from_str(&row.3).unwrap_or_default(),
        average_cost: Decimal::from_str(&row.4).unwrap_or_default(),
        current_price: Decimal::from_str(&row.5).unwrap_or_default(),
        last_updated: row.6,
    }
}

#[async_trait]
impl PortfolioStore for SqlitePortfolioStore {
    async fn create_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO portfolios (id, user_id, total_value, cash_balance, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&portfolio.id)
        .bind(&portfolio.user_id)
        .bind(portfolio.total_value.to_string())
        .bind(portfolio.cash_balance.to_string())
        .bind(portfolio.created_at)
        .bind(portfolio.updated_at)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_by_user(&self, user_id: &str) -> Result<Portfolio, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, PortfolioRow>(
            "SELECT id, user_id, total_value, cash_balance, created_at, updated_at \
             FROM portfolios WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::NotFound)?;
        Ok(row_to_portfolio(row))
    }

    async fn update_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            "UPDATE portfolios SET total_value = ?, cash_balance = ?, updated_at = ? WHERE id = ?",
        )
        .bind(portfolio.total_value.to_string())
        .bind(portfolio.cash_balance.to_string())
        .bind(portfolio.updated_at)
        .bind(&portfolio.id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO holdings
            (id, portfolio_id, symbol, quantity, average_cost, current_price, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&holding.id)
        .bind(&holding.portfolio_id)
        .bind(&holding.symbol)
        .bind(holding.quantity.to_string())
        .bind(holding.average_cost.to_string())
        .bind(holding.current_price.to_string())
        .bind(holding.last_updated)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_holding(
        &self,
        portfolio_id: &str,
        symbol: &str,
    ) -> Result<PortfolioHolding, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, HoldingRow>(
            "SELECT id, portfolio_id, symbol, quantity, average_cost, current_price, last_updated \
             FROM holdings WHERE portfolio_id = ? AND symbol = ?",
        )
        .bind(portfolio_id)
        .bind(symbol)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::NotFound)?;
        Ok(row_to_holding(row))
    }

    async fn list_holdings(&self, portfolio_id: &str) -> Result<Vec<PortfolioHolding>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, HoldingRow>(
            "SELECT id, portfolio_id, symbol, quantity, average_cost, current_price, last_updated \
             FROM holdings WHERE portfolio_id = ? ORDER BY symbol ASC",
        )
        .bind(portfolio_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(row_to_holding).collect())
    }

    async fn update_holding(&self, holding: &PortfolioHolding) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            r#"
            UPDATE holdings
            SET quantity = ?, average_cost = ?, current_price = ?, last_updated = ?
            WHERE id = ?
            "#,
        )
        .bind(holding.quantity.to_string())
        .bind(holding.average_cost.to_string())
        .bind(holding.current_price.to_string())
        .bind(holding.last_updated)
        .bind(&holding.id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_holding(&self, id: &str) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query("DELETE FROM holdings WHERE id = ?")
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
