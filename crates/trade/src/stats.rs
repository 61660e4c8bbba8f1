use chrono::{DateTime, NaiveDate, Utc};
use miharu_core::trade::entity::{
    DailyActivity, Execution, ExecutionSide, ExecutionStats, SymbolStat,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// 单次统计读取的最大分析批次
pub const STATS_BATCH_LIMIT: usize = 1000;
/// 榜单保留的标的数量
pub const TOP_SYMBOL_LIMIT: usize = 5;
/// 结果附带的最近成交条数
pub const RECENT_LIMIT: usize = 5;

/// # Summary
/// 把一批执行记录聚合为窗口统计。纯内存计算，不触达任何端口。
///
/// # Logic
/// 1. 入参按最新在前排列；只保留 `executed_at` 严格晚于窗口起点的记录。
/// 2. 单次遍历累计：按标的计数、按自然日计数、买卖计数、
///    总额合计与单标的切片。
/// 3. 榜单按 count 降序、同 count 按 symbol 升序排序后截断，
///    保证同批数据重复聚合的结果逐字段一致。
/// 4. 日活按日期升序输出；无成交时平均每笔金额为 0。
pub fn aggregate(executions: Vec<Execution>, window_start: DateTime<Utc>) -> ExecutionStats {
    let filtered: Vec<Execution> = executions
        .into_iter()
        .filter(|e| e.executed_at > window_start)
        .collect();

    let mut symbol_breakdown: HashMap<String, u64> = HashMap::new();
    let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    let mut per_symbol: HashMap<String, SymbolStat> = HashMap::new();
    let mut buy_count = 0u64;
    let mut sell_count = 0u64;
    let mut total_volume = Decimal::ZERO;

    for execution in &filtered {
        *symbol_breakdown.entry(execution.symbol.clone()).or_insert(0) += 1;
        *daily.entry(execution.executed_at.date_naive()).or_insert(0) += 1;

        let slice = per_symbol
            .entry(execution.symbol.clone())
            .or_insert_with(|| SymbolStat {
                symbol: execution.symbol.clone(),
                count: 0,
                volume: Decimal::ZERO,
                buy_count: 0,
                sell_count: 0,
            });
        slice.count += 1;
        slice.volume += execution.total_amount;

        match execution.side {
            ExecutionSide::Buy => {
                buy_count += 1;
                slice.buy_count += 1;
            }
            ExecutionSide::Sell => {
                sell_count += 1;
                slice.sell_count += 1;
            }
        }

        total_volume += execution.total_amount;
    }

    let total_executions = u64::try_from(filtered.len()).unwrap_or_default();
    let average_trade_size = if total_executions > 0 {
        total_volume / Decimal::from(total_executions)
    } else {
        Decimal::ZERO
    };

    let mut top_symbols: Vec<SymbolStat> = per_symbol.into_values().collect();
    top_symbols.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.symbol.cmp(&b.symbol)));
    top_symbols.truncate(TOP_SYMBOL_LIMIT);

    let executions_by_day = daily
        .into_iter()
        .map(|(date, count)| DailyActivity { date, count })
        .collect();

    let recent_executions = filtered.iter().take(RECENT_LIMIT).cloned().collect();

    ExecutionStats {
        total_executions,
        buy_count,
        sell_count,
        total_volume,
        average_trade_size,
        symbol_breakdown,
        executions_by_day,
        top_symbols,
        recent_executions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use miharu_core::trade::entity::ExecutionStatus;
    use rust_decimal_macros::dec;

    fn execution(symbol: &str, side: ExecutionSide, total: Decimal, at: DateTime<Utc>) -> Execution {
        Execution {
            id: format!("exec-{}-{}", symbol, at.timestamp()),
            rule_id: None,
            user_id: "user-1".to_string(),
            symbol: symbol.to_string(),
            side,
            quantity: dec!(1),
            price: total,
            total_amount: total,
            status: ExecutionStatus::Executed,
            executed_at: at,
            exchange: None,
            external_order_id: None,
            dedup_key: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).single().unwrap()
    }

    #[test]
    fn empty_batch_yields_zeroes() {
        let stats = aggregate(Vec::new(), at(1, 0));
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.average_trade_size, Decimal::ZERO);
        assert!(stats.top_symbols.is_empty());
        assert!(stats.recent_executions.is_empty());
    }

    #[test]
    fn window_filter_is_strict() {
        let start = at(2, 0);
        let stats = aggregate(
            vec![
                execution("AAPL", ExecutionSide::Buy, dec!(100), at(2, 1)),
                execution("AAPL", ExecutionSide::Buy, dec!(100), at(2, 0)),
                execution("AAPL", ExecutionSide::Buy, dec!(100), at(1, 0)),
            ],
            start,
        );
        // 恰好落在窗口起点上的记录不计入
        assert_eq!(stats.total_executions, 1);
    }

    #[test]
    fn tie_break_orders_by_symbol() {
        let stats = aggregate(
            vec![
                execution("MSFT", ExecutionSide::Buy, dec!(10), at(3, 4)),
                execution("AAPL", ExecutionSide::Buy, dec!(10), at(3, 3)),
                execution("MSFT", ExecutionSide::Sell, dec!(10), at(3, 2)),
                execution("AAPL", ExecutionSide::Buy, dec!(10), at(3, 1)),
            ],
            at(1, 0),
        );
        let names: Vec<&str> = stats.top_symbols.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(names, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn daily_activity_is_date_ascending() {
        let stats = aggregate(
            vec![
                execution("AAPL", ExecutionSide::Buy, dec!(10), at(5, 1)),
                execution("AAPL", ExecutionSide::Buy, dec!(10), at(3, 1)),
                execution("AAPL", ExecutionSide::Buy, dec!(10), at(4, 1)),
            ],
            at(1, 0),
        );
        let days: Vec<u32> = stats
            .executions_by_day
            .iter()
            .map(|d| chrono::Datelike::day(&d.date))
            .collect();
        assert_eq!(days, vec![3, 4, 5]);
    }
}
