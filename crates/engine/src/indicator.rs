/// # Summary
/// 近 `period` 个收盘价的简单算术均值。
///
/// # Logic
/// 1. 序列按时间正序传入（最新值在末尾）。
/// 2. 样本不足一个完整周期时返回 None，让条件按"未满足"降级，
///    而不是用残缺窗口算出一个失真均值。
/// 3. 除数经 `u32` 无损转入 `f64`，超出范围的周期同样返回 None。
pub fn simple_moving_average(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let divisor = u32::try_from(period).ok().map(f64::from)?;
    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().sum();
    Some(sum / divisor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_the_trailing_window() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(simple_moving_average(&closes, 3), Some(4.0));
        assert_eq!(simple_moving_average(&closes, 5), Some(3.0));
    }

    #[test]
    fn insufficient_history_yields_none() {
        assert_eq!(simple_moving_average(&[1.0, 2.0], 3), None);
        assert_eq!(simple_moving_average(&[], 1), None);
        assert_eq!(simple_moving_average(&[1.0], 0), None);
    }
}
