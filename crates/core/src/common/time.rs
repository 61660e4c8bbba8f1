use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// # Summary
/// 时钟端口，隔离对物理系统时间的直接依赖。
/// 执行记录的缺省时间戳、持仓的更新时间以及统计窗口的起点
/// 全部通过此接口取"当前时间"，从而允许测试钉死时间线。
pub trait Clock: Send + Sync {
    /// 获取当前挂载的时间
    fn now(&self) -> DateTime<Utc>;
}

/// # Summary
/// 生产运行使用的真实时钟，直接透传操作系统当前时间。
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 测试专用的手动时钟，由调用方主动推进或重设时间。
///
/// # Invariants
/// - 并发安全：内部通过 `RwLock` 支持多协程读取与修改。
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// 以指定的初始时间创建手动时钟
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// 将时钟重设为指定时间
    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.current.write() {
            *guard = at;
        }
    }

    /// 在当前时间基础上向前拨动
    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut guard) = self.current.write() {
            *guard += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current
            .read()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now())
    }
}
