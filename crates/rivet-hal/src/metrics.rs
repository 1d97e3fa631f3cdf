//! 背压计数器：中断丢弃、串口丢弃与测量饱和在此汇总，周期性以保留记录
//! 发布到 `hal/metrics`。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rivet_core::{MetricsRecord, now_ms};

/// 运行时共享的背压计数器。
#[derive(Debug, Default)]
pub struct Counters {
    /// 中断侧队列溢出丢弃数。
    pub irq_drops: AtomicU64,
    /// 串口事件因背压或无空闲缓冲丢弃数。
    pub uart_drops: AtomicU64,
    /// 测量请求因队列饱和被拒数。
    pub measure_saturated: AtomicU64,
}

/// 跨任务共享句柄。
pub type SharedCounters = Arc<Counters>;

impl Counters {
    pub fn shared() -> SharedCounters {
        Arc::new(Self::default())
    }

    /// 以当前计数生成指标记录；邮箱挤出数由总线侧补充。
    pub fn snapshot(&self, mailbox_displaced: u64) -> MetricsRecord {
        MetricsRecord {
            irq_drops: self.irq_drops.load(Ordering::Relaxed),
            uart_drops: self.uart_drops.load(Ordering::Relaxed),
            measure_saturated: self.measure_saturated.load(Ordering::Relaxed),
            mailbox_displaced,
            ts_ms: now_ms(),
        }
    }
}
