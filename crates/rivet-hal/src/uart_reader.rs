//! # UART 读取工作器
//!
//! ## 核心意图（Why）
//! - 每路已登记的串口一个读取任务，任务是端口的唯一驱动者：读、写、改参
//!   都经由它串行执行；
//! - 内存上界即缓冲池：`N = 事件队列容量` 块 `max_frame` 定长 slab，读取
//!   与回显共用；事件被挤出或消费后 slab 自动归还（句柄 `Drop` 负责）；
//! - 读取截止单次封顶 250 ms，保证排空信号在亚秒级生效。
//!
//! ## 帧化（What）
//! - `bytes`：一次成功读取即一帧；
//! - `lines`：按字节积累，`\n` 冲刷、`\r` 丢弃、积累超过 `idle_flush` 未见
//!   新行也冲刷；积累上限 `max_frame`，满即先冲刷再续积。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use rivet_core::pool::{SlabLease, SlabPool};
use rivet_core::{Cancellation, OpContext, UartFrameMode, UartReaderRequest, now_ms};

use crate::metrics::SharedCounters;
use crate::queue::EventQueue;

/// 单次读取的截止上限。
pub const RECV_SLICE_CAP: Duration = Duration::from_millis(250);
/// 帧长的策略域。
pub const MAX_FRAME_BOUNDS: (usize, usize) = (16, 256);
/// 空闲冲刷的策略上限。
pub const IDLE_FLUSH_CAP: Duration = Duration::from_secs(2);

/// 工作器对外发布的串口帧事件。
#[derive(Clone, Debug)]
pub struct UartWorkerEvent {
    pub dev_id: Arc<str>,
    pub frame: rivet_core::FrameBuf,
    pub echo: bool,
    pub ts_ms: u64,
}

/// 读取任务句柄。
///
/// 持有独立的停止令牌：撤销单个读取器不影响共享的整机排空信号；任务同时
/// 监听父令牌，整机排空时一并退出。
pub struct UartReaderHandle {
    stop: Cancellation,
}

impl UartReaderHandle {
    /// 停止读取任务。
    pub fn cancel(&self) {
        self.stop.cancel();
    }
}

/// 启动一路串口读取任务。
pub fn spawn(
    dev_id: String,
    mut request: UartReaderRequest,
    queue_capacity: usize,
    out: EventQueue<UartWorkerEvent>,
    counters: SharedCounters,
    parent: &Cancellation,
) -> UartReaderHandle {
    let stop = Cancellation::new();
    let task_cancel = stop.clone();
    let parent = parent.clone();
    let dev_id: Arc<str> = dev_id.into();

    tokio::spawn(async move {
        let max_frame = request
            .max_frame
            .clamp(MAX_FRAME_BOUNDS.0, MAX_FRAME_BOUNDS.1);
        let idle_flush = request.idle_flush.min(IDLE_FLUSH_CAP);
        let pool = SlabPool::new(queue_capacity, max_frame);
        let mut line_acc: Option<LineAccumulator> = None;
        let mut scratch = vec![0u8; max_frame];

        loop {
            let flush_at = line_acc.as_ref().and_then(|acc| acc.flush_at(idle_flush));
            tokio::select! {
                _ = parent.cancelled() => break,
                _ = task_cancel.cancelled() => break,
                cmd = request.write_rx.recv() => {
                    let Some(data) = cmd else { break };
                    write_and_echo(&request, &dev_id, &pool, &out, &counters, data, max_frame)
                        .await;
                }
                _ = request.port.readable() => {
                    read_once(
                        &request,
                        &dev_id,
                        &pool,
                        &out,
                        &counters,
                        &mut line_acc,
                        &mut scratch,
                        max_frame,
                        &task_cancel,
                    )
                    .await;
                }
                _ = sleep_until_opt(flush_at), if flush_at.is_some() => {
                    if let Some(acc) = line_acc.take() {
                        emit(&out, &counters, &dev_id, acc.lease, false);
                    }
                }
            }
        }
        debug!(dev = %dev_id, "uart reader stopped");
    });

    UartReaderHandle { stop }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// 行模式积累器：持有一块 slab 与最后一次收字节的时间。
struct LineAccumulator {
    lease: SlabLease,
    last_byte_at: Instant,
}

impl LineAccumulator {
    fn flush_at(&self, idle_flush: Duration) -> Option<Instant> {
        if idle_flush.is_zero() || self.lease.is_empty() {
            return None;
        }
        Some(self.last_byte_at + idle_flush)
    }
}

fn emit(
    out: &EventQueue<UartWorkerEvent>,
    counters: &SharedCounters,
    dev_id: &Arc<str>,
    lease: SlabLease,
    echo: bool,
) {
    let event = UartWorkerEvent {
        dev_id: Arc::clone(dev_id),
        frame: lease.commit(),
        echo,
        ts_ms: now_ms(),
    };
    if out.push(event) {
        // 被挤出的事件随句柄释放自动归还 slab。
        counters.uart_drops.fetch_add(1, Ordering::Relaxed);
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_once(
    request: &UartReaderRequest,
    dev_id: &Arc<str>,
    pool: &SlabPool,
    out: &EventQueue<UartWorkerEvent>,
    counters: &SharedCounters,
    line_acc: &mut Option<LineAccumulator>,
    scratch: &mut [u8],
    max_frame: usize,
    cancel: &Cancellation,
) {
    let ctx = OpContext::with_cancellation(cancel.clone()).derive(RECV_SLICE_CAP);
    match request.mode {
        UartFrameMode::Bytes => {
            // 直接读进池化缓冲，一次成功读取即一帧。
            let Some(mut lease) = pool.try_acquire() else {
                // 所有 slab 都被在途事件占用：丢弃本轮数据以保护内存上界。
                let n = request.port.recv_some(scratch, &ctx).await.unwrap_or(0);
                if n > 0 {
                    counters.uart_drops.fetch_add(1, Ordering::Relaxed);
                }
                return;
            };
            match request.port.recv_some(lease.spare_mut(), &ctx).await {
                Ok(0) => {}
                Ok(n) => {
                    lease.advance(n);
                    emit(out, counters, dev_id, lease, false);
                }
                Err(err) => warn!(dev = %dev_id, error = %err, "uart read failed"),
            }
        }
        UartFrameMode::Lines => {
            let n = match request.port.recv_some(scratch, &ctx).await {
                Ok(n) => n,
                Err(err) => {
                    warn!(dev = %dev_id, error = %err, "uart read failed");
                    return;
                }
            };
            for &byte in &scratch[..n] {
                match byte {
                    b'\r' => {}
                    b'\n' => {
                        if let Some(acc) = line_acc.take() {
                            emit(out, counters, dev_id, acc.lease, false);
                        } else if let Some(lease) = pool.try_acquire() {
                            // 空行也是一帧。
                            emit(out, counters, dev_id, lease, false);
                        }
                    }
                    byte => {
                        if line_acc.is_none() {
                            match pool.try_acquire() {
                                Some(lease) => {
                                    *line_acc = Some(LineAccumulator {
                                        lease,
                                        last_byte_at: Instant::now(),
                                    });
                                }
                                None => {
                                    counters.uart_drops.fetch_add(1, Ordering::Relaxed);
                                    continue;
                                }
                            }
                        }
                        let acc = line_acc.as_mut().expect("accumulator just ensured");
                        acc.lease.extend_from(&[byte]);
                        acc.last_byte_at = Instant::now();
                        if acc.lease.len() == max_frame {
                            let acc = line_acc.take().expect("accumulator present");
                            emit(out, counters, dev_id, acc.lease, false);
                        }
                    }
                }
            }
        }
    }
}

async fn write_and_echo(
    request: &UartReaderRequest,
    dev_id: &Arc<str>,
    pool: &SlabPool,
    out: &EventQueue<UartWorkerEvent>,
    counters: &SharedCounters,
    data: Vec<u8>,
    max_frame: usize,
) {
    if let Err(err) = request.port.write(&data).await {
        warn!(dev = %dev_id, error = %err, "uart write failed");
        return;
    }
    if !request.echo {
        return;
    }
    // 回显按 max_frame 分片，与读取方向共用同一池。
    for chunk in data.chunks(max_frame) {
        match pool.try_acquire() {
            Some(mut lease) => {
                lease.extend_from(chunk);
                emit(out, counters, dev_id, lease, true);
            }
            None => {
                counters.uart_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
