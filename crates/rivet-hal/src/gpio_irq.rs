//! # GPIO 中断工作器
//!
//! ## 核心意图（Why）
//! - 中断上下文只允许一次非阻塞入队：分类、去抖、取反与发布全部搬到协作
//!   任务里完成；入队失败只做原子计数，绝不在 ISR 里等待；
//! - 逻辑电平只在工作器内更新——登记时捕获初始电平，保证第一次观察的边沿
//!   分类正确。
//!
//! ## 流水线（How）
//! 1. ISR 捕获原始电平，`try_push` 进 [`IsrQueue`]，失败递增丢弃计数；
//! 2. 工作器排空队列：按登记配置取反、落在去抖窗口内的事件丢弃、对照
//!    跟踪电平分类边沿，产出 `{dev_id, level, edge, ts}`；
//! 3. 事件经挤旧队列交给服务环。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rivet_core::platform::IrqEdge;
use rivet_core::{Cancellation, Edge, IrqRequest, now_ms};

use crate::metrics::SharedCounters;
use crate::queue::EventQueue;

/// 去抖窗口的策略上限。
pub const DEBOUNCE_CAP: Duration = Duration::from_millis(50);

/// ISR 捕获的原始事件。
#[derive(Clone, Copy, Debug)]
struct RawIrqEvent {
    reg_id: u64,
    raw_level: bool,
    ts: Instant,
}

/// ISR 与工作器之间的定容队列。
///
/// `try_push` 是唯一的 ISR 侧入口：`try_lock` 失败或队列满载都立即放弃并
/// 计数，绝不等待。
struct IsrQueue {
    items: Mutex<VecDequeFixed>,
    notify: Notify,
    counters: SharedCounters,
}

struct VecDequeFixed {
    items: std::collections::VecDeque<RawIrqEvent>,
    capacity: usize,
}

impl IsrQueue {
    fn new(capacity: usize, counters: SharedCounters) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDequeFixed {
                items: std::collections::VecDeque::with_capacity(capacity),
                capacity,
            }),
            notify: Notify::new(),
            counters,
        })
    }

    /// ISR 侧入口：非阻塞、无分配。
    fn try_push(&self, event: RawIrqEvent) {
        match self.items.try_lock() {
            Some(mut guard) if guard.items.len() < guard.capacity => {
                guard.items.push_back(event);
                drop(guard);
                self.notify.notify_one();
            }
            _ => {
                self.counters.irq_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn recv(&self) -> RawIrqEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.items.lock().items.pop_front() {
                return event;
            }
            notified.await;
        }
    }
}

/// 工作器对外发布的 GPIO 事件。
#[derive(Clone, Debug)]
pub struct GpioWorkerEvent {
    pub dev_id: Arc<str>,
    /// 逻辑电平（已按登记配置取反）。
    pub level: bool,
    pub edge: Edge,
    pub ts_ms: u64,
}

/// 服务环发给工作器的命令。
pub enum IrqCmd {
    Register { dev_id: String, request: IrqRequest },
    Unregister { dev_id: String },
}

/// 工作器句柄。
#[derive(Clone)]
pub struct IrqWorkerHandle {
    cmd_tx: mpsc::Sender<IrqCmd>,
}

impl IrqWorkerHandle {
    /// 登记一路中断。
    pub async fn register(&self, dev_id: String, request: IrqRequest) {
        let _ = self.cmd_tx.send(IrqCmd::Register { dev_id, request }).await;
    }

    /// 撤销一路中断。
    pub async fn unregister(&self, dev_id: String) {
        let _ = self
            .cmd_tx
            .send(IrqCmd::Unregister {
                dev_id: dev_id.clone(),
            })
            .await;
    }
}

struct Registration {
    dev_id: Arc<str>,
    request: IrqRequest,
    last_level: bool,
    last_accepted: Option<Instant>,
}

/// 启动 GPIO 中断工作器。
pub fn spawn(
    isr_queue_depth: usize,
    counters: SharedCounters,
    out: EventQueue<GpioWorkerEvent>,
    cancellation: Cancellation,
) -> IrqWorkerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<IrqCmd>(16);
    let isr_queue = IsrQueue::new(isr_queue_depth, Arc::clone(&counters));

    tokio::spawn(async move {
        let mut registrations: HashMap<u64, Registration> = HashMap::new();
        let mut by_dev: HashMap<String, u64> = HashMap::new();
        let mut next_reg_id: u64 = 0;

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    handle_cmd(
                        cmd,
                        &isr_queue,
                        &mut registrations,
                        &mut by_dev,
                        &mut next_reg_id,
                    );
                }
                raw = isr_queue.recv() => {
                    handle_raw(raw, &mut registrations, &out, &counters);
                }
            }
        }

        for registration in registrations.values() {
            let _ = registration.request.pin.clear_irq();
        }
    });

    IrqWorkerHandle { cmd_tx }
}

fn handle_cmd(
    cmd: IrqCmd,
    isr_queue: &Arc<IsrQueue>,
    registrations: &mut HashMap<u64, Registration>,
    by_dev: &mut HashMap<String, u64>,
    next_reg_id: &mut u64,
) {
    match cmd {
        IrqCmd::Register { dev_id, request } => {
            let reg_id = *next_reg_id;
            *next_reg_id += 1;

            // 登记时捕获初始逻辑电平，首个事件据此分类。
            let initial_raw = request.pin.get().unwrap_or(false);
            let last_level = initial_raw ^ request.invert;

            let queue = Arc::clone(isr_queue);
            let handler = Arc::new(move |raw_level: bool| {
                queue.try_push(RawIrqEvent {
                    reg_id,
                    raw_level,
                    ts: Instant::now(),
                });
            });
            if let Err(err) = request.pin.set_irq(request.edge, handler) {
                warn!(dev = %dev_id, error = %err, "failed to install the irq handler");
                return;
            }

            debug!(dev = %dev_id, pin = request.pin_no, edge = ?request.edge, "irq registered");
            by_dev.insert(dev_id.clone(), reg_id);
            registrations.insert(
                reg_id,
                Registration {
                    dev_id: dev_id.into(),
                    request,
                    last_level,
                    last_accepted: None,
                },
            );
        }
        IrqCmd::Unregister { dev_id } => {
            if let Some(reg_id) = by_dev.remove(&dev_id) {
                if let Some(registration) = registrations.remove(&reg_id) {
                    let _ = registration.request.pin.clear_irq();
                    debug!(dev = %dev_id, "irq unregistered");
                }
            }
        }
    }
}

fn handle_raw(
    raw: RawIrqEvent,
    registrations: &mut HashMap<u64, Registration>,
    out: &EventQueue<GpioWorkerEvent>,
    counters: &SharedCounters,
) {
    let Some(registration) = registrations.get_mut(&raw.reg_id) else {
        // 撤销竞态下的尾随事件。
        return;
    };

    // 去抖：距上一条被接受事件不足窗口的观察丢弃。
    let debounce = registration.request.debounce.min(DEBOUNCE_CAP);
    if !debounce.is_zero() {
        if let Some(last) = registration.last_accepted {
            if raw.ts.duration_since(last) < debounce {
                return;
            }
        }
    }

    let level = raw.raw_level ^ registration.request.invert;
    // 单边沿登记下电平可能未经中间态直接回到同值；以捕获电平本身分类。
    let edge = if level != registration.last_level {
        if level { Edge::Rising } else { Edge::Falling }
    } else if level {
        Edge::Rising
    } else {
        Edge::Falling
    };

    let pass = match registration.request.edge {
        IrqEdge::Both => true,
        IrqEdge::Rising => edge == Edge::Rising,
        IrqEdge::Falling => edge == Edge::Falling,
        IrqEdge::None => false,
    };
    registration.last_level = level;
    registration.last_accepted = Some(raw.ts);
    if !pass {
        return;
    }

    let displaced = out.push(GpioWorkerEvent {
        dev_id: Arc::clone(&registration.dev_id),
        level,
        edge,
        ts_ms: now_ms(),
    });
    if displaced {
        counters.irq_drops.fetch_add(1, Ordering::Relaxed);
    }
}
