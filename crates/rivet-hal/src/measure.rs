//! # 测量工作器（每总线一个）
//!
//! ## 核心意图（Why）
//! - 同一物理总线上的全部硬件 I/O 必须串行：工作器独占持有该总线设备的
//!   适配器，是唯一驱动总线句柄的任务；
//! - 两段式测量协议（触发 → 等待 → 采集）带有界指数退避：瞬态未就绪在
//!   工作器内消化，用尽重试才以错误浮出；
//! - 优先请求（中断触发的即时读取）插队到普通请求之前，但绝不打断在途的
//!   触发/采集对。
//!
//! ## 队列纪律（What)
//! - 命令通道与内部请求队列都有界；普通请求在饱和时丢弃并计数，优先请求
//!   挤掉队尾的普通请求；
//! - 测量结果按提交顺序经有界通道交回服务环。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use rivet_core::{
    Adaptor, Cancellation, CapKind, CollectOutcome, ControlOutcome, CoreError, OpContext, Payload,
    Sample, TriggerOutcome,
};

use crate::metrics::SharedCounters;

/// 工作器时序配置。
#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// 单次触发的截止时间。
    pub trigger_timeout: Duration,
    /// 单次采集的截止时间。
    pub collect_timeout: Duration,
    /// 退避基准；第 n 次重试等待 `retry_backoff × 2^(n−1)`。
    pub retry_backoff: Duration,
    /// 未就绪的重试上限。
    pub max_retries: u32,
    /// 请求队列深度。
    pub queue_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            trigger_timeout: Duration::from_millis(500),
            collect_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(50),
            max_retries: 3,
            queue_depth: 16,
        }
    }
}

/// 服务环发给工作器的命令。
pub enum MeasureCmd {
    /// 接管一台设备的适配器。
    Register {
        dev_id: String,
        adaptor: Box<dyn Adaptor>,
    },
    /// 关闭并移除一台设备。
    Remove { dev_id: String },
    /// 提交一次测量。
    Measure { dev_id: String, priority: bool },
    /// 转发设备专有控制动词。
    Control {
        dev_id: String,
        kind: CapKind,
        verb: String,
        payload: Option<Payload>,
        reply: oneshot::Sender<Result<ControlOutcome, CoreError>>,
    },
}

/// 一次测量的结果。
#[derive(Debug)]
pub struct MeasureResult {
    pub dev_id: String,
    pub outcome: Result<Sample, CoreError>,
}

/// 工作器句柄。
#[derive(Clone)]
pub struct MeasureWorkerHandle {
    cmd_tx: mpsc::Sender<MeasureCmd>,
}

impl MeasureWorkerHandle {
    /// 非阻塞提交测量；命令通道饱和返回 `busy`。
    pub fn try_measure(&self, dev_id: String, priority: bool) -> Result<(), CoreError> {
        self.cmd_tx
            .try_send(MeasureCmd::Measure { dev_id, priority })
            .map_err(|_| CoreError::Busy)
    }

    /// 交付一台设备。
    pub async fn register(&self, dev_id: String, adaptor: Box<dyn Adaptor>) {
        let _ = self.cmd_tx.send(MeasureCmd::Register { dev_id, adaptor }).await;
    }

    /// 移除一台设备（适配器在工作器内关闭）。
    pub async fn remove(&self, dev_id: String) {
        let _ = self.cmd_tx.send(MeasureCmd::Remove { dev_id }).await;
    }

    /// 转发控制动词；应答经 oneshot 返回。非阻塞提交：工作器饱和时返回
    /// `busy`，避免服务环被在途命令卡住。
    pub fn control(
        &self,
        dev_id: String,
        kind: CapKind,
        verb: String,
        payload: Option<Payload>,
    ) -> Result<oneshot::Receiver<Result<ControlOutcome, CoreError>>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .try_send(MeasureCmd::Control {
                dev_id,
                kind,
                verb,
                payload,
                reply,
            })
            .map_err(|_| CoreError::Busy)?;
        Ok(rx)
    }
}

struct PendingRequest {
    dev_id: String,
    priority: bool,
}

/// 启动一路总线的测量工作器。
pub fn spawn(
    bus_key: String,
    config: WorkerConfig,
    results: mpsc::Sender<MeasureResult>,
    counters: SharedCounters,
    cancellation: Cancellation,
) -> MeasureWorkerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<MeasureCmd>(config.queue_depth.max(1));

    tokio::spawn(async move {
        let mut adaptors: HashMap<String, Box<dyn Adaptor>> = HashMap::new();
        let mut queue: VecDeque<PendingRequest> = VecDeque::new();

        loop {
            // 先吸收全部待处理命令，再执行队首测量；测量期间到达的优先
            // 请求最迟在下一轮插队，但绝不打断在途的触发/采集对。
            while let Ok(cmd) = cmd_rx.try_recv() {
                absorb_cmd(cmd, &mut adaptors, &mut queue, &config, &counters).await;
            }

            if let Some(request) = queue.pop_front() {
                let Some(adaptor) = adaptors.get_mut(&request.dev_id) else {
                    continue; // 设备已移除，请求过期。
                };
                let outcome = run_measurement(adaptor.as_mut(), &config, &cancellation).await;
                if cancellation.is_cancelled() {
                    break;
                }
                if results
                    .send(MeasureResult {
                        dev_id: request.dev_id,
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = cancellation.cancelled() => break,
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    absorb_cmd(cmd, &mut adaptors, &mut queue, &config, &counters).await;
                }
            }
        }

        // 排空：关闭全部适配器后退出。
        for (dev_id, mut adaptor) in adaptors {
            debug!(bus = %bus_key, dev = %dev_id, "closing adaptor on drain");
            adaptor.close().await;
        }
    });

    MeasureWorkerHandle { cmd_tx }
}

async fn absorb_cmd(
    cmd: MeasureCmd,
    adaptors: &mut HashMap<String, Box<dyn Adaptor>>,
    queue: &mut VecDeque<PendingRequest>,
    config: &WorkerConfig,
    counters: &SharedCounters,
) {
    match cmd {
        MeasureCmd::Register { dev_id, adaptor } => {
            adaptors.insert(dev_id, adaptor);
        }
        MeasureCmd::Remove { dev_id } => {
            queue.retain(|request| request.dev_id != dev_id);
            if let Some(mut adaptor) = adaptors.remove(&dev_id) {
                adaptor.close().await;
            }
        }
        MeasureCmd::Measure { dev_id, priority } => {
            if queue.len() >= config.queue_depth {
                if priority {
                    // 优先请求挤掉队尾的普通请求。
                    if let Some(pos) = queue.iter().rposition(|request| !request.priority) {
                        queue.remove(pos);
                        counters.measure_saturated.fetch_add(1, Ordering::Relaxed);
                    } else {
                        counters.measure_saturated.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                } else {
                    counters.measure_saturated.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
            if priority {
                queue.push_front(PendingRequest { dev_id, priority });
            } else {
                queue.push_back(PendingRequest { dev_id, priority });
            }
        }
        MeasureCmd::Control {
            dev_id,
            kind,
            verb,
            payload,
            reply,
        } => {
            let result = match adaptors.get_mut(&dev_id) {
                Some(adaptor) => {
                    let ctx = OpContext::with_timeout(config.collect_timeout);
                    adaptor.control(kind, &verb, payload, &ctx).await
                }
                None => Err(CoreError::UnknownCapability),
            };
            let _ = reply.send(result);
        }
    }
}

/// 两段式测量：触发 → 等待 → 采集，未就绪时有界指数退避。
async fn run_measurement(
    adaptor: &mut dyn Adaptor,
    config: &WorkerConfig,
    cancellation: &Cancellation,
) -> Result<Sample, CoreError> {
    let mut attempt: u32 = 0;
    loop {
        if cancellation.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let trigger_ctx =
            OpContext::with_cancellation(cancellation.clone()).derive(config.trigger_timeout);
        let not_ready = match adaptor.trigger(&trigger_ctx).await? {
            TriggerOutcome::Started { collect_after } => {
                if !collect_after.is_zero() {
                    tokio::time::sleep(collect_after).await;
                }
                let collect_ctx = OpContext::with_cancellation(cancellation.clone())
                    .derive(config.collect_timeout);
                match adaptor.collect(&collect_ctx).await? {
                    CollectOutcome::Sample(sample) => return Ok(sample),
                    CollectOutcome::NotReady => true,
                }
            }
            TriggerOutcome::NotReady => true,
        };
        debug_assert!(not_ready);

        attempt += 1;
        if attempt > config.max_retries {
            warn!(dev = %adaptor.id(), attempts = attempt, "measurement retries exhausted");
            return Err(CoreError::NotReady);
        }
        let backoff = config.retry_backoff * 2u32.saturating_pow(attempt - 1);
        tokio::time::sleep(backoff).await;
    }
}
