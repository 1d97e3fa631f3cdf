//! # HAL 服务
//!
//! ## 核心意图（Why）
//! - 单任务事件环独占全部设备/能力/调度状态：配置应用、控制分发、调度
//!   触发、测量结果、GPIO/UART 事件与排空信号都汇入同一个 `select!`，
//!   不存在跨任务的状态共享；
//! - 配置应用幂等：按设备 `id` 做集合差分——新增者构建并发布能力，消失者
//!   清除保留描述、发布 `down` 并撤销全部旁路登记；
//! - 能力 id 按种类单调分配，一个 HAL 生命周期内不回收、不碰撞。
//!
//! ## 事件环来源（What）
//! - 取消信号（整机排空）、`config/hal` 邮箱、控制主题邮箱、调度定时器
//!   （装到最早的 `next_due`）、测量结果通道、GPIO 事件队列、UART 事件
//!   队列与指标节拍。

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rivet_bus::{Bus, BusError, Connection, Message, Topic};
use rivet_core::{
    Cancellation, CapKind, CapStatus, CoreError, DeviceConfig, Edge, GpioEventRecord, HalLevel,
    HalStateRecord, LinkState, ParamMap, Payload, ReplyRecord, SampleChannel, UartFrameRecord,
    now_ms,
    platform::PlatformHandles,
};

use crate::gpio_irq::{self, GpioWorkerEvent, IrqWorkerHandle};
use crate::measure::{MeasureResult, MeasureWorkerHandle, WorkerConfig};
use crate::metrics::{Counters, SharedCounters};
use crate::queue::EventQueue;
use crate::registry::Registry;
use crate::topics;
use crate::uart_reader::{self, UartReaderHandle, UartWorkerEvent};

/// 无物理总线设备共享的工作器键。
const LOCAL_BUS_KEY: &str = "local";

/// 服务选项。
#[derive(Clone, Debug)]
pub struct HalOptions {
    /// 测量工作器时序。
    pub worker: WorkerConfig,
    /// 未声明 `sample_every` 时的默认采样周期。
    pub default_period: Duration,
    /// 采样周期下限。
    pub min_period: Duration,
    /// 采样周期上限。
    pub max_period: Duration,
    /// 设备注册后首次采样的延迟。
    pub first_sample_delay: Duration,
    /// 服务自身订阅的邮箱深度。
    pub mailbox_depth: usize,
    /// GPIO/UART 事件队列深度（亦是串口缓冲池大小）。
    pub event_queue_depth: usize,
    /// ISR 队列深度。
    pub isr_queue_depth: usize,
    /// 测量结果通道深度。
    pub results_depth: usize,
    /// 指标保留记录的刷新间隔。
    pub metrics_interval: Duration,
}

impl Default for HalOptions {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            default_period: Duration::from_secs(1),
            min_period: Duration::from_millis(200),
            max_period: Duration::from_secs(3_600),
            first_sample_delay: Duration::from_millis(200),
            mailbox_depth: 16,
            event_queue_depth: 32,
            isr_queue_depth: 32,
            results_depth: 32,
            metrics_interval: Duration::from_secs(10),
        }
    }
}

fn bus_error(err: BusError) -> CoreError {
    match err {
        BusError::InvalidTopic { .. } => CoreError::InvalidTopic,
        BusError::Timeout => CoreError::Timeout,
        BusError::ConnectionClosed => CoreError::Io("bus connection closed".into()),
    }
}

/// HAL 服务入口。
///
/// # 教案式说明
/// - **契约 (What)**：[`run`](HalService::run) 消费服务实例并驱动事件环直到
///   取消；注册表与平台句柄在构造期注入，运行期不再变化；
/// - **风险 (Trade-offs)**：配置应用过程中的设备构建是异步硬件操作，期间
///   事件环不处理其它来源；构建带硬截止（构建器自身约束），停顿有上界。
pub struct HalService {
    bus: Bus<Payload>,
    registry: Registry,
    platform: PlatformHandles,
    options: HalOptions,
}

impl HalService {
    pub fn new(
        bus: Bus<Payload>,
        registry: Registry,
        platform: PlatformHandles,
        options: HalOptions,
    ) -> Self {
        Self {
            bus,
            registry,
            platform,
            options,
        }
    }

    /// 驱动事件环直到取消；返回前发布终态并排空全部工作器。
    pub async fn run(self, cancellation: Cancellation) -> Result<(), CoreError> {
        let conn = self.bus.connect();
        let config_sub = conn
            .subscribe(topics::config_hal(), self.options.mailbox_depth)
            .map_err(bus_error)?;
        let control_sub = conn
            .subscribe(topics::control_pattern(), self.options.mailbox_depth)
            .map_err(bus_error)?;

        let counters = Counters::shared();
        let gpio_events: EventQueue<GpioWorkerEvent> =
            EventQueue::new(self.options.event_queue_depth);
        let uart_events: EventQueue<UartWorkerEvent> =
            EventQueue::new(self.options.event_queue_depth);
        let (results_tx, mut results_rx) = mpsc::channel(self.options.results_depth);
        let irq_worker = gpio_irq::spawn(
            self.options.isr_queue_depth,
            counters.clone(),
            gpio_events.clone(),
            cancellation.child(),
        );

        let mut state = LoopState {
            bus: self.bus.clone(),
            conn,
            registry: self.registry,
            platform: self.platform,
            options: self.options,
            counters,
            irq_worker,
            uart_events: uart_events.clone(),
            results_tx,
            cancellation: cancellation.clone(),
            devices: HashMap::new(),
            cap_index: HashMap::new(),
            next_cap_id: HashMap::new(),
            schedule: HashMap::new(),
            workers: HashMap::new(),
            link: HashMap::new(),
        };

        state.publish_hal_state(HalLevel::Idle, "waiting for configuration", None);
        info!("hal service entering its event loop");

        let mut metrics_tick = tokio::time::interval(state.options.metrics_interval);
        metrics_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        metrics_tick.reset();

        loop {
            let next_due = state.schedule.values().map(|record| record.next_due).min();
            let timer_target = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(60));

            tokio::select! {
                _ = cancellation.cancelled() => break,
                Some(msg) = config_sub.recv() => {
                    state.apply_config(msg).await;
                }
                Some(msg) = control_sub.recv() => {
                    state.handle_control(msg).await;
                }
                Some(result) = results_rx.recv() => {
                    state.handle_result(result);
                }
                event = gpio_events.recv() => {
                    state.handle_gpio(event);
                }
                event = uart_events.recv() => {
                    state.handle_uart(event);
                }
                _ = tokio::time::sleep_until(timer_target), if next_due.is_some() => {
                    state.run_due();
                }
                _ = metrics_tick.tick() => {
                    state.publish_metrics();
                }
            }
        }

        // 排空：终态先行，工作器随共享取消位自行收尾。
        state.publish_hal_state(HalLevel::Stopped, "drained", None);
        info!("hal service stopped");
        Ok(())
    }
}

struct DeviceEntry {
    bus_key: String,
    caps: Vec<(CapKind, u32)>,
    irq: bool,
    uart_reader: Option<UartReaderHandle>,
    claimed_pins: Vec<u32>,
    claimed_uarts: Vec<String>,
}

struct ScheduleRecord {
    period: Duration,
    next_due: Instant,
}

struct LoopState {
    bus: Bus<Payload>,
    conn: Connection<Payload>,
    registry: Registry,
    platform: PlatformHandles,
    options: HalOptions,
    counters: SharedCounters,
    irq_worker: IrqWorkerHandle,
    uart_events: EventQueue<UartWorkerEvent>,
    results_tx: mpsc::Sender<MeasureResult>,
    cancellation: Cancellation,

    devices: HashMap<String, DeviceEntry>,
    cap_index: HashMap<(CapKind, u32), String>,
    next_cap_id: HashMap<CapKind, u32>,
    schedule: HashMap<String, ScheduleRecord>,
    workers: HashMap<String, MeasureWorkerHandle>,
    link: HashMap<(CapKind, u32), LinkState>,
}

impl LoopState {
    fn publish(&self, msg: Message<Payload>) {
        if let Err(err) = self.conn.publish(msg) {
            warn!(error = %err, "publish failed");
        }
    }

    fn publish_hal_state(&self, level: HalLevel, status: &str, error: Option<&str>) {
        let mut record = HalStateRecord::new(level, status);
        if let Some(error) = error {
            record = record.with_error(error);
        }
        self.publish(Message::retained(
            topics::hal_state(),
            Some(Payload::HalState(record)),
        ));
    }

    /// 链路状态机：仅在状态或错误码变化时发布保留记录。
    fn set_link(&mut self, kind: CapKind, cap_id: u32, link: LinkState, error: Option<&str>) {
        let key = (kind, cap_id);
        if self.link.get(&key) == Some(&link) {
            return;
        }
        self.link.insert(key, link);
        let status = CapStatus {
            link,
            ts_ms: now_ms(),
            error: error.map(str::to_owned),
        };
        self.publish(Message::retained(
            topics::cap_topic(kind, cap_id, "state"),
            Some(Payload::Status(status)),
        ));
    }

    fn worker_for(&mut self, bus_key: &str) -> MeasureWorkerHandle {
        if let Some(handle) = self.workers.get(bus_key) {
            return handle.clone();
        }
        let handle = crate::measure::spawn(
            bus_key.to_owned(),
            self.options.worker,
            self.results_tx.clone(),
            self.counters.clone(),
            self.cancellation.child(),
        );
        self.workers.insert(bus_key.to_owned(), handle.clone());
        handle
    }

    // —— 配置应用 ——

    async fn apply_config(&mut self, msg: Message<Payload>) {
        let Some(Payload::Config(config)) = msg.payload else {
            warn!("config/hal carried an undecodable payload");
            self.publish_hal_state(
                HalLevel::Error,
                "config decode failed",
                Some(CoreError::InvalidPayload.code()),
            );
            return;
        };

        let wanted: HashMap<&str, &DeviceConfig> = config
            .devices
            .iter()
            .map(|device| (device.id.as_str(), device))
            .collect();

        // 先处理消失者，释放可能被重建复用的资源。
        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !wanted.contains_key(id.as_str()))
            .cloned()
            .collect();
        for dev_id in stale {
            self.remove_device(&dev_id).await;
        }

        for device in &config.devices {
            if !self.devices.contains_key(&device.id) {
                self.add_device(device).await;
            }
        }

        self.publish_hal_state(HalLevel::Ready, "configuration applied", None);
    }

    async fn add_device(&mut self, cfg: &DeviceConfig) {
        let Some(builder) = self.registry.get(&cfg.device_type) else {
            warn!(dev = %cfg.id, device_type = %cfg.device_type, "unknown device type");
            return;
        };
        let spec = rivet_core::BuildSpec {
            device_id: &cfg.id,
            params: &cfg.params,
            bus_ref: cfg.bus_ref.as_ref(),
            platform: &self.platform,
        };
        let built = match builder.build(spec).await {
            Ok(built) => built,
            Err(err) => {
                warn!(dev = %cfg.id, error = %err, code = err.code(), "device build failed");
                return;
            }
        };

        let decls = built.adaptor.capabilities().to_vec();
        let has_irq = built.irq.is_some();
        let bus_key = cfg
            .bus_ref
            .as_ref()
            .map(|bus_ref| bus_ref.id.clone())
            .unwrap_or_else(|| LOCAL_BUS_KEY.to_owned());

        let worker = self.worker_for(&bus_key);
        worker.register(cfg.id.clone(), built.adaptor).await;

        // 能力 id 按种类单调分配；描述与初始 up 状态保留发布。
        let mut caps = Vec::with_capacity(decls.len());
        for decl in &decls {
            let counter = self.next_cap_id.entry(decl.kind).or_insert(0);
            let cap_id = *counter;
            *counter += 1;
            caps.push((decl.kind, cap_id));
            self.cap_index.insert((decl.kind, cap_id), cfg.id.clone());
            self.publish(Message::retained(
                topics::cap_topic(decl.kind, cap_id, "info"),
                Some(Payload::Info(decl.info.clone())),
            ));
            self.set_link(decl.kind, cap_id, LinkState::Up, None);
        }

        // 调度：周期钳制到策略域；period = 0 或纯串口设备不入调度表。
        let schedulable = decls.iter().any(|decl| decl.kind != CapKind::Uart);
        let period = match cfg.params.get("sample_every") {
            Some(value) => value.as_duration().unwrap_or_else(|_| {
                warn!(dev = %cfg.id, "invalid sample_every, using the default period");
                self.options.default_period
            }),
            None => self.options.default_period,
        };
        if schedulable && !period.is_zero() {
            let period = period.clamp(self.options.min_period, self.options.max_period);
            self.schedule.insert(
                cfg.id.clone(),
                ScheduleRecord {
                    period,
                    next_due: Instant::now() + self.options.first_sample_delay,
                },
            );
        }

        if let Some(request) = built.irq {
            self.irq_worker.register(cfg.id.clone(), request).await;
        }
        let uart_reader = built.uart.map(|request| {
            uart_reader::spawn(
                cfg.id.clone(),
                request,
                self.options.event_queue_depth,
                self.uart_events.clone(),
                self.counters.clone(),
                &self.cancellation,
            )
        });

        info!(dev = %cfg.id, device_type = %cfg.device_type, bus = %bus_key, "device added");
        self.devices.insert(
            cfg.id.clone(),
            DeviceEntry {
                bus_key,
                caps,
                irq: has_irq,
                uart_reader,
                claimed_pins: built.claimed_pins,
                claimed_uarts: built.claimed_uarts,
            },
        );
    }

    async fn remove_device(&mut self, dev_id: &str) {
        let Some(entry) = self.devices.remove(dev_id) else {
            return;
        };
        info!(dev = %dev_id, "device removed");

        for (kind, cap_id) in &entry.caps {
            // 清除保留描述（空载荷保留发布），状态置 down。
            self.publish(Message::retained(
                topics::cap_topic(*kind, *cap_id, "info"),
                None,
            ));
            self.set_link(*kind, *cap_id, LinkState::Down, None);
            self.cap_index.remove(&(*kind, *cap_id));
            self.link.remove(&(*kind, *cap_id));
        }

        self.schedule.remove(dev_id);
        if entry.irq {
            self.irq_worker.unregister(dev_id.to_owned()).await;
        }
        if let Some(reader) = entry.uart_reader {
            reader.cancel();
        }
        if let Some(worker) = self.workers.get(&entry.bus_key) {
            worker.remove(dev_id.to_owned()).await;
        }
        for pin in entry.claimed_pins {
            self.platform.gpio.release(pin);
        }
        for uart in entry.claimed_uarts {
            self.platform.uart.release(&uart);
        }
    }

    // —— 控制面 ——

    async fn handle_control(&mut self, msg: Message<Payload>) {
        let reply_to = msg.reply_to.clone();
        let Some(address) = topics::parse_control(&msg.topic) else {
            self.reply(reply_to, ReplyRecord::err("unknown_capability"));
            return;
        };
        let Some(dev_id) = self
            .cap_index
            .get(&(address.kind, address.cap_id))
            .cloned()
        else {
            self.reply(reply_to, ReplyRecord::err("unknown_capability"));
            return;
        };

        match address.verb.as_str() {
            "read_now" => {
                let record = match self.submit_measure(&dev_id, true) {
                    Ok(()) => ReplyRecord::ok(),
                    Err(err) => ReplyRecord::err(err.code()),
                };
                self.reply(reply_to, record);
            }
            "set_rate" => {
                let record = self.apply_set_rate(&dev_id, msg.payload);
                self.reply(reply_to, record);
            }
            verb => {
                let Some(entry) = self.devices.get(&dev_id) else {
                    self.reply(reply_to, ReplyRecord::err("unknown_capability"));
                    return;
                };
                let Some(worker) = self.workers.get(&entry.bus_key).cloned() else {
                    self.reply(reply_to, ReplyRecord::err("error"));
                    return;
                };
                let rx = match worker.control(dev_id, address.kind, verb.to_owned(), msg.payload) {
                    Ok(rx) => rx,
                    Err(err) => {
                        self.reply(reply_to, ReplyRecord::err(err.code()));
                        return;
                    }
                };
                let Some(reply_to) = reply_to else { return };
                // 应答在旁路任务中等待，事件环不被在途控制阻塞。
                let bus = self.bus.clone();
                tokio::spawn(async move {
                    let payload = match rx.await {
                        Ok(Ok(rivet_core::ControlOutcome::Done(payload))) => payload,
                        Ok(Ok(rivet_core::ControlOutcome::Unsupported)) => {
                            Payload::Reply(ReplyRecord::err("unsupported"))
                        }
                        Ok(Err(err)) => Payload::Reply(ReplyRecord::err(err.code())),
                        Err(_) => Payload::Reply(ReplyRecord::err("error")),
                    };
                    let conn = bus.connect();
                    let _ = conn.publish(Message::event(reply_to, payload));
                });
            }
        }
    }

    fn apply_set_rate(&mut self, dev_id: &str, payload: Option<Payload>) -> ReplyRecord {
        let period = match payload {
            Some(Payload::Params(params)) => params
                .require("period")
                .and_then(|value| value.as_duration()),
            _ => Err(CoreError::InvalidPayload),
        };
        let Ok(period) = period else {
            return ReplyRecord::err(CoreError::InvalidPeriod.code());
        };

        if period.is_zero() {
            self.schedule.remove(dev_id);
            return ReplyRecord::ok_with(ParamMap::new().insert("period", 0i64));
        }

        let period = period.clamp(self.options.min_period, self.options.max_period);
        let next_due = Instant::now() + period;
        self.schedule.insert(
            dev_id.to_owned(),
            ScheduleRecord { period, next_due },
        );
        ReplyRecord::ok_with(ParamMap::new().insert("period", period.as_millis() as i64))
    }

    fn reply(&self, reply_to: Option<Topic>, record: ReplyRecord) {
        let Some(reply_to) = reply_to else { return };
        self.publish(Message::event(reply_to, Payload::Reply(record)));
    }

    fn submit_measure(&mut self, dev_id: &str, priority: bool) -> Result<(), CoreError> {
        let entry = self
            .devices
            .get(dev_id)
            .ok_or(CoreError::UnknownCapability)?;
        let worker = self
            .workers
            .get(&entry.bus_key)
            .cloned()
            .ok_or(CoreError::UnknownCapability)?;
        worker.try_measure(dev_id.to_owned(), priority).inspect_err(|_| {
            self.counters.measure_saturated.fetch_add(1, Ordering::Relaxed);
        })
    }

    // —— 结果与事件 ——

    fn handle_result(&mut self, result: MeasureResult) {
        let Some(entry) = self.devices.get(&result.dev_id) else {
            return;
        };
        let caps = entry.caps.clone();

        match result.outcome {
            Ok(sample) => {
                for part in sample.parts {
                    let Some((kind, cap_id)) =
                        caps.iter().copied().find(|(kind, _)| *kind == part.kind)
                    else {
                        debug!(dev = %result.dev_id, kind = %part.kind, "sample part without a capability");
                        continue;
                    };
                    // 状态先行：任何读数前该能力必须处于 up。
                    self.set_link(kind, cap_id, LinkState::Up, None);
                    let leaf = match part.channel {
                        SampleChannel::Value => "value",
                        SampleChannel::Event => "event",
                    };
                    self.publish(Message::event(
                        topics::cap_topic(kind, cap_id, leaf),
                        part.payload,
                    ));
                }
            }
            Err(err) => {
                let code = err.code();
                warn!(dev = %result.dev_id, error = %err, code, "measurement failed");
                for (kind, cap_id) in caps {
                    self.set_link(kind, cap_id, LinkState::Degraded, Some(code));
                }
            }
        }
    }

    fn handle_gpio(&mut self, event: GpioWorkerEvent) {
        let dev_id = event.dev_id.to_string();
        let Some(entry) = self.devices.get(&dev_id) else {
            return;
        };
        let gpio_cap = entry
            .caps
            .iter()
            .copied()
            .find(|(kind, _)| *kind == CapKind::Gpio);

        match gpio_cap {
            Some((kind, cap_id)) => {
                self.set_link(kind, cap_id, LinkState::Up, None);
                self.publish(Message::event(
                    topics::cap_topic(kind, cap_id, "event"),
                    Payload::GpioEvent(GpioEventRecord {
                        dev_id: dev_id.clone(),
                        level: event.level,
                        edge: event.edge,
                        ts_ms: event.ts_ms,
                    }),
                ));
            }
            None if event.edge == Edge::Falling => {
                // 无 gpio 能力的下降沿即告警线（SMBALERT）：即时优先读取。
                debug!(dev = %dev_id, "alert edge, submitting a priority measurement");
                if let Err(err) = self.submit_measure(&dev_id, true) {
                    warn!(dev = %dev_id, error = %err, "priority measurement rejected");
                }
            }
            None => {}
        }
    }

    fn handle_uart(&mut self, event: UartWorkerEvent) {
        let dev_id = event.dev_id.to_string();
        let Some(entry) = self.devices.get(&dev_id) else {
            return;
        };
        let Some((kind, cap_id)) = entry
            .caps
            .iter()
            .copied()
            .find(|(kind, _)| *kind == CapKind::Uart)
        else {
            return;
        };
        self.set_link(kind, cap_id, LinkState::Up, None);
        self.publish(Message::event(
            topics::cap_topic(kind, cap_id, "event"),
            Payload::UartFrame(UartFrameRecord {
                dev_id,
                data: event.frame,
                echo: event.echo,
                ts_ms: event.ts_ms,
            }),
        ));
    }

    // —— 调度 ——

    fn run_due(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .schedule
            .iter()
            .filter(|(_, record)| record.next_due <= now)
            .map(|(dev_id, _)| dev_id.clone())
            .collect();
        for dev_id in due {
            if let Some(record) = self.schedule.get_mut(&dev_id) {
                record.next_due = now + record.period;
            }
            if let Err(err) = self.submit_measure(&dev_id, false) {
                debug!(dev = %dev_id, error = %err, "scheduled measurement rejected");
            }
        }
    }

    fn publish_metrics(&self) {
        let record = self.counters.snapshot(self.bus.displaced());
        self.publish(Message::retained(
            topics::hal_metrics(),
            Some(Payload::Metrics(record)),
        ));
    }
}
