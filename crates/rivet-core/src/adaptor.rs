//! # 适配器协定
//!
//! ## 核心意图（Why）
//! - 每种硬件设备以一个适配器对象进入运行时：申报能力、响应两段式测量
//!   （触发/采集）、处理设备专有控制动词；
//! - 可选旁路（GPIO 中断、UART 读取器）不用运行期类型断言探测，而由构建
//!   结果显式申报——构建器返回的记录说明设备需要哪些旁路登记。
//!
//! ## 并发纪律（Where）
//! - 适配器实例由其所属总线的测量工作器独占持有；`&mut self` 签名即所有权
//!   声明，设备状态只在工作器任务内变更。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{CapDecl, CapKind};
use crate::ctl::OpContext;
use crate::error::CoreError;
use crate::params::ParamMap;
use crate::payload::{BusRef, Payload};
use crate::platform::{GpioPin, IrqEdge, PlatformHandles, UartPort};

/// 触发阶段的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// 转换已启动；`collect_after` 为建议的采集等待（可为零）。
    Started { collect_after: Duration },
    /// 设备暂不能开始转换，交由工作器退避重试。
    NotReady,
}

/// 读数的发布通道：最近值走 `value`，瞬时事件走 `event`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleChannel {
    Value,
    Event,
}

/// 采集阶段得到的单项读数。
#[derive(Clone, Debug, PartialEq)]
pub struct SamplePart {
    pub kind: CapKind,
    pub channel: SampleChannel,
    pub payload: Payload,
}

/// 一次采集的有序读数集合。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample {
    pub parts: Vec<SamplePart>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式追加一项最近值读数。
    pub fn with(mut self, kind: CapKind, payload: Payload) -> Self {
        self.parts.push(SamplePart {
            kind,
            channel: SampleChannel::Value,
            payload,
        });
        self
    }

    /// 链式追加一项事件读数。
    pub fn with_event(mut self, kind: CapKind, payload: Payload) -> Self {
        self.parts.push(SamplePart {
            kind,
            channel: SampleChannel::Event,
            payload,
        });
        self
    }
}

/// 采集阶段的结果。
#[derive(Clone, Debug, PartialEq)]
pub enum CollectOutcome {
    /// 采集完成。
    Sample(Sample),
    /// 转换尚未结束，交由工作器退避重试。
    NotReady,
}

/// 控制动词的处理结果。
#[derive(Clone, Debug, PartialEq)]
pub enum ControlOutcome {
    /// 动词已处理，附带应答载荷。
    Done(Payload),
    /// 设备不认识该动词。
    Unsupported,
}

/// 设备适配器协定。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`capabilities`](Adaptor::capabilities) 在构建后保持不变，HAL 据此
///     分配能力 id 并发布描述；
///   - [`trigger`](Adaptor::trigger)/[`collect`](Adaptor::collect) 构成两段
///     式测量；持续就绪的设备可返回零等待；
///   - [`control`](Adaptor::control) 处理设备专有动词；通用动词
///     （`read_now`/`set_rate`）由 HAL 服务先行拦截，不会到达适配器；
///   - [`close`](Adaptor::close) 在设备移除与整机排空时调用，负责静默硬件
///     （如关中断、撤销告警使能）；
/// - **风险 (Trade-offs)**：错误以 [`CoreError`] 返回并由 HAL 映射为能力
///   `degraded` 状态；瞬态未就绪务必走 `NotReady` 结果而非错误。
#[async_trait]
pub trait Adaptor: Send {
    /// 设备实例标识（配置中的 `id`）。
    fn id(&self) -> &str;

    /// 申报的能力集合。
    fn capabilities(&self) -> &[CapDecl];

    /// 启动一次转换。
    async fn trigger(&mut self, ctx: &OpContext) -> Result<TriggerOutcome, CoreError>;

    /// 采集转换结果。
    async fn collect(&mut self, ctx: &OpContext) -> Result<CollectOutcome, CoreError>;

    /// 处理设备专有控制动词。
    async fn control(
        &mut self,
        kind: CapKind,
        verb: &str,
        payload: Option<Payload>,
        ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError>;

    /// 释放硬件资源；默认无事可做。
    async fn close(&mut self) {}
}

/// GPIO 中断旁路的登记请求。
#[derive(Clone)]
pub struct IrqRequest {
    /// 已申领的引脚句柄。
    pub pin: Arc<dyn GpioPin>,
    /// 引脚编号（用于撤销申领与诊断）。
    pub pin_no: u32,
    /// 触发边沿过滤。
    pub edge: IrqEdge,
    /// 逻辑取反：发布电平 = 原始电平 XOR `invert`。
    pub invert: bool,
    /// 去抖窗口；零为关闭，上限 50 ms 由登记方钳制。
    pub debounce: Duration,
}

impl std::fmt::Debug for IrqRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqRequest")
            .field("pin_no", &self.pin_no)
            .field("edge", &self.edge)
            .field("invert", &self.invert)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

/// UART 帧化模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UartFrameMode {
    /// 每次成功读取产生一帧。
    Bytes,
    /// 按行积累：`\n` 触发、`\r` 丢弃、空闲超时冲刷。
    Lines,
}

/// UART 读取器旁路的登记请求。
pub struct UartReaderRequest {
    /// 已申领的端口句柄。
    pub port: Arc<dyn UartPort>,
    pub mode: UartFrameMode,
    /// 单帧上限（字节），登记方钳制到 [16, 256]。
    pub max_frame: usize,
    /// 行模式的空闲冲刷窗口，登记方钳制到 [0, 2 s]；零为关闭。
    pub idle_flush: Duration,
    /// 是否对写出数据产生回显帧。
    pub echo: bool,
    /// 写出命令通道的接收端；发送端留在适配器的 `write` 控制动词后面，
    /// 让读取器任务成为端口的唯一驱动者。
    pub write_rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
}

impl std::fmt::Debug for UartReaderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartReaderRequest")
            .field("mode", &self.mode)
            .field("max_frame", &self.max_frame)
            .field("idle_flush", &self.idle_flush)
            .field("echo", &self.echo)
            .finish_non_exhaustive()
    }
}

/// 构建完成的设备：适配器、显式申报的旁路请求与已占用的平台资源。
#[derive(Debug)]
pub struct BuiltDevice {
    pub adaptor: Box<dyn Adaptor>,
    pub irq: Option<IrqRequest>,
    pub uart: Option<UartReaderRequest>,
    /// 构建期申领的引脚，设备移除时由服务统一归还。
    pub claimed_pins: Vec<u32>,
    /// 构建期申领的串口，设备移除时由服务统一归还。
    pub claimed_uarts: Vec<String>,
}

impl BuiltDevice {
    /// 仅含适配器的最小构建结果。
    pub fn bare(adaptor: Box<dyn Adaptor>) -> Self {
        Self {
            adaptor,
            irq: None,
            uart: None,
            claimed_pins: Vec::new(),
            claimed_uarts: Vec::new(),
        }
    }
}

impl std::fmt::Debug for dyn Adaptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Adaptor({})", self.id())
    }
}

/// 构建输入：设备配置与平台句柄。
pub struct BuildSpec<'a> {
    pub device_id: &'a str,
    pub params: &'a ParamMap,
    pub bus_ref: Option<&'a BusRef>,
    pub platform: &'a PlatformHandles,
}

impl BuildSpec<'_> {
    /// 解析设备挂载的 I²C 总线句柄。
    pub fn i2c_bus(&self) -> Result<Arc<dyn crate::platform::I2cBus>, CoreError> {
        let bus_ref = self
            .bus_ref
            .ok_or_else(|| CoreError::invalid_params("device requires a `bus_ref`"))?;
        Ok(self.platform.i2c.by_id(&bus_ref.id)?)
    }
}

/// 设备构建器：`type` 字符串背后的工厂。
///
/// # 教案式说明
/// - **契约 (What)**：构建是异步的——探测/初始化硬件属于构建的一部分，
///   绑定检查失败必须让构建失败而非延迟到首次测量；
/// - **登记表 (Where)**：构建器显式登记进注册表并注入 HAL 构造函数，不做
///   模块初始化副作用式的全局注册。
#[async_trait]
pub trait DeviceBuilder: Send + Sync {
    /// 对应配置 `type` 字段的稳定名。
    fn type_name(&self) -> &'static str;

    /// 按配置构建设备。
    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError>;
}
