//! # rivet-core
//!
//! ## 定位与职责（Why）
//! - 设备运行时的共享契约层：平台门面（I²C/GPIO/UART）、适配器协定、能力
//!   模型、载荷记录、参数树、取消/截止原语与稳定错误码都在这里定义；
//! - 上层（HAL 服务、设备驱动）只依赖本 crate 的接口，平台绑定与具体驱动
//!   在装配阶段注入，核心不链接任何硬件库。
//!
//! ## 架构嵌入（Where）
//! - `platform` 是硬件抽象的唯一入口；`adaptor` 约束设备如何进入运行时；
//!   `capability`/`payload` 构成对外主题面的数据词汇；`ctl` 为所有阻塞点
//!   提供可中断性；`pool` 承载串口方向的缓冲所有权纪律。
//!
//! ## Feature 策略（Trade-offs）
//! - `sim` 编入进程内仿真平台，供测试与演示使用；默认关闭，保持生产构建
//!   的“纯接口”形态。

pub mod adaptor;
pub mod capability;
pub mod ctl;
pub mod error;
pub mod params;
pub mod payload;
pub mod platform;
pub mod pool;

#[cfg(feature = "sim")]
pub mod sim;

pub use adaptor::{
    Adaptor, BuildSpec, BuiltDevice, CollectOutcome, ControlOutcome, DeviceBuilder, IrqRequest,
    Sample, SampleChannel, SamplePart, TriggerOutcome, UartFrameMode, UartReaderRequest,
};
pub use capability::{CapDecl, CapInfo, CapKind, CapStatus, LinkState};
pub use ctl::{Cancellation, OpContext};
pub use error::CoreError;
pub use params::{ParamMap, ParamValue};
pub use payload::{
    AlertEventRecord, BusRef, BusRefKind, ChargerReading, DeviceConfig, Edge, GpioEventRecord,
    HalConfig, HalLevel, HalStateRecord, MetricsRecord, Payload, PowerReading, Reading,
    ReplyRecord, UartFrameRecord, now_ms,
};
pub use platform::{
    GpioPin, GpioProvider, I2cBus, I2cProvider, IrqEdge, IrqHandler, PinMode, PinPull,
    PlatformError, PlatformHandles, UartFormat, UartParity, UartPort, UartProvider,
};
pub use pool::{FrameBuf, SlabLease, SlabPool};
