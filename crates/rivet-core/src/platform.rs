//! # 平台门面
//!
//! ## 定位与职责（Why）
//! - HAL 核心不得依赖具体硬件库：对 I²C 总线、GPIO 引脚与 UART 端口的全部
//!   诉求收敛为本模块的三组不透明接口，平台绑定在进程装配阶段注入；
//! - 接口面刻意最小：I²C 只有单事务传输，GPIO 只有方向/电平/中断，UART 只
//!   有写、可读通知与带截止的读取。
//!
//! ## 契约说明（What）
//! - 所有错误统一为 [`PlatformError`]，HAL 边界经 `From` 合流到核心错误域；
//! - 中断处理器运行在中断上下文：实现方必须保证回调期间不分配、不加锁、
//!   不挂起——处理器侧的约定见 [`IrqHandler`]。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::ctl::OpContext;
use crate::error::CoreError;

/// 平台层错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PlatformError {
    /// 指定总线不存在。
    #[error("unknown bus `{0}`")]
    UnknownBus(String),

    /// 总线已被其它读取器独占。
    #[error("bus `{0}` already in use")]
    BusInUse(String),

    /// 指定引脚不存在。
    #[error("unknown pin {0}")]
    UnknownPin(u32),

    /// 引脚已被占用。
    #[error("pin {0} already claimed")]
    PinInUse(u32),

    /// 平台能力缺失（如端口不支持改波特率）。
    #[error("platform capability not available")]
    Unsupported,

    /// 截止时间内未完成。
    #[error("platform i/o deadline exceeded")]
    Timeout,

    /// 底层 I/O 失败（NACK、总线卡死等）。
    #[error("platform i/o failure: {0}")]
    Io(String),
}

impl From<PlatformError> for CoreError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::UnknownBus(id) => CoreError::UnknownBus(id),
            PlatformError::BusInUse(id) => CoreError::BusInUse(id),
            PlatformError::UnknownPin(pin) => CoreError::UnknownPin(pin),
            PlatformError::PinInUse(pin) => CoreError::PinInUse(pin),
            PlatformError::Unsupported => CoreError::Unsupported,
            PlatformError::Timeout => CoreError::Timeout,
            PlatformError::Io(detail) => CoreError::Io(detail.into()),
        }
    }
}

/// I²C 总线句柄：单事务读写。
///
/// # 教案式说明
/// - **契约 (What)**：`wr` 与 `rd` 均非空时为带重复起始位的写后读复合事务；
///   任一为空则退化为纯写/纯读；
/// - **并发 (Where)**：句柄 `Send + Sync`，但驱动纪律要求同一总线的全部
///   事务由其测量工作器串行发起——接口不内置锁。
#[async_trait]
pub trait I2cBus: Send + Sync {
    /// 对 `addr` 执行一次 write-then-read 事务。
    async fn transfer(&self, addr: u8, wr: &[u8], rd: &mut [u8]) -> Result<(), PlatformError>;
}

impl std::fmt::Debug for dyn I2cBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I2cBus")
    }
}

/// 纯写便捷封装。
pub async fn i2c_write(bus: &dyn I2cBus, addr: u8, wr: &[u8]) -> Result<(), PlatformError> {
    bus.transfer(addr, wr, &mut []).await
}

/// I²C 总线工厂。
pub trait I2cProvider: Send + Sync {
    /// 按名称取得总线句柄。
    fn by_id(&self, id: &str) -> Result<Arc<dyn I2cBus>, PlatformError>;
}

/// 引脚上拉配置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinPull {
    None,
    Up,
    Down,
}

/// 引脚工作模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    /// 输入，可选上下拉。
    Input { pull: PinPull },
    /// 输出，带初始电平。
    Output { initial: bool },
}

/// 中断触发边沿。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IrqEdge {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

/// 中断处理器。
///
/// - **约束 (What)**：在中断上下文被调用，入参为当前原始电平；实现只允许
///   做一次非阻塞入队与计数器自增，禁止分配、加锁与任何等待。
pub type IrqHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// GPIO 引脚句柄。
pub trait GpioPin: Send + Sync {
    /// 配置方向与上拉。
    fn configure(&self, mode: PinMode) -> Result<(), PlatformError>;

    /// 读取原始电平。
    fn get(&self) -> Result<bool, PlatformError>;

    /// 设置输出电平。
    fn set(&self, level: bool) -> Result<(), PlatformError>;

    /// 翻转输出电平。
    fn toggle(&self) -> Result<(), PlatformError>;

    /// 登记边沿中断；重复登记覆盖旧处理器。
    fn set_irq(&self, edge: IrqEdge, handler: IrqHandler) -> Result<(), PlatformError>;

    /// 撤销中断登记。
    fn clear_irq(&self) -> Result<(), PlatformError>;
}

impl std::fmt::Debug for dyn GpioPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpioPin")
    }
}

/// 引脚工厂：独占申领语义。
pub trait GpioProvider: Send + Sync {
    /// 按编号申领引脚；重复申领返回 [`PlatformError::PinInUse`]。
    fn claim(&self, pin: u32) -> Result<Arc<dyn GpioPin>, PlatformError>;

    /// 归还引脚。
    fn release(&self, pin: u32);
}

/// UART 校验位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UartParity {
    #[default]
    None,
    Even,
    Odd,
}

/// UART 帧格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UartFormat {
    pub databits: u8,
    pub stopbits: u8,
    pub parity: UartParity,
}

/// UART 端口句柄。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - [`recv_some`](UartPort::recv_some) 在截止时间内返回读到的字节数；
///     截止到达且无数据时返回 `Ok(0)`，供读取器充当空闲节拍；
///   - [`set_baud`](UartPort::set_baud) / [`set_format`](UartPort::set_format)
///     为可选能力，缺省实现返回 [`PlatformError::Unsupported`]。
#[async_trait]
pub trait UartPort: Send + Sync {
    /// 写出全部字节。
    async fn write(&self, bytes: &[u8]) -> Result<(), PlatformError>;

    /// 等待端口可读。
    async fn readable(&self);

    /// 在上下文截止时间内读取若干字节。
    async fn recv_some(&self, buf: &mut [u8], ctx: &OpContext) -> Result<usize, PlatformError>;

    /// 改波特率（可选能力）。
    fn set_baud(&self, _baud: u32) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    /// 改帧格式（可选能力）。
    fn set_format(&self, _format: UartFormat) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }
}

/// UART 端口工厂：独占申领语义。
pub trait UartProvider: Send + Sync {
    /// 按名称申领端口；已被占用时返回 [`PlatformError::BusInUse`]。
    fn by_id(&self, id: &str) -> Result<Arc<dyn UartPort>, PlatformError>;

    /// 归还端口。
    fn release(&self, id: &str);
}

/// 三组门面的汇集句柄，装配期一次注入。
#[derive(Clone)]
pub struct PlatformHandles {
    pub i2c: Arc<dyn I2cProvider>,
    pub gpio: Arc<dyn GpioProvider>,
    pub uart: Arc<dyn UartProvider>,
}

impl std::fmt::Debug for PlatformHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformHandles").finish_non_exhaustive()
    }
}
