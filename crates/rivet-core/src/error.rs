//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为运行时各层提供统一的错误合流点：平台门面、设备适配器与 HAL 服务的
//!   失败最终都以 [`CoreError`] 出现在状态记录与控制应答中；
//! - 错误码为稳定 `'static` 字符串，日志、指标与外部消费方据此做精确分类，
//!   不解析描述文本。
//!
//! ## 设计要求（What）
//! - 瞬态的“尚未就绪”（[`CoreError::NotReady`]）只在测量工作器内部驱动退避，
//!   除非重试耗尽，不会作为用户可见错误出现；
//! - 设备私有错误（如充电器的量程/绑定检查）通过 [`CoreError::Device`] 携带
//!   自定义标签，码面保持收敛。

use std::borrow::Cow;

use thiserror::Error;

/// 运行时核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：一个枚举覆盖领域/资源/硬件/配置四类故障，调用方可以
///   `?` 直接传播，HAL 边界调用 [`code`](CoreError::code) 取稳定码写入记录；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，可跨任务传播；
/// - **风险 (Trade-offs)**：描述字段采用 `Cow`/`String`，构造时可能分配；
///   热路径（测量循环）只在失败分支触达，代价可接受。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// 请求队列饱和或资源暂不可用。
    #[error("resource busy")]
    Busy,

    /// 设备或门面不支持所请求的操作。
    #[error("operation not supported")]
    Unsupported,

    /// 参数缺失或类型不符。
    #[error("invalid parameters: {reason}")]
    InvalidParams { reason: Cow<'static, str> },

    /// 载荷无法按预期记录解释。
    #[error("invalid payload")]
    InvalidPayload,

    /// 能力地址未注册。
    #[error("unknown capability")]
    UnknownCapability,

    /// HAL 尚未进入就绪态。
    #[error("HAL not ready")]
    HalNotReady,

    /// 主题非法（转发自总线层）。
    #[error("invalid topic")]
    InvalidTopic,

    /// 指定的总线不存在。
    #[error("unknown bus `{0}`")]
    UnknownBus(String),

    /// 总线已被占用。
    #[error("bus `{0}` already in use")]
    BusInUse(String),

    /// 指定的引脚不存在。
    #[error("unknown pin {0}")]
    UnknownPin(u32),

    /// 引脚已被占用。
    #[error("pin {0} already claimed")]
    PinInUse(u32),

    /// 截止时间耗尽。
    #[error("deadline exceeded")]
    Timeout,

    /// 操作被取消（运行时排空）。
    #[error("operation cancelled")]
    Cancelled,

    /// 采样周期超出允许范围。
    #[error("period outside the accepted range")]
    InvalidPeriod,

    /// 瞬态未就绪：由测量工作器退避重试，不直接对外暴露。
    #[error("device not ready")]
    NotReady,

    /// 底层总线 I/O 失败。
    #[error("bus i/o failure: {0}")]
    Io(Cow<'static, str>),

    /// 设备专有故障，携带稳定标签（如 `strapping_mismatch`）。
    #[error("device fault `{tag}`: {detail}")]
    Device {
        tag: &'static str,
        detail: Cow<'static, str>,
    },
}

impl CoreError {
    /// 以静态文案构造参数错误。
    pub fn invalid_params(reason: impl Into<Cow<'static, str>>) -> Self {
        CoreError::InvalidParams {
            reason: reason.into(),
        }
    }

    /// 以静态标签构造设备专有错误。
    pub fn device(tag: &'static str, detail: impl Into<Cow<'static, str>>) -> Self {
        CoreError::Device {
            tag,
            detail: detail.into(),
        }
    }

    /// 稳定错误码。
    ///
    /// - **契约 (What)**：返回值属于对外发布的稳定码集合；[`Device`]
    ///   (CoreError::Device) 返回其自定义标签，标签同样要求稳定；
    /// - **风险 (Trade-offs)**：新增变体必须同步扩展此映射，集中在一处便于
    ///   评审把关。
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Busy => "busy",
            CoreError::Unsupported => "unsupported",
            CoreError::InvalidParams { .. } => "invalid_params",
            CoreError::InvalidPayload => "invalid_payload",
            CoreError::UnknownCapability => "unknown_capability",
            CoreError::HalNotReady => "hal_not_ready",
            CoreError::InvalidTopic => "invalid_topic",
            CoreError::UnknownBus(_) => "unknown_bus",
            CoreError::BusInUse(_) => "bus_in_use",
            CoreError::UnknownPin(_) => "unknown_pin",
            CoreError::PinInUse(_) => "pin_in_use",
            CoreError::Timeout => "timeout",
            CoreError::Cancelled => "error",
            CoreError::InvalidPeriod => "invalid_period",
            CoreError::NotReady => "busy",
            CoreError::Io(_) => "error",
            CoreError::Device { tag, .. } => tag,
        }
    }

    /// 是否为瞬态故障（触发退避而非告警）。
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::NotReady | CoreError::Busy)
    }
}
