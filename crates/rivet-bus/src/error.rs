//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义总线对外暴露的错误语义；除主题校验与请求应答超时外，总线操作
//!   全部为全量语义（total），不产生其它失败路径；
//! - 错误码遵循工作区统一的稳定字符串约定，便于上层原样写入应答记录。

use thiserror::Error;

/// 总线错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方依赖稳定错误码驱动应答与日志，不应解析描述文本；
/// - **契约 (What)**：
///   - [`InvalidTopic`](BusError::InvalidTopic) — 主题/模式不满足词法约束；
///   - [`Timeout`](BusError::Timeout) — 请求应答在截止时间内未收到回复；
///   - [`ConnectionClosed`](BusError::ConnectionClosed) — 在已关闭的连接上
///     发起订阅或请求；
/// - **风险 (Trade-offs)**：`reason` 采用 `&'static str`，避免热路径分配，
///   代价是描述只能取固定文案。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// 主题或模式非法。
    #[error("invalid topic: {reason}")]
    InvalidTopic { reason: &'static str },

    /// 请求在截止时间内未得到应答。
    #[error("request timed out before a reply arrived")]
    Timeout,

    /// 连接已关闭。
    #[error("operation on a closed connection")]
    ConnectionClosed,
}

impl BusError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BusError::InvalidTopic { .. } => "invalid_topic",
            BusError::Timeout => "timeout",
            BusError::ConnectionClosed => "error",
        }
    }
}
