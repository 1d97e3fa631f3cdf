//! 消息载体定义。载荷类型对总线保持不透明，由上层实例化具体的标签联合。

use crate::token::Topic;

/// 单条总线消息。
///
/// # 教案式说明
/// - **意图 (Why)**：以一个结构承载普通发布、保留发布与请求三种形态，避免
///   API 面膨胀；
/// - **契约 (What)**：
///   - `payload = None` 仅在 `retained = true` 时有意义，表示清除该主题的
///     保留值；非保留的空载荷发布照常投递，由订阅方自行解释；
///   - `reply_to` 由请求方填写，应答方以其为应答主题原样发布；
/// - **风险 (Trade-offs)**：载荷随消息克隆到每个匹配邮箱，`P` 应保证克隆
///   廉价（上层采用 `Arc`/写时共享记录）。
#[derive(Clone, Debug)]
pub struct Message<P> {
    /// 目标主题，发布时必须为字面量。
    pub topic: Topic,
    /// 不透明载荷；`None` 表示空载荷。
    pub payload: Option<P>,
    /// 是否作为保留消息存储在主题节点。
    pub retained: bool,
    /// 请求应答场景下的回执主题。
    pub reply_to: Option<Topic>,
}

impl<P> Message<P> {
    /// 构造普通事件消息。
    pub fn event(topic: Topic, payload: P) -> Self {
        Self {
            topic,
            payload: Some(payload),
            retained: false,
            reply_to: None,
        }
    }

    /// 构造保留消息：`Some` 存储、`None` 清除。
    pub fn retained(topic: Topic, payload: Option<P>) -> Self {
        Self {
            topic,
            payload,
            retained: true,
            reply_to: None,
        }
    }

    /// 为消息附加回执主题。
    pub fn with_reply_to(mut self, reply_to: Topic) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}
