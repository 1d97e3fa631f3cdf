//! # 主题面
//!
//! HAL 对外主题的唯一构造与解析点：能力主题前缀 `hal/capability/<kind>/<id>`
//! 下挂 `info`/`state`/`value`/`event`/`control/<verb>`，能力 id 为整型令牌。

use rivet_bus::{Token, Topic, topic};
use rivet_core::CapKind;

/// `hal/state` — 整机状态（保留）。
pub fn hal_state() -> Topic {
    topic!["hal", "state"]
}

/// `hal/metrics` — 背压计数器（保留）。
pub fn hal_metrics() -> Topic {
    topic!["hal", "metrics"]
}

/// `config/hal` — 配置输入。
pub fn config_hal() -> Topic {
    topic!["config", "hal"]
}

/// 控制面订阅模式：`hal/capability/+/+/control/+`。
pub fn control_pattern() -> Topic {
    topic!["hal", "capability", "+", "+", "control", "+"]
}

/// 能力叶子主题：`hal/capability/<kind>/<id>/<leaf>`。
pub fn cap_topic(kind: CapKind, cap_id: u32, leaf: &str) -> Topic {
    topic!["hal", "capability", kind.as_token(), cap_id, leaf]
}

/// 解析后的控制请求地址。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlAddress {
    pub kind: CapKind,
    pub cap_id: u32,
    pub verb: String,
}

/// 从控制主题解析能力地址与动词；形状不符返回 `None`。
pub fn parse_control(topic: &Topic) -> Option<ControlAddress> {
    let tokens = topic.tokens();
    let [
        Token::Text(hal),
        Token::Text(capability),
        Token::Text(kind),
        Token::Int(cap_id),
        Token::Text(control),
        Token::Text(verb),
    ] = tokens
    else {
        return None;
    };
    if hal.as_str() != "hal" || capability.as_str() != "capability" || control.as_str() != "control"
    {
        return None;
    }
    Some(ControlAddress {
        kind: CapKind::from_token(kind)?,
        cap_id: u32::try_from(*cap_id).ok()?,
        verb: verb.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_topics_round_trip_through_the_pattern() {
        let topic = cap_topic(CapKind::Gpio, 3, "control");
        // 实际控制主题在叶子后再挂动词。
        let full = topic!["hal", "capability", "gpio", 3, "control", "set"];
        assert!(control_pattern().matches(&full));
        assert!(!control_pattern().matches(&topic));

        let address = parse_control(&full).unwrap();
        assert_eq!(address.kind, CapKind::Gpio);
        assert_eq!(address.cap_id, 3);
        assert_eq!(address.verb, "set");
    }

    #[test]
    fn unknown_kind_token_fails_to_parse() {
        let full = topic!["hal", "capability", "plasma", 0, "control", "set"];
        assert!(parse_control(&full).is_none());
    }
}
