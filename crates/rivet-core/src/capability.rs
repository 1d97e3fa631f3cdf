//! # 能力模型
//!
//! ## 核心意图（Why）
//! - 设备异构，但对外的发现与寻址统一走 `(kind, id)` 能力地址：`kind` 是
//!   封闭的能力种类枚举，`id` 在 HAL 实例内按种类单调分配；
//! - 静态描述（`info`）与链路状态（`state`）分离：前者保留一次，后者随
//!   运行状态演进。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 能力种类。
///
/// # 教案式说明
/// - **契约 (What)**：[`as_token`](CapKind::as_token) 返回主题层使用的稳定
///   字符串；[`from_token`](CapKind::from_token) 为控制主题解析的逆映射；
/// - **风险 (Trade-offs)**：封闭枚举意味着新增能力种类需要改动本文件；换来
///   的是主题面与匹配逻辑的完全可枚举。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    Temperature,
    Humidity,
    Power,
    Charger,
    Alerts,
    Gpio,
    Uart,
}

impl CapKind {
    /// 主题层令牌。
    pub fn as_token(&self) -> &'static str {
        match self {
            CapKind::Temperature => "temperature",
            CapKind::Humidity => "humidity",
            CapKind::Power => "power",
            CapKind::Charger => "charger",
            CapKind::Alerts => "alerts",
            CapKind::Gpio => "gpio",
            CapKind::Uart => "uart",
        }
    }

    /// 由主题令牌解析种类。
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "temperature" => CapKind::Temperature,
            "humidity" => CapKind::Humidity,
            "power" => CapKind::Power,
            "charger" => CapKind::Charger,
            "alerts" => CapKind::Alerts,
            "gpio" => CapKind::Gpio,
            "uart" => CapKind::Uart,
            _ => return None,
        })
    }
}

impl fmt::Display for CapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// 位域字典：事件位 → 稳定名，随 `info` 发布供消费方解码。
pub type FlagDict = (String, Vec<(u8, String)>);

/// 能力静态描述。
///
/// - **契约 (What)**：`driver` 为产生该能力的驱动名；`unit` 为数值单位
///   （如 `"dC"` 表示十分之一摄氏度）；`schema` 标记载荷记录的版本；
///   `flags` 为可选的位域字典（告警类能力使用）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapInfo {
    pub driver: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit: Option<String>,
    pub schema: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub flags: Vec<FlagDict>,
}

impl CapInfo {
    /// 以驱动名构造最小描述。
    pub fn new(driver: impl Into<String>, schema: u32) -> Self {
        Self {
            driver: driver.into(),
            unit: None,
            schema,
            flags: Vec::new(),
        }
    }

    /// 设置单位。
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// 追加一组位域字典。
    pub fn with_flags(mut self, group: impl Into<String>, names: Vec<(u8, String)>) -> Self {
        self.flags.push((group.into(), names));
        self
    }
}

/// 链路状态三态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Up,
    Degraded,
    Down,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Up => "up",
            LinkState::Degraded => "degraded",
            LinkState::Down => "down",
        }
    }
}

/// 能力链路状态记录（保留发布于 `…/state`）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapStatus {
    pub link: LinkState,
    pub ts_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl CapStatus {
    pub fn up(ts_ms: u64) -> Self {
        Self {
            link: LinkState::Up,
            ts_ms,
            error: None,
        }
    }

    pub fn degraded(ts_ms: u64, error: impl Into<String>) -> Self {
        Self {
            link: LinkState::Degraded,
            ts_ms,
            error: Some(error.into()),
        }
    }

    pub fn down(ts_ms: u64) -> Self {
        Self {
            link: LinkState::Down,
            ts_ms,
            error: None,
        }
    }
}

/// 适配器申报的单项能力。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapDecl {
    pub kind: CapKind,
    pub info: CapInfo,
}

impl CapDecl {
    pub fn new(kind: CapKind, info: CapInfo) -> Self {
        Self { kind, info }
    }
}
