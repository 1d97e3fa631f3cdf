//! # 载荷记录
//!
//! ## 设计背景（Why）
//! - 原型系统在消息里投递任意动态值；此处改以带标签的类型化记录表达所有
//!   已知载荷形态，并保留不透明字节兜底，订阅方按标签匹配即可安全解码；
//! - 记录同时派生 serde 表示，跨节点转发器可以直接序列化，进程内路径则
//!   零序列化直投。
//!
//! ## 契约说明（What）
//! - 所有时间戳统一为 Unix 毫秒（[`now_ms`]）；
//! - 充电器/电量遥测采用类型化记录（而非键值表），字段名即稳定契约。

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capability::{CapInfo, CapStatus};
use crate::params::ParamMap;
use crate::pool::FrameBuf;

/// 当前 Unix 时间的毫秒表示。
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// HAL 整机状态级别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalLevel {
    Idle,
    Ready,
    Stopped,
    Error,
}

/// HAL 整机状态记录（保留发布于 `hal/state`）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HalStateRecord {
    pub level: HalLevel,
    pub status: String,
    pub ts_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl HalStateRecord {
    pub fn new(level: HalLevel, status: impl Into<String>) -> Self {
        Self {
            level,
            status: status.into(),
            ts_ms: now_ms(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 通用标量读数（温度、湿度、GPIO 电平等）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// 数值单位（与能力 `info.unit` 一致）。
    pub unit: String,
    pub value: i64,
    pub ts_ms: u64,
}

impl Reading {
    pub fn new(unit: impl Into<String>, value: i64) -> Self {
        Self {
            unit: unit.into(),
            value,
            ts_ms: now_ms(),
        }
    }
}

/// 电源遥测记录（`power` 能力）。
///
/// 电压单位 µV，电流单位 µA，温度单位 m°C，电池内阻单位 µΩ；电池电压为
/// 每节（per cell）数值，节数见能力描述。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub vin_uv: i64,
    pub vsys_uv: i64,
    pub vbat_cell_uv: i64,
    pub iin_ua: i64,
    pub ibat_ua: i64,
    pub die_temp_mc: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bsr_uohm: Option<i64>,
    /// 库仑计数器读数（启用电量计量时存在）。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub qcount: Option<i64>,
    pub ts_ms: u64,
}

/// 充电器状态记录（`charger` 能力）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChargerReading {
    /// 当前充电阶段的稳定名（如 `cc_cv_charge`、`absorb_charge`）。
    pub charger_state: String,
    /// 当前调节回路的稳定名（如 `constant_current`）。
    pub charge_status: String,
    /// 原始状态寄存器值，便于离线比对。
    pub state_raw: u16,
    pub status_raw: u16,
    /// JEITA 温度分区（锂系充电曲线的当前区间）。
    pub jeita_region: u8,
    pub ts_ms: u64,
}

/// GPIO 边沿种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Rising,
    Falling,
}

/// GPIO 事件记录（`gpio` 能力的 `event`）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpioEventRecord {
    pub dev_id: String,
    /// 逻辑电平（已按配置取反）。
    pub level: bool,
    pub edge: Edge,
    pub ts_ms: u64,
}

/// UART 帧记录（`uart` 能力的 `event`）。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UartFrameRecord {
    pub dev_id: String,
    /// 帧内容；池化缓冲的共享句柄，最后一个持有者释放时归还。
    pub data: FrameBuf,
    /// 是否为发送回显帧。
    pub echo: bool,
    pub ts_ms: u64,
}

/// 告警事件记录（`alerts` 能力的 `event`），每个触发位一条。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEventRecord {
    /// 告警组：`limit` / `charger_state` / `charge_status`。
    pub group: String,
    /// 触发位的稳定名（如 `vin_lo`、`cccv`、`bat_missing`）。
    pub name: String,
    pub ts_ms: u64,
}

/// 控制应答记录。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// 附加字段（如 `set_rate` 应答中的生效周期）。
    #[serde(skip_serializing_if = "ParamMap::is_empty", default)]
    pub detail: ParamMap,
}

impl ReplyRecord {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            detail: ParamMap::new(),
        }
    }

    pub fn ok_with(detail: ParamMap) -> Self {
        Self {
            ok: true,
            error: None,
            detail,
        }
    }

    pub fn err(code: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(code.into()),
            detail: ParamMap::new(),
        }
    }
}

/// 总线引用：设备挂载的物理总线。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusRef {
    #[serde(rename = "type")]
    pub kind: BusRefKind,
    pub id: String,
}

/// 总线引用种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusRefKind {
    I2c,
    Uart,
}

impl BusRef {
    pub fn i2c(id: impl Into<String>) -> Self {
        Self {
            kind: BusRefKind::I2c,
            id: id.into(),
        }
    }

    pub fn uart(id: impl Into<String>) -> Self {
        Self {
            kind: BusRefKind::Uart,
            id: id.into(),
        }
    }
}

/// 单台设备的配置条目。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bus_ref: Option<BusRef>,
}

/// `config/hal` 的配置记录。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HalConfig {
    pub devices: Vec<DeviceConfig>,
}

/// 背压计数器快照（保留发布于 `hal/metrics`）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// 中断侧队列溢出丢弃数。
    pub irq_drops: u64,
    /// 串口事件因背压丢弃数。
    pub uart_drops: u64,
    /// 订阅邮箱挤出消息数。
    pub mailbox_displaced: u64,
    /// 测量请求因队列饱和被拒数。
    pub measure_saturated: u64,
    pub ts_ms: u64,
}

/// 总线消息的标签联合载荷。
///
/// # 教案式说明
/// - **意图 (Why)**：订阅方按变体匹配已知记录，未知形态落到
///   [`Payload::Blob`] 不透明兜底；
/// - **契约 (What)**：serde 表示采用 `kind` 标签 + `body` 内容的邻接编码，
///   跨进程格式自描述；
/// - **风险 (Trade-offs)**：枚举体积由最大变体决定；记录均为小结构或引用
///   计数句柄，按值克隆廉价。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Info(CapInfo),
    Status(CapStatus),
    HalState(HalStateRecord),
    Reading(Reading),
    Power(PowerReading),
    Charger(ChargerReading),
    GpioEvent(GpioEventRecord),
    UartFrame(UartFrameRecord),
    Alert(AlertEventRecord),
    Reply(ReplyRecord),
    Config(HalConfig),
    Params(ParamMap),
    Metrics(MetricsRecord),
    Text(String),
    Blob(Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LinkState;

    #[test]
    fn payload_roundtrips_through_json() {
        let payload = Payload::Status(CapStatus {
            link: LinkState::Degraded,
            ts_ms: 42,
            error: Some("timeout".into()),
        });
        let text = serde_json::to_string(&payload).unwrap();
        assert!(text.contains("\"kind\":\"status\""));
        assert!(text.contains("\"degraded\""));
        let back: Payload = serde_json::from_str(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn device_type_serialises_under_type_key() {
        let cfg = HalConfig {
            devices: vec![DeviceConfig {
                id: "d1".into(),
                device_type: "svc_testdev".into(),
                params: ParamMap::new(),
                bus_ref: Some(BusRef::i2c("i2c1")),
            }],
        };
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(text.contains("\"type\":\"svc_testdev\""));
        assert!(text.contains("\"type\":\"i2c\""));
    }
}
