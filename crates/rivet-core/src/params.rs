//! # 设备参数树
//!
//! ## 设计目标（Why）
//! - 配置记录中的 `params` 字段因设备类型而异，以强类型值树表达可避免
//!   字符串配置的解析歧义，同时让缺参/错型统一落到 `invalid_params`；
//! - 保序的键值对列表（而非哈希表）保证诊断输出与配置文本顺序一致。
//!
//! ## 契约说明（What）
//! - 访问器全部返回 `Result`，错误文案点名键与期望类型，构建器据此直接
//!   `?` 传播；
//! - 时长既接受显式毫秒数（整型）也接受结构化 `DurationMs`，便于手工构造
//!   与线上配置互通。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// 参数值的枚举表示。
///
/// # 教案式说明
/// - **意图 (Why)**：覆盖设备参数需要的标量、时长与嵌套结构；
/// - **契约 (What)**：序列化采用 `kind` 标签的内部表示，跨进程传输不依赖
///   字段顺序；
/// - **风险 (Trade-offs)**：整型统一 `i64`，编码窄位宽（如 I²C 地址）时由
///   访问器做范围校验。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamValue {
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Text { value: String },
    DurationMs { value: u64 },
    List { values: Vec<ParamValue> },
    Map { entries: ParamMap },
}

impl ParamValue {
    /// 布尔访问。
    pub fn as_bool(&self) -> Result<bool, CoreError> {
        match self {
            ParamValue::Bool { value } => Ok(*value),
            _ => Err(CoreError::invalid_params("expected a boolean")),
        }
    }

    /// 整型访问。
    pub fn as_i64(&self) -> Result<i64, CoreError> {
        match self {
            ParamValue::Int { value } => Ok(*value),
            _ => Err(CoreError::invalid_params("expected an integer")),
        }
    }

    /// 非负整型访问。
    pub fn as_u64(&self) -> Result<u64, CoreError> {
        let value = self.as_i64()?;
        u64::try_from(value).map_err(|_| CoreError::invalid_params("expected a non-negative integer"))
    }

    /// `u32` 范围整型访问。
    pub fn as_u32(&self) -> Result<u32, CoreError> {
        let value = self.as_i64()?;
        u32::try_from(value).map_err(|_| CoreError::invalid_params("integer out of u32 range"))
    }

    /// `u8` 范围整型访问（I²C 地址、位数等窄域）。
    pub fn as_u8(&self) -> Result<u8, CoreError> {
        let value = self.as_i64()?;
        u8::try_from(value).map_err(|_| CoreError::invalid_params("integer out of u8 range"))
    }

    /// 文本访问。
    pub fn as_text(&self) -> Result<&str, CoreError> {
        match self {
            ParamValue::Text { value } => Ok(value),
            _ => Err(CoreError::invalid_params("expected a string")),
        }
    }

    /// 时长访问：接受 `DurationMs` 或按毫秒解释的整型。
    pub fn as_duration(&self) -> Result<Duration, CoreError> {
        match self {
            ParamValue::DurationMs { value } => Ok(Duration::from_millis(*value)),
            ParamValue::Int { value } if *value >= 0 => {
                Ok(Duration::from_millis(*value as u64))
            }
            _ => Err(CoreError::invalid_params("expected a duration in milliseconds")),
        }
    }

    /// 嵌套表访问。
    pub fn as_map(&self) -> Result<&ParamMap, CoreError> {
        match self {
            ParamValue::Map { entries } => Ok(entries),
            _ => Err(CoreError::invalid_params("expected a nested map")),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool { value }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int { value }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text {
            value: value.to_owned(),
        }
    }
}

impl From<Duration> for ParamValue {
    fn from(value: Duration) -> Self {
        ParamValue::DurationMs {
            value: value.as_millis() as u64,
        }
    }
}

/// 保序参数表。
///
/// # 教案式说明
/// - **契约 (What)**：键唯一性由写入方保证；[`insert`](ParamMap::insert)
///   采用建造者风格返回自身，测试与演示可链式构造；
/// - **风险 (Trade-offs)**：线性查找，参数表规模为个位数，代价可忽略。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap(Vec<(String, ParamValue)>);

impl ParamMap {
    /// 空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式写入一个键值。
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// 查找键对应的值。
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// 必填键查找，缺失即 `invalid_params`。
    pub fn require(&self, key: &str) -> Result<&ParamValue, CoreError> {
        self.get(key).ok_or_else(|| {
            CoreError::InvalidParams {
                reason: format!("missing required param `{key}`").into(),
            }
        })
    }

    /// 键值对迭代。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors_enforce_kinds() {
        let params = ParamMap::new()
            .insert("addr", 0x68i64)
            .insert("bus", "i2c1")
            .insert("every", Duration::from_secs(5));

        assert_eq!(params.require("addr").unwrap().as_u8().unwrap(), 0x68);
        assert_eq!(params.require("bus").unwrap().as_text().unwrap(), "i2c1");
        assert_eq!(
            params.require("every").unwrap().as_duration().unwrap(),
            Duration::from_secs(5)
        );
        assert_eq!(
            params.require("addr").unwrap().as_text().unwrap_err().code(),
            "invalid_params"
        );
        assert_eq!(params.require("missing").unwrap_err().code(), "invalid_params");
    }

    #[test]
    fn integer_doubles_as_millisecond_duration() {
        let params = ParamMap::new().insert("debounce_ms", 20i64);
        assert_eq!(
            params.require("debounce_ms").unwrap().as_duration().unwrap(),
            Duration::from_millis(20)
        );
    }
}
