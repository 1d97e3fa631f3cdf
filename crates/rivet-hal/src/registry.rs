//! # 设备注册表
//!
//! `type` 字符串到构建器的显式映射。注册表在装配阶段构造并整体注入 HAL
//! 构造函数——不存在模块初始化副作用式的进程级全局表，测试可以自由组装
//! 只含所需类型的注册表。

use std::collections::HashMap;
use std::sync::Arc;

use rivet_core::DeviceBuilder;

use crate::adaptors::{Aht20Builder, GpioBuilder, TestDeviceBuilder, UartBuilder};

/// 构建器表。
#[derive(Clone, Default)]
pub struct Registry {
    builders: HashMap<&'static str, Arc<dyn DeviceBuilder>>,
}

impl Registry {
    /// 空表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式登记一个构建器；同名覆盖。
    pub fn register(mut self, builder: Arc<dyn DeviceBuilder>) -> Self {
        self.builders.insert(builder.type_name(), builder);
        self
    }

    /// 按 `type` 查找。
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn DeviceBuilder>> {
        self.builders.get(type_name).cloned()
    }

    /// 已登记的类型名（诊断输出用）。
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builders.keys().copied()
    }

    /// 内建设备集合：AHT20、GPIO、UART、LTC4015 与测试设备。
    pub fn builtin() -> Self {
        Self::new()
            .register(Arc::new(Aht20Builder))
            .register(Arc::new(GpioBuilder))
            .register(Arc::new(UartBuilder))
            .register(Arc::new(TestDeviceBuilder))
            .register(Arc::new(rivet_ltc4015::Ltc4015Builder))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}
