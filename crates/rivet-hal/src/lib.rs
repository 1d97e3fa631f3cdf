//! # rivet-hal
//!
//! ## 定位与职责（Why）
//! - 设备运行时的硬件抽象服务：把异构硬件（I²C 传感器、充电管理、GPIO、
//!   UART）统一成主题总线上的能力面——发现（保留 `info`）、遥测（`value`/
//!   `event`）、健康（保留 `state`）与控制（`control/<verb>` 请求应答）；
//! - 并发模型是单所有者网格：服务环独占设备/能力/调度映射，每条物理总线
//!   一个测量工作器独占其适配器，每路串口一个读取任务独占端口，中断侧
//!   只做一次非阻塞入队。
//!
//! ## 架构嵌入（Where）
//! - 下接 `rivet-core` 的平台门面与适配器协定，上对 `rivet-bus` 发布订阅；
//!   设备类型经 [`Registry`] 显式登记（含 `rivet-ltc4015` 的充电器）。

pub mod adaptors;
pub mod gpio_irq;
pub mod measure;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod service;
pub mod topics;
pub mod uart_reader;

pub use measure::WorkerConfig;
pub use registry::Registry;
pub use service::{HalOptions, HalService};
