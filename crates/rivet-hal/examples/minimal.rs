//! 最小可运行示例：在仿真平台上拉起完整 HAL，配置一台测试设备并观察值流。
//!
//! # 设计目的 (Why)
//! - 向新同学展示“最少概念”即可运行的端到端链路：总线 → 注册表 → 平台门面
//!   → 服务环 → 能力主题；
//! - 验证配置应用与保留消息语义，无需任何硬件。
//!
//! # 使用方式 (How)
//! ```bash
//! cargo run -p rivet-hal --example minimal
//! ```
//! 输出示例：`[rivet-hal/minimal] temperature/0 value = 252 dC`
//!
//! # 注意事项 (Trade-offs & Gotchas)
//! - 仿真平台仅在 `rivet-core` 的 `sim` 特性下可用（本示例经 dev 依赖启用）；
//! - 日志初始化使用 `RUST_LOG` 环境过滤，默认仅输出 `info` 以上。

use std::time::Duration;

use rivet_bus::{Bus, Message, topic};
use rivet_core::sim::SimPlatform;
use rivet_core::{Cancellation, DeviceConfig, HalConfig, ParamMap, Payload};
use rivet_hal::{HalOptions, HalService, Registry};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let platform = SimPlatform::new();
    let bus: Bus<Payload> = Bus::new();
    let service = HalService::new(
        bus.clone(),
        Registry::builtin(),
        platform.handles(),
        HalOptions::default(),
    );
    let cancel = Cancellation::new();
    let hal = tokio::spawn(service.run(cancel.clone()));

    let client = bus.connect();
    client.publish(Message::retained(
        topic!["config", "hal"],
        Some(Payload::Config(HalConfig {
            devices: vec![DeviceConfig {
                id: "demo".into(),
                device_type: "svc_testdev".into(),
                params: ParamMap::new().insert("sample_every", Duration::from_millis(300)),
                bus_ref: None,
            }],
        })),
    ))?;

    let values = client.subscribe(topic!["hal", "capability", "temperature", 0, "value"], 8)?;
    for _ in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(2), values.recv())
            .await?
            .expect("subscription stays live");
        if let Some(Payload::Reading(reading)) = msg.payload {
            println!(
                "[rivet-hal/minimal] temperature/0 value = {} {}",
                reading.value, reading.unit
            );
        }
    }

    cancel.cancel();
    hal.await??;
    Ok(())
}
