//! SMBALERT 优先读取（场景级）：下降沿触发即时功率读数，上升沿保持沉默。

use std::sync::Arc;
use std::time::Duration;

use rivet_bus::{Bus, Message, Subscription, topic};
use rivet_core::sim::SimPlatform;
use rivet_core::{Cancellation, BusRef, DeviceConfig, HalConfig, ParamMap, Payload};
use rivet_hal::{HalOptions, HalService, Registry};
use rivet_ltc4015::regs::{self, limit};
use rivet_ltc4015::sim::SimLtc4015;

const ALERT_PIN: u32 = 22;

struct Rig {
    bus: Bus<Payload>,
    platform: SimPlatform,
    i2c: rivet_core::sim::SimI2cBusHandle,
    model: Arc<SimLtc4015>,
    cancel: Cancellation,
}

async fn start() -> Rig {
    let platform = SimPlatform::new();
    let i2c = platform.add_i2c_bus("i2c1");
    platform.add_pin(ALERT_PIN, true); // 告警线空闲为高

    let model = SimLtc4015::new(regs::DEFAULT_ADDR, 0, 4);
    model.set_reg(regs::VIN, 7_281);
    model.set_reg(regs::VSYS, 7_160);
    model.set_reg(regs::VBAT, 19_244);
    model.set_reg(regs::DIE_TEMP, 13_150);
    model.set_reg(regs::NTC_RATIO, 21_000);
    i2c.attach(regs::DEFAULT_ADDR, model.clone());
    i2c.attach(regs::ARA_ADDR, model.clone());
    {
        let wired = platform.clone();
        model.on_alert_line(Arc::new(move |level| wired.drive_pin(ALERT_PIN, level)));
    }

    let bus: Bus<Payload> = Bus::new();
    let service = HalService::new(
        bus.clone(),
        Registry::builtin(),
        platform.handles(),
        HalOptions::default(),
    );
    let cancel = Cancellation::new();
    tokio::spawn(service.run(cancel.clone()));

    let client = bus.connect();
    client
        .publish(Message::retained(
            topic!["config", "hal"],
            Some(Payload::Config(HalConfig {
                devices: vec![DeviceConfig {
                    id: "chg0".into(),
                    device_type: "ltc4015".into(),
                    params: ParamMap::new()
                        .insert("chem", "liion")
                        .insert("cells", 4i64)
                        .insert("rsnsb_uohm", 4_000i64)
                        .insert("rsnsi_uohm", 3_000i64)
                        .insert("smbalert_pin", i64::from(ALERT_PIN))
                        .insert("vin_lo_mv", 9_000i64)
                        .insert("vin_hi_mv", 15_000i64)
                        .insert("sample_every", Duration::from_secs(5)),
                    bus_ref: Some(BusRef::i2c("i2c1")),
                }],
            })),
        ))
        .unwrap();

    Rig {
        bus,
        platform,
        i2c,
        model,
        cancel,
    }
}

async fn next_power(sub: &Subscription<Payload>, window: Duration) -> Option<()> {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let msg = tokio::time::timeout(remaining, sub.recv()).await.ok()??;
        if matches!(msg.payload, Some(Payload::Power(_))) {
            return Some(());
        }
    }
}

#[tokio::test]
async fn falling_edge_triggers_a_priority_read_and_rising_edge_stays_silent() {
    let rig = start().await;
    let client = rig.bus.connect();
    let power_sub = client
        .subscribe(topic!["hal", "capability", "power", 0, "value"], 8)
        .unwrap();
    let alert_sub = client
        .subscribe(topic!["hal", "capability", "alerts", 0, "event"], 8)
        .unwrap();

    // 首次调度读数（period = 5 s，首采样 200 ms）：3 秒内必达。
    next_power(&power_sub, Duration::from_secs(3))
        .await
        .expect("initial scheduled power value");

    // 拉低告警线：优先读取在 2 秒内给出新的功率值，远早于下一个调度点。
    rig.model.set_reg(regs::VIN, 4_854); // VIN 跌到 8 V
    rig.model.raise_limit_condition(limit::VIN_LO);
    assert_eq!(rig.platform.pin_level(ALERT_PIN), Some(false));

    next_power(&power_sub, Duration::from_secs(2))
        .await
        .expect("priority power value after the falling edge");

    // 每个触发位一条告警事件。
    let alert = tokio::time::timeout(Duration::from_secs(1), alert_sub.recv())
        .await
        .expect("alert event published")
        .expect("subscription alive");
    assert!(matches!(
        alert.payload,
        Some(Payload::Alert(ref event)) if event.group == "limit" && event.name == "vin_lo"
    ));

    // 服务完成后告警线释放（上升沿），300 ms 内不得出现新的功率值。
    assert_eq!(rig.platform.pin_level(ALERT_PIN), Some(true));
    assert!(
        next_power(&power_sub, Duration::from_millis(300)).await.is_none(),
        "a rising edge must not trigger a read"
    );

    rig.cancel.cancel();
}

#[tokio::test]
async fn io_failure_degrades_every_capability_of_the_device() {
    let rig = start().await;
    let client = rig.bus.connect();
    let power_sub = client
        .subscribe(topic!["hal", "capability", "power", 0, "value"], 8)
        .unwrap();
    let state_sub = client
        .subscribe(topic!["hal", "capability", "charger", 0, "state"], 8)
        .unwrap();

    next_power(&power_sub, Duration::from_secs(3))
        .await
        .expect("healthy first read");

    // 器件从总线脱落：下一轮调度读取 NACK，状态降级且不再发布 value。
    rig.i2c.detach(regs::DEFAULT_ADDR);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(8);
    let mut degraded = false;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let Ok(Some(msg)) = tokio::time::timeout(remaining, state_sub.recv()).await else {
            break;
        };
        if let Some(Payload::Status(status)) = msg.payload {
            if status.link == rivet_core::LinkState::Degraded {
                assert_eq!(status.error.as_deref(), Some("error"));
                degraded = true;
                break;
            }
        }
    }
    assert!(degraded, "charger capability degrades after the device drops off");

    rig.cancel.cancel();
}
