//! 告警协议端到端：绑定核对、ARA 认领、排空清锁存、对边重武装与目标写保护。

use std::sync::Arc;
use std::time::Duration;

use rivet_core::sim::{SimI2cBusHandle, SimPlatform};
use rivet_core::{
    BuildSpec, BuiltDevice, BusRef, CollectOutcome, DeviceBuilder, OpContext, ParamMap,
    Payload, SampleChannel,
};
use rivet_ltc4015::regs::{self, charger_state, limit};
use rivet_ltc4015::sim::SimLtc4015;
use rivet_ltc4015::{ChargeProfile, Chemistry, Ltc4015, Ltc4015Builder};

const ADDR: u8 = regs::DEFAULT_ADDR;
const ALERT_PIN: u32 = 22;

/// 预置一套“12 V 输入、3.7 V/节”的遥测。
fn preset_telemetry(model: &SimLtc4015) {
    model.set_reg(regs::VIN, 7_281); // ≈ 12.0 V
    model.set_reg(regs::VSYS, 7_160);
    model.set_reg(regs::VBAT, 19_244); // ≈ 3.70 V/节（锂系刻度）
    model.set_reg(regs::IBAT, 600);
    model.set_reg(regs::IIN, 410);
    model.set_reg(regs::DIE_TEMP, 13_150); // ≈ 25 °C
    model.set_reg(regs::NTC_RATIO, 21_000);
}

struct Rig {
    platform: SimPlatform,
    #[allow(dead_code)]
    bus: SimI2cBusHandle,
    model: Arc<SimLtc4015>,
}

fn rig(chem_code: u16, cells: u8) -> Rig {
    let platform = SimPlatform::new();
    let bus = platform.add_i2c_bus("i2c1");
    platform.add_pin(ALERT_PIN, true);

    let model = SimLtc4015::new(ADDR, chem_code, cells);
    preset_telemetry(&model);
    bus.attach(ADDR, model.clone());
    bus.attach(regs::ARA_ADDR, model.clone());

    let wired = platform.clone();
    model.on_alert_line(Arc::new(move |level| wired.drive_pin(ALERT_PIN, level)));

    Rig {
        platform,
        bus,
        model,
    }
}

fn base_params() -> ParamMap {
    ParamMap::new()
        .insert("chem", "liion")
        .insert("cells", 4i64)
        .insert("rsnsb_uohm", 4_000i64)
        .insert("rsnsi_uohm", 3_000i64)
        .insert("smbalert_pin", i64::from(ALERT_PIN))
        .insert("vin_lo_mv", 9_000i64)
        .insert("vin_hi_mv", 15_000i64)
}

async fn build(rig: &Rig, params: &ParamMap) -> Result<BuiltDevice, rivet_core::CoreError> {
    let handles = rig.platform.handles();
    let bus_ref = BusRef::i2c("i2c1");
    Ltc4015Builder
        .build(BuildSpec {
            device_id: "chg0",
            params,
            bus_ref: Some(&bus_ref),
            platform: &handles,
        })
        .await
}

#[tokio::test]
async fn build_configures_windows_and_enables() {
    let rig = rig(0, 4); // LiIon 可编程、4 节
    let built = build(&rig, &base_params()).await.expect("build succeeds");

    assert_eq!(built.adaptor.capabilities().len(), 3);
    assert!(built.irq.is_some(), "SMBALERT pin requests a falling-edge irq");
    assert_eq!(
        rig.model.reg(regs::EN_LIMIT_ALERTS),
        limit::VIN_LO | limit::VIN_HI
    );
    assert_eq!(
        rig.model.reg(regs::EN_CHARGER_STATE_ALERTS),
        charger_state::FAULTS
    );
    // 窗口编码落到限值寄存器：9.0 V / 1648 µV ≈ 5461。
    assert_eq!(rig.model.reg(regs::VIN_LO_ALERT_LIMIT), 5_461);
}

#[tokio::test]
async fn strapping_mismatch_is_fatal_to_build() {
    let rig = rig(7, 4); // 芯片绑定为铅酸固定档
    let err = build(&rig, &base_params()).await.unwrap_err();
    assert_eq!(err.code(), "strapping_mismatch");

    let rig = rig_with_cells(0, 3);
    let err = build(&rig, &base_params()).await.unwrap_err();
    assert_eq!(err.code(), "strapping_mismatch");
}

fn rig_with_cells(chem_code: u16, cells: u8) -> Rig {
    rig(chem_code, cells)
}

#[tokio::test]
async fn fixed_variant_refuses_charge_targets() {
    let rig1 = rig(1, 4); // LiIon 固定 4.2 V 档
    let params = base_params().insert("icharge_ma", 1_000i64);
    let err = build(&rig1, &params).await.unwrap_err();
    assert_eq!(err.code(), "targets_read_only");

    // 不带目标时固定档构建成功。
    let rig2 = rig(1, 4);
    assert!(build(&rig2, &base_params()).await.is_ok());
}

#[tokio::test]
async fn collect_returns_power_and_charger_parts() {
    let rig = rig(0, 4);
    let mut built = build(&rig, &base_params()).await.unwrap();
    rig.model
        .set_reg(regs::CHARGER_STATE, charger_state::CC_CV_CHARGE);

    let ctx = OpContext::with_timeout(Duration::from_secs(1));
    let CollectOutcome::Sample(sample) = built.adaptor.collect(&ctx).await.unwrap() else {
        panic!("continuously-converting meter never reports NotReady");
    };

    let power = sample
        .parts
        .iter()
        .find_map(|part| match &part.payload {
            Payload::Power(reading) => Some(reading.clone()),
            _ => None,
        })
        .expect("power part present");
    assert!((11_900_000..12_100_000).contains(&power.vin_uv));
    assert!((3_690_000..3_710_000).contains(&power.vbat_cell_uv));

    let charger = sample
        .parts
        .iter()
        .find_map(|part| match &part.payload {
            Payload::Charger(reading) => Some(reading.clone()),
            _ => None,
        })
        .expect("charger part present");
    assert_eq!(charger.charger_state, "cc_cv_charge");
}

#[tokio::test]
async fn alert_service_drains_rearms_and_releases_the_line() {
    let rig = rig(0, 4);
    let mut built = build(&rig, &base_params()).await.unwrap();

    // VIN 跌破下限：遥测换到 8 V，持续条件拉低告警线。
    rig.model.set_reg(regs::VIN, 4_854);
    rig.model.raise_limit_condition(limit::VIN_LO);
    assert_eq!(rig.platform.pin_level(ALERT_PIN), Some(false));

    let ctx = OpContext::with_timeout(Duration::from_secs(1));
    let CollectOutcome::Sample(sample) = built.adaptor.collect(&ctx).await.unwrap() else {
        panic!("collect yields a sample");
    };

    // 每个触发位产生一条事件读数。
    let alert_events: Vec<_> = sample
        .parts
        .iter()
        .filter(|part| part.channel == SampleChannel::Event)
        .filter_map(|part| match &part.payload {
            Payload::Alert(event) => Some((event.group.as_str(), event.name.as_str())),
            _ => None,
        })
        .collect();
    assert!(alert_events.contains(&("limit", "vin_lo")));

    // 对边重武装：读数在下限之下，仅保留上侧使能。
    assert_eq!(rig.model.reg(regs::EN_LIMIT_ALERTS), limit::VIN_HI);
    // 锁存已清空，告警线释放。
    assert_eq!(rig.model.reg(regs::LIMIT_ALERTS), 0);
    assert_eq!(rig.platform.pin_level(ALERT_PIN), Some(true));
}

#[tokio::test]
async fn suspend_and_bsr_controls_flip_config_bits() {
    use rivet_core::{CapKind, ControlOutcome};
    use rivet_ltc4015::regs::config_bits;

    let rig = rig(0, 4);
    let mut built = build(&rig, &base_params()).await.unwrap();
    let ctx = OpContext::with_timeout(Duration::from_secs(1));

    let outcome = built
        .adaptor
        .control(
            CapKind::Charger,
            "suspend",
            Some(Payload::Params(ParamMap::new().insert("on", true))),
            &ctx,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ControlOutcome::Done(_)));
    assert_ne!(
        rig.model.reg(regs::CONFIG_BITS) & config_bits::SUSPEND_CHARGER,
        0
    );

    built
        .adaptor
        .control(CapKind::Charger, "resume", None, &ctx)
        .await
        .unwrap();
    assert_eq!(
        rig.model.reg(regs::CONFIG_BITS) & config_bits::SUSPEND_CHARGER,
        0
    );

    built
        .adaptor
        .control(CapKind::Charger, "measure_bsr", None, &ctx)
        .await
        .unwrap();
    assert_ne!(rig.model.reg(regs::CONFIG_BITS) & config_bits::RUN_BSR, 0);
}

#[tokio::test]
async fn qcount_is_enabled_and_reported_when_configured() {
    let rig = rig(0, 4);
    let params = base_params()
        .insert("qcount_prescale", 256i64)
        .insert("qcount_lo", 16_384i64)
        .insert("qcount_hi", 49_152i64);
    let mut built = build(&rig, &params).await.unwrap();

    use rivet_ltc4015::regs::config_bits;
    assert_ne!(rig.model.reg(regs::CONFIG_BITS) & config_bits::EN_QCOUNT, 0);
    assert_eq!(rig.model.reg(regs::QCOUNT_PRESCALE_FACTOR), 256);

    rig.model.set_reg(regs::QCOUNT, 32_768);
    let ctx = OpContext::with_timeout(Duration::from_secs(1));
    let CollectOutcome::Sample(sample) = built.adaptor.collect(&ctx).await.unwrap() else {
        panic!("collect yields a sample");
    };
    let power = sample
        .parts
        .iter()
        .find_map(|part| match &part.payload {
            Payload::Power(reading) => Some(reading.clone()),
            _ => None,
        })
        .expect("power part");
    assert_eq!(power.qcount, Some(32_768));
}

#[tokio::test]
async fn drain_clears_latches_law() {
    let rig = rig(0, 4);
    let handles = rig.platform.handles();
    let bus = handles.i2c.by_id("i2c1").unwrap();
    let driver = Ltc4015::new(
        bus,
        ADDR,
        ChargeProfile {
            chemistry: Chemistry::LiIonProgrammable,
            cells: 4,
            r_snsb_uohm: 4_000,
            r_snsi_uohm: 3_000,
        },
    );

    rig.model.pulse_charger_state(charger_state::BAT_MISSING_FAULT);
    let ctx = OpContext::with_timeout(Duration::from_secs(1));
    let snapshot = driver.drain_alerts(&ctx).await.unwrap();
    assert_eq!(snapshot.charger_state, charger_state::BAT_MISSING_FAULT);

    // 无新事件时，三组锁存读回全零。
    let after = driver.read_latches(&ctx).await.unwrap();
    assert!(!after.any());
}
