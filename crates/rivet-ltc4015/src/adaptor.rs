//! # 充电器适配器
//!
//! ## 核心意图（Why）
//! - 把驱动的寄存器操作组织为运行时协定：`power`/`charger`/`alerts` 三项
//!   能力、持续就绪的两段式测量、以及挂在采集路径上的告警服务；
//! - 告警服务不开独立定时任务：SMBALERT 低电平经 GPIO 中断触发一次优先
//!   测量，采集过程中发现告警线仍低则以 2 ms 协作延时在本次调用内重试，
//!   迭代上限 64 次。
//!
//! ## 状态机（Where）
//! - 构建期完成绑定核对与窗口/目标/使能落地（失败即构建失败）；
//! - 运行期的 `Servicing` 状态隐含在 [`collect`](Ltc4015Adaptor::collect)
//!   的控制流里：排空 → 重武装 → 线仍低则重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use rivet_core::platform::{GpioPin, IrqEdge, PinMode, PinPull};
use rivet_core::{
    Adaptor, AlertEventRecord, BuildSpec, BuiltDevice, CapDecl, CapInfo, CapKind, ChargerReading,
    CollectOutcome, ControlOutcome, CoreError, DeviceBuilder, IrqRequest, OpContext, ParamMap,
    Payload, PowerReading, ReplyRecord, Sample, TriggerOutcome, now_ms,
};

use crate::alerts::{AlertWindows, DesiredEnables, Window, rearm_opposite_edges};
use crate::chem::{ChargeProfile, ChemFamily};
use crate::driver::{ChargeTargets, Ltc4015, probe_straps};
use crate::regs::{self, charge_status, charger_state, limit, set_names};

/// 告警服务单次通过的迭代上限。
const SERVICE_ITERATION_CAP: usize = 64;
/// 告警线仍低时的重试延时。
const SERVICE_RETRY_DELAY: Duration = Duration::from_millis(2);
/// 构建期硬件初始化的预算。
const BUILD_TIMEOUT: Duration = Duration::from_secs(1);

fn flag_dict(table: &'static [(u16, &str)]) -> Vec<(u8, String)> {
    table
        .iter()
        .map(|(bit, name)| (bit.trailing_zeros() as u8, (*name).to_owned()))
        .collect()
}

fn group_name(table: &'static [(u16, &str)], mask: u16) -> String {
    set_names(table, mask)
        .next()
        .unwrap_or("idle")
        .to_owned()
}

/// LTC4015 适配器实例。
pub struct Ltc4015Adaptor {
    dev_id: String,
    driver: Ltc4015,
    caps: Vec<CapDecl>,
    alert_pin: Option<Arc<dyn GpioPin>>,
    windows: AlertWindows,
    desired: DesiredEnables,
    temp_comp: bool,
    qcount_enabled: bool,
}

impl Ltc4015Adaptor {
    fn power_reading(
        &self,
        telemetry: &crate::driver::Telemetry,
        qcount: Option<i64>,
    ) -> PowerReading {
        PowerReading {
            vin_uv: telemetry.vin_uv,
            vsys_uv: telemetry.vsys_uv,
            vbat_cell_uv: telemetry.vbat_cell_uv,
            iin_ua: telemetry.iin_ua,
            ibat_ua: telemetry.ibat_ua,
            die_temp_mc: telemetry.die_temp_mc,
            bsr_uohm: telemetry.bsr_uohm,
            qcount,
            ts_ms: now_ms(),
        }
    }

    fn append_alert_events(sample: &mut Sample, snapshot: &crate::alerts::AlertSnapshot) {
        let groups = [
            ("limit", limit::NAMES, snapshot.limit),
            ("charger_state", charger_state::NAMES, snapshot.charger_state),
            ("charge_status", charge_status::NAMES, snapshot.charge_status),
        ];
        for (group, table, mask) in groups {
            for name in set_names(table, mask) {
                *sample = std::mem::take(sample).with_event(
                    CapKind::Alerts,
                    Payload::Alert(AlertEventRecord {
                        group: group.to_owned(),
                        name: name.to_owned(),
                        ts_ms: now_ms(),
                    }),
                );
            }
        }
    }

    /// 告警服务通过：ARA 认领 → 排空 → 事件 → 对边重武装 → 清锁存。
    async fn service_alerts(
        &mut self,
        ctx: &OpContext,
        sample: &mut Sample,
    ) -> Result<(), CoreError> {
        let Some(pin) = self.alert_pin.clone() else {
            return Ok(());
        };
        for iteration in 0..SERVICE_ITERATION_CAP {
            if pin.get().map_err(CoreError::from)? {
                // 告警线已释放（高电平有效空闲）。
                return Ok(());
            }
            if !self.driver.respond_ara(ctx).await? {
                return Err(CoreError::device(
                    "alert_unclaimed",
                    "another responder answered the alert response address",
                ));
            }
            let snapshot = self.driver.drain_alerts(ctx).await?;
            debug!(
                dev = %self.dev_id,
                iteration,
                limit = snapshot.limit,
                charger_state = snapshot.charger_state,
                charge_status = snapshot.charge_status,
                "alert latches drained"
            );
            Self::append_alert_events(sample, &snapshot);

            // 以最新遥测决定每个窗口保留哪一侧，再剔除仍在断言的位。
            let telemetry = self.driver.telemetry(ctx).await?;
            let asserted = self.driver.read_latches(ctx).await?;
            let enables = rearm_opposite_edges(
                &self.windows,
                &telemetry.window_readings(),
                &self.desired,
                &asserted,
            );
            self.driver.apply_enables(ctx, &enables).await?;
            self.driver.clear_latches(ctx).await?;

            if pin.get().map_err(CoreError::from)? {
                return Ok(());
            }
            tokio::time::sleep(SERVICE_RETRY_DELAY).await;
        }
        warn!(dev = %self.dev_id, "alert line still low after the service iteration cap");
        Ok(())
    }
}

#[async_trait]
impl Adaptor for Ltc4015Adaptor {
    fn id(&self) -> &str {
        &self.dev_id
    }

    fn capabilities(&self) -> &[CapDecl] {
        &self.caps
    }

    async fn trigger(&mut self, _ctx: &OpContext) -> Result<TriggerOutcome, CoreError> {
        // 遥测持续转换，无需等待窗口。
        Ok(TriggerOutcome::Started {
            collect_after: Duration::ZERO,
        })
    }

    async fn collect(&mut self, ctx: &OpContext) -> Result<CollectOutcome, CoreError> {
        let telemetry = self.driver.telemetry(ctx).await?;
        let (state_raw, status_raw) = self.driver.charger_status(ctx).await?;
        let jeita_region = self.driver.jeita_region(ctx).await?;
        let qcount = if self.qcount_enabled {
            Some(i64::from(self.driver.read_qcount(ctx).await?))
        } else {
            None
        };

        let mut sample = Sample::new()
            .with(
                CapKind::Power,
                Payload::Power(self.power_reading(&telemetry, qcount)),
            )
            .with(
                CapKind::Charger,
                Payload::Charger(ChargerReading {
                    charger_state: group_name(charger_state::NAMES, state_raw),
                    charge_status: group_name(charge_status::NAMES, status_raw),
                    state_raw,
                    status_raw,
                    jeita_region,
                    ts_ms: now_ms(),
                }),
            );

        self.service_alerts(ctx, &mut sample).await?;
        Ok(CollectOutcome::Sample(sample))
    }

    async fn control(
        &mut self,
        _kind: CapKind,
        verb: &str,
        payload: Option<Payload>,
        ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError> {
        match verb {
            "set_targets" => {
                let params = match payload {
                    Some(Payload::Params(params)) => params,
                    _ => return Err(CoreError::InvalidPayload),
                };
                let targets = targets_from_params(&params)?;
                self.driver.set_targets(ctx, &targets, self.temp_comp).await?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            "read_alerts" => {
                let snapshot = self.driver.drain_alerts(ctx).await?;
                let detail = ParamMap::new()
                    .insert("limit", i64::from(snapshot.limit))
                    .insert("charger_state", i64::from(snapshot.charger_state))
                    .insert("charge_status", i64::from(snapshot.charge_status));
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok_with(
                    detail,
                ))))
            }
            "suspend" => {
                let on = match payload {
                    Some(Payload::Params(params)) => params.require("on")?.as_bool()?,
                    None => true,
                    _ => return Err(CoreError::InvalidPayload),
                };
                self.driver.suspend_charger(ctx, on).await?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            "resume" => {
                self.driver.suspend_charger(ctx, false).await?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            "measure_bsr" => {
                self.driver.run_bsr_test(ctx).await?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            _ => Ok(ControlOutcome::Unsupported),
        }
    }

    async fn close(&mut self) {
        // 排空时静默告警源，避免无人服务的中断风暴。
        let ctx = OpContext::with_timeout(Duration::from_millis(250));
        if let Err(err) = self
            .driver
            .apply_enables(&ctx, &DesiredEnables::default())
            .await
        {
            warn!(dev = %self.dev_id, error = %err, "failed to quiesce alert enables");
        }
    }
}

fn targets_from_params(params: &ParamMap) -> Result<ChargeTargets, CoreError> {
    let mut targets = ChargeTargets::default();
    if let Some(value) = params.get("icharge_ma") {
        targets.icharge_ua = Some(value.as_i64()? * 1_000);
    }
    if let Some(value) = params.get("vcharge_mv") {
        targets.vcharge_cell_mv = Some(value.as_i64()?);
    }
    if let Some(value) = params.get("iin_limit_ma") {
        targets.iin_limit_ua = Some(value.as_i64()? * 1_000);
    }
    if let Some(value) = params.get("vin_uvcl_mv") {
        targets.vin_uvcl_uv = Some(value.as_i64()? * 1_000);
    }
    Ok(targets)
}

fn window_from_params(
    params: &ParamMap,
    lo_key: &str,
    hi_key: &str,
    scale: i64,
) -> Result<Option<Window>, CoreError> {
    match (params.get(lo_key), params.get(hi_key)) {
        (Some(lo), Some(hi)) => Ok(Some(Window {
            lo: lo.as_i64()? * scale,
            hi: hi.as_i64()? * scale,
        })),
        (None, None) => Ok(None),
        _ => Err(CoreError::invalid_params(
            "alert windows need both the low and the high bound",
        )),
    }
}

/// `ltc4015` 设备类型的构建器。
///
/// # 教案式说明
/// - **契约 (What)**：构建期完成绑定探测与交叉核对；`CHEM_CELLS` 上报的
///   体系家族或节数与声明不符即失败（`strapping_mismatch`），固定参数变体
///   收到充电目标配置同样失败（`targets_read_only`）；
/// - **参数 (How)**：`chem`/`cells`/`rsnsb_uohm`/`rsnsi_uohm` 必填；可选
///   `addr`、`smbalert_pin`、`temp_comp`、`charger_events`、窗口
///   （`vin_lo_mv`…`ntc_hi`）与目标（`icharge_ma` 等）。
#[derive(Debug, Default)]
pub struct Ltc4015Builder;

#[async_trait]
impl DeviceBuilder for Ltc4015Builder {
    fn type_name(&self) -> &'static str {
        "ltc4015"
    }

    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError> {
        let params = spec.params;
        let declared_family = ChemFamily::from_param(params.require("chem")?.as_text()?)?;
        let cells = params.require("cells")?.as_u8()?;
        let r_snsb_uohm = params.require("rsnsb_uohm")?.as_i64()?;
        let r_snsi_uohm = params.require("rsnsi_uohm")?.as_i64()?;
        let addr = match params.get("addr") {
            Some(value) => value.as_u8()?,
            None => regs::DEFAULT_ADDR,
        };
        let temp_comp = match params.get("temp_comp") {
            Some(value) => value.as_bool()?,
            None => false,
        };
        let charger_events = match params.get("charger_events") {
            Some(value) => value.as_bool()?,
            None => false,
        };

        let bus = spec.i2c_bus()?;
        let ctx = OpContext::with_timeout(BUILD_TIMEOUT);

        // 绑定探测：声明的家族/节数必须与芯片管脚上报一致。
        let (chemistry, reported_cells) = probe_straps(bus.as_ref(), addr, &ctx).await?;
        if chemistry.family() != declared_family {
            return Err(CoreError::device(
                "strapping_mismatch",
                format!(
                    "declared {declared_family:?} but the chip straps report {:?}",
                    chemistry.family()
                ),
            ));
        }
        let profile = ChargeProfile {
            chemistry,
            cells,
            r_snsb_uohm,
            r_snsi_uohm,
        };
        profile.validate()?;
        profile.cross_check(chemistry, reported_cells)?;

        let windows = AlertWindows {
            vin_uv: window_from_params(params, "vin_lo_mv", "vin_hi_mv", 1_000)?,
            vsys_uv: window_from_params(params, "vsys_lo_mv", "vsys_hi_mv", 1_000)?,
            vbat_cell_uv: window_from_params(params, "vbat_lo_mv", "vbat_hi_mv", 1_000)?,
            ntc_ratio: window_from_params(params, "ntc_lo", "ntc_hi", 1)?,
        };
        let desired = DesiredEnables {
            limit: windows.limit_mask(),
            charger_state: if charger_events {
                charger_state::NAMES.iter().fold(0, |acc, (bit, _)| acc | bit)
            } else {
                charger_state::FAULTS
            },
            charge_status: 0,
        };
        let targets = targets_from_params(params)?;

        let driver = Ltc4015::new(bus, addr, profile);
        driver
            .configure(&ctx, &windows, &desired, &targets, temp_comp)
            .await?;

        // 库仑计量：声明预分频即启用，窗口可选。
        let qcount_enabled = params.get("qcount_prescale").is_some();
        if let Some(value) = params.get("qcount_prescale") {
            let prescale = value.as_u32()?;
            let prescale = u16::try_from(prescale)
                .map_err(|_| CoreError::invalid_params("qcount_prescale out of range"))?;
            let window = window_from_params(params, "qcount_lo", "qcount_hi", 1)?;
            driver.enable_qcount(&ctx, prescale, window).await?;
        }

        // SMBALERT：下降沿触发优先测量；电平检查在采集路径完成。
        let mut irq = None;
        let mut alert_pin = None;
        let mut claimed_pins = Vec::new();
        if let Some(value) = params.get("smbalert_pin") {
            let pin_no = value.as_u32()?;
            let pin = spec.platform.gpio.claim(pin_no)?;
            pin.configure(PinMode::Input { pull: PinPull::Up })?;
            alert_pin = Some(Arc::clone(&pin));
            claimed_pins.push(pin_no);
            irq = Some(IrqRequest {
                pin,
                pin_no,
                edge: IrqEdge::Falling,
                invert: false,
                debounce: Duration::ZERO,
            });
        }

        let caps = vec![
            CapDecl::new(CapKind::Power, CapInfo::new("ltc4015", 1)),
            CapDecl::new(
                CapKind::Charger,
                CapInfo::new("ltc4015", 1)
                    .with_flags("charger_state", flag_dict(charger_state::NAMES))
                    .with_flags("charge_status", flag_dict(charge_status::NAMES)),
            ),
            CapDecl::new(
                CapKind::Alerts,
                CapInfo::new("ltc4015", 1)
                    .with_flags("limit", flag_dict(limit::NAMES))
                    .with_flags("charger_state", flag_dict(charger_state::NAMES))
                    .with_flags("charge_status", flag_dict(charge_status::NAMES)),
            ),
        ];

        Ok(BuiltDevice {
            adaptor: Box::new(Ltc4015Adaptor {
                dev_id: spec.device_id.to_owned(),
                driver,
                caps,
                alert_pin,
                windows,
                desired,
                temp_comp,
                qcount_enabled,
            }),
            irq,
            uart: None,
            claimed_pins,
            claimed_uarts: Vec::new(),
        })
    }
}
