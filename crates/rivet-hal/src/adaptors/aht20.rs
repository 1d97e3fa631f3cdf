//! # AHT20 温湿度计适配器
//!
//! 单地址 I²C 设备（0x38），典型的两段式测量对象：触发一次转换、按器件
//! 手册等待 80 ms、读回 7 字节（状态 + 20 位湿度 + 20 位温度 + CRC-8）。
//! 繁忙位未清零时上报未就绪，交由工作器退避。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rivet_core::platform::{I2cBus, i2c_write};
use rivet_core::{
    Adaptor, BuildSpec, BuiltDevice, CapDecl, CapInfo, CapKind, CollectOutcome, ControlOutcome,
    CoreError, DeviceBuilder, OpContext, Payload, Reading, Sample, TriggerOutcome,
};

const ADDR: u8 = 0x38;
/// 初始化/校准命令。
const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
/// 触发转换命令。
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];
/// 转换等待提示（器件手册给定）。
const CONVERSION_WAIT: Duration = Duration::from_millis(80);
/// 状态字节：转换进行中。
const STATUS_BUSY: u8 = 0x80;
/// 状态字节：已校准。
const STATUS_CALIBRATED: u8 = 0x08;

/// CRC-8：多项式 0x31、初值 0xFF，覆盖前六字节。
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub struct Aht20Adaptor {
    dev_id: String,
    bus: Arc<dyn I2cBus>,
    addr: u8,
    caps: Vec<CapDecl>,
}

impl Aht20Adaptor {
    async fn xfer(
        &self,
        ctx: &OpContext,
        wr: &[u8],
        rd: &mut [u8],
    ) -> Result<(), CoreError> {
        ctx.run(self.bus.transfer(self.addr, wr, rd))
            .await?
            .map_err(CoreError::from)
    }
}

#[async_trait]
impl Adaptor for Aht20Adaptor {
    fn id(&self) -> &str {
        &self.dev_id
    }

    fn capabilities(&self) -> &[CapDecl] {
        &self.caps
    }

    async fn trigger(&mut self, ctx: &OpContext) -> Result<TriggerOutcome, CoreError> {
        self.xfer(ctx, &CMD_TRIGGER, &mut []).await?;
        Ok(TriggerOutcome::Started {
            collect_after: CONVERSION_WAIT,
        })
    }

    async fn collect(&mut self, ctx: &OpContext) -> Result<CollectOutcome, CoreError> {
        let mut frame = [0u8; 7];
        self.xfer(ctx, &[], &mut frame).await?;

        if frame[0] & STATUS_BUSY != 0 {
            return Ok(CollectOutcome::NotReady);
        }
        if crc8(&frame[..6]) != frame[6] {
            return Err(CoreError::Io("aht20 frame failed the crc check".into()));
        }

        // 20 位原始值：湿度占高半区，温度占低半区。
        let hum_raw = (u32::from(frame[1]) << 12)
            | (u32::from(frame[2]) << 4)
            | (u32::from(frame[3]) >> 4);
        let tmp_raw =
            (u32::from(frame[3] & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

        // 十分之一单位的整数换算：%RH × 10 与 °C × 10。
        let humidity_d = (i64::from(hum_raw) * 1_000) >> 20;
        let temperature_d = ((i64::from(tmp_raw) * 2_000) >> 20) - 500;

        Ok(CollectOutcome::Sample(
            Sample::new()
                .with(
                    CapKind::Temperature,
                    Payload::Reading(Reading::new("dC", temperature_d)),
                )
                .with(
                    CapKind::Humidity,
                    Payload::Reading(Reading::new("d%RH", humidity_d)),
                ),
        ))
    }

    async fn control(
        &mut self,
        _kind: CapKind,
        _verb: &str,
        _payload: Option<Payload>,
        _ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError> {
        Ok(ControlOutcome::Unsupported)
    }
}

/// `aht20` 构建器；可选参数 `addr` 覆盖默认地址。
#[derive(Debug, Default)]
pub struct Aht20Builder;

#[async_trait]
impl DeviceBuilder for Aht20Builder {
    fn type_name(&self) -> &'static str {
        "aht20"
    }

    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError> {
        let addr = match spec.params.get("addr") {
            Some(value) => value.as_u8()?,
            None => ADDR,
        };
        let bus = spec.i2c_bus()?;

        // 上电校准检查：未校准则下发初始化命令。
        let ctx = OpContext::with_timeout(Duration::from_millis(500));
        let mut status = [0u8; 1];
        ctx.run(bus.transfer(addr, &[], &mut status))
            .await?
            .map_err(CoreError::from)?;
        if status[0] & STATUS_CALIBRATED == 0 {
            ctx.run(i2c_write(bus.as_ref(), addr, &CMD_INIT))
                .await?
                .map_err(CoreError::from)?;
        }

        Ok(BuiltDevice::bare(Box::new(Aht20Adaptor {
            dev_id: spec.device_id.to_owned(),
            bus,
            addr,
            caps: vec![
                CapDecl::new(
                    CapKind::Temperature,
                    CapInfo::new("aht20", 1).with_unit("dC"),
                ),
                CapDecl::new(
                    CapKind::Humidity,
                    CapInfo::new("aht20", 1).with_unit("d%RH"),
                ),
            ],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rivet_core::platform::PlatformError;
    use rivet_core::sim::{SimI2cDevice, SimPlatform};
    use rivet_core::{BusRef, ParamMap};

    /// 脚本化的 AHT20 寄存器模型。
    struct SimAht20 {
        state: Mutex<SimAht20State>,
    }

    struct SimAht20State {
        calibrated: bool,
        triggered: bool,
        busy_reads: u32,
        hum_raw: u32,
        tmp_raw: u32,
    }

    impl SimAht20 {
        fn new(hum_raw: u32, tmp_raw: u32, busy_reads: u32) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(SimAht20State {
                    calibrated: false,
                    triggered: false,
                    busy_reads,
                    hum_raw,
                    tmp_raw,
                }),
            })
        }
    }

    impl SimI2cDevice for SimAht20 {
        fn transfer(&self, _addr: u8, wr: &[u8], rd: &mut [u8]) -> Result<(), PlatformError> {
            let mut state = self.state.lock();
            if wr == CMD_INIT {
                state.calibrated = true;
                return Ok(());
            }
            if wr == CMD_TRIGGER {
                state.triggered = true;
                return Ok(());
            }
            if wr.is_empty() && rd.len() == 1 {
                rd[0] = if state.calibrated { STATUS_CALIBRATED } else { 0 };
                return Ok(());
            }
            if wr.is_empty() && rd.len() == 7 {
                if !state.triggered {
                    return Err(PlatformError::Io("read before trigger".into()));
                }
                if state.busy_reads > 0 {
                    state.busy_reads -= 1;
                    rd[0] = STATUS_BUSY;
                    return Ok(());
                }
                rd[0] = STATUS_CALIBRATED;
                rd[1] = (state.hum_raw >> 12) as u8;
                rd[2] = (state.hum_raw >> 4) as u8;
                rd[3] = (((state.hum_raw & 0x0F) as u8) << 4) | ((state.tmp_raw >> 16) as u8);
                rd[4] = (state.tmp_raw >> 8) as u8;
                rd[5] = state.tmp_raw as u8;
                rd[6] = crc8(&rd[..6]);
                return Ok(());
            }
            Err(PlatformError::Io("unsupported transfer shape".into()))
        }
    }

    async fn build_on_sim(model: Arc<SimAht20>) -> BuiltDevice {
        let platform = SimPlatform::new();
        let bus = platform.add_i2c_bus("i2c0");
        bus.attach(ADDR, model);
        let handles = platform.handles();
        let params = ParamMap::new();
        let bus_ref = BusRef::i2c("i2c0");
        Aht20Builder
            .build(BuildSpec {
                device_id: "climate",
                params: &params,
                bus_ref: Some(&bus_ref),
                platform: &handles,
            })
            .await
            .expect("build initialises the sensor")
    }

    #[tokio::test]
    async fn build_calibrates_an_uncalibrated_sensor() {
        let model = SimAht20::new(0, 0, 0);
        let built = build_on_sim(Arc::clone(&model)).await;
        assert!(model.state.lock().calibrated);
        assert_eq!(built.adaptor.capabilities().len(), 2);
    }

    #[tokio::test]
    async fn conversion_decodes_deci_units() {
        // 50 %RH 与 25.0 °C 的理论原始值。
        let hum_raw = 1u32 << 19; // 50% = 2^20 / 2
        let tmp_raw = ((25.0f64 + 50.0) / 200.0 * (1u32 << 20) as f64) as u32;
        let model = SimAht20::new(hum_raw, tmp_raw, 0);
        let mut built = build_on_sim(model).await;

        let ctx = OpContext::with_timeout(Duration::from_secs(1));
        let outcome = built.adaptor.trigger(&ctx).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Started {
                collect_after: CONVERSION_WAIT
            }
        );
        let CollectOutcome::Sample(sample) = built.adaptor.collect(&ctx).await.unwrap() else {
            panic!("conversion finished");
        };

        let values: Vec<_> = sample
            .parts
            .iter()
            .filter_map(|part| match &part.payload {
                Payload::Reading(reading) => Some((part.kind, reading.value)),
                _ => None,
            })
            .collect();
        assert!(values.contains(&(CapKind::Temperature, 249)) || values.contains(&(CapKind::Temperature, 250)));
        assert!(values.contains(&(CapKind::Humidity, 500)));
    }

    #[tokio::test]
    async fn busy_status_reports_not_ready() {
        let model = SimAht20::new(0, 0, 1);
        let mut built = build_on_sim(model).await;
        let ctx = OpContext::with_timeout(Duration::from_secs(1));
        built.adaptor.trigger(&ctx).await.unwrap();
        assert_eq!(
            built.adaptor.collect(&ctx).await.unwrap(),
            CollectOutcome::NotReady
        );
        assert!(matches!(
            built.adaptor.collect(&ctx).await.unwrap(),
            CollectOutcome::Sample(_)
        ));
    }
}
