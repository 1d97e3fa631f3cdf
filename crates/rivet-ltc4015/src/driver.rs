//! # 寄存器驱动
//!
//! ## 核心意图（Why）
//! - 把 SMBus 字级协议（低字节在前的 16 位读写）、遥测解码、告警排空与
//!   使能写入封装为带截止时间的原子操作；
//! - 驱动不持有任务也不做调度：它由所属总线的测量工作器串行驱动，方法
//!   `&self` 即可——状态都在芯片里。

use std::sync::Arc;

use rivet_core::platform::I2cBus;
use rivet_core::{CoreError, OpContext};

use crate::alerts::{AlertSnapshot, AlertWindows, DesiredEnables, Window, WindowReadings};
use crate::chem::{ChargeProfile, Chemistry, decode_chem_cells};
use crate::codec;
use crate::regs;

/// 一轮遥测读数（已换算为物理量）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Telemetry {
    pub vbat_cell_uv: i64,
    pub vin_uv: i64,
    pub vsys_uv: i64,
    pub ibat_ua: i64,
    pub iin_ua: i64,
    pub die_temp_mc: i64,
    pub ntc_ratio: u16,
    pub bsr_uohm: Option<i64>,
}

impl Telemetry {
    /// 参与窗口重武装判定的读数子集。
    pub fn window_readings(&self) -> WindowReadings {
        WindowReadings {
            vin_uv: self.vin_uv,
            vsys_uv: self.vsys_uv,
            vbat_cell_uv: self.vbat_cell_uv,
            ntc_ratio: i64::from(self.ntc_ratio),
        }
    }
}

/// 可编程充电目标；`None` 字段保持芯片当前值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChargeTargets {
    pub icharge_ua: Option<i64>,
    pub vcharge_cell_mv: Option<i64>,
    pub iin_limit_ua: Option<i64>,
    pub vin_uvcl_uv: Option<i64>,
}

impl ChargeTargets {
    /// 是否有任一目标待写。
    pub fn any(&self) -> bool {
        self.icharge_ua.is_some()
            || self.vcharge_cell_mv.is_some()
            || self.iin_limit_ua.is_some()
            || self.vin_uvcl_uv.is_some()
    }
}

/// 在尚未确定档案前读取 `CHEM_CELLS`（构建期的绑定探测）。
pub async fn probe_straps(
    bus: &dyn I2cBus,
    addr: u8,
    ctx: &OpContext,
) -> Result<(Chemistry, u8), CoreError> {
    let mut rd = [0u8; 2];
    ctx.run(bus.transfer(addr, &[regs::CHEM_CELLS], &mut rd))
        .await?
        .map_err(CoreError::from)?;
    decode_chem_cells(u16::from_le_bytes(rd))
}

/// LTC4015 驱动实例。
///
/// # 教案式说明
/// - **契约 (What)**：全部方法在 [`OpContext`] 截止时间内完成或返回
///   [`CoreError::Timeout`]；I/O 失败映射为 `error` 类码，由上层降级状态；
/// - **并发 (Where)**：实例由测量工作器独占驱动；接口不内置锁。
pub struct Ltc4015 {
    bus: Arc<dyn I2cBus>,
    addr: u8,
    profile: ChargeProfile,
}

impl Ltc4015 {
    pub fn new(bus: Arc<dyn I2cBus>, addr: u8, profile: ChargeProfile) -> Self {
        Self { bus, addr, profile }
    }

    pub fn profile(&self) -> &ChargeProfile {
        &self.profile
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    async fn xfer(
        &self,
        ctx: &OpContext,
        addr: u8,
        wr: &[u8],
        rd: &mut [u8],
    ) -> Result<(), CoreError> {
        ctx.run(self.bus.transfer(addr, wr, rd))
            .await?
            .map_err(CoreError::from)
    }

    /// 读 16 位寄存器（低字节在前）。
    pub async fn read_reg(&self, ctx: &OpContext, reg: u8) -> Result<u16, CoreError> {
        let mut rd = [0u8; 2];
        self.xfer(ctx, self.addr, &[reg], &mut rd).await?;
        Ok(u16::from_le_bytes(rd))
    }

    /// 写 16 位寄存器（低字节在前）。
    pub async fn write_reg(&self, ctx: &OpContext, reg: u8, value: u16) -> Result<(), CoreError> {
        let [lo, hi] = value.to_le_bytes();
        self.xfer(ctx, self.addr, &[reg, lo, hi], &mut []).await
    }

    /// 读取一轮遥测并换算。
    pub async fn telemetry(&self, ctx: &OpContext) -> Result<Telemetry, CoreError> {
        let vbat = self.read_reg(ctx, regs::VBAT).await?;
        let vin = self.read_reg(ctx, regs::VIN).await?;
        let vsys = self.read_reg(ctx, regs::VSYS).await?;
        let ibat = self.read_reg(ctx, regs::IBAT).await?;
        let iin = self.read_reg(ctx, regs::IIN).await?;
        let die_temp = self.read_reg(ctx, regs::DIE_TEMP).await?;
        let ntc_ratio = self.read_reg(ctx, regs::NTC_RATIO).await?;
        let bsr = self.read_reg(ctx, regs::BSR).await?;

        Ok(Telemetry {
            vbat_cell_uv: codec::vbat_cell_uv(self.profile.chemistry, vbat),
            vin_uv: codec::vin_uv(vin),
            vsys_uv: codec::vin_uv(vsys),
            ibat_ua: codec::ibat_ua(&self.profile, ibat),
            iin_ua: codec::iin_ua(&self.profile, iin),
            die_temp_mc: codec::die_temp_mc(die_temp),
            ntc_ratio,
            bsr_uohm: (bsr != 0).then(|| codec::bsr_uohm(&self.profile, bsr)),
        })
    }

    /// 读取实时充电阶段与调节状态。
    pub async fn charger_status(&self, ctx: &OpContext) -> Result<(u16, u16), CoreError> {
        let state = self.read_reg(ctx, regs::CHARGER_STATE).await?;
        let status = self.read_reg(ctx, regs::CHARGE_STATUS).await?;
        Ok((state, status))
    }

    /// 读取 JEITA 温度分区。
    pub async fn jeita_region(&self, ctx: &OpContext) -> Result<u8, CoreError> {
        Ok((self.read_reg(ctx, regs::JEITA_REGION).await? & 0x07) as u8)
    }

    /// 读取库仑计数器。
    pub async fn read_qcount(&self, ctx: &OpContext) -> Result<u16, CoreError> {
        self.read_reg(ctx, regs::QCOUNT).await
    }

    /// 配置库仑计量：预分频、窗口限值并使能计数器。
    pub async fn enable_qcount(
        &self,
        ctx: &OpContext,
        prescale: u16,
        window: Option<Window>,
    ) -> Result<(), CoreError> {
        self.write_reg(ctx, regs::QCOUNT_PRESCALE_FACTOR, prescale)
            .await?;
        if let Some(window) = window {
            self.write_reg(ctx, regs::QCOUNT_LO_ALERT_LIMIT, window.lo as u16)
                .await?;
            self.write_reg(ctx, regs::QCOUNT_HI_ALERT_LIMIT, window.hi as u16)
                .await?;
        }
        self.set_config_flag(ctx, regs::config_bits::EN_QCOUNT, true)
            .await
    }

    /// 读改写 `CONFIG_BITS` 中的单个控制位。
    pub async fn set_config_flag(
        &self,
        ctx: &OpContext,
        flag: u16,
        on: bool,
    ) -> Result<(), CoreError> {
        let current = self.read_reg(ctx, regs::CONFIG_BITS).await?;
        let next = if on { current | flag } else { current & !flag };
        if next != current {
            self.write_reg(ctx, regs::CONFIG_BITS, next).await?;
        }
        Ok(())
    }

    /// 挂起/恢复充电器。
    pub async fn suspend_charger(&self, ctx: &OpContext, on: bool) -> Result<(), CoreError> {
        self.set_config_flag(ctx, regs::config_bits::SUSPEND_CHARGER, on)
            .await
    }

    /// 发起一次电池内阻测量；完成后由 `bsr_hi` 告警或下一轮遥测体现。
    pub async fn run_bsr_test(&self, ctx: &OpContext) -> Result<(), CoreError> {
        self.set_config_flag(ctx, regs::config_bits::RUN_BSR, true)
            .await
    }

    /// 把窗口配置编码写入限值寄存器。
    pub async fn write_windows(
        &self,
        ctx: &OpContext,
        windows: &AlertWindows,
    ) -> Result<(), CoreError> {
        if let Some(w) = windows.vin_uv {
            self.write_reg(ctx, regs::VIN_LO_ALERT_LIMIT, codec::vin_raw(w.lo))
                .await?;
            self.write_reg(ctx, regs::VIN_HI_ALERT_LIMIT, codec::vin_raw(w.hi))
                .await?;
        }
        if let Some(w) = windows.vsys_uv {
            self.write_reg(ctx, regs::VSYS_LO_ALERT_LIMIT, codec::vin_raw(w.lo))
                .await?;
            self.write_reg(ctx, regs::VSYS_HI_ALERT_LIMIT, codec::vin_raw(w.hi))
                .await?;
        }
        if let Some(w) = windows.vbat_cell_uv {
            let chem = self.profile.chemistry;
            self.write_reg(ctx, regs::VBAT_LO_ALERT_LIMIT, codec::vbat_raw(chem, w.lo))
                .await?;
            self.write_reg(ctx, regs::VBAT_HI_ALERT_LIMIT, codec::vbat_raw(chem, w.hi))
                .await?;
        }
        if let Some(w) = windows.ntc_ratio {
            self.write_reg(ctx, regs::NTC_RATIO_LO_ALERT_LIMIT, w.lo as u16)
                .await?;
            self.write_reg(ctx, regs::NTC_RATIO_HI_ALERT_LIMIT, w.hi as u16)
                .await?;
        }
        Ok(())
    }

    /// 写三组告警使能。
    pub async fn apply_enables(
        &self,
        ctx: &OpContext,
        enables: &DesiredEnables,
    ) -> Result<(), CoreError> {
        self.write_reg(ctx, regs::EN_LIMIT_ALERTS, enables.limit)
            .await?;
        self.write_reg(ctx, regs::EN_CHARGER_STATE_ALERTS, enables.charger_state)
            .await?;
        self.write_reg(ctx, regs::EN_CHARGE_STATUS_ALERTS, enables.charge_status)
            .await
    }

    /// 读取三组锁存（不清除）。
    pub async fn read_latches(&self, ctx: &OpContext) -> Result<AlertSnapshot, CoreError> {
        Ok(AlertSnapshot {
            limit: self.read_reg(ctx, regs::LIMIT_ALERTS).await?,
            charger_state: self.read_reg(ctx, regs::CHARGER_STATE_ALERTS).await?,
            charge_status: self.read_reg(ctx, regs::CHARGE_STATUS_ALERTS).await?,
        })
    }

    /// 写零清除三组锁存。
    pub async fn clear_latches(&self, ctx: &OpContext) -> Result<(), CoreError> {
        self.write_reg(ctx, regs::LIMIT_ALERTS, 0).await?;
        self.write_reg(ctx, regs::CHARGER_STATE_ALERTS, 0).await?;
        self.write_reg(ctx, regs::CHARGE_STATUS_ALERTS, 0).await
    }

    /// 排空：读取快照并清除锁存。
    pub async fn drain_alerts(&self, ctx: &OpContext) -> Result<AlertSnapshot, CoreError> {
        let snapshot = self.read_latches(ctx).await?;
        self.clear_latches(ctx).await?;
        Ok(snapshot)
    }

    /// 发起 SMBus 告警响应（ARA）。
    ///
    /// 返回 `Ok(true)` 表示本器件认领了告警；`Ok(false)` 表示其它器件应答。
    pub async fn respond_ara(&self, ctx: &OpContext) -> Result<bool, CoreError> {
        let mut rd = [0u8; 1];
        self.xfer(ctx, regs::ARA_ADDR, &[], &mut rd).await?;
        // 应答字节的高 7 位是响应者地址（低位为读标志）。
        Ok(rd[0] >> 1 == self.addr)
    }

    /// 写可编程充电目标；固定参数变体拒绝写入。
    pub async fn set_targets(
        &self,
        ctx: &OpContext,
        targets: &ChargeTargets,
        temp_comp: bool,
    ) -> Result<(), CoreError> {
        if !targets.any() {
            return Ok(());
        }
        if !self.profile.chemistry.targets_writable() {
            return Err(CoreError::device(
                "targets_read_only",
                "charge targets are pin-strapped on this variant",
            ));
        }
        if let Some(ua) = targets.icharge_ua {
            self.write_reg(
                ctx,
                regs::ICHARGE_TARGET,
                codec::icharge_code(&self.profile, ua),
            )
            .await?;
        }
        if let Some(mv) = targets.vcharge_cell_mv {
            self.write_reg(
                ctx,
                regs::VCHARGE_SETTING,
                codec::vcharge_code(self.profile.chemistry, mv, temp_comp),
            )
            .await?;
        }
        if let Some(ua) = targets.iin_limit_ua {
            self.write_reg(
                ctx,
                regs::IIN_LIMIT_SETTING,
                codec::iin_limit_code(&self.profile, ua),
            )
            .await?;
        }
        if let Some(uv) = targets.vin_uvcl_uv {
            self.write_reg(ctx, regs::VIN_UVCL_SETTING, codec::vin_uvcl_code(uv))
                .await?;
        }
        Ok(())
    }

    /// 一次性落地窗口、目标与使能（构建期与重配置复用，幂等）。
    pub async fn configure(
        &self,
        ctx: &OpContext,
        windows: &AlertWindows,
        enables: &DesiredEnables,
        targets: &ChargeTargets,
        temp_comp: bool,
    ) -> Result<(), CoreError> {
        self.write_windows(ctx, windows).await?;
        self.set_targets(ctx, targets, temp_comp).await?;
        self.apply_enables(ctx, enables).await?;
        self.clear_latches(ctx).await
    }
}
