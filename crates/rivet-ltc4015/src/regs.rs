//! # LTC4015 寄存器地图
//!
//! ## 约定（What）
//! - 全部寄存器为 16 位，SMBus 读写，线序低字节在前；
//! - 告警三组（窗口限值 / 充电状态 / 调节状态）各有“使能”与“锁存”两个
//!   寄存器，位布局一一对应；锁存位写零清除；
//! - 名称表将位映射为对外事件的稳定名，随能力描述一并发布。

/// 默认 7 位器件地址。
pub const DEFAULT_ADDR: u8 = 0x68;
/// SMBus 告警响应地址（ARA）。
pub const ARA_ADDR: u8 = 0x0C;

// —— 窗口限值设定 ——
pub const VBAT_LO_ALERT_LIMIT: u8 = 0x01;
pub const VBAT_HI_ALERT_LIMIT: u8 = 0x02;
pub const VIN_LO_ALERT_LIMIT: u8 = 0x03;
pub const VIN_HI_ALERT_LIMIT: u8 = 0x04;
pub const VSYS_LO_ALERT_LIMIT: u8 = 0x05;
pub const VSYS_HI_ALERT_LIMIT: u8 = 0x06;
pub const IIN_HI_ALERT_LIMIT: u8 = 0x07;
pub const IBAT_LO_ALERT_LIMIT: u8 = 0x08;
pub const DIE_TEMP_HI_ALERT_LIMIT: u8 = 0x09;
pub const BSR_HI_ALERT_LIMIT: u8 = 0x0A;
pub const NTC_RATIO_HI_ALERT_LIMIT: u8 = 0x0B;
pub const NTC_RATIO_LO_ALERT_LIMIT: u8 = 0x0C;

// —— 告警使能 ——
pub const EN_LIMIT_ALERTS: u8 = 0x0D;
pub const EN_CHARGER_STATE_ALERTS: u8 = 0x0E;
pub const EN_CHARGE_STATUS_ALERTS: u8 = 0x0F;

// —— 库仑计量 ——
pub const QCOUNT_LO_ALERT_LIMIT: u8 = 0x10;
pub const QCOUNT_HI_ALERT_LIMIT: u8 = 0x11;
pub const QCOUNT_PRESCALE_FACTOR: u8 = 0x12;
pub const QCOUNT: u8 = 0x13;

// —— 充电配置 ——
pub const CONFIG_BITS: u8 = 0x14;
pub const IIN_LIMIT_SETTING: u8 = 0x15;
pub const VIN_UVCL_SETTING: u8 = 0x16;
pub const ICHARGE_TARGET: u8 = 0x1A;
pub const VCHARGE_SETTING: u8 = 0x1B;

// —— 实时状态 ——
pub const CHARGER_STATE: u8 = 0x34;
pub const CHARGE_STATUS: u8 = 0x35;

// —— 告警锁存 ——
pub const LIMIT_ALERTS: u8 = 0x36;
pub const CHARGER_STATE_ALERTS: u8 = 0x37;
pub const CHARGE_STATUS_ALERTS: u8 = 0x38;

pub const SYSTEM_STATUS: u8 = 0x39;

/// `CONFIG_BITS` 的控制位。
pub mod config_bits {
    /// 启用库仑计数器。
    pub const EN_QCOUNT: u16 = 1 << 2;
    /// I²C 路径启用 MPPT。
    pub const MPPT_EN_I2C: u16 = 1 << 3;
    /// 强制测量系统常开。
    pub const FORCE_MEAS_SYS_ON: u16 = 1 << 4;
    /// 发起一次电池内阻（BSR）测量。
    pub const RUN_BSR: u16 = 1 << 5;
    /// 挂起充电器。
    pub const SUSPEND_CHARGER: u16 = 1 << 8;
}

// —— 遥测 ——
pub const VBAT: u8 = 0x3A;
pub const VIN: u8 = 0x3B;
pub const VSYS: u8 = 0x3C;
pub const IBAT: u8 = 0x3D;
pub const IIN: u8 = 0x3E;
pub const DIE_TEMP: u8 = 0x3F;
pub const NTC_RATIO: u8 = 0x40;
pub const BSR: u8 = 0x41;
pub const JEITA_REGION: u8 = 0x42;
pub const CHEM_CELLS: u8 = 0x43;
pub const MEAS_SYS_VALID: u8 = 0x4A;

/// `CHEM_CELLS` 的化学体系字段（位 [11:8]）。
pub const CHEM_CELLS_CHEM_SHIFT: u16 = 8;
pub const CHEM_CELLS_CHEM_MASK: u16 = 0x0F00;
/// `CHEM_CELLS` 的节数字段（位 [3:0]）。
pub const CHEM_CELLS_COUNT_MASK: u16 = 0x000F;

/// 窗口限值组（`EN_LIMIT_ALERTS` / `LIMIT_ALERTS`）的位布局。
pub mod limit {
    pub const NTC_RATIO_LO: u16 = 1 << 0;
    pub const NTC_RATIO_HI: u16 = 1 << 1;
    pub const BSR_HI: u16 = 1 << 2;
    pub const DIE_TEMP_HI: u16 = 1 << 3;
    pub const IBAT_LO: u16 = 1 << 4;
    pub const IIN_HI: u16 = 1 << 5;
    pub const VSYS_HI: u16 = 1 << 6;
    pub const VSYS_LO: u16 = 1 << 7;
    pub const VIN_HI: u16 = 1 << 8;
    pub const VIN_LO: u16 = 1 << 9;
    pub const VBAT_HI: u16 = 1 << 10;
    pub const VBAT_LO: u16 = 1 << 11;
    pub const QCOUNT_HI: u16 = 1 << 12;
    pub const QCOUNT_LO: u16 = 1 << 13;
    pub const MEAS_SYS_VALID: u16 = 1 << 15;

    /// 位 → 稳定事件名。
    pub const NAMES: &[(u16, &str)] = &[
        (NTC_RATIO_LO, "ntc_hot"),
        (NTC_RATIO_HI, "ntc_cold"),
        (BSR_HI, "bsr_hi"),
        (DIE_TEMP_HI, "die_temp_hi"),
        (IBAT_LO, "ibat_lo"),
        (IIN_HI, "iin_hi"),
        (VSYS_HI, "vsys_hi"),
        (VSYS_LO, "vsys_lo"),
        (VIN_HI, "vin_hi"),
        (VIN_LO, "vin_lo"),
        (VBAT_HI, "vbat_hi"),
        (VBAT_LO, "vbat_lo"),
        (QCOUNT_HI, "qcount_hi"),
        (QCOUNT_LO, "qcount_lo"),
        (MEAS_SYS_VALID, "meas_sys_valid"),
    ];
}

/// 充电状态组（`EN_CHARGER_STATE_ALERTS` / `CHARGER_STATE_ALERTS` /
/// `CHARGER_STATE`）的位布局。
pub mod charger_state {
    pub const BAT_SHORT_FAULT: u16 = 1 << 0;
    pub const BAT_MISSING_FAULT: u16 = 1 << 1;
    pub const MAX_CHARGE_TIME_FAULT: u16 = 1 << 2;
    pub const C_OVER_X_TERM: u16 = 1 << 3;
    pub const TIMER_TERM: u16 = 1 << 4;
    pub const NTC_PAUSE: u16 = 1 << 5;
    pub const CC_CV_CHARGE: u16 = 1 << 6;
    pub const PRECHARGE: u16 = 1 << 7;
    pub const CHARGER_SUSPENDED: u16 = 1 << 8;
    pub const ABSORB_CHARGE: u16 = 1 << 9;
    pub const EQUALIZE_CHARGE: u16 = 1 << 10;

    /// 终止/故障类位（默认纳入告警使能）。
    pub const FAULTS: u16 = BAT_SHORT_FAULT | BAT_MISSING_FAULT | MAX_CHARGE_TIME_FAULT;

    pub const NAMES: &[(u16, &str)] = &[
        (BAT_SHORT_FAULT, "bat_short"),
        (BAT_MISSING_FAULT, "bat_missing"),
        (MAX_CHARGE_TIME_FAULT, "max_charge_time"),
        (C_OVER_X_TERM, "c_over_x_term"),
        (TIMER_TERM, "timer_term"),
        (NTC_PAUSE, "ntc_pause"),
        (CC_CV_CHARGE, "cc_cv_charge"),
        (PRECHARGE, "precharge"),
        (CHARGER_SUSPENDED, "suspended"),
        (ABSORB_CHARGE, "absorb_charge"),
        (EQUALIZE_CHARGE, "equalize_charge"),
    ];
}

/// 调节状态组（`EN_CHARGE_STATUS_ALERTS` / `CHARGE_STATUS_ALERTS` /
/// `CHARGE_STATUS`）的位布局。
pub mod charge_status {
    pub const CONSTANT_VOLTAGE: u16 = 1 << 0;
    pub const CONSTANT_CURRENT: u16 = 1 << 1;
    pub const IIN_LIMIT_ACTIVE: u16 = 1 << 2;
    pub const VIN_UVCL_ACTIVE: u16 = 1 << 3;

    pub const NAMES: &[(u16, &str)] = &[
        (CONSTANT_VOLTAGE, "constant_voltage"),
        (CONSTANT_CURRENT, "constant_current"),
        (IIN_LIMIT_ACTIVE, "iin_limit_active"),
        (VIN_UVCL_ACTIVE, "vin_uvcl_active"),
    ];
}

/// 在名称表中找出置位项的稳定名。
pub fn set_names(table: &'static [(u16, &str)], mask: u16) -> impl Iterator<Item = &'static str> {
    table
        .iter()
        .filter(move |(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_pairs_are_distinct_bits() {
        let all = limit::VIN_LO
            | limit::VIN_HI
            | limit::VSYS_LO
            | limit::VSYS_HI
            | limit::VBAT_LO
            | limit::VBAT_HI
            | limit::NTC_RATIO_LO
            | limit::NTC_RATIO_HI;
        assert_eq!(all.count_ones(), 8);
    }

    #[test]
    fn set_names_reports_only_set_bits() {
        let names: Vec<_> =
            set_names(limit::NAMES, limit::VIN_LO | limit::BSR_HI).collect();
        assert_eq!(names, vec!["bsr_hi", "vin_lo"]);
    }
}
