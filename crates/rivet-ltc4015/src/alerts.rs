//! # 告警集与对边重武装
//!
//! ## 核心意图（Why）
//! - 窗口型限值（VIN/VSYS/每节 VBAT/NTC 比值）如果两侧长期使能，持续越限
//!   的遥测会让告警线反复拉低形成风暴；对边重武装只保留“当前状态的对侧”
//!   使能，告警于是只在状态穿越时触发；
//! - 重武装计算是纯函数：输入窗口、遥测读数、期望使能与仍在断言的锁存，
//!   输出应写入的使能掩码——纯函数让幂等律可以直接测试。
//!
//! ## 算法（How）
//! 对每个已配置窗口：
//! 1. 读数 ≥ 上限 → 仅保留下侧使能；
//! 2. 读数 ≤ 下限 → 仅保留上侧使能；
//! 3. 严格处于窗口内 → 两侧都保留；
//! 最后统一剔除仍在断言的位（三组全部如此），避免未消失的条件立即重触发。

use crate::regs::limit;

/// 单个窗口的上下限（物理量与遥测字段同单位）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub lo: i64,
    pub hi: i64,
}

/// 全部窗口配置；未配置的窗口不参与重武装。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertWindows {
    pub vin_uv: Option<Window>,
    pub vsys_uv: Option<Window>,
    pub vbat_cell_uv: Option<Window>,
    pub ntc_ratio: Option<Window>,
}

impl AlertWindows {
    /// 已配置窗口对应的限值组使能位集合。
    pub fn limit_mask(&self) -> u16 {
        let mut mask = 0;
        if self.vin_uv.is_some() {
            mask |= limit::VIN_LO | limit::VIN_HI;
        }
        if self.vsys_uv.is_some() {
            mask |= limit::VSYS_LO | limit::VSYS_HI;
        }
        if self.vbat_cell_uv.is_some() {
            mask |= limit::VBAT_LO | limit::VBAT_HI;
        }
        if self.ntc_ratio.is_some() {
            mask |= limit::NTC_RATIO_LO | limit::NTC_RATIO_HI;
        }
        mask
    }
}

/// 一次排空得到的三组锁存快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertSnapshot {
    pub limit: u16,
    pub charger_state: u16,
    pub charge_status: u16,
}

impl AlertSnapshot {
    /// 是否存在任一置位。
    pub fn any(&self) -> bool {
        self.limit != 0 || self.charger_state != 0 || self.charge_status != 0
    }
}

/// 期望的三组告警使能。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DesiredEnables {
    pub limit: u16,
    pub charger_state: u16,
    pub charge_status: u16,
}

/// 参与窗口判定的遥测读数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowReadings {
    pub vin_uv: i64,
    pub vsys_uv: i64,
    pub vbat_cell_uv: i64,
    pub ntc_ratio: i64,
}

/// 按读数位置挑选窗口单侧的使能位。
fn pick_sides(value: i64, window: Window, lo_bit: u16, hi_bit: u16) -> u16 {
    if value >= window.hi {
        lo_bit
    } else if value <= window.lo {
        hi_bit
    } else {
        lo_bit | hi_bit
    }
}

/// 对边重武装：计算应写入的三组使能掩码。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 仅调整 `desired.limit` 中已配置窗口的使能对，其余位原样保留；
///   - 输出已剔除 `asserted` 中仍在断言的位；
///   - 相同遥测读数下重复调用的结果一致（幂等律，见测试）；
/// - **风险 (Trade-offs)**：窗口退化（`lo ≥ hi`）时按同一规则判定，永远
///   落在单侧分支，不会产生两侧同时关闭以外的异常形态。
pub fn rearm_opposite_edges(
    windows: &AlertWindows,
    readings: &WindowReadings,
    desired: &DesiredEnables,
    asserted: &AlertSnapshot,
) -> DesiredEnables {
    let mut limit_mask = desired.limit;

    let pairs = [
        (windows.vin_uv, readings.vin_uv, limit::VIN_LO, limit::VIN_HI),
        (
            windows.vsys_uv,
            readings.vsys_uv,
            limit::VSYS_LO,
            limit::VSYS_HI,
        ),
        (
            windows.vbat_cell_uv,
            readings.vbat_cell_uv,
            limit::VBAT_LO,
            limit::VBAT_HI,
        ),
        (
            windows.ntc_ratio,
            readings.ntc_ratio,
            limit::NTC_RATIO_LO,
            limit::NTC_RATIO_HI,
        ),
    ];
    for (window, value, lo_bit, hi_bit) in pairs {
        let Some(window) = window else { continue };
        let pair = lo_bit | hi_bit;
        let selected = pick_sides(value, window, lo_bit, hi_bit);
        limit_mask = (limit_mask & !pair) | (selected & desired.limit & pair);
    }

    DesiredEnables {
        limit: limit_mask & !asserted.limit,
        charger_state: desired.charger_state & !asserted.charger_state,
        charge_status: desired.charge_status & !asserted.charge_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows() -> AlertWindows {
        AlertWindows {
            vin_uv: Some(Window {
                lo: 9_000_000,
                hi: 15_000_000,
            }),
            vbat_cell_uv: Some(Window {
                lo: 3_000_000,
                hi: 4_250_000,
            }),
            ..AlertWindows::default()
        }
    }

    fn desired() -> DesiredEnables {
        DesiredEnables {
            limit: windows().limit_mask(),
            charger_state: crate::regs::charger_state::FAULTS,
            charge_status: 0,
        }
    }

    fn readings(vin_uv: i64) -> WindowReadings {
        WindowReadings {
            vin_uv,
            vsys_uv: 0,
            vbat_cell_uv: 3_700_000,
            ntc_ratio: 0,
        }
    }

    #[test]
    fn inside_window_arms_both_sides() {
        let out = rearm_opposite_edges(
            &windows(),
            &readings(12_000_000),
            &desired(),
            &AlertSnapshot::default(),
        );
        assert_eq!(out.limit & (limit::VIN_LO | limit::VIN_HI), limit::VIN_LO | limit::VIN_HI);
        assert_eq!(out.limit & (limit::VBAT_LO | limit::VBAT_HI), limit::VBAT_LO | limit::VBAT_HI);
    }

    #[test]
    fn above_high_keeps_only_low_side() {
        let out = rearm_opposite_edges(
            &windows(),
            &readings(16_000_000),
            &desired(),
            &AlertSnapshot::default(),
        );
        assert_eq!(out.limit & (limit::VIN_LO | limit::VIN_HI), limit::VIN_LO);
    }

    #[test]
    fn below_low_keeps_only_high_side() {
        let out = rearm_opposite_edges(
            &windows(),
            &readings(8_000_000),
            &desired(),
            &AlertSnapshot::default(),
        );
        assert_eq!(out.limit & (limit::VIN_LO | limit::VIN_HI), limit::VIN_HI);
    }

    #[test]
    fn asserted_bits_are_stripped_across_groups() {
        let asserted = AlertSnapshot {
            limit: limit::VIN_LO,
            charger_state: crate::regs::charger_state::BAT_MISSING_FAULT,
            charge_status: 0,
        };
        let out = rearm_opposite_edges(&windows(), &readings(8_000_000), &desired(), &asserted);
        assert_eq!(out.limit & limit::VIN_LO, 0);
        assert_eq!(
            out.charger_state & crate::regs::charger_state::BAT_MISSING_FAULT,
            0
        );
        assert_ne!(
            out.charger_state & crate::regs::charger_state::BAT_SHORT_FAULT,
            0
        );
    }

    #[test]
    fn rearm_is_idempotent_for_equal_readings() {
        let readings = readings(16_000_000);
        let asserted = AlertSnapshot {
            limit: limit::VBAT_HI,
            ..AlertSnapshot::default()
        };
        let first = rearm_opposite_edges(&windows(), &readings, &desired(), &asserted);
        let second = rearm_opposite_edges(&windows(), &readings, &desired(), &asserted);
        assert_eq!(first, second);
    }

    #[test]
    fn unconfigured_windows_keep_foreign_bits_untouched() {
        let mut desired = desired();
        desired.limit |= limit::DIE_TEMP_HI;
        let out = rearm_opposite_edges(
            &windows(),
            &readings(12_000_000),
            &desired,
            &AlertSnapshot::default(),
        );
        assert_ne!(out.limit & limit::DIE_TEMP_HI, 0);
    }
}
