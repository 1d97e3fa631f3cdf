//! # 化学体系与充电档案
//!
//! ## 核心意图（Why）
//! - 定点编解码的全部比例常数都由化学体系与检测电阻决定：每节电压 LSB、
//!   BSR 除数、充电电压基准都随体系变化；
//! - 芯片的实际体系由管脚绑定决定并通过 `CHEM_CELLS` 上报，配置声明必须与
//!   之交叉核对——绑定不符属于致命配置错误，不允许带病运行。
//!
//! ## 契约说明（What）
//! - [`Chemistry::from_code`] 解码 `CHEM_CELLS` 的体系字段；
//! - [`ChargeProfile::validate`] 约束节数（锂 1–8、铅酸 ∈ {3, 6, 12}）与
//!   非零检测电阻；
//! - 固定参数变体（出厂锁定充电目标）拒绝目标写入，见
//!   [`Chemistry::targets_writable`]。

use rivet_core::CoreError;

/// 化学体系家族（配置声明用）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChemFamily {
    LiIon,
    LiFePo4,
    LeadAcid,
}

impl ChemFamily {
    /// 由配置参数文本解析。
    pub fn from_param(text: &str) -> Result<Self, CoreError> {
        Ok(match text {
            "liion" | "li_ion" => ChemFamily::LiIon,
            "lifepo4" => ChemFamily::LiFePo4,
            "leadacid" | "lead_acid" => ChemFamily::LeadAcid,
            _ => {
                return Err(CoreError::invalid_params(
                    "chem must be one of `liion`, `lifepo4`, `lead_acid`",
                ));
            }
        })
    }
}

/// 芯片上报的具体化学变体（`CHEM_CELLS` 体系字段）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chemistry {
    /// 锂离子，目标可编程。
    LiIonProgrammable,
    /// 锂离子，固定 4.2 V/节。
    LiIonFixed42,
    /// 锂离子，固定 4.1 V/节。
    LiIonFixed41,
    /// 锂离子，固定 4.0 V/节。
    LiIonFixed40,
    /// 磷酸铁锂，目标可编程。
    LiFePo4Programmable,
    /// 磷酸铁锂，固定快充档。
    LiFePo4FixedFast,
    /// 磷酸铁锂，固定档。
    LiFePo4Fixed,
    /// 铅酸，固定档。
    LeadAcidFixed,
    /// 铅酸，目标可编程。
    LeadAcidProgrammable,
}

impl Chemistry {
    /// 解码 `CHEM_CELLS` 体系字段。
    pub fn from_code(code: u16) -> Result<Self, CoreError> {
        Ok(match code {
            0 => Chemistry::LiIonProgrammable,
            1 => Chemistry::LiIonFixed42,
            2 => Chemistry::LiIonFixed41,
            3 => Chemistry::LiIonFixed40,
            4 => Chemistry::LiFePo4Programmable,
            5 => Chemistry::LiFePo4FixedFast,
            6 => Chemistry::LiFePo4Fixed,
            7 => Chemistry::LeadAcidFixed,
            8 => Chemistry::LeadAcidProgrammable,
            other => {
                return Err(CoreError::device(
                    "strapping_mismatch",
                    format!("reserved chemistry code {other}"),
                ));
            }
        })
    }

    /// 所属家族。
    pub fn family(&self) -> ChemFamily {
        match self {
            Chemistry::LiIonProgrammable
            | Chemistry::LiIonFixed42
            | Chemistry::LiIonFixed41
            | Chemistry::LiIonFixed40 => ChemFamily::LiIon,
            Chemistry::LiFePo4Programmable
            | Chemistry::LiFePo4FixedFast
            | Chemistry::LiFePo4Fixed => ChemFamily::LiFePo4,
            Chemistry::LeadAcidFixed | Chemistry::LeadAcidProgrammable => ChemFamily::LeadAcid,
        }
    }

    /// 是否为锂系（决定电压 LSB 与 BSR 除数）。
    pub fn is_lithium(&self) -> bool {
        !matches!(self.family(), ChemFamily::LeadAcid)
    }

    /// 充电目标是否可编程。
    pub fn targets_writable(&self) -> bool {
        matches!(
            self,
            Chemistry::LiIonProgrammable
                | Chemistry::LiFePo4Programmable
                | Chemistry::LeadAcidProgrammable
        )
    }

    /// 每节电池电压 LSB（纳伏）。
    pub fn vbat_nv_per_lsb(&self) -> i64 {
        if self.is_lithium() { 192_264 } else { 128_176 }
    }

    /// BSR 换算除数。
    pub fn bsr_divisor(&self) -> i64 {
        if self.is_lithium() { 500 } else { 750 }
    }
}

/// 充电档案：体系、节数与两只检测电阻。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChargeProfile {
    pub chemistry: Chemistry,
    pub cells: u8,
    /// 电池侧检测电阻（µΩ）。
    pub r_snsb_uohm: i64,
    /// 输入侧检测电阻（µΩ）。
    pub r_snsi_uohm: i64,
}

impl ChargeProfile {
    /// 校验节数与检测电阻的取值域。
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.chemistry.family() {
            ChemFamily::LiIon | ChemFamily::LiFePo4 => {
                if !(1..=8).contains(&self.cells) {
                    return Err(CoreError::invalid_params(
                        "lithium packs take 1 to 8 cells",
                    ));
                }
            }
            ChemFamily::LeadAcid => {
                if ![3, 6, 12].contains(&self.cells) {
                    return Err(CoreError::invalid_params(
                        "lead-acid packs take 3, 6 or 12 cells",
                    ));
                }
            }
        }
        if self.r_snsb_uohm <= 0 || self.r_snsi_uohm <= 0 {
            return Err(CoreError::invalid_params(
                "sense resistors must be positive micro-ohm values",
            ));
        }
        Ok(())
    }

    /// 对照芯片上报的体系与节数做绑定核对。
    pub fn cross_check(&self, reported: Chemistry, reported_cells: u8) -> Result<(), CoreError> {
        if reported.family() != self.chemistry.family() {
            return Err(CoreError::device(
                "strapping_mismatch",
                format!(
                    "declared {:?} but the chip straps report {:?}",
                    self.chemistry.family(),
                    reported.family()
                ),
            ));
        }
        if reported_cells != self.cells {
            return Err(CoreError::device(
                "strapping_mismatch",
                format!(
                    "declared {} cells but the chip straps report {reported_cells}",
                    self.cells
                ),
            ));
        }
        Ok(())
    }
}

/// 拆解 `CHEM_CELLS` 寄存器值。
pub fn decode_chem_cells(raw: u16) -> Result<(Chemistry, u8), CoreError> {
    use crate::regs::{CHEM_CELLS_CHEM_MASK, CHEM_CELLS_CHEM_SHIFT, CHEM_CELLS_COUNT_MASK};
    let chem = Chemistry::from_code((raw & CHEM_CELLS_CHEM_MASK) >> CHEM_CELLS_CHEM_SHIFT)?;
    let cells = (raw & CHEM_CELLS_COUNT_MASK) as u8;
    Ok((chem, cells))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(chemistry: Chemistry, cells: u8) -> ChargeProfile {
        ChargeProfile {
            chemistry,
            cells,
            r_snsb_uohm: 4_000,
            r_snsi_uohm: 3_000,
        }
    }

    #[test]
    fn cell_count_domains() {
        assert!(profile(Chemistry::LiIonProgrammable, 8).validate().is_ok());
        assert!(profile(Chemistry::LiIonProgrammable, 9).validate().is_err());
        assert!(profile(Chemistry::LeadAcidProgrammable, 6).validate().is_ok());
        assert!(profile(Chemistry::LeadAcidProgrammable, 4).validate().is_err());
    }

    #[test]
    fn cross_check_rejects_family_mismatch() {
        let declared = profile(Chemistry::LiIonProgrammable, 4);
        let err = declared
            .cross_check(Chemistry::LeadAcidFixed, 4)
            .unwrap_err();
        assert_eq!(err.code(), "strapping_mismatch");
    }

    #[test]
    fn chem_cells_decode() {
        // 体系 4（LiFePO4 可编程）、4 节。
        let (chem, cells) = decode_chem_cells(0x0404).unwrap();
        assert_eq!(chem, Chemistry::LiFePo4Programmable);
        assert_eq!(cells, 4);
        assert!(Chemistry::from_code(9).is_err());
    }

    #[test]
    fn fixed_variants_refuse_target_writes() {
        assert!(Chemistry::LiIonProgrammable.targets_writable());
        assert!(!Chemistry::LiIonFixed42.targets_writable());
        assert!(!Chemistry::LeadAcidFixed.targets_writable());
    }
}
