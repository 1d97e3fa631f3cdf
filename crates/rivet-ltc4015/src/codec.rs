//! # 定点编解码
//!
//! ## 核心意图（Why）
//! - 芯片的全部物理量都是 16 位定点码，比例由化学体系与检测电阻参数化；
//!   这里集中所有换算，驱动与适配器不散落魔法常数；
//! - 全程整数运算：微伏/微安/毫摄氏度的定点域远在 `i64` 之内，不引入浮点
//!   舍入的不可复现性。
//!
//! ## 取整约定（What）
//! - 解码按声明公式计算，除法取最近值；编码为解码的逆映射，采用半步取整
//!   后钳制到码域；
//! - 往返律：域内任意物理量 `decode(encode(x))` 与 `x` 的偏差不超过一个
//!   LSB（性质测试覆盖）。

use crate::chem::{ChemFamily, ChargeProfile, Chemistry};

/// VIN/VSYS 每 LSB 的微伏数。
pub const VIN_VSYS_UV_PER_LSB: i64 = 1_648;
/// 电流换算分子：每 LSB 1.46487 µV 的检测压降，放大 1e6 以保持整数。
pub const CURRENT_UV_SCALE: i64 = 1_464_870;
/// 芯片结温的偏置与斜率：`milli_C = (raw − 12010) × 10000 / 456`。
pub const DIE_TEMP_OFFSET: i64 = 12_010;
pub const DIE_TEMP_NUM: i64 = 10_000;
pub const DIE_TEMP_DEN: i64 = 456;
/// 输入限流步长：每码 500 µV 检测压降。
pub const IIN_LIMIT_STEP_UV: i64 = 500;
/// VIN_UVCL 步长：4.6875 mV = 9375/2 µV。
pub const VIN_UVCL_STEP_HALF_UV: i64 = 9_375;
/// 充电电流目标步长：每码 1 mV 检测压降。
pub const ICHARGE_STEP_UV: i64 = 1_000;

const IIN_LIMIT_CODE_MAX: i64 = 63;
const VIN_UVCL_CODE_MAX: i64 = 255;
const ICHARGE_CODE_MAX: i64 = 31;
const VCHARGE_LI_CODE_MAX: i64 = 31;
const VCHARGE_PB_CODE_MAX: i64 = 63;
/// 铅酸启用温度补偿时的电压码上限。
pub const VCHARGE_PB_TEMP_COMP_CAP: i64 = 35;

/// 四舍五入的带符号整除。
fn div_round(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    if n >= 0 { (n + d / 2) / d } else { -((-n + d / 2) / d) }
}

fn clamp_code(code: i64, max: i64) -> u16 {
    code.clamp(0, max) as u16
}

// —— 电池电压（每节） ——

/// VBAT 码 → 每节微伏。
pub fn vbat_cell_uv(chem: Chemistry, raw: u16) -> i64 {
    div_round(i64::from(raw) * chem.vbat_nv_per_lsb(), 1_000)
}

/// 每节微伏 → VBAT 码（半 LSB 取整）。
pub fn vbat_raw(chem: Chemistry, cell_uv: i64) -> u16 {
    clamp_code(div_round(cell_uv * 1_000, chem.vbat_nv_per_lsb()), 0xFFFF as i64)
}

// —— 输入/系统电压 ——

/// VIN/VSYS 码 → 微伏。
pub fn vin_uv(raw: u16) -> i64 {
    i64::from(raw) * VIN_VSYS_UV_PER_LSB
}

/// 微伏 → VIN/VSYS 码。
pub fn vin_raw(uv: i64) -> u16 {
    clamp_code(div_round(uv, VIN_VSYS_UV_PER_LSB), 0xFFFF as i64)
}

// —— 电流（带符号） ——

/// 电流码 → 微安；`r_uohm` 为对应方向的检测电阻。
pub fn current_ua(raw: u16, r_uohm: i64) -> i64 {
    div_round(i64::from(raw as i16) * CURRENT_UV_SCALE, r_uohm)
}

/// 微安 → 电流码。
pub fn current_raw(ua: i64, r_uohm: i64) -> u16 {
    let code = div_round(ua * r_uohm, CURRENT_UV_SCALE);
    code.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16 as u16
}

/// 电池电流码 → 微安。
pub fn ibat_ua(profile: &ChargeProfile, raw: u16) -> i64 {
    current_ua(raw, profile.r_snsb_uohm)
}

/// 输入电流码 → 微安。
pub fn iin_ua(profile: &ChargeProfile, raw: u16) -> i64 {
    current_ua(raw, profile.r_snsi_uohm)
}

// —— 结温 ——

/// 结温码 → 毫摄氏度。
pub fn die_temp_mc(raw: u16) -> i64 {
    div_round((i64::from(raw) - DIE_TEMP_OFFSET) * DIE_TEMP_NUM, DIE_TEMP_DEN)
}

/// 毫摄氏度 → 结温码（窗口限值编码用）。
pub fn die_temp_raw(mc: i64) -> u16 {
    clamp_code(DIE_TEMP_OFFSET + div_round(mc * DIE_TEMP_DEN, DIE_TEMP_NUM), 0xFFFF as i64)
}

// —— 电池内阻 ——

/// BSR 码 → 每节微欧。
pub fn bsr_uohm(profile: &ChargeProfile, raw: u16) -> i64 {
    div_round(
        i64::from(raw) * profile.r_snsb_uohm,
        profile.chemistry.bsr_divisor(),
    )
}

// —— 输入限流 ——

/// IIN_LIMIT 码 → 微安：`(code + 1) × 500 µV / R_snsi`。
pub fn iin_limit_ua(profile: &ChargeProfile, code: u16) -> i64 {
    div_round(
        (i64::from(code) + 1) * IIN_LIMIT_STEP_UV * 1_000_000,
        profile.r_snsi_uohm,
    )
}

/// 微安 → IIN_LIMIT 码（半步取整，钳制 6 位码域）。
pub fn iin_limit_code(profile: &ChargeProfile, ua: i64) -> u16 {
    let code = div_round(ua * profile.r_snsi_uohm, IIN_LIMIT_STEP_UV * 1_000_000) - 1;
    clamp_code(code, IIN_LIMIT_CODE_MAX)
}

// —— 输入欠压限制 ——

/// VIN_UVCL 码 → 微伏：`(code + 1) × 4.6875 mV`。
pub fn vin_uvcl_uv(code: u16) -> i64 {
    div_round((i64::from(code) + 1) * VIN_UVCL_STEP_HALF_UV, 2)
}

/// 微伏 → VIN_UVCL 码。
pub fn vin_uvcl_code(uv: i64) -> u16 {
    let code = div_round(uv * 2, VIN_UVCL_STEP_HALF_UV) - 1;
    clamp_code(code, VIN_UVCL_CODE_MAX)
}

// —— 充电电流目标 ——

/// ICHARGE 码 → 微安：`(code + 1) × 1 mV / R_snsb`。
pub fn icharge_ua(profile: &ChargeProfile, code: u16) -> i64 {
    div_round(
        (i64::from(code) + 1) * ICHARGE_STEP_UV * 1_000_000,
        profile.r_snsb_uohm,
    )
}

/// 微安 → ICHARGE 码。
pub fn icharge_code(profile: &ChargeProfile, ua: i64) -> u16 {
    let code = div_round(ua * profile.r_snsb_uohm, ICHARGE_STEP_UV * 1_000_000) - 1;
    clamp_code(code, ICHARGE_CODE_MAX)
}

// —— 充电电压目标 ——

/// VCHARGE 码 → 每节微伏。
pub fn vcharge_cell_uv(chem: Chemistry, code: u16) -> i64 {
    match chem.family() {
        ChemFamily::LiIon => 3_812_500 + i64::from(code) * 12_500,
        ChemFamily::LiFePo4 => 3_412_500 + i64::from(code) * 12_500,
        // 铅酸：2 V + code/105 V。
        ChemFamily::LeadAcid => 2_000_000 + div_round(i64::from(code) * 1_000_000, 105),
    }
}

/// 每节毫伏 → VCHARGE 码；铅酸在启用温度补偿时钳制到 35。
pub fn vcharge_code(chem: Chemistry, cell_mv: i64, temp_comp: bool) -> u16 {
    match chem.family() {
        ChemFamily::LiIon => {
            clamp_code(div_round(cell_mv * 1_000 - 3_812_500, 12_500), VCHARGE_LI_CODE_MAX)
        }
        ChemFamily::LiFePo4 => {
            clamp_code(div_round(cell_mv * 1_000 - 3_412_500, 12_500), VCHARGE_LI_CODE_MAX)
        }
        ChemFamily::LeadAcid => {
            let cap = if temp_comp {
                VCHARGE_PB_TEMP_COMP_CAP
            } else {
                VCHARGE_PB_CODE_MAX
            };
            clamp_code(div_round(105 * (cell_mv - 2_000), 1_000), cap)
        }
    }
}
