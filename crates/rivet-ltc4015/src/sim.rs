//! # 带锁存语义的寄存器模型（feature = "sim"）
//!
//! ## 定位（Why）
//! - 告警协议的难点全在时序：锁存、使能、ARA 认领与告警线的释放/重断言。
//!   本模型在仿真 I²C 总线上复刻这些语义，让驱动与适配器测试不依赖硬件；
//! - 测试通过“持续条件”（sticky condition）模拟真实世界里清除锁存后立即
//!   重新越限的场景，从而驱动对边重武装与重试路径。
//!
//! ## 行为（What）
//! - 读写走低字节在前的 16 位寄存器；
//! - 告警线电平 = 非（存在使能的锁存位）且未被 ARA 暂时释放；
//! - 对锁存寄存器写零清除后，仍为真的持续条件若其使能位尚在，会立即重新
//!   锁存——与比较器持续触发的硬件行为一致。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rivet_core::platform::PlatformError;
use rivet_core::sim::SimI2cDevice;

use crate::regs;

/// 告警线电平回调（`true` = 高电平 / 空闲）。
pub type LineCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct ModelState {
    regs: HashMap<u8, u16>,
    /// 当前为真的持续条件（限值组）。
    sticky_limit: u16,
    sticky_charger_state: u16,
    sticky_charge_status: u16,
    /// ARA 认领后、下一次事件前，告警线暂时释放。
    ara_released: bool,
    line: Option<LineCallback>,
}

impl ModelState {
    fn reg(&self, reg: u8) -> u16 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn asserted(&self) -> bool {
        (self.reg(regs::LIMIT_ALERTS) & self.reg(regs::EN_LIMIT_ALERTS) != 0)
            || (self.reg(regs::CHARGER_STATE_ALERTS) & self.reg(regs::EN_CHARGER_STATE_ALERTS)
                != 0)
            || (self.reg(regs::CHARGE_STATUS_ALERTS) & self.reg(regs::EN_CHARGE_STATUS_ALERTS)
                != 0)
    }

    fn line_level(&self) -> bool {
        !(self.asserted() && !self.ara_released)
    }

    fn notify_line(&self) {
        if let Some(line) = &self.line {
            line(self.line_level());
        }
    }

    /// 清除锁存后，持续条件立即重新锁存（受使能门控）。
    fn relatch_from_sticky(&mut self) {
        let limit = self.reg(regs::LIMIT_ALERTS)
            | (self.sticky_limit & self.reg(regs::EN_LIMIT_ALERTS));
        let state = self.reg(regs::CHARGER_STATE_ALERTS)
            | (self.sticky_charger_state & self.reg(regs::EN_CHARGER_STATE_ALERTS));
        let status = self.reg(regs::CHARGE_STATUS_ALERTS)
            | (self.sticky_charge_status & self.reg(regs::EN_CHARGE_STATUS_ALERTS));
        self.regs.insert(regs::LIMIT_ALERTS, limit);
        self.regs.insert(regs::CHARGER_STATE_ALERTS, state);
        self.regs.insert(regs::CHARGE_STATUS_ALERTS, status);
    }
}

/// LTC4015 寄存器模型。
pub struct SimLtc4015 {
    addr: u8,
    state: Mutex<ModelState>,
}

impl SimLtc4015 {
    /// 以器件地址、体系码与节数构造模型。
    pub fn new(addr: u8, chem_code: u16, cells: u8) -> Arc<Self> {
        let mut regs_map = HashMap::new();
        regs_map.insert(
            regs::CHEM_CELLS,
            (chem_code << regs::CHEM_CELLS_CHEM_SHIFT) | u16::from(cells),
        );
        regs_map.insert(regs::MEAS_SYS_VALID, 1);
        Arc::new(Self {
            addr,
            state: Mutex::new(ModelState {
                regs: regs_map,
                sticky_limit: 0,
                sticky_charger_state: 0,
                sticky_charge_status: 0,
                ara_released: false,
                line: None,
            }),
        })
    }

    /// 挂接告警线回调并立即上报当前电平。
    pub fn on_alert_line(&self, line: LineCallback) {
        let mut state = self.state.lock();
        state.line = Some(line);
        state.notify_line();
    }

    /// 测试旁路：直接设置寄存器（遥测预置等）。
    pub fn set_reg(&self, reg: u8, value: u16) {
        self.state.lock().regs.insert(reg, value);
    }

    /// 测试旁路：读取寄存器。
    pub fn reg(&self, reg: u8) -> u16 {
        self.state.lock().reg(reg)
    }

    /// 置入一个限值组持续条件：锁存、保持为真并重新评估告警线。
    pub fn raise_limit_condition(&self, bits: u16) {
        let mut state = self.state.lock();
        state.sticky_limit |= bits;
        let latched = state.reg(regs::LIMIT_ALERTS) | bits;
        state.regs.insert(regs::LIMIT_ALERTS, latched);
        state.ara_released = false;
        state.notify_line();
    }

    /// 撤销限值组持续条件（条件消失，但已锁存位保留直到被清除）。
    pub fn clear_limit_condition(&self, bits: u16) {
        let mut state = self.state.lock();
        state.sticky_limit &= !bits;
        state.notify_line();
    }

    /// 置入充电状态组的瞬时事件（如电池移除）。
    pub fn pulse_charger_state(&self, bits: u16) {
        let mut state = self.state.lock();
        let latched = state.reg(regs::CHARGER_STATE_ALERTS) | bits;
        state.regs.insert(regs::CHARGER_STATE_ALERTS, latched);
        state.ara_released = false;
        state.notify_line();
    }

    /// 当前告警线电平。
    pub fn line_level(&self) -> bool {
        self.state.lock().line_level()
    }
}

impl SimI2cDevice for SimLtc4015 {
    fn transfer(&self, addr: u8, wr: &[u8], rd: &mut [u8]) -> Result<(), PlatformError> {
        let mut state = self.state.lock();

        if addr == regs::ARA_ADDR {
            // 告警响应：仅在告警断言时应答；认领后释放告警线直到下一事件。
            if rd.len() != 1 || !wr.is_empty() {
                return Err(PlatformError::Io("malformed alert response read".into()));
            }
            if state.line_level() {
                return Err(PlatformError::Io("no responder on the alert line".into()));
            }
            rd[0] = (self.addr << 1) | 1;
            state.ara_released = true;
            state.notify_line();
            return Ok(());
        }

        match (wr.len(), rd.len()) {
            // 寄存器读：write(reg) + read(2)。
            (1, 2) => {
                let value = state.reg(wr[0]);
                rd.copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            // 寄存器写：write(reg, lo, hi)。
            (3, 0) => {
                let reg = wr[0];
                let value = u16::from_le_bytes([wr[1], wr[2]]);
                state.regs.insert(reg, value);
                let latch_or_enable = matches!(
                    reg,
                    regs::LIMIT_ALERTS
                        | regs::CHARGER_STATE_ALERTS
                        | regs::CHARGE_STATUS_ALERTS
                        | regs::EN_LIMIT_ALERTS
                        | regs::EN_CHARGER_STATE_ALERTS
                        | regs::EN_CHARGE_STATUS_ALERTS
                );
                if latch_or_enable {
                    state.relatch_from_sticky();
                    state.ara_released = false;
                    state.notify_line();
                }
                Ok(())
            }
            _ => Err(PlatformError::Io("unsupported transfer shape".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::limit;

    #[test]
    fn line_follows_latch_and_enable() {
        let model = SimLtc4015::new(regs::DEFAULT_ADDR, 0, 4);
        assert!(model.line_level(), "idle line is high");

        // 未使能的锁存不拉低告警线。
        model.raise_limit_condition(limit::VIN_LO);
        assert!(model.line_level());

        model.set_reg(regs::EN_LIMIT_ALERTS, limit::VIN_LO);
        model.raise_limit_condition(limit::VIN_LO);
        assert!(!model.line_level());
    }

    #[test]
    fn clearing_latch_relatches_while_condition_holds() {
        let model = SimLtc4015::new(regs::DEFAULT_ADDR, 0, 4);
        model.set_reg(regs::EN_LIMIT_ALERTS, limit::VIN_LO);
        model.raise_limit_condition(limit::VIN_LO);

        // 直接写零清除：条件仍然为真，立即重新锁存。
        let wr = [regs::LIMIT_ALERTS, 0, 0];
        model.transfer(regs::DEFAULT_ADDR, &wr, &mut []).unwrap();
        assert_eq!(model.reg(regs::LIMIT_ALERTS), limit::VIN_LO);

        // 条件消失后再清除，锁存保持为零。
        model.clear_limit_condition(limit::VIN_LO);
        model.transfer(regs::DEFAULT_ADDR, &wr, &mut []).unwrap();
        assert_eq!(model.reg(regs::LIMIT_ALERTS), 0);
        assert!(model.line_level());
    }

    #[test]
    fn ara_claims_and_releases_the_line() {
        let model = SimLtc4015::new(regs::DEFAULT_ADDR, 0, 4);
        model.set_reg(regs::EN_LIMIT_ALERTS, limit::VIN_LO);
        model.raise_limit_condition(limit::VIN_LO);
        assert!(!model.line_level());

        let mut rd = [0u8; 1];
        model.transfer(regs::ARA_ADDR, &[], &mut rd).unwrap();
        assert_eq!(rd[0] >> 1, regs::DEFAULT_ADDR);
        assert!(model.line_level(), "line releases after a claimed ARA");

        // 无断言时 ARA 无应答。
        let err = model.transfer(regs::ARA_ADDR, &[], &mut rd).unwrap_err();
        assert!(matches!(err, PlatformError::Io(_)));
    }
}
