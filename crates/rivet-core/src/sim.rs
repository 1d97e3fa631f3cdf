//! # 进程内仿真平台（feature = "sim"）
//!
//! ## 定位（Why）
//! - 集成测试与演示程序需要在无硬件环境下驱动完整运行时：本模块提供三组
//!   门面的内存实现，行为语义（独占申领、边沿中断、读取截止）与真实平台
//!   绑定一致；
//! - 测试侧通过 [`SimPlatform`] 的旁路句柄注入激励：驱动引脚电平、注入
//!   串口字节、挂接 I²C 寄存器模型。
//!
//! ## 边界（What）
//! - 仅在启用 `sim` 特性时编译；生产装配不链接本模块。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::ctl::OpContext;
use crate::platform::{
    GpioPin, GpioProvider, I2cBus, I2cProvider, IrqEdge, IrqHandler, PinMode, PlatformError,
    PlatformHandles, UartFormat, UartParity, UartPort, UartProvider,
};

/// 仿真 I²C 设备：按地址挂接到仿真总线的寄存器模型。
///
/// 模型同时拿到目标地址，便于单个模型服务多个地址（如同时应答自身地址与
/// SMBus 告警响应地址）。
pub trait SimI2cDevice: Send + Sync {
    fn transfer(&self, addr: u8, wr: &[u8], rd: &mut [u8]) -> Result<(), PlatformError>;
}

#[derive(Default)]
struct SimI2cBusState {
    devices: Mutex<HashMap<u8, Arc<dyn SimI2cDevice>>>,
}

/// 仿真 I²C 总线句柄（测试旁路）。
#[derive(Clone, Default)]
pub struct SimI2cBusHandle {
    state: Arc<SimI2cBusState>,
}

impl SimI2cBusHandle {
    /// 将寄存器模型挂到给定地址。
    pub fn attach(&self, addr: u8, device: Arc<dyn SimI2cDevice>) {
        self.state.devices.lock().insert(addr, device);
    }

    /// 摘除给定地址的模型（模拟器件脱落，后续事务 NACK）。
    pub fn detach(&self, addr: u8) {
        self.state.devices.lock().remove(&addr);
    }
}

struct SimI2cBusPort {
    state: Arc<SimI2cBusState>,
}

#[async_trait]
impl I2cBus for SimI2cBusPort {
    async fn transfer(&self, addr: u8, wr: &[u8], rd: &mut [u8]) -> Result<(), PlatformError> {
        let device = self.state.devices.lock().get(&addr).cloned();
        match device {
            Some(device) => device.transfer(addr, wr, rd),
            None => Err(PlatformError::Io(format!("nack from address {addr:#04x}"))),
        }
    }
}

#[derive(Default)]
struct SimI2cProviderState {
    buses: Mutex<HashMap<String, Arc<SimI2cBusState>>>,
}

struct SimI2cProviderImpl {
    state: Arc<SimI2cProviderState>,
}

impl I2cProvider for SimI2cProviderImpl {
    fn by_id(&self, id: &str) -> Result<Arc<dyn I2cBus>, PlatformError> {
        let state = self
            .state
            .buses
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownBus(id.to_owned()))?;
        Ok(Arc::new(SimI2cBusPort { state }))
    }
}

struct SimPinState {
    level: AtomicBool,
    mode: Mutex<Option<PinMode>>,
    irq: Mutex<Option<(IrqEdge, IrqHandler)>>,
}

impl SimPinState {
    fn new(initial: bool) -> Self {
        Self {
            level: AtomicBool::new(initial),
            mode: Mutex::new(None),
            irq: Mutex::new(None),
        }
    }

    fn drive(&self, level: bool) {
        let prev = self.level.swap(level, Ordering::AcqRel);
        if prev == level {
            return;
        }
        // 先拷出处理器再调用，避免在持锁状态下进入用户代码。
        let handler = {
            let irq = self.irq.lock();
            irq.as_ref().and_then(|(edge, handler)| {
                let fire = match edge {
                    IrqEdge::None => false,
                    IrqEdge::Rising => level,
                    IrqEdge::Falling => !level,
                    IrqEdge::Both => true,
                };
                fire.then(|| Arc::clone(handler))
            })
        };
        if let Some(handler) = handler {
            handler(level);
        }
    }
}

struct SimPinPort {
    state: Arc<SimPinState>,
}

impl GpioPin for SimPinPort {
    fn configure(&self, mode: PinMode) -> Result<(), PlatformError> {
        if let PinMode::Output { initial } = mode {
            self.state.level.store(initial, Ordering::Release);
        }
        *self.state.mode.lock() = Some(mode);
        Ok(())
    }

    fn get(&self) -> Result<bool, PlatformError> {
        Ok(self.state.level.load(Ordering::Acquire))
    }

    fn set(&self, level: bool) -> Result<(), PlatformError> {
        self.state.drive(level);
        Ok(())
    }

    fn toggle(&self) -> Result<(), PlatformError> {
        let current = self.state.level.load(Ordering::Acquire);
        self.state.drive(!current);
        Ok(())
    }

    fn set_irq(&self, edge: IrqEdge, handler: IrqHandler) -> Result<(), PlatformError> {
        *self.state.irq.lock() = Some((edge, handler));
        Ok(())
    }

    fn clear_irq(&self) -> Result<(), PlatformError> {
        *self.state.irq.lock() = None;
        Ok(())
    }
}

#[derive(Default)]
struct SimGpioProviderState {
    pins: Mutex<HashMap<u32, Arc<SimPinState>>>,
    claimed: Mutex<HashSet<u32>>,
}

struct SimGpioProviderImpl {
    state: Arc<SimGpioProviderState>,
}

impl GpioProvider for SimGpioProviderImpl {
    fn claim(&self, pin: u32) -> Result<Arc<dyn GpioPin>, PlatformError> {
        let pins = self.state.pins.lock();
        let state = pins
            .get(&pin)
            .cloned()
            .ok_or(PlatformError::UnknownPin(pin))?;
        let mut claimed = self.state.claimed.lock();
        if !claimed.insert(pin) {
            return Err(PlatformError::PinInUse(pin));
        }
        Ok(Arc::new(SimPinPort { state }))
    }

    fn release(&self, pin: u32) {
        self.state.claimed.lock().remove(&pin);
    }
}

struct SimUartState {
    rx: Mutex<VecDeque<u8>>,
    rx_notify: Notify,
    tx: Mutex<Vec<u8>>,
    baud: Mutex<u32>,
    format: Mutex<UartFormat>,
}

impl Default for SimUartState {
    fn default() -> Self {
        Self {
            rx: Mutex::new(VecDeque::new()),
            rx_notify: Notify::new(),
            tx: Mutex::new(Vec::new()),
            baud: Mutex::new(115_200),
            format: Mutex::new(UartFormat {
                databits: 8,
                stopbits: 1,
                parity: UartParity::None,
            }),
        }
    }
}

/// 仿真 UART 端口的测试旁路。
#[derive(Clone)]
pub struct SimUartHandle {
    state: Arc<SimUartState>,
}

impl SimUartHandle {
    /// 注入接收方向字节。
    pub fn inject_rx(&self, bytes: &[u8]) {
        self.state.rx.lock().extend(bytes.iter().copied());
        self.state.rx_notify.notify_waiters();
        self.state.rx_notify.notify_one();
    }

    /// 取走已写出的发送方向字节。
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut *self.state.tx.lock())
    }

    /// 当前波特率（校验 `set_baud` 生效）。
    pub fn baud(&self) -> u32 {
        *self.state.baud.lock()
    }

    /// 当前帧格式。
    pub fn format(&self) -> UartFormat {
        *self.state.format.lock()
    }
}

struct SimUartPortImpl {
    state: Arc<SimUartState>,
}

#[async_trait]
impl UartPort for SimUartPortImpl {
    async fn write(&self, bytes: &[u8]) -> Result<(), PlatformError> {
        self.state.tx.lock().extend_from_slice(bytes);
        Ok(())
    }

    async fn readable(&self) {
        loop {
            let notified = self.state.rx_notify.notified();
            if !self.state.rx.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn recv_some(&self, buf: &mut [u8], ctx: &OpContext) -> Result<usize, PlatformError> {
        loop {
            let notified = self.state.rx_notify.notified();
            {
                let mut rx = self.state.rx.lock();
                if !rx.is_empty() {
                    let n = rx.len().min(buf.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = rx.pop_front().expect("length checked above");
                    }
                    return Ok(n);
                }
            }
            match ctx.deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline) => return Ok(0),
                        _ = ctx.cancellation().cancelled() => return Ok(0),
                    }
                }
                None => {
                    tokio::select! {
                        _ = notified => {}
                        _ = ctx.cancellation().cancelled() => return Ok(0),
                    }
                }
            }
        }
    }

    fn set_baud(&self, baud: u32) -> Result<(), PlatformError> {
        *self.state.baud.lock() = baud;
        Ok(())
    }

    fn set_format(&self, format: UartFormat) -> Result<(), PlatformError> {
        *self.state.format.lock() = format;
        Ok(())
    }
}

#[derive(Default)]
struct SimUartProviderState {
    ports: Mutex<HashMap<String, Arc<SimUartState>>>,
    claimed: Mutex<HashSet<String>>,
}

struct SimUartProviderImpl {
    state: Arc<SimUartProviderState>,
}

impl UartProvider for SimUartProviderImpl {
    fn by_id(&self, id: &str) -> Result<Arc<dyn UartPort>, PlatformError> {
        let ports = self.state.ports.lock();
        let state = ports
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownBus(id.to_owned()))?;
        let mut claimed = self.state.claimed.lock();
        if !claimed.insert(id.to_owned()) {
            return Err(PlatformError::BusInUse(id.to_owned()));
        }
        Ok(Arc::new(SimUartPortImpl { state }))
    }

    fn release(&self, id: &str) {
        self.state.claimed.lock().remove(id);
    }
}

/// 仿真平台：声明资源、产出门面句柄、暴露测试旁路。
#[derive(Clone, Default)]
pub struct SimPlatform {
    i2c: Arc<SimI2cProviderState>,
    gpio: Arc<SimGpioProviderState>,
    uart: Arc<SimUartProviderState>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明一条 I²C 总线并返回旁路句柄。
    pub fn add_i2c_bus(&self, id: &str) -> SimI2cBusHandle {
        let state = Arc::new(SimI2cBusState::default());
        self.i2c.buses.lock().insert(id.to_owned(), Arc::clone(&state));
        SimI2cBusHandle { state }
    }

    /// 声明一个引脚及其初始电平。
    pub fn add_pin(&self, pin: u32, initial: bool) {
        self.gpio
            .pins
            .lock()
            .insert(pin, Arc::new(SimPinState::new(initial)));
    }

    /// 从外部驱动引脚电平（触发已登记的边沿中断）。
    pub fn drive_pin(&self, pin: u32, level: bool) {
        let state = self.gpio.pins.lock().get(&pin).cloned();
        if let Some(state) = state {
            state.drive(level);
        }
    }

    /// 读取引脚当前电平。
    pub fn pin_level(&self, pin: u32) -> Option<bool> {
        self.gpio
            .pins
            .lock()
            .get(&pin)
            .map(|state| state.level.load(Ordering::Acquire))
    }

    /// 声明一个 UART 端口并返回旁路句柄。
    pub fn add_uart(&self, id: &str) -> SimUartHandle {
        let state = Arc::new(SimUartState::default());
        self.uart.ports.lock().insert(id.to_owned(), Arc::clone(&state));
        SimUartHandle { state }
    }

    /// 产出注入 HAL 的门面句柄。
    pub fn handles(&self) -> PlatformHandles {
        PlatformHandles {
            i2c: Arc::new(SimI2cProviderImpl {
                state: Arc::clone(&self.i2c),
            }),
            gpio: Arc::new(SimGpioProviderImpl {
                state: Arc::clone(&self.gpio),
            }),
            uart: Arc::new(SimUartProviderImpl {
                state: Arc::clone(&self.uart),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn pin_irq_fires_on_matching_edge_only() {
        let platform = SimPlatform::new();
        platform.add_pin(5, true);
        let handles = platform.handles();
        let pin = handles.gpio.claim(5).unwrap();

        let falls = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&falls);
        pin.set_irq(
            IrqEdge::Falling,
            Arc::new(move |level| {
                assert!(!level);
                observed.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .unwrap();

        platform.drive_pin(5, false);
        platform.drive_pin(5, false); // 电平未变化，不触发
        platform.drive_pin(5, true); // 上升沿被过滤
        platform.drive_pin(5, false);
        assert_eq!(falls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn claimed_pin_rejects_second_claim() {
        let platform = SimPlatform::new();
        platform.add_pin(9, false);
        let handles = platform.handles();
        let _first = handles.gpio.claim(9).unwrap();
        assert_eq!(
            handles.gpio.claim(9).unwrap_err(),
            PlatformError::PinInUse(9)
        );
        handles.gpio.release(9);
        assert!(handles.gpio.claim(9).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn uart_recv_some_returns_zero_at_deadline() {
        let platform = SimPlatform::new();
        platform.add_uart("u1");
        let handles = platform.handles();
        let port = handles.uart.by_id("u1").unwrap();

        let mut buf = [0u8; 8];
        let ctx = OpContext::with_timeout(Duration::from_millis(20));
        let n = port.recv_some(&mut buf, &ctx).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn uart_roundtrip_and_reconfigure() {
        let platform = SimPlatform::new();
        let side = platform.add_uart("u1");
        let handles = platform.handles();
        let port = handles.uart.by_id("u1").unwrap();

        side.inject_rx(b"ping");
        let mut buf = [0u8; 8];
        let ctx = OpContext::with_timeout(Duration::from_millis(100));
        let n = port.recv_some(&mut buf, &ctx).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        port.write(b"pong").await.unwrap();
        assert_eq!(side.take_tx(), b"pong");

        port.set_baud(9600).unwrap();
        assert_eq!(side.baud(), 9600);
    }

    #[tokio::test]
    async fn unknown_i2c_bus_is_reported() {
        let platform = SimPlatform::new();
        let handles = platform.handles();
        assert!(matches!(
            handles.i2c.by_id("i2c9").unwrap_err(),
            PlatformError::UnknownBus(_)
        ));
    }
}
