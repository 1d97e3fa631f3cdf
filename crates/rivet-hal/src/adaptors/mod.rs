//! 内建设备适配器：AHT20 温湿度计、GPIO 引脚、UART 端口与测试设备。
//! LTC4015 适配器在其驱动 crate 内实现，由注册表统一挂接。

mod aht20;
mod gpio;
mod testdev;
mod uart;

pub use aht20::Aht20Builder;
pub use gpio::GpioBuilder;
pub use testdev::TestDeviceBuilder;
pub use uart::UartBuilder;
