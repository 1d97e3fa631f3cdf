//! # GPIO 引脚适配器
//!
//! 输入引脚可登记边沿中断（经去抖流水线成为事件流），输出引脚暴露
//! `set`/`toggle` 控制；两种方向都支持周期采样与 `read_now` 即时读取。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rivet_core::platform::{GpioPin, GpioProvider, IrqEdge, PinMode, PinPull};
use rivet_core::{
    Adaptor, BuildSpec, BuiltDevice, CapDecl, CapInfo, CapKind, CollectOutcome, ControlOutcome,
    CoreError, DeviceBuilder, IrqRequest, OpContext, ParamMap, Payload, Reading, ReplyRecord,
    Sample, TriggerOutcome,
};

use crate::gpio_irq::DEBOUNCE_CAP;

pub struct GpioAdaptor {
    dev_id: String,
    pin: Arc<dyn GpioPin>,
    provider: Arc<dyn GpioProvider>,
    pin_no: u32,
    output: bool,
    invert: bool,
    caps: Vec<CapDecl>,
}

#[async_trait]
impl Adaptor for GpioAdaptor {
    fn id(&self) -> &str {
        &self.dev_id
    }

    fn capabilities(&self) -> &[CapDecl] {
        &self.caps
    }

    async fn trigger(&mut self, _ctx: &OpContext) -> Result<TriggerOutcome, CoreError> {
        Ok(TriggerOutcome::Started {
            collect_after: Duration::ZERO,
        })
    }

    async fn collect(&mut self, _ctx: &OpContext) -> Result<CollectOutcome, CoreError> {
        let level = self.pin.get().map_err(CoreError::from)? ^ self.invert;
        Ok(CollectOutcome::Sample(Sample::new().with(
            CapKind::Gpio,
            Payload::Reading(Reading::new("level", i64::from(level))),
        )))
    }

    async fn control(
        &mut self,
        _kind: CapKind,
        verb: &str,
        payload: Option<Payload>,
        _ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError> {
        match verb {
            "set" => {
                if !self.output {
                    return Err(CoreError::Unsupported);
                }
                let Some(Payload::Params(params)) = payload else {
                    return Err(CoreError::InvalidPayload);
                };
                let level = params.require("level")?.as_bool()? ^ self.invert;
                self.pin.set(level).map_err(CoreError::from)?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            "toggle" => {
                if !self.output {
                    return Err(CoreError::Unsupported);
                }
                self.pin.toggle().map_err(CoreError::from)?;
                let level = self.pin.get().map_err(CoreError::from)? ^ self.invert;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok_with(
                    ParamMap::new().insert("level", level),
                ))))
            }
            _ => Ok(ControlOutcome::Unsupported),
        }
    }

    async fn close(&mut self) {
        let _ = self.pin.clear_irq();
        self.provider.release(self.pin_no);
    }
}

fn parse_pull(text: &str) -> Result<PinPull, CoreError> {
    Ok(match text {
        "none" => PinPull::None,
        "up" => PinPull::Up,
        "down" => PinPull::Down,
        _ => {
            return Err(CoreError::invalid_params(
                "pull must be one of `none`, `up`, `down`",
            ));
        }
    })
}

fn parse_edge(text: &str) -> Result<IrqEdge, CoreError> {
    Ok(match text {
        "rising" => IrqEdge::Rising,
        "falling" => IrqEdge::Falling,
        "both" => IrqEdge::Both,
        _ => {
            return Err(CoreError::invalid_params(
                "irq_edge must be one of `rising`, `falling`, `both`",
            ));
        }
    })
}

/// `gpio` 构建器。
///
/// 参数：`pin`（必填）、`direction`（`input`/`output`，默认输入）、`pull`、
/// `initial`（输出初始电平）、`invert`、`irq_edge`、`debounce_ms`
/// （钳制到 50 ms）。
#[derive(Debug, Default)]
pub struct GpioBuilder;

#[async_trait]
impl DeviceBuilder for GpioBuilder {
    fn type_name(&self) -> &'static str {
        "gpio"
    }

    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError> {
        let params = spec.params;
        let pin_no = params.require("pin")?.as_u32()?;
        let output = match params.get("direction") {
            Some(value) => match value.as_text()? {
                "input" => false,
                "output" => true,
                _ => {
                    return Err(CoreError::invalid_params(
                        "direction must be `input` or `output`",
                    ));
                }
            },
            None => false,
        };
        let invert = match params.get("invert") {
            Some(value) => value.as_bool()?,
            None => false,
        };

        let provider = Arc::clone(&spec.platform.gpio);
        let pin = provider.claim(pin_no)?;
        if output {
            let initial = match params.get("initial") {
                Some(value) => value.as_bool()?,
                None => false,
            };
            pin.configure(PinMode::Output {
                initial: initial ^ invert,
            })?;
        } else {
            let pull = match params.get("pull") {
                Some(value) => parse_pull(value.as_text()?)?,
                None => PinPull::None,
            };
            pin.configure(PinMode::Input { pull })?;
        }

        let mut irq = None;
        if let Some(value) = params.get("irq_edge") {
            if output {
                return Err(CoreError::invalid_params(
                    "irq_edge only applies to input pins",
                ));
            }
            let edge = parse_edge(value.as_text()?)?;
            let debounce = match params.get("debounce_ms") {
                Some(value) => value.as_duration()?.min(DEBOUNCE_CAP),
                None => Duration::ZERO,
            };
            irq = Some(IrqRequest {
                pin: Arc::clone(&pin),
                pin_no,
                edge,
                invert,
                debounce,
            });
        }

        Ok(BuiltDevice {
            adaptor: Box::new(GpioAdaptor {
                dev_id: spec.device_id.to_owned(),
                pin,
                provider,
                pin_no,
                output,
                invert,
                caps: vec![CapDecl::new(
                    CapKind::Gpio,
                    CapInfo::new("gpio", 1).with_unit("level"),
                )],
            }),
            irq,
            uart: None,
            claimed_pins: vec![pin_no],
            claimed_uarts: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_core::sim::SimPlatform;

    async fn build(platform: &SimPlatform, params: ParamMap) -> Result<BuiltDevice, CoreError> {
        let handles = platform.handles();
        GpioBuilder
            .build(BuildSpec {
                device_id: "relay",
                params: &params,
                bus_ref: None,
                platform: &handles,
            })
            .await
    }

    #[tokio::test]
    async fn output_pin_set_and_toggle() {
        let platform = SimPlatform::new();
        platform.add_pin(4, false);
        let params = ParamMap::new()
            .insert("pin", 4i64)
            .insert("direction", "output");
        let mut built = build(&platform, params).await.unwrap();

        let ctx = OpContext::unbounded();
        let payload = Payload::Params(ParamMap::new().insert("level", true));
        built
            .adaptor
            .control(CapKind::Gpio, "set", Some(payload), &ctx)
            .await
            .unwrap();
        assert_eq!(platform.pin_level(4), Some(true));

        built
            .adaptor
            .control(CapKind::Gpio, "toggle", None, &ctx)
            .await
            .unwrap();
        assert_eq!(platform.pin_level(4), Some(false));
    }

    #[tokio::test]
    async fn input_pin_collect_applies_inversion() {
        let platform = SimPlatform::new();
        platform.add_pin(9, true);
        let params = ParamMap::new().insert("pin", 9i64).insert("invert", true);
        let mut built = build(&platform, params).await.unwrap();

        let ctx = OpContext::unbounded();
        let CollectOutcome::Sample(sample) = built.adaptor.collect(&ctx).await.unwrap() else {
            panic!("gpio is always ready");
        };
        let Payload::Reading(reading) = &sample.parts[0].payload else {
            panic!("level reading");
        };
        assert_eq!(reading.value, 0, "raw high inverts to logical low");
    }

    #[tokio::test]
    async fn set_on_input_pin_is_unsupported() {
        let platform = SimPlatform::new();
        platform.add_pin(2, false);
        let params = ParamMap::new().insert("pin", 2i64);
        let mut built = build(&platform, params).await.unwrap();
        let ctx = OpContext::unbounded();
        let err = built
            .adaptor
            .control(
                CapKind::Gpio,
                "set",
                Some(Payload::Params(ParamMap::new().insert("level", true))),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported");
    }

    #[tokio::test]
    async fn close_releases_the_pin_claim() {
        let platform = SimPlatform::new();
        platform.add_pin(6, false);
        let params = ParamMap::new().insert("pin", 6i64);
        let mut built = build(&platform, params.clone()).await.unwrap();

        assert_eq!(
            build(&platform, params.clone()).await.unwrap_err().code(),
            "pin_in_use"
        );
        built.adaptor.close().await;
        assert!(build(&platform, params).await.is_ok());
    }
}
