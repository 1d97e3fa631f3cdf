//! # UART 端口适配器
//!
//! 不参与两段式测量（串口没有“采样”语义，数据由读取任务持续推送）；
//! 控制面暴露 `write`/`set_baud`/`set_format`。写出经命令通道交给读取
//! 任务执行，保持“一任务一端口”的驱动纪律。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rivet_core::platform::{UartFormat, UartParity, UartPort};
use rivet_core::{
    Adaptor, BuildSpec, BuiltDevice, BusRefKind, CapDecl, CapInfo, CapKind, CollectOutcome,
    ControlOutcome, CoreError, DeviceBuilder, OpContext, Payload, ReplyRecord, TriggerOutcome,
    UartFrameMode, UartReaderRequest,
};

/// 写出命令通道深度。
const WRITE_QUEUE_DEPTH: usize = 8;

pub struct UartAdaptor {
    dev_id: String,
    port: Arc<dyn UartPort>,
    write_tx: mpsc::Sender<Vec<u8>>,
    caps: Vec<CapDecl>,
}

fn parse_parity(text: &str) -> Result<UartParity, CoreError> {
    Ok(match text {
        "none" => UartParity::None,
        "even" => UartParity::Even,
        "odd" => UartParity::Odd,
        _ => {
            return Err(CoreError::invalid_params(
                "parity must be one of `none`, `even`, `odd`",
            ));
        }
    })
}

fn payload_bytes(payload: Option<Payload>) -> Result<Vec<u8>, CoreError> {
    match payload {
        Some(Payload::Blob(bytes)) => Ok(bytes.to_vec()),
        Some(Payload::Text(text)) => Ok(text.into_bytes()),
        Some(Payload::Params(params)) => {
            let text = params.require("text")?.as_text()?;
            Ok(text.as_bytes().to_vec())
        }
        _ => Err(CoreError::InvalidPayload),
    }
}

#[async_trait]
impl Adaptor for UartAdaptor {
    fn id(&self) -> &str {
        &self.dev_id
    }

    fn capabilities(&self) -> &[CapDecl] {
        &self.caps
    }

    async fn trigger(&mut self, _ctx: &OpContext) -> Result<TriggerOutcome, CoreError> {
        // 串口没有采样语义；该设备不被调度，显式拒绝兜底。
        Err(CoreError::Unsupported)
    }

    async fn collect(&mut self, _ctx: &OpContext) -> Result<CollectOutcome, CoreError> {
        Err(CoreError::Unsupported)
    }

    async fn control(
        &mut self,
        _kind: CapKind,
        verb: &str,
        payload: Option<Payload>,
        _ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError> {
        match verb {
            "write" => {
                let data = payload_bytes(payload)?;
                let written = data.len() as i64;
                self.write_tx
                    .try_send(data)
                    .map_err(|_| CoreError::Busy)?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok_with(
                    rivet_core::ParamMap::new().insert("written", written),
                ))))
            }
            "set_baud" => {
                let Some(Payload::Params(params)) = payload else {
                    return Err(CoreError::InvalidPayload);
                };
                let baud = params.require("baud")?.as_u32()?;
                self.port.set_baud(baud).map_err(CoreError::from)?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            "set_format" => {
                let Some(Payload::Params(params)) = payload else {
                    return Err(CoreError::InvalidPayload);
                };
                let format = UartFormat {
                    databits: params.require("databits")?.as_u8()?,
                    stopbits: params.require("stopbits")?.as_u8()?,
                    parity: parse_parity(params.require("parity")?.as_text()?)?,
                };
                self.port.set_format(format).map_err(CoreError::from)?;
                Ok(ControlOutcome::Done(Payload::Reply(ReplyRecord::ok())))
            }
            _ => Ok(ControlOutcome::Unsupported),
        }
    }
}

/// `uart` 构建器。
///
/// 参数：`mode`（`bytes`/`lines`，默认 `lines`）、`max_frame`（钳制到
/// [16, 256]）、`idle_flush_ms`（钳制到 2 s）、`echo`、`baud`、
/// `databits`/`stopbits`/`parity`。端口取自 `bus_ref`（必须为 `uart` 类）。
#[derive(Debug, Default)]
pub struct UartBuilder;

#[async_trait]
impl DeviceBuilder for UartBuilder {
    fn type_name(&self) -> &'static str {
        "uart"
    }

    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError> {
        let params = spec.params;
        let bus_ref = spec
            .bus_ref
            .ok_or_else(|| CoreError::invalid_params("uart devices require a `bus_ref`"))?;
        if bus_ref.kind != BusRefKind::Uart {
            return Err(CoreError::invalid_params("bus_ref must reference a uart"));
        }
        let port = spec.platform.uart.by_id(&bus_ref.id)?;

        if let Some(value) = params.get("baud") {
            port.set_baud(value.as_u32()?).map_err(CoreError::from)?;
        }
        if params.get("databits").is_some()
            || params.get("stopbits").is_some()
            || params.get("parity").is_some()
        {
            let format = UartFormat {
                databits: params.require("databits")?.as_u8()?,
                stopbits: params.require("stopbits")?.as_u8()?,
                parity: parse_parity(params.require("parity")?.as_text()?)?,
            };
            port.set_format(format).map_err(CoreError::from)?;
        }

        let mode = match params.get("mode") {
            Some(value) => match value.as_text()? {
                "bytes" => UartFrameMode::Bytes,
                "lines" => UartFrameMode::Lines,
                _ => {
                    return Err(CoreError::invalid_params(
                        "mode must be `bytes` or `lines`",
                    ));
                }
            },
            None => UartFrameMode::Lines,
        };
        let max_frame = match params.get("max_frame") {
            Some(value) => value.as_u32()? as usize,
            None => 128,
        };
        let idle_flush = match params.get("idle_flush_ms") {
            Some(value) => value.as_duration()?,
            None => Duration::from_millis(200),
        };
        let echo = match params.get("echo") {
            Some(value) => value.as_bool()?,
            None => false,
        };

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        Ok(BuiltDevice {
            adaptor: Box::new(UartAdaptor {
                dev_id: spec.device_id.to_owned(),
                port: Arc::clone(&port),
                write_tx,
                caps: vec![CapDecl::new(CapKind::Uart, CapInfo::new("uart", 1))],
            }),
            irq: None,
            uart: Some(UartReaderRequest {
                port,
                mode,
                max_frame,
                idle_flush,
                echo,
                write_rx,
            }),
            claimed_pins: Vec::new(),
            claimed_uarts: vec![bus_ref.id.clone()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_core::sim::SimPlatform;
    use rivet_core::{BusRef, ParamMap};

    async fn build(platform: &SimPlatform, params: ParamMap) -> Result<BuiltDevice, CoreError> {
        let handles = platform.handles();
        let bus_ref = BusRef::uart("u1");
        UartBuilder
            .build(BuildSpec {
                device_id: "console",
                params: &params,
                bus_ref: Some(&bus_ref),
                platform: &handles,
            })
            .await
    }

    #[tokio::test]
    async fn build_applies_baud_and_format() {
        let platform = SimPlatform::new();
        let side = platform.add_uart("u1");
        let params = ParamMap::new()
            .insert("baud", 9_600i64)
            .insert("databits", 8i64)
            .insert("stopbits", 1i64)
            .insert("parity", "even");
        let built = build(&platform, params).await.unwrap();
        assert!(built.uart.is_some());
        assert_eq!(side.baud(), 9_600);
        assert_eq!(side.format().parity, UartParity::Even);
    }

    #[tokio::test]
    async fn trigger_and_collect_are_unsupported() {
        let platform = SimPlatform::new();
        platform.add_uart("u1");
        let mut built = build(&platform, ParamMap::new()).await.unwrap();
        let ctx = OpContext::unbounded();
        assert_eq!(
            built.adaptor.trigger(&ctx).await.unwrap_err().code(),
            "unsupported"
        );
        assert_eq!(
            built.adaptor.collect(&ctx).await.unwrap_err().code(),
            "unsupported"
        );
    }

    #[tokio::test]
    async fn write_control_validates_payload_shapes() {
        let platform = SimPlatform::new();
        platform.add_uart("u1");
        let mut built = build(&platform, ParamMap::new()).await.unwrap();
        let ctx = OpContext::unbounded();

        let outcome = built
            .adaptor
            .control(
                CapKind::Uart,
                "write",
                Some(Payload::Text("hi".into())),
                &ctx,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ControlOutcome::Done(_)));

        let err = built
            .adaptor
            .control(CapKind::Uart, "write", None, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[tokio::test]
    async fn second_claim_of_the_same_port_is_rejected() {
        let platform = SimPlatform::new();
        platform.add_uart("u1");
        let _first = build(&platform, ParamMap::new()).await.unwrap();
        assert_eq!(
            build(&platform, ParamMap::new()).await.unwrap_err().code(),
            "bus_in_use"
        );
    }
}
