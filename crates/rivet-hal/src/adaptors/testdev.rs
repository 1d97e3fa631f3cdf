//! 合成测试设备（`svc_testdev`）：不碰任何平台资源，按固定斜坡产出温度
//! 读数，供端到端场景与演示使用。

use std::time::Duration;

use async_trait::async_trait;

use rivet_core::{
    Adaptor, BuildSpec, BuiltDevice, CapDecl, CapInfo, CapKind, CollectOutcome, ControlOutcome,
    CoreError, DeviceBuilder, OpContext, Payload, Reading, Sample, TriggerOutcome,
};

pub struct TestDeviceAdaptor {
    dev_id: String,
    caps: Vec<CapDecl>,
    next_value: i64,
}

#[async_trait]
impl Adaptor for TestDeviceAdaptor {
    fn id(&self) -> &str {
        &self.dev_id
    }

    fn capabilities(&self) -> &[CapDecl] {
        &self.caps
    }

    async fn trigger(&mut self, _ctx: &OpContext) -> Result<TriggerOutcome, CoreError> {
        Ok(TriggerOutcome::Started {
            collect_after: Duration::from_millis(10),
        })
    }

    async fn collect(&mut self, _ctx: &OpContext) -> Result<CollectOutcome, CoreError> {
        let value = self.next_value;
        self.next_value += 1;
        Ok(CollectOutcome::Sample(Sample::new().with(
            CapKind::Temperature,
            Payload::Reading(Reading::new("dC", value)),
        )))
    }

    async fn control(
        &mut self,
        _kind: CapKind,
        _verb: &str,
        _payload: Option<Payload>,
        _ctx: &OpContext,
    ) -> Result<ControlOutcome, CoreError> {
        Ok(ControlOutcome::Unsupported)
    }
}

/// `svc_testdev` 构建器；可选参数 `start` 设定斜坡起点（默认 250 = 25.0 °C）。
#[derive(Debug, Default)]
pub struct TestDeviceBuilder;

#[async_trait]
impl DeviceBuilder for TestDeviceBuilder {
    fn type_name(&self) -> &'static str {
        "svc_testdev"
    }

    async fn build(&self, spec: BuildSpec<'_>) -> Result<BuiltDevice, CoreError> {
        let start = match spec.params.get("start") {
            Some(value) => value.as_i64()?,
            None => 250,
        };
        Ok(BuiltDevice::bare(Box::new(TestDeviceAdaptor {
            dev_id: spec.device_id.to_owned(),
            caps: vec![CapDecl::new(
                CapKind::Temperature,
                CapInfo::new("svc_testdev", 1).with_unit("dC"),
            )],
            next_value: start,
        })))
    }
}
