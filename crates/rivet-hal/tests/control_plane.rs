//! 控制面：通用动词（`read_now`/`set_rate`）、设备转发与错误码。

use std::time::Duration;

use rivet_bus::{Bus, Message, topic};
use rivet_core::sim::SimPlatform;
use rivet_core::{Cancellation, DeviceConfig, HalConfig, ParamMap, Payload};
use rivet_hal::{HalOptions, HalService, Registry};

struct Hal {
    bus: Bus<Payload>,
    cancel: Cancellation,
}

async fn start_with_testdev() -> Hal {
    let platform = SimPlatform::new();
    let bus: Bus<Payload> = Bus::new();
    let service = HalService::new(
        bus.clone(),
        Registry::builtin(),
        platform.handles(),
        HalOptions::default(),
    );
    let cancel = Cancellation::new();
    tokio::spawn(service.run(cancel.clone()));

    let client = bus.connect();
    client
        .publish(Message::retained(
            topic!["config", "hal"],
            Some(Payload::Config(HalConfig {
                devices: vec![DeviceConfig {
                    id: "d1".into(),
                    device_type: "svc_testdev".into(),
                    params: ParamMap::new(),
                    bus_ref: None,
                }],
            })),
        ))
        .unwrap();

    // 等待能力面就绪。
    let info_sub = client
        .subscribe(topic!["hal", "capability", "temperature", 0, "info"], 4)
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), info_sub.recv())
        .await
        .expect("info within a second");

    Hal { bus, cancel }
}

async fn request_reply(hal: &Hal, verb: &str, payload: Option<Payload>) -> rivet_core::ReplyRecord {
    let client = hal.bus.connect();
    let mut msg = Message::event(
        topic!["hal", "capability", "temperature", 0, "control", verb],
        Payload::Text(String::new()),
    );
    msg.payload = payload;
    let reply = client
        .request(msg, Duration::from_secs(1))
        .await
        .expect("reply within a second");
    match reply.payload {
        Some(Payload::Reply(record)) => record,
        other => panic!("expected a reply record, got {other:?}"),
    }
}

#[tokio::test]
async fn read_now_triggers_an_immediate_value() {
    let hal = start_with_testdev().await;
    let client = hal.bus.connect();
    let value_sub = client
        .subscribe(topic!["hal", "capability", "temperature", 0, "value"], 8)
        .unwrap();

    let record = request_reply(&hal, "read_now", None).await;
    assert!(record.ok, "read_now acknowledges the submission");

    let value = tokio::time::timeout(Duration::from_millis(500), value_sub.recv()).await;
    assert!(value.is_ok(), "a value follows the priority read");
    hal.cancel.cancel();
}

#[tokio::test]
async fn set_rate_clamps_and_replies_with_the_applied_period() {
    let hal = start_with_testdev().await;

    let record = request_reply(
        &hal,
        "set_rate",
        Some(Payload::Params(
            ParamMap::new().insert("period", Duration::from_millis(50)),
        )),
    )
    .await;
    assert!(record.ok);
    // 50 ms 低于策略下限，被钳制到 200 ms。
    assert_eq!(
        record.detail.get("period").and_then(|v| v.as_i64().ok()),
        Some(200)
    );

    let record = request_reply(&hal, "set_rate", Some(Payload::Text("oops".into()))).await;
    assert!(!record.ok);
    assert_eq!(record.error.as_deref(), Some("invalid_period"));
    hal.cancel.cancel();
}

#[tokio::test]
async fn unknown_capability_and_unsupported_verbs_report_stable_codes() {
    let hal = start_with_testdev().await;
    let client = hal.bus.connect();

    // 不存在的能力地址。
    let reply = client
        .request(
            Message::event(
                topic!["hal", "capability", "humidity", 9, "control", "read_now"],
                Payload::Text(String::new()),
            ),
            Duration::from_secs(1),
        )
        .await
        .expect("reply");
    match reply.payload {
        Some(Payload::Reply(record)) => {
            assert!(!record.ok);
            assert_eq!(record.error.as_deref(), Some("unknown_capability"));
        }
        other => panic!("expected a reply record, got {other:?}"),
    }

    // 测试设备不认识的动词。
    let record = request_reply(&hal, "frobnicate", None).await;
    assert!(!record.ok);
    assert_eq!(record.error.as_deref(), Some("unsupported"));
    hal.cancel.cancel();
}

#[tokio::test]
async fn requests_without_reply_to_are_silently_processed() {
    let hal = start_with_testdev().await;
    let client = hal.bus.connect();
    let value_sub = client
        .subscribe(topic!["hal", "capability", "temperature", 0, "value"], 8)
        .unwrap();

    // 不带 reply_to 的 read_now：无应答，但测量照常执行。
    client
        .publish(Message::event(
            topic!["hal", "capability", "temperature", 0, "control", "read_now"],
            Payload::Text(String::new()),
        ))
        .unwrap();

    let value = tokio::time::timeout(Duration::from_millis(500), value_sub.recv()).await;
    assert!(value.is_ok());
    hal.cancel.cancel();
}
