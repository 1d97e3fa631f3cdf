//! 旁路事件流：UART 帧与 GPIO 边沿经服务环落到能力主题。

use std::time::Duration;

use rivet_bus::{Bus, Message, Subscription, topic};
use rivet_core::sim::SimPlatform;
use rivet_core::{
    BusRef, Cancellation, DeviceConfig, Edge, HalConfig, LinkState, ParamMap, Payload,
};
use rivet_hal::{HalOptions, HalService, Registry};

struct Hal {
    bus: Bus<Payload>,
    cancel: Cancellation,
}

fn start(platform: &SimPlatform, devices: Vec<DeviceConfig>) -> Hal {
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
            Some(Payload::Config(HalConfig { devices })),
        ))
        .unwrap();
    Hal { bus, cancel }
}

async fn recv_within(
    sub: &Subscription<Payload>,
    window: Duration,
) -> Option<Message<Payload>> {
    tokio::time::timeout(window, sub.recv()).await.ok().flatten()
}

#[tokio::test]
async fn uart_lines_arrive_as_frame_events() {
    let platform = SimPlatform::new();
    let side = platform.add_uart("u1");
    let hal = start(
        &platform,
        vec![DeviceConfig {
            id: "console".into(),
            device_type: "uart".into(),
            params: ParamMap::new().insert("mode", "lines").insert("echo", true),
            bus_ref: Some(BusRef::uart("u1")),
        }],
    );
    let client = hal.bus.connect();

    let event_sub = client
        .subscribe(topic!["hal", "capability", "uart", 0, "event"], 8)
        .unwrap();
    let state_sub = client
        .subscribe(topic!["hal", "capability", "uart", 0, "state"], 4)
        .unwrap();

    // 等能力面就绪后注入一行。
    let state = recv_within(&state_sub, Duration::from_secs(1))
        .await
        .expect("uart capability state retained");
    assert!(matches!(
        state.payload,
        Some(Payload::Status(ref status)) if status.link == LinkState::Up
    ));

    side.inject_rx(b"ok 42\r\n");
    let event = recv_within(&event_sub, Duration::from_secs(1))
        .await
        .expect("frame event");
    match event.payload {
        Some(Payload::UartFrame(frame)) => {
            assert_eq!(&frame.data[..], b"ok 42");
            assert!(!frame.echo);
            assert_eq!(frame.dev_id, "console");
        }
        other => panic!("expected a uart frame, got {other:?}"),
    }

    // `write` 控制动词：写出并产生回显帧。
    let reply = client
        .request(
            Message::event(
                topic!["hal", "capability", "uart", 0, "control", "write"],
                Payload::Text("ping".into()),
            ),
            Duration::from_secs(1),
        )
        .await
        .expect("write reply");
    assert!(matches!(
        reply.payload,
        Some(Payload::Reply(ref record)) if record.ok
    ));

    let echo = recv_within(&event_sub, Duration::from_secs(1))
        .await
        .expect("echo frame");
    match echo.payload {
        Some(Payload::UartFrame(frame)) => {
            assert!(frame.echo);
            assert_eq!(&frame.data[..], b"ping");
        }
        other => panic!("expected an echo frame, got {other:?}"),
    }
    assert_eq!(side.take_tx(), b"ping");

    hal.cancel.cancel();
}

#[tokio::test]
async fn gpio_edges_become_capability_events() {
    let platform = SimPlatform::new();
    platform.add_pin(5, false);
    let hal = start(
        &platform,
        vec![DeviceConfig {
            id: "door".into(),
            device_type: "gpio".into(),
            params: ParamMap::new()
                .insert("pin", 5i64)
                .insert("irq_edge", "both"),
            bus_ref: None,
        }],
    );
    let client = hal.bus.connect();

    let event_sub = client
        .subscribe(topic!["hal", "capability", "gpio", 0, "event"], 8)
        .unwrap();
    let state_sub = client
        .subscribe(topic!["hal", "capability", "gpio", 0, "state"], 4)
        .unwrap();
    recv_within(&state_sub, Duration::from_secs(1))
        .await
        .expect("gpio capability registered");

    // 中断登记经工作器命令异步生效：带重试地驱动上升沿，只认第一条上升事件。
    let mut first = None;
    'attempts: for _ in 0..10 {
        platform.drive_pin(5, false);
        platform.drive_pin(5, true);
        while let Some(event) = recv_within(&event_sub, Duration::from_millis(200)).await {
            if matches!(
                event.payload,
                Some(Payload::GpioEvent(ref record)) if record.edge == Edge::Rising
            ) {
                first = Some(event);
                break 'attempts;
            }
        }
    }
    let event = first.expect("rising edge event");
    match event.payload {
        Some(Payload::GpioEvent(record)) => {
            assert_eq!(record.dev_id, "door");
            assert!(record.level);
            assert_eq!(record.edge, Edge::Rising);
        }
        other => panic!("expected a gpio event, got {other:?}"),
    }

    platform.drive_pin(5, false);
    let event = recv_within(&event_sub, Duration::from_secs(1))
        .await
        .expect("falling edge event");
    assert!(matches!(
        event.payload,
        Some(Payload::GpioEvent(ref record)) if record.edge == Edge::Falling && !record.level
    ));

    hal.cancel.cancel();
}

#[tokio::test]
async fn failed_build_is_nonfatal_and_publishes_nothing() {
    // 未在仿真总线上挂接器件的 AHT20：构建期状态读取即失败，设备不会上线。
    let platform = SimPlatform::new();
    platform.add_i2c_bus("i2c0");
    let hal = start(
        &platform,
        vec![DeviceConfig {
            id: "climate".into(),
            device_type: "aht20".into(),
            params: ParamMap::new(),
            bus_ref: Some(BusRef::i2c("i2c0")),
        }],
    );
    let client = hal.bus.connect();

    let info_sub = client
        .subscribe(topic!["hal", "capability", "temperature", 0, "info"], 4)
        .unwrap();
    assert!(
        recv_within(&info_sub, Duration::from_millis(500)).await.is_none(),
        "a device that fails to build never publishes capabilities"
    );

    hal.cancel.cancel();
}
