//! 生产与链式转换测试
//!
//! 1. 周期 Producer 在观察窗口 D 内推送 floor(D/P) ± 1 个数据包
//! 2. detection → strategy → radio → 发送器 的 Translator 链在驱动线程下端到端运行

use fieldlink_sdk::prelude::*;
use fieldlink_transport::MockSender;
use serial_test::serial;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn synthetic_detection() -> Arc<dyn Producer<DetectionFrame>> {
    Arc::new(producer_fn("synthetic-detection", || {
        Ok(Packet::new(DetectionFrame {
            robots_blue: vec![DetectionRobot {
                robot_id: 2,
                x: 100.0,
                y: -50.0,
                ..Default::default()
            }],
            ..Default::default()
        }))
    }))
}

#[test]
#[serial]
fn test_scheduled_cadence() {
    let registry = Arc::new(Registry::new());
    let pipeline = PipelineBuilder::<DetectionFrame>::new("detection")
        .queue_capacity(256)
        .build(&registry)
        .unwrap();

    let period = Duration::from_millis(20);
    let window = Duration::from_millis(400);

    let handle = start_producer(
        &registry,
        synthetic_detection(),
        ProductionMode::Scheduled(period),
    )
    .unwrap();
    let start = Instant::now();
    thread::sleep(window);
    let observed = pipeline.len() as i64;
    let elapsed = start.elapsed();
    handle.stop();
    handle.join(Duration::from_secs(2)).unwrap();

    let expected = (elapsed.as_millis() / period.as_millis()) as i64;
    assert!(
        (observed - expected).abs() <= 1,
        "expected {} ± 1 packets in {:?}, observed {}",
        expected,
        elapsed,
        observed
    );
}

#[test]
#[serial]
fn test_single_production_pushes_once() {
    let registry = Arc::new(Registry::new());
    let pipeline = PipelineBuilder::<DetectionFrame>::new("detection").build(&registry).unwrap();

    let handle = start_producer(&registry, synthetic_detection(), ProductionMode::Single).unwrap();
    assert!(!handle.is_running());
    assert_eq!(handle.stats().published, 1);
    assert_eq!(pipeline.len(), 1);
}

#[test]
#[serial]
fn test_translator_chain_reaches_senders() {
    let registry = Arc::new(Registry::new());

    // detection → strategy：朝检测到的机器人位置移动
    registry.declare_consumer::<DetectionFrame>(Arc::new(Translator::new(
        "plan",
        &registry,
        |p: &Packet<DetectionFrame>| {
            let frame = p.read();
            let strategy = frame.robots_blue.iter().fold(StrategyFrame::default(), |s, r| {
                s.with_target(r.robot_id, VelocityCommand::new(-r.x, -r.y, 0.0))
            });
            Ok(Packet::new(strategy))
        },
    )));
    // strategy → radio
    registry.declare_consumer::<StrategyFrame>(Arc::new(Translator::new(
        "encode",
        &registry,
        |p: &Packet<StrategyFrame>| Ok(Packet::new(RadioPacket::new(p.read().to_radio_message()))),
    )));

    let transports = Arc::new(TransportRegistry::new());
    let udp = Arc::new(MockSender::new("udp"));
    transports.register(SendMethod::Udp, udp.clone());

    let topology =
        StandardTopology::build(&registry, &PipelineSection::default(), transports).unwrap();
    let drivers = topology.spawn_drivers().unwrap();

    let handle = start_producer(
        &registry,
        synthetic_detection(),
        ProductionMode::Scheduled(Duration::from_millis(10)),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while udp.send_count() < 5 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();
    handle.join(Duration::from_secs(2)).unwrap();
    topology.close();
    for driver in drivers {
        driver.stop();
        driver.join(Duration::from_secs(2)).unwrap();
    }

    assert!(udp.send_count() >= 5, "only {} sends", udp.send_count());
    let message = udp.last_message().unwrap();
    let command = message.iter().next().unwrap();
    assert_eq!(command.robot_id, 2);
    assert_eq!(command.direction_speed, VelocityCommand::new(-100.0, 50.0, 0.0).speed());
    assert!(topology.strategy.metrics().succeeded >= 5);
}

#[test]
#[serial]
fn test_producer_without_pipeline_counts_undelivered() {
    let registry = Arc::new(Registry::new());
    let handle = start_producer(&registry, synthetic_detection(), ProductionMode::Single).unwrap();
    let stats = handle.stats();
    assert_eq!(stats.invocations, 1);
    assert_eq!(stats.published, 0);
    assert_eq!(stats.undelivered, 1);
}
