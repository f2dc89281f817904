//! Pipeline 行为测试
//!
//! 端到端验证：
//! 1. Coupler 按优先级折叠，同优先级按注册顺序
//! 2. 空队列处理不触达 Consumer
//! 3. 自动装配只按载荷类型匹配

use fieldlink_sdk::prelude::*;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

fn append(marker: &'static str) -> Arc<dyn Coupler<String>> {
    Arc::new(coupler_fn(marker, move |p: &Packet<String>| {
        Ok(p.map(|s| format!("{}{}", s, marker)))
    }))
}

/// 最后一次收到的值
#[derive(Default)]
struct Slot(Mutex<Option<String>>);

impl Slot {
    fn get(&self) -> Option<String> {
        self.0.lock().unwrap().clone()
    }
}

fn capture() -> (Arc<dyn Consumer<String>>, Arc<Slot>) {
    let slot = Arc::new(Slot::default());
    let sink = Arc::clone(&slot);
    let consumer: Arc<dyn Consumer<String>> =
        Arc::new(consumer_fn("capture", move |p: &Packet<String>| {
            *sink.0.lock().unwrap() = Some(p.read().clone());
            true
        }));
    (consumer, slot)
}

#[test]
fn test_priority_ordering_ignores_registration_order() {
    for high_first in [true, false] {
        let registry = Arc::new(Registry::new());
        let (consumer, slot) = capture();

        let mut builder = PipelineBuilder::<String>::new("words").consumer(consumer);
        if high_first {
            builder = builder
                .coupler(append("A"), Priority::High)
                .coupler(append("B"), Priority::Low);
        } else {
            builder = builder
                .coupler(append("B"), Priority::Low)
                .coupler(append("A"), Priority::High);
        }
        let pipeline = builder.build(&registry).unwrap();

        pipeline.push(String::new());
        assert!(pipeline.process_packet().is_success());
        assert_eq!(slot.get().as_deref(), Some("AB"));
    }
}

#[test]
fn test_tie_break_follows_registration_order() {
    let registry = Arc::new(Registry::new());
    let (consumer, slot) = capture();

    let pipeline = PipelineBuilder::<String>::new("words")
        .coupler(append("1"), Priority::Medium)
        .coupler(append("2"), Priority::Medium)
        .coupler(append("0"), Priority::Highest)
        .consumer(consumer)
        .build(&registry)
        .unwrap();

    for _ in 0..10 {
        pipeline.push(String::new());
        assert!(pipeline.process_packet().is_success());
        assert_eq!(slot.get().as_deref(), Some("012"));
    }
}

#[test]
fn test_declared_couplers_respect_priority_across_sources() {
    let registry = Arc::new(Registry::new());
    registry.declare_coupler_with_priority(append("L"), Priority::Lowest);
    registry.declare_coupler_with_priority(append("H"), Priority::Highest);
    let (consumer, slot) = capture();

    let pipeline = PipelineBuilder::<String>::new("words")
        .coupler(append("M"), Priority::Medium)
        .consumer(consumer)
        .build(&registry)
        .unwrap();

    pipeline.push(String::new());
    pipeline.process_packet();
    assert_eq!(slot.get().as_deref(), Some("HML"));
}

#[test]
fn test_empty_queue_returns_false_without_consuming() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let pipeline = PipelineBuilder::<String>::new("idle")
        .consumer(Arc::new(consumer_fn("count", move |_: &Packet<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })))
        .build(&registry)
        .unwrap();

    let outcome = pipeline.process_packet();
    assert_eq!(outcome, ProcessOutcome::Empty);
    assert!(!bool::from(outcome));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_auto_wiring_isolation_between_payload_types() {
    let registry = Arc::new(Registry::new());
    let referee_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&referee_calls);
    registry.declare_consumer::<RefereeState>(Arc::new(consumer_fn(
        "referee-watch",
        move |_: &Packet<RefereeState>| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
    )));

    let topology = StandardTopology::build(
        &registry,
        &PipelineSection::default(),
        Arc::new(TransportRegistry::new()),
    )
    .unwrap();
    assert_eq!(topology.detection.consumer_count(), 0);
    assert_eq!(topology.referee.consumer_count(), 1);

    for frame_number in 0..20 {
        topology.detection.push(DetectionFrame {
            frame_number,
            ..Default::default()
        });
        topology.detection.process_packet();
    }
    assert_eq!(referee_calls.load(Ordering::SeqCst), 0);

    topology.referee.push(RefereeState::default());
    assert!(topology.referee.process_packet().is_success());
    assert_eq!(referee_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_coupler_passes_packet_through() {
    let registry = Arc::new(Registry::new());
    let (consumer, slot) = capture();
    let broken: Arc<dyn Coupler<String>> = Arc::new(coupler_fn("broken", |_: &Packet<String>| {
        Err(StageError::failed("no calibration"))
    }));

    let pipeline = PipelineBuilder::<String>::new("words")
        .coupler(append("A"), Priority::High)
        .coupler(broken, Priority::Medium)
        .coupler(append("B"), Priority::Low)
        .consumer(consumer)
        .build(&registry)
        .unwrap();

    pipeline.push(String::new());
    assert!(pipeline.process_packet().is_success());
    assert_eq!(slot.get().as_deref(), Some("AB"));
    assert_eq!(pipeline.metrics().coupler_failures, 1);
}

#[test]
fn test_consumer_results_are_anded() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let first = Arc::clone(&calls);
    let second = Arc::clone(&calls);

    let pipeline = PipelineBuilder::<String>::new("words")
        .consumer(Arc::new(consumer_fn("reject", move |_: &Packet<String>| {
            first.fetch_add(1, Ordering::SeqCst);
            false
        })))
        .consumer(Arc::new(consumer_fn("accept", move |_: &Packet<String>| {
            second.fetch_add(1, Ordering::SeqCst);
            true
        })))
        .build(&registry)
        .unwrap();

    pipeline.push("x".to_string());
    assert_eq!(pipeline.process_packet(), ProcessOutcome::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
