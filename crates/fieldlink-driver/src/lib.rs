//! 数据流引擎
//!
//! 本模块提供类型化的数据流管道，包括：
//! - 数据包与优先级（`Packet`、`Priority`）
//! - 阶段抽象（`Producer` / `Coupler` / `Consumer`）
//! - 类型键注册表与自动装配（`Registry`、`PipelineBuilder`）
//! - 有界队列、按优先级折叠的变换链、带时间预算的阶段调用（`Pipeline`）
//! - 跨 Pipeline 转换（`Translator`）
//! - Producer 调度与 Pipeline 驱动线程
//! - 传输注册表扇出发送（`TransportRegistry`）
//!
//! # 数据流
//!
//! ```text
//! Producer ──publish──▶ Pipeline<T> ──Coupler 链──▶ Consumer ...
//!                                                 └─ Translator<T, U> ──publish──▶ Pipeline<U>
//! ```
//!
//! 边界上的失败（变换、消费、发送）一律折算为布尔结果并记录日志，不会向调用方传播。

mod budget;
mod builder;
mod driver;
mod error;
pub mod metrics;
mod packet;
pub mod pipeline;
mod priority;
mod producer;
mod radio;
mod registry;
pub mod stage;
mod translator;
pub mod transport;

pub use budget::MAX_STUCK_STAGES;
pub use builder::PipelineBuilder;
pub use driver::{DriverHandle, spawn_driver};
pub use error::{DriverError, StageError};
pub use metrics::{
    PipelineMetrics, PipelineMetricsSnapshot, TransportMetrics, TransportMetricsSnapshot,
};
pub use packet::{Packet, Payload};
pub use pipeline::{ConsumerDispatch, Pipeline, PipelineConfig, ProcessOutcome};
pub use priority::Priority;
pub use producer::{
    ProducerHandle, ProductionMode, ProductionStats, ProductionStatsSnapshot, start_producer,
};
pub use radio::RadioPacket;
pub use registry::{PipelineInfo, Registry};
pub use stage::{
    Consumer, Coupler, FnConsumer, FnCoupler, FnProducer, Producer, consumer_fn, coupler_fn,
    producer_fn,
};
pub use translator::Translator;
pub use transport::TransportRegistry;
