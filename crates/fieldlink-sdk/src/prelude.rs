//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use fieldlink_sdk::prelude::*;
//! ```

// 引擎层
pub use fieldlink_driver::{
    Consumer, Coupler, DriverHandle, Packet, Pipeline, PipelineBuilder, Priority, ProcessOutcome,
    Producer, ProducerHandle, ProductionMode, Registry, Translator, TransportRegistry,
    consumer_fn, coupler_fn, producer_fn, spawn_driver, start_producer,
};

// 领域帧
pub use crate::frames::*;

// 协议/传输层
pub use fieldlink_protocol::{RadioMessage, RobotCommand, VelocityCommand};
pub use fieldlink_transport::{SendMethod, Sender};

// 配置与拓扑
pub use crate::topology::StandardTopology;
pub use fieldlink_tools::{FieldlinkConfig, PipelineSection};

// 错误类型
pub use crate::topology::TopologyError;
pub use fieldlink_driver::{DriverError, StageError};
pub use fieldlink_protocol::ProtocolError;
pub use fieldlink_transport::TransportError;
