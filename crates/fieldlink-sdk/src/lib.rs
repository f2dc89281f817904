//! Fieldlink SDK - RoboCup 机器人控制数据流 SDK
//!
//! 把视觉、场地几何、裁判盒等输入经过类型化 Pipeline 逐级转换，
//! 最终以 15 字节指令帧经 UDP / 串口 / 蓝牙 / TCP 发往场上机器人。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 指令帧编码/解码与校验
//! - **传输层** (`transport`): 发送器抽象与具体介质
//! - **引擎层** (`driver`): Packet、Pipeline、阶段、注册表、Translator、传输扇出
//! - **配置** (`tools`): `fieldlink.toml` 配置模型
//! - **拓扑** (`topology`): 五条标准 Pipeline 的装配
//!
//! # 快速开始
//!
//! ```rust
//! use fieldlink_sdk::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::new());
//! let transports = Arc::new(TransportRegistry::new());
//! let topology = StandardTopology::build(&registry, &PipelineSection::default(), transports).unwrap();
//!
//! topology.strategy.push(StrategyFrame::default());
//! ```

pub mod frames;
pub mod logging;
pub mod prelude;
pub mod topology;

pub use fieldlink_driver as driver;
pub use fieldlink_protocol as protocol;
pub use fieldlink_tools as tools;
pub use fieldlink_transport as transport;

pub use logging::init_logging;

// 引擎层常用类型
pub use fieldlink_driver::{
    Consumer, Coupler, DriverError, Packet, Pipeline, PipelineBuilder, PipelineConfig, Priority,
    ProcessOutcome, Producer, ProductionMode, Registry, StageError, Translator, TransportRegistry,
};

// 协议/传输层
pub use fieldlink_protocol::{ProtocolError, RadioMessage, RobotCommand, VelocityCommand};
pub use fieldlink_transport::{SendMethod, Sender, TransportError};

// 配置
pub use fieldlink_tools::FieldlinkConfig;

pub use frames::{DetectionFrame, GeometryFrame, RadioPacket, RefereeState, StrategyFrame};
pub use topology::{StandardTopology, TopologyError};
