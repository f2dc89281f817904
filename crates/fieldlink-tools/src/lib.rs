//! # Fieldlink Tools - 共享配置模型
//!
//! **依赖原则**: 只依赖 `fieldlink-transport` 的传输标识，不依赖 `fieldlink-driver`
//!
//! ## 包含模块
//!
//! - `config` - `fieldlink.toml` 配置模型（serde + toml）
//!
//! ## 使用示例
//!
//! ```
//! use fieldlink_tools::FieldlinkConfig;
//!
//! let config = FieldlinkConfig::from_toml_str(r#"
//! defaults = ["udp"]
//!
//! [[transport]]
//! method = "udp"
//! address = "127.0.0.1:10001"
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! ```

pub mod config;

pub use config::{
    ConfigError, DEFAULT_BAUD_RATE, DispatchMode, FieldlinkConfig, PipelineSection, TransportEntry,
};
