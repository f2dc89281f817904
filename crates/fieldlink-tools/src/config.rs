//! # 配置模型
//!
//! `fieldlink.toml` 的数据结构。所有段落都是可选的，缺省时使用默认值：
//!
//! ```toml
//! defaults = ["udp"]
//!
//! [pipeline]
//! queue_capacity = 64
//! stage_budget_ms = 20      # 0 表示不限制
//! consumer_dispatch = "sequential"
//! idle_wait_ms = 2
//!
//! [[transport]]
//! method = "udp"
//! address = "192.168.1.50:10001"
//!
//! [[transport]]
//! method = "serial"
//! device = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```
//!
//! 引擎本身从不读取文件；这里的值由调用方注入 Pipeline 构建器和发送器构造函数。

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use fieldlink_transport::SendMethod;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 串口默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML 解析失败
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML 序列化失败
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// 字段取值无效
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldlinkConfig {
    /// 未指定传输方式时使用的默认方式
    pub defaults: Vec<SendMethod>,

    /// Pipeline 参数
    pub pipeline: PipelineSection,

    /// 传输端点
    #[serde(rename = "transport")]
    pub transports: Vec<TransportEntry>,
}

impl FieldlinkConfig {
    /// 从 TOML 字符串解析（不做校验）
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 序列化为 TOML 字符串
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 从文件加载并校验
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("配置文件无效: {}", path.display()))?;
        Ok(config)
    }

    /// 保存到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }

    /// 校验配置
    ///
    /// - Pipeline 参数合法
    /// - 每个传输端点带有其方式所需的字段
    /// - 传输方式不重复
    /// - 每个默认方式都有对应的传输端点
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.transports {
            entry.validate()?;
            if !seen.insert(entry.method) {
                return Err(ConfigError::Invalid(format!(
                    "transport '{}' is configured more than once",
                    entry.method
                )));
            }
        }

        for method in &self.defaults {
            if !seen.contains(method) {
                return Err(ConfigError::Invalid(format!(
                    "default method '{}' has no [[transport]] entry",
                    method
                )));
            }
        }

        Ok(())
    }

    /// 查找某种方式的传输端点
    pub fn transport(&self, method: SendMethod) -> Option<&TransportEntry> {
        self.transports.iter().find(|entry| entry.method == method)
    }
}

/// Consumer 分发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Sequential,
    Parallel,
}

/// `[pipeline]` 段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// 队列容量
    pub queue_capacity: usize,

    /// 阶段时间预算（毫秒），0 表示不限制
    pub stage_budget_ms: u64,

    /// Consumer 分发方式
    pub consumer_dispatch: DispatchMode,

    /// 驱动线程空闲等待（毫秒）
    pub idle_wait_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            stage_budget_ms: 20,
            consumer_dispatch: DispatchMode::Sequential,
            idle_wait_ms: 2,
        }
    }
}

impl PipelineSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.idle_wait_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.idle_wait_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 阶段时间预算，`None` 表示不限制
    pub fn stage_budget(&self) -> Option<Duration> {
        (self.stage_budget_ms > 0).then(|| Duration::from_millis(self.stage_budget_ms))
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

/// `[[transport]]` 条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportEntry {
    pub method: SendMethod,

    /// `host:port`（udp / tcp / wifi_direct）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// 设备路径（serial / bluetooth）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// 波特率（serial / bluetooth）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,

    /// 连接超时（毫秒，tcp）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl TransportEntry {
    /// 网络端点
    pub fn network(method: SendMethod, address: impl Into<String>) -> Self {
        Self {
            method,
            address: Some(address.into()),
            device: None,
            baud_rate: None,
            connect_timeout_ms: None,
        }
    }

    /// 串口端点
    pub fn serial(method: SendMethod, device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            method,
            address: None,
            device: Some(device.into()),
            baud_rate: Some(baud_rate),
            connect_timeout_ms: None,
        }
    }

    /// 该方式是否使用串口设备
    pub fn uses_device(&self) -> bool {
        matches!(self.method, SendMethod::Serial | SendMethod::Bluetooth)
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uses_device() {
            match self.device.as_deref() {
                Some(device) if !device.trim().is_empty() => {},
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "transport '{}' requires `device`",
                        self.method
                    )));
                },
            }
            if self.baud_rate == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "transport '{}' baud_rate must be positive",
                    self.method
                )));
            }
        } else {
            match self.address.as_deref() {
                Some(address) if address.contains(':') => {},
                Some(address) => {
                    return Err(ConfigError::Invalid(format!(
                        "transport '{}' address '{}' must be host:port",
                        self.method, address
                    )));
                },
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "transport '{}' requires `address`",
                        self.method
                    )));
                },
            }
        }
        Ok(())
    }
}
