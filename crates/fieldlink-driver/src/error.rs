//! 驱动层错误类型定义

use std::time::Duration;

use fieldlink_protocol::ProtocolError;
use fieldlink_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 只用于构建期与线程管理等可以向调用方传播的场景。
/// 数据流边界上的失败（变换、消费、发送）一律折算为布尔结果，不会以此类型传播。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 线程创建失败
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 同名同类型的 Pipeline 已存在
    #[error("Pipeline '{name}' already exists for payload {payload}")]
    DuplicatePipeline { name: String, payload: &'static str },

    /// Pipeline 已关闭
    #[error("Pipeline '{0}' is closed")]
    PipelineClosed(String),

    /// 注册表已释放
    #[error("Registry dropped")]
    RegistryDropped,

    /// 线程退出超时
    #[error("Thread '{name}' failed to shut down within {timeout:?}")]
    JoinTimeout { name: String, timeout: Duration },

    /// 无效配置
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// 单个阶段（Producer / Coupler / Consumer）的失败
///
/// 阶段实现通过返回 `Err(StageError)` 报告失败；引擎在边界处记录日志并按
/// 各阶段的策略处理（Coupler 透传原始包，Producer 跳过本次调用）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// 阶段主动报告的失败
    #[error("{0}")]
    Failed(String),

    /// 阶段内部 panic（被边界捕获）
    #[error("panicked: {0}")]
    Panicked(String),

    /// 超出时间预算
    #[error("exceeded time budget of {0:?}")]
    TimedOut(Duration),

    /// 协议编码/解码失败
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
}

impl StageError {
    pub fn failed(message: impl Into<String>) -> Self {
        StageError::Failed(message.into())
    }

    /// 从 `catch_unwind` 的载荷中提取 panic 信息
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        StageError::Panicked(message)
    }
}
