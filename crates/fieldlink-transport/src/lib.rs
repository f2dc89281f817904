//! # Fieldlink Transport Layer
//!
//! 出站传输抽象层：把一个控制周期的 `RadioMessage` 发送到具体介质。
//!
//! ## 模块
//!
//! - `method`: 传输方式标识（`SendMethod`）
//! - `udp`: UDP 数据报发送器（也用于 Wi-Fi Direct）
//! - `tcp`: TCP 流发送器
//! - `serial`: 串口发送器（USB 串口 / 蓝牙 RFCOMM，需要 `serial` feature）
//! - `mock`: 记录调用的测试发送器（需要 `mock` feature）
//!
//! 所有发送器都实现 [`Sender`]，由上层的传输注册表按 `SendMethod` 分发。

use thiserror::Error;

pub use fieldlink_protocol::{CommandFrame, RadioMessage, RobotCommand};

pub mod method;
pub mod tcp;
pub mod udp;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "mock")]
pub mod mock;

pub use method::SendMethod;
pub use tcp::TcpSender;
pub use udp::UdpSender;

#[cfg(feature = "serial")]
pub use serial::SerialSender;

#[cfg(feature = "mock")]
pub use mock::MockSender;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Protocol Error: {0}")]
    Protocol(#[from] fieldlink_protocol::ProtocolError),
    #[error("Write timeout")]
    Timeout,
    #[error("Transport closed")]
    Closed,
    #[error("{failed} of {total} frames failed to send")]
    Partial { failed: usize, total: usize },
}

impl TransportError {
    /// 是否为不可恢复的错误（重试无意义）
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    InvalidAddress,
    UnsupportedConfig,
    Unreachable,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportDeviceErrorKind::NoDevice
                | TransportDeviceErrorKind::AccessDenied
                | TransportDeviceErrorKind::NotFound
                | TransportDeviceErrorKind::InvalidAddress
        )
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// 出站发送器
///
/// 每个 `SendMethod` 对应一个发送器实例。传输注册表会在多个线程中
/// 并行调用不同发送器的 `send`，因此实现必须是 `Send + Sync`，
/// 内部可变状态（socket、串口句柄）需要自行加锁。
///
/// 实现方在内部捕获介质错误并以 `Err` 返回；注册表把 `Err` 视为
/// 这一路发送失败，不会影响其他传输方式。
pub trait Sender: Send + Sync {
    /// 发送一个控制周期的消息
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError>;

    /// 释放底层资源（关闭 socket / 串口）
    ///
    /// 释放后再调用 `send` 返回 `TransportError::Closed`。重复释放是安全的。
    fn unregister(&self) -> Result<(), TransportError>;

    /// 用于日志的名称
    fn name(&self) -> &str;
}

impl<S: Sender + ?Sized> Sender for std::sync::Arc<S> {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }

    fn unregister(&self) -> Result<(), TransportError> {
        (**self).unregister()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<S: Sender + ?Sized> Sender for Box<S> {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }

    fn unregister(&self) -> Result<(), TransportError> {
        (**self).unregister()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
