//! TCP 流发送器
//!
//! 一个控制周期的全部指令首尾相接，通过一次 `write_all` 写出。
//! 连接断开后，下一次 `send` 会尝试重连一次。

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{RadioMessage, Sender, TransportDeviceError, TransportDeviceErrorKind, TransportError};

/// 默认连接超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// 默认写超时
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

enum Link {
    Connected(TcpStream),
    /// 上次写入失败，等待重连
    Broken,
    Closed,
}

/// TCP 发送器
pub struct TcpSender {
    target: SocketAddr,
    connect_timeout: Duration,
    link: Mutex<Link>,
}

impl TcpSender {
    /// 连接到 `address`
    ///
    /// # 参数
    /// - `address`: 目标地址（`host:port`）
    /// - `connect_timeout`: 连接超时
    pub fn connect(
        address: impl AsRef<str>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let address = address.as_ref();
        let target = address
            .to_socket_addrs()
            .map_err(|e| {
                TransportDeviceError::new(
                    TransportDeviceErrorKind::InvalidAddress,
                    format!("Invalid TCP address '{}': {}", address, e),
                )
            })?
            .next()
            .ok_or_else(|| {
                TransportDeviceError::new(
                    TransportDeviceErrorKind::InvalidAddress,
                    format!("TCP address '{}' resolved to nothing", address),
                )
            })?;

        let stream = open_stream(target, connect_timeout)?;
        info!("TCP sender connected to {}", target);

        Ok(Self {
            target,
            connect_timeout,
            link: Mutex::new(Link::Connected(stream)),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.link.lock(), Link::Connected(_))
    }
}

fn open_stream(target: SocketAddr, timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect_timeout(&target, timeout).map_err(|e| {
        let kind = match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                TransportDeviceErrorKind::Unreachable
            },
            std::io::ErrorKind::PermissionDenied => TransportDeviceErrorKind::AccessDenied,
            _ => TransportDeviceErrorKind::Backend,
        };
        TransportDeviceError::new(kind, format!("Failed to connect to {}: {}", target, e))
    })?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(DEFAULT_WRITE_TIMEOUT))?;
    Ok(stream)
}

impl Sender for TcpSender {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        let mut link = self.link.lock();

        if matches!(*link, Link::Broken) {
            debug!("TCP link to {} broken, reconnecting", self.target);
            *link = Link::Connected(open_stream(self.target, self.connect_timeout)?);
        }

        let stream = match &mut *link {
            Link::Connected(stream) => stream,
            Link::Broken | Link::Closed => return Err(TransportError::Closed),
        };

        let buffer = message.encode_stream();
        let result = stream.write_all(&buffer).and_then(|_| stream.flush());
        if let Err(e) = result {
            warn!("TCP write to {} failed: {}", self.target, e);
            *link = Link::Broken;
            return Err(match e.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    TransportError::Timeout
                },
                _ => TransportError::Io(e),
            });
        }
        Ok(())
    }

    fn unregister(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        if let Link::Connected(stream) = std::mem::replace(&mut *link, Link::Closed) {
            // 对端可能已经关闭，忽略 NotConnected
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both)
                && e.kind() != std::io::ErrorKind::NotConnected
            {
                return Err(TransportError::Io(e));
            }
            debug!("TCP link to {} closed", self.target);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tcp"
    }
}
