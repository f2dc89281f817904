//! UDP 数据报发送器
//!
//! 每条 `RobotCommand` 编码为一个 15 字节数据报，依次发往基站地址。
//! 任意一条发送失败时整体返回 `TransportError::Partial`，但其余指令照常发送。
//! Wi-Fi Direct 链路在主机侧同样表现为 UDP，复用本发送器。

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{RadioMessage, Sender, TransportDeviceError, TransportDeviceErrorKind, TransportError};

/// UDP 发送器
#[derive(Debug)]
pub struct UdpSender {
    name: String,
    target: SocketAddr,
    /// `None` 表示已注销
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpSender {
    /// 创建发往 `address` 的 UDP 发送器
    ///
    /// # 参数
    /// - `address`: 目标地址（如 `"192.168.1.10:10010"`，支持主机名）
    ///
    /// # 错误
    /// - `TransportError::Device`（`InvalidAddress`）：地址无法解析
    /// - `TransportError::Io`：本地 socket 绑定失败
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use fieldlink_transport::{Sender, UdpSender};
    ///
    /// let sender = UdpSender::new("127.0.0.1:10010").unwrap();
    /// assert_eq!(sender.name(), "udp");
    /// ```
    pub fn new(address: impl AsRef<str>) -> Result<Self, TransportError> {
        let address = address.as_ref();
        let target = address
            .to_socket_addrs()
            .map_err(|e| {
                TransportDeviceError::new(
                    TransportDeviceErrorKind::InvalidAddress,
                    format!("Invalid UDP address '{}': {}", address, e),
                )
            })?
            .next()
            .ok_or_else(|| {
                TransportDeviceError::new(
                    TransportDeviceErrorKind::InvalidAddress,
                    format!("UDP address '{}' resolved to nothing", address),
                )
            })?;

        let bind_addr = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr)?;
        debug!("UDP sender bound to {:?}, target {}", socket.local_addr().ok(), target);

        Ok(Self {
            name: "udp".to_string(),
            target,
            socket: Mutex::new(Some(socket)),
        })
    }

    /// 修改日志名称（例如 `"wifi_direct"`）
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }
}

impl Sender for UdpSender {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;

        let total = message.len();
        let mut failed = 0;
        for frame in message.frames() {
            match socket.send_to(frame.as_bytes(), self.target) {
                Ok(_) => trace!("[{}] sent frame to {}", self.name, self.target),
                Err(e) => {
                    warn!("[{}] could not send frame to {}: {}", self.name, self.target, e);
                    failed += 1;
                },
            }
        }

        if failed > 0 {
            return Err(TransportError::Partial { failed, total });
        }
        Ok(())
    }

    fn unregister(&self) -> Result<(), TransportError> {
        if self.socket.lock().take().is_some() {
            debug!("[{}] socket to {} closed", self.name, self.target);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink_protocol::{COMMAND_FRAME_LEN, RobotCommand};
    use std::time::Duration;

    fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    #[test]
    fn test_udp_sender_invalid_address() {
        let err = UdpSender::new("not an address").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Device(TransportDeviceError {
                kind: TransportDeviceErrorKind::InvalidAddress,
                ..
            })
        ));
    }

    #[test]
    fn test_udp_sender_one_datagram_per_command() {
        let rx = receiver();
        let sender = UdpSender::new(rx.local_addr().unwrap().to_string()).unwrap();

        let message = RadioMessage::new()
            .with_command(RobotCommand::movement(1, 0, 100, 0, 0, false))
            .with_command(RobotCommand::movement(2, 90, 200, 0, 0, true));
        sender.send(&message).unwrap();

        let mut buf = [0u8; 64];
        for expected in message.frames() {
            let (len, _) = rx.recv_from(&mut buf).unwrap();
            assert_eq!(len, COMMAND_FRAME_LEN);
            assert_eq!(&buf[..len], expected.as_bytes());
        }
    }

    #[test]
    fn test_udp_sender_empty_message_is_ok() {
        let rx = receiver();
        let sender = UdpSender::new(rx.local_addr().unwrap().to_string()).unwrap();
        assert!(sender.send(&RadioMessage::new()).is_ok());
    }

    #[test]
    fn test_udp_sender_unregister_closes() {
        let rx = receiver();
        let sender = UdpSender::new(rx.local_addr().unwrap().to_string())
            .unwrap()
            .with_name("wifi_direct");
        assert_eq!(sender.name(), "wifi_direct");
        assert!(sender.is_open());

        sender.unregister().unwrap();
        assert!(!sender.is_open());
        assert!(matches!(
            sender.send(&RadioMessage::single(RobotCommand::stop(1))),
            Err(TransportError::Closed)
        ));

        // 重复注销是安全的
        assert!(sender.unregister().is_ok());
    }
}
