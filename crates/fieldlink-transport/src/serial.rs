//! 串口发送器
//!
//! 基站通过 USB 串口接入主机；蓝牙 RFCOMM 链路在主机侧同样表现为串口设备
//! （Linux 下的 `/dev/rfcomm0`），两者共用本发送器。
//! 一个控制周期的全部指令首尾相接写出。

use std::io::Write;
use std::time::Duration;

use parking_lot::Mutex;
use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::{RadioMessage, Sender, TransportDeviceError, TransportDeviceErrorKind, TransportError};

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// 默认写超时
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// 串口发送器
pub struct SerialSender {
    name: String,
    device: String,
    baud_rate: u32,
    /// `None` 表示已注销
    port: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialSender {
    /// 打开串口设备
    ///
    /// # 参数
    /// - `device`: 设备路径（如 `"/dev/ttyACM0"`、`"COM3"`）
    /// - `baud_rate`: 波特率
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use fieldlink_transport::serial::{DEFAULT_BAUD_RATE, SerialSender};
    ///
    /// let sender = SerialSender::open("/dev/ttyACM0", DEFAULT_BAUD_RATE).unwrap();
    /// ```
    pub fn open(device: impl Into<String>, baud_rate: u32) -> Result<Self, TransportError> {
        let device = device.into();
        let port = serialport::new(&device, baud_rate)
            .timeout(DEFAULT_WRITE_TIMEOUT)
            .open()
            .map_err(|e| map_serial_error(&device, e))?;
        info!("Serial port {} opened at {} baud", device, baud_rate);

        Ok(Self {
            name: "serial".to_string(),
            device,
            baud_rate,
            port: Mutex::new(Some(port)),
        })
    }

    /// 修改日志名称（例如 `"bluetooth"`）
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }
}

fn map_serial_error(device: &str, error: serialport::Error) -> TransportError {
    let kind = match error.kind() {
        serialport::ErrorKind::NoDevice => TransportDeviceErrorKind::NoDevice,
        serialport::ErrorKind::InvalidInput => TransportDeviceErrorKind::UnsupportedConfig,
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            TransportDeviceErrorKind::NotFound
        },
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportDeviceErrorKind::AccessDenied
        },
        serialport::ErrorKind::Io(_) => TransportDeviceErrorKind::Backend,
        serialport::ErrorKind::Unknown => TransportDeviceErrorKind::Unknown,
    };
    TransportError::Device(TransportDeviceError::new(
        kind,
        format!("Failed to open serial port '{}': {}", device, error),
    ))
}

impl Sender for SerialSender {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::Closed)?;

        let buffer = message.encode_stream();
        if let Err(e) = port.write_all(&buffer).and_then(|_| port.flush()) {
            warn!("[{}] write to {} failed: {}", self.name, self.device, e);
            return Err(match e.kind() {
                std::io::ErrorKind::TimedOut => TransportError::Timeout,
                _ => TransportError::Io(e),
            });
        }
        Ok(())
    }

    fn unregister(&self) -> Result<(), TransportError> {
        if self.port.lock().take().is_some() {
            debug!("[{}] serial port {} closed", self.name, self.device);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
