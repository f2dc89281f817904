//! 传输方式标识

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 逻辑传输方式
///
/// 每种方式在传输注册表中最多对应一个发送器。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum SendMethod {
    Udp = 0,
    /// USB 串口
    #[cfg_attr(feature = "serde", serde(alias = "usb"))]
    Serial = 1,
    /// 蓝牙 RFCOMM（在主机侧表现为串口）
    Bluetooth = 2,
    Tcp = 3,
    WifiDirect = 4,
}

impl SendMethod {
    /// 全部传输方式
    pub const ALL: [SendMethod; 5] = [
        SendMethod::Udp,
        SendMethod::Serial,
        SendMethod::Bluetooth,
        SendMethod::Tcp,
        SendMethod::WifiDirect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SendMethod::Udp => "udp",
            SendMethod::Serial => "serial",
            SendMethod::Bluetooth => "bluetooth",
            SendMethod::Tcp => "tcp",
            SendMethod::WifiDirect => "wifi_direct",
        }
    }

    /// 是否为数据报介质（每条指令单独一个数据报）
    pub fn is_datagram(&self) -> bool {
        matches!(self, SendMethod::Udp | SendMethod::WifiDirect)
    }
}

impl fmt::Display for SendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知传输方式名称
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown send method '{0}' (expected one of: udp, serial, usb, bluetooth, tcp, wifi_direct)")]
pub struct ParseSendMethodError(pub String);

impl FromStr for SendMethod {
    type Err = ParseSendMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "udp" => Ok(SendMethod::Udp),
            "serial" | "usb" => Ok(SendMethod::Serial),
            "bluetooth" | "bt" => Ok(SendMethod::Bluetooth),
            "tcp" => Ok(SendMethod::Tcp),
            "wifi_direct" | "wifidirect" => Ok(SendMethod::WifiDirect),
            _ => Err(ParseSendMethodError(s.to_string())),
        }
    }
}
