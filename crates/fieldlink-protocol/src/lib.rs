//! # Fieldlink Protocol
//!
//! 机器人无线控制指令协议定义（无 I/O 依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（帧长、偏移、消息类型）
//! - `command`: 15 字节控制指令帧的编码/解码与校验
//! - `velocity`: 策略层速度指令到线上指令的换算
//! - `message`: 一个控制周期内发往全队的指令集合
//!
//! ## 字节序
//!
//! 线上格式使用小端字节序（Little Endian）。
//! 本模块提供了字节序转换工具函数。

pub mod command;
pub mod constants;
pub mod message;
pub mod velocity;

// 重新导出常用类型
pub use command::*;
pub use constants::*;
pub use message::*;
pub use velocity::*;

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// 字节序转换工具函数
///
/// 线上格式使用小端字节序，这些函数用于在协议层进行字节序转换。
///
/// 小端字节序转 i16
pub fn bytes_to_i16_le(bytes: [u8; 2]) -> i16 {
    i16::from_le_bytes(bytes)
}

/// 小端字节序转 u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// i16 转小端字节序
pub fn i16_to_bytes_le(value: i16) -> [u8; 2] {
    value.to_le_bytes()
}

/// u16 转小端字节序
pub fn u16_to_bytes_le(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}
