//! 协议常量定义
//!
//! 集中定义线上格式相关的常量，避免在代码中散落"魔法数"。

/// 控制指令帧总长度（字节）
pub const COMMAND_FRAME_LEN: usize = 15;

/// 参与校验的字节数（Byte 0-13）
pub const CHECKSUM_SPAN: usize = COMMAND_FRAME_LEN - 1;

// === 字段偏移（小端） ===

/// Byte 0: 消息类型
pub const OFFSET_MESSAGE_TYPE: usize = 0;
/// Byte 1: 机器人 ID
pub const OFFSET_ROBOT_ID: usize = 1;
/// Byte 2-3: 运动方向（i16，度）
pub const OFFSET_DIRECTION: usize = 2;
/// Byte 4-5: 运动速度（u16）
pub const OFFSET_DIRECTION_SPEED: usize = 4;
/// Byte 6-7: 旋转速度（i16）
pub const OFFSET_ROTATION_SPEED: usize = 6;
/// Byte 8: 踢球力度（i8，负值表示挑射）
pub const OFFSET_KICK_POWER: usize = 8;
/// Byte 9: 盘带开关（0/1）
pub const OFFSET_DRIBBLE: usize = 9;
/// Byte 10-11: 行进距离（u16，未使用时为 0）
pub const OFFSET_TRAVEL_DISTANCE: usize = 10;
/// Byte 12-13: 旋转角度（i16，未使用时为 0）
pub const OFFSET_ROTATION_ANGLE: usize = 12;
/// Byte 14: 校验和（Byte 0-13 异或）
pub const OFFSET_CHECKSUM: usize = 14;

/// 运动控制指令的消息类型
pub const MESSAGE_TYPE_MOVE: u8 = 0x01;

/// 踢球力度缩放系数
///
/// 策略层输出的踢球速度乘以该系数后写入 Byte 8。
pub const MAX_KICK_SPEED: f64 = 0.7;
