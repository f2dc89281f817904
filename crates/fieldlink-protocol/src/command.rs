//! 控制指令帧
//!
//! 定义发往机器人的 15 字节控制指令（小端字节序），
//! 提供编码为 `CommandFrame` 以及从原始字节解码的方法。
//!
//! # 线上格式
//!
//! ```text
//! | offset | size | field                      |
//! |--------|------|----------------------------|
//! | 0      | 1    | 消息类型                   |
//! | 1      | 1    | 机器人 ID                  |
//! | 2      | 2    | 运动方向 (i16, 度)         |
//! | 4      | 2    | 运动速度 (u16)             |
//! | 6      | 2    | 旋转速度 (i16)             |
//! | 8      | 1    | 踢球力度 (i8, 负值为挑射)  |
//! | 9      | 1    | 盘带 (0/1)                 |
//! | 10     | 2    | 行进距离 (u16)             |
//! | 12     | 2    | 旋转角度 (i16)             |
//! | 14     | 1    | 校验和: Byte 0-13 异或     |
//! ```

use crate::constants::*;
use crate::{ProtocolError, bytes_to_i16_le, bytes_to_u16_le, i16_to_bytes_le, u16_to_bytes_le};

/// 计算校验和
///
/// 对输入的全部字节做异或，结果截断到 8 位。
/// 编码时传入 Byte 0-13，得到 Byte 14。
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// 已编码的控制指令帧（固定 15 字节）
///
/// `Copy` 类型，可以零成本地在发送线程之间传递。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFrame([u8; COMMAND_FRAME_LEN]);

impl CommandFrame {
    /// 从原始字节构建（不做校验）
    pub const fn from_bytes(bytes: [u8; COMMAND_FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// 获取原始字节
    pub fn as_bytes(&self) -> &[u8; COMMAND_FRAME_LEN] {
        &self.0
    }

    /// 消费并返回原始字节
    pub fn into_bytes(self) -> [u8; COMMAND_FRAME_LEN] {
        self.0
    }

    /// 帧内携带的校验和（Byte 14）
    pub fn stored_checksum(&self) -> u8 {
        self.0[OFFSET_CHECKSUM]
    }

    /// 按 Byte 0-13 重新计算的校验和
    pub fn computed_checksum(&self) -> u8 {
        checksum(&self.0[..CHECKSUM_SPAN])
    }

    /// 校验和是否一致
    pub fn is_valid(&self) -> bool {
        self.stored_checksum() == self.computed_checksum()
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for CommandFrame {
    type Error = ProtocolError;

    /// 从字节切片构建，要求长度恰好为 15 且校验和正确
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; COMMAND_FRAME_LEN] =
            bytes.try_into().map_err(|_| ProtocolError::InvalidLength {
                expected: COMMAND_FRAME_LEN,
                actual: bytes.len(),
            })?;
        let frame = CommandFrame(raw);
        if !frame.is_valid() {
            return Err(ProtocolError::ChecksumMismatch {
                expected: frame.computed_checksum(),
                actual: frame.stored_checksum(),
            });
        }
        Ok(frame)
    }
}

/// 单个机器人的控制指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotCommand {
    pub message_type: u8,     // Byte 0
    pub robot_id: u8,         // Byte 1
    pub direction: i16,       // Byte 2-3
    pub direction_speed: u16, // Byte 4-5
    pub rotation_speed: i16,  // Byte 6-7
    pub kick_power: i8,       // Byte 8
    pub dribble: bool,        // Byte 9
    pub travel_distance: u16, // Byte 10-11
    pub rotation_angle: i16,  // Byte 12-13
}

impl RobotCommand {
    /// 创建运动控制指令（行进距离/旋转角度填充 0）
    pub fn movement(
        robot_id: u8,
        direction: i16,
        direction_speed: u16,
        rotation_speed: i16,
        kick_power: i8,
        dribble: bool,
    ) -> Self {
        Self {
            message_type: MESSAGE_TYPE_MOVE,
            robot_id,
            direction,
            direction_speed,
            rotation_speed,
            kick_power,
            dribble,
            travel_distance: 0,
            rotation_angle: 0,
        }
    }

    /// 创建停止指令（所有运动字段为 0）
    pub fn stop(robot_id: u8) -> Self {
        Self::movement(robot_id, 0, 0, 0, 0, false)
    }

    /// 设置行进距离和旋转角度
    pub fn with_travel(mut self, travel_distance: u16, rotation_angle: i16) -> Self {
        self.travel_distance = travel_distance;
        self.rotation_angle = rotation_angle;
        self
    }

    /// 是否为挑射（踢球力度为负）
    pub fn is_chip_kick(&self) -> bool {
        self.kick_power < 0
    }

    /// 编码为 15 字节控制帧
    pub fn to_frame(self) -> CommandFrame {
        let mut data = [0u8; COMMAND_FRAME_LEN];
        data[OFFSET_MESSAGE_TYPE] = self.message_type;
        data[OFFSET_ROBOT_ID] = self.robot_id;
        data[OFFSET_DIRECTION..OFFSET_DIRECTION + 2]
            .copy_from_slice(&i16_to_bytes_le(self.direction));
        data[OFFSET_DIRECTION_SPEED..OFFSET_DIRECTION_SPEED + 2]
            .copy_from_slice(&u16_to_bytes_le(self.direction_speed));
        data[OFFSET_ROTATION_SPEED..OFFSET_ROTATION_SPEED + 2]
            .copy_from_slice(&i16_to_bytes_le(self.rotation_speed));
        data[OFFSET_KICK_POWER] = self.kick_power as u8;
        data[OFFSET_DRIBBLE] = u8::from(self.dribble);
        data[OFFSET_TRAVEL_DISTANCE..OFFSET_TRAVEL_DISTANCE + 2]
            .copy_from_slice(&u16_to_bytes_le(self.travel_distance));
        data[OFFSET_ROTATION_ANGLE..OFFSET_ROTATION_ANGLE + 2]
            .copy_from_slice(&i16_to_bytes_le(self.rotation_angle));
        data[OFFSET_CHECKSUM] = checksum(&data[..CHECKSUM_SPAN]);

        CommandFrame(data)
    }

    /// 从原始字节解码（校验长度、校验和、盘带字段）
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let frame = CommandFrame::try_from(bytes)?;
        Self::try_from(frame)
    }
}

impl TryFrom<CommandFrame> for RobotCommand {
    type Error = ProtocolError;

    fn try_from(frame: CommandFrame) -> Result<Self, Self::Error> {
        let data = frame.as_bytes();
        let dribble = match data[OFFSET_DRIBBLE] {
            0 => false,
            1 => true,
            value => {
                return Err(ProtocolError::InvalidValue {
                    field: "dribble".to_string(),
                    value,
                });
            },
        };

        Ok(Self {
            message_type: data[OFFSET_MESSAGE_TYPE],
            robot_id: data[OFFSET_ROBOT_ID],
            direction: bytes_to_i16_le([data[OFFSET_DIRECTION], data[OFFSET_DIRECTION + 1]]),
            direction_speed: bytes_to_u16_le([
                data[OFFSET_DIRECTION_SPEED],
                data[OFFSET_DIRECTION_SPEED + 1],
            ]),
            rotation_speed: bytes_to_i16_le([
                data[OFFSET_ROTATION_SPEED],
                data[OFFSET_ROTATION_SPEED + 1],
            ]),
            kick_power: data[OFFSET_KICK_POWER] as i8,
            dribble,
            travel_distance: bytes_to_u16_le([
                data[OFFSET_TRAVEL_DISTANCE],
                data[OFFSET_TRAVEL_DISTANCE + 1],
            ]),
            rotation_angle: bytes_to_i16_le([
                data[OFFSET_ROTATION_ANGLE],
                data[OFFSET_ROTATION_ANGLE + 1],
            ]),
        })
    }
}

impl From<RobotCommand> for CommandFrame {
    fn from(command: RobotCommand) -> Self {
        command.to_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_command() -> RobotCommand {
        RobotCommand::movement(7, -90, 1200, -35, 49, true).with_travel(500, 180)
    }

    #[test]
    fn test_encode_layout() {
        let frame = sample_command().to_frame();
        let bytes = frame.as_bytes();

        assert_eq!(bytes[0], MESSAGE_TYPE_MOVE);
        assert_eq!(bytes[1], 7);
        assert_eq!(&bytes[2..4], &(-90i16).to_le_bytes());
        assert_eq!(&bytes[4..6], &1200u16.to_le_bytes());
        assert_eq!(&bytes[6..8], &(-35i16).to_le_bytes());
        assert_eq!(bytes[8], 49);
        assert_eq!(bytes[9], 1);
        assert_eq!(&bytes[10..12], &500u16.to_le_bytes());
        assert_eq!(&bytes[12..14], &180i16.to_le_bytes());
        assert_eq!(bytes[14], checksum(&bytes[..14]));
    }

    #[test]
    fn test_known_checksum() {
        // 0x01 ^ 0x03 ^ 0x5A ^ 0x00 ^ 0x64 ^ 0x00 = 0x3C
        let command = RobotCommand::movement(3, 90, 100, 0, 0, false);
        let frame = command.to_frame();
        assert_eq!(frame.as_bytes()[..6], [0x01, 0x03, 0x5A, 0x00, 0x64, 0x00]);
        assert_eq!(frame.stored_checksum(), 0x3C);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_stop_command_checksum() {
        let frame = RobotCommand::stop(0).to_frame();
        // 只有消息类型字节非零
        assert_eq!(frame.stored_checksum(), MESSAGE_TYPE_MOVE);
    }

    #[test]
    fn test_decode_roundtrip() {
        let command = sample_command();
        let decoded = RobotCommand::decode(command.to_frame().as_bytes()).unwrap();
        assert_eq!(decoded, command);
        assert!(!decoded.is_chip_kick());
    }

    #[test]
    fn test_decode_invalid_length() {
        let err = RobotCommand::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidLength {
                expected: 15,
                actual: 10
            }
        );
    }

    #[test]
    fn test_decode_bad_checksum() {
        let mut bytes = sample_command().to_frame().into_bytes();
        bytes[14] ^= 0xFF;
        assert!(matches!(
            RobotCommand::decode(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_dribble() {
        let mut bytes = sample_command().to_frame().into_bytes();
        bytes[OFFSET_DRIBBLE] = 2;
        bytes[OFFSET_CHECKSUM] = checksum(&bytes[..CHECKSUM_SPAN]);
        let err = RobotCommand::decode(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidValue { ref field, value: 2 } if field == "dribble"
        ));
    }

    #[test]
    fn test_chip_kick_sign() {
        let command = RobotCommand::movement(1, 0, 0, 0, -20, false);
        assert!(command.is_chip_kick());
        let frame = command.to_frame();
        assert_eq!(frame.as_bytes()[OFFSET_KICK_POWER], (-20i8) as u8);
        assert_eq!(RobotCommand::try_from(frame).unwrap().kick_power, -20);
    }

    proptest! {
        #[test]
        fn prop_checksum_matches_prefix(prefix in proptest::array::uniform14(any::<u8>())) {
            let mut bytes = [0u8; COMMAND_FRAME_LEN];
            bytes[..CHECKSUM_SPAN].copy_from_slice(&prefix);
            bytes[OFFSET_CHECKSUM] = checksum(&prefix);

            let frame = CommandFrame::try_from(&bytes[..]).unwrap();
            prop_assert_eq!(frame.computed_checksum(), bytes[OFFSET_CHECKSUM]);
        }

        #[test]
        fn prop_single_bit_flip_changes_checksum(
            prefix in proptest::array::uniform14(any::<u8>()),
            byte in 0usize..CHECKSUM_SPAN,
            bit in 0u8..8,
        ) {
            let original = checksum(&prefix);
            let mut flipped = prefix;
            flipped[byte] ^= 1 << bit;
            prop_assert_ne!(checksum(&flipped), original);
        }

        #[test]
        fn prop_encoded_frames_always_verify(
            robot_id in any::<u8>(),
            direction in any::<i16>(),
            speed in any::<u16>(),
            rotation in any::<i16>(),
            kick in any::<i8>(),
            dribble in any::<bool>(),
        ) {
            let command =
                RobotCommand::movement(robot_id, direction, speed, rotation, kick, dribble);
            let frame = command.to_frame();
            prop_assert!(frame.is_valid());
            prop_assert_eq!(RobotCommand::try_from(frame).unwrap(), command);
        }
    }
}
