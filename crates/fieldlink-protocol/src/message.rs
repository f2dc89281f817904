//! 一个控制周期的出站消息
//!
//! `RadioMessage` 汇总一个控制周期内发往全队的指令。
//! 数据报类发送器逐条发送，流式发送器把所有帧首尾相接写入一次。

use smallvec::SmallVec;

use crate::ProtocolError;
use crate::command::{CommandFrame, RobotCommand};
use crate::constants::COMMAND_FRAME_LEN;

/// 一个控制周期的指令集合
///
/// 一支队伍通常不超过 8 台机器人，`SmallVec` 避免了常见情况下的堆分配。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioMessage {
    pub commands: SmallVec<[RobotCommand; 8]>,
}

impl RadioMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只包含一条指令的消息
    pub fn single(command: RobotCommand) -> Self {
        let mut commands = SmallVec::new();
        commands.push(command);
        Self { commands }
    }

    pub fn with_command(mut self, command: RobotCommand) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: RobotCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RobotCommand> {
        self.commands.iter()
    }

    /// 逐条编码（用于数据报发送）
    pub fn frames(&self) -> impl Iterator<Item = CommandFrame> + '_ {
        self.commands.iter().map(|cmd| cmd.to_frame())
    }

    /// 首尾相接编码为字节流（用于串口/TCP 等流式发送）
    pub fn encode_stream(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.commands.len() * COMMAND_FRAME_LEN);
        for frame in self.frames() {
            buffer.extend_from_slice(frame.as_bytes());
        }
        buffer
    }

    /// 从字节流解码
    ///
    /// 字节流长度必须是 15 的整数倍，每一帧都要通过校验。
    pub fn decode_stream(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() % COMMAND_FRAME_LEN != 0 {
            let expected = (bytes.len() / COMMAND_FRAME_LEN + 1) * COMMAND_FRAME_LEN;
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }

        let commands = bytes
            .chunks_exact(COMMAND_FRAME_LEN)
            .map(RobotCommand::decode)
            .collect::<Result<SmallVec<_>, _>>()?;
        Ok(Self { commands })
    }
}

impl FromIterator<RobotCommand> for RadioMessage {
    fn from_iter<I: IntoIterator<Item = RobotCommand>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RadioMessage {
    type Item = &'a RobotCommand;
    type IntoIter = std::slice::Iter<'a, RobotCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team() -> RadioMessage {
        (0..3)
            .map(|id| RobotCommand::movement(id, 10 * id as i16, 100, 0, 0, id == 1))
            .collect()
    }

    #[test]
    fn test_empty_message() {
        let msg = RadioMessage::new();
        assert!(msg.is_empty());
        assert!(msg.encode_stream().is_empty());
        assert_eq!(RadioMessage::decode_stream(&[]).unwrap(), msg);
    }

    #[test]
    fn test_stream_layout() {
        let msg = team();
        let stream = msg.encode_stream();
        assert_eq!(stream.len(), 3 * COMMAND_FRAME_LEN);
        for (i, chunk) in stream.chunks_exact(COMMAND_FRAME_LEN).enumerate() {
            assert_eq!(chunk[1], i as u8);
            assert!(CommandFrame::try_from(chunk).is_ok());
        }
    }

    #[test]
    fn test_decode_stream() {
        let msg = team();
        let decoded = RadioMessage::decode_stream(&msg.encode_stream()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_stream_partial_frame() {
        let mut stream = team().encode_stream();
        stream.pop();
        assert_eq!(
            RadioMessage::decode_stream(&stream).unwrap_err(),
            ProtocolError::InvalidLength {
                expected: 45,
                actual: 44
            }
        );
    }

    #[test]
    fn test_decode_stream_reports_corrupt_frame() {
        let mut stream = team().encode_stream();
        stream[COMMAND_FRAME_LEN + 3] ^= 0x10;
        assert!(matches!(
            RadioMessage::decode_stream(&stream),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_single() {
        let msg = RadioMessage::single(RobotCommand::stop(4));
        assert_eq!(msg.len(), 1);
        assert_eq!(msg.frames().count(), 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_json() {
        let msg = team();
        let json = serde_json::to_string(&msg).unwrap();
        let back: RadioMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
