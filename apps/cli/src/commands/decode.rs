//! decode 命令
//!
//! 解码十六进制指令帧并校验

use anyhow::{Context, Result};
use clap::Args;
use fieldlink_sdk::protocol::{COMMAND_FRAME_LEN, CommandFrame};
use fieldlink_sdk::{RadioMessage, RobotCommand};

use crate::validation::parse_hex_frames;

/// 解码命令参数
#[derive(Args, Debug)]
pub struct DecodeCommand {
    /// 十六进制字节（一帧或多帧首尾相接）
    pub hex: String,
}

impl DecodeCommand {
    pub fn execute(&self) -> Result<()> {
        let message = decode_hex(&self.hex)?;
        for (index, command) in message.iter().enumerate() {
            println!("帧 {}:", index + 1);
            print_command(command);
        }
        Ok(())
    }
}

/// 解码并校验每一帧
pub fn decode_hex(input: &str) -> Result<RadioMessage> {
    let bytes = parse_hex_frames(input)?;
    for (index, chunk) in bytes.chunks_exact(COMMAND_FRAME_LEN).enumerate() {
        let frame = CommandFrame::from_bytes(chunk.try_into()?);
        if !frame.is_valid() {
            anyhow::bail!(
                "帧 {} 校验和错误: 期望 0x{:02X}，实际 0x{:02X}",
                index + 1,
                frame.computed_checksum(),
                frame.stored_checksum()
            );
        }
    }
    RadioMessage::decode_stream(&bytes).context("解码指令帧失败")
}

fn print_command(command: &RobotCommand) {
    println!("  消息类型:   0x{:02X}", command.message_type);
    println!("  机器人 ID:  {}", command.robot_id);
    println!("  方向:       {}°", command.direction);
    println!("  速度:       {}", command.direction_speed);
    println!("  旋转速度:   {}", command.rotation_speed);
    let kick = if command.is_chip_kick() { "挑射" } else { "平射" };
    println!("  踢球力度:   {} ({})", command.kick_power, kick);
    println!("  盘带:       {}", if command.dribble { "开" } else { "关" });
    println!("  行进距离:   {}", command.travel_distance);
    println!("  旋转角度:   {}", command.rotation_angle);
}
