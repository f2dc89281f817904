//! encode 命令
//!
//! 把一条速度指令编码为 15 字节控制帧并以十六进制输出

use anyhow::Result;
use clap::Args;
use fieldlink_sdk::{RobotCommand, VelocityCommand};

use crate::validation::{VelocityValidator, validate_kick};

/// 单条指令参数（encode / send 共用）
#[derive(Args, Debug, Clone)]
pub struct CommandArgs {
    /// 机器人 ID
    #[arg(short, long)]
    pub robot: u8,

    /// X 方向速度（mm/s）
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub vx: f32,

    /// Y 方向速度（mm/s）
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub vy: f32,

    /// 旋转速度
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub vr: f32,

    /// 平射力度（0.0 ~ 1.0）
    #[arg(long)]
    pub flat_kick: Option<f32>,

    /// 挑射力度（0.0 ~ 1.0，优先于平射）
    #[arg(long)]
    pub chip_kick: Option<f32>,

    /// 开启盘带
    #[arg(long)]
    pub dribble: bool,

    /// 行进距离（mm）
    #[arg(long, default_value_t = 0)]
    pub travel: u16,

    /// 旋转角度
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub angle: i16,
}

impl CommandArgs {
    /// 验证并构造线上指令
    pub fn to_command(&self) -> Result<RobotCommand> {
        VelocityValidator::wire_range().validate(self.vx, self.vy, self.vr)?;

        let mut velocity = VelocityCommand::new(self.vx, self.vy, self.vr);
        if let Some(power) = self.flat_kick {
            validate_kick("flat_kick", power)?;
            velocity = velocity.with_flat_kick(power);
        }
        if let Some(power) = self.chip_kick {
            validate_kick("chip_kick", power)?;
            velocity = velocity.with_chip_kick(power);
        }
        if self.dribble {
            velocity = velocity.with_dribbler(1.0);
        }

        Ok(RobotCommand::from_velocity(self.robot, velocity).with_travel(self.travel, self.angle))
    }
}

/// 编码命令参数
#[derive(Args, Debug)]
pub struct EncodeCommand {
    #[command(flatten)]
    pub command: CommandArgs,

    /// 以空格分隔每个字节
    #[arg(long)]
    pub spaced: bool,
}

impl EncodeCommand {
    pub fn execute(&self) -> Result<()> {
        let command = self.command.to_command()?;
        println!("{}", format_frame(command.to_frame().as_bytes(), self.spaced));
        Ok(())
    }
}

/// 十六进制格式化
pub fn format_frame(bytes: &[u8], spaced: bool) -> String {
    if spaced {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        hex::encode_upper(bytes)
    }
}
