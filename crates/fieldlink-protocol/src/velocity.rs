//! 速度指令换算
//!
//! 策略层以笛卡尔速度描述机器人运动，基站固件只理解
//! "方向 + 速度" 的极坐标形式。本模块负责两者之间的换算。

use crate::command::RobotCommand;
use crate::constants::{MAX_KICK_SPEED, MESSAGE_TYPE_MOVE};

/// 策略层输出的单机器人速度指令
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VelocityCommand {
    /// X 方向速度（mm/s）
    pub vx: f32,
    /// Y 方向速度（mm/s）
    pub vy: f32,
    /// 旋转速度
    pub vr: f32,
    /// 平射力度（0-100）
    pub flat_kick: f32,
    /// 挑射力度（0-100），大于 0 时覆盖平射
    pub chip_kick: f32,
    /// 盘带转速，非零即开启盘带
    pub dribbler_spin: f32,
}

impl VelocityCommand {
    pub fn new(vx: f32, vy: f32, vr: f32) -> Self {
        Self {
            vx,
            vy,
            vr,
            ..Default::default()
        }
    }

    pub fn with_flat_kick(mut self, power: f32) -> Self {
        self.flat_kick = power;
        self
    }

    pub fn with_chip_kick(mut self, power: f32) -> Self {
        self.chip_kick = power;
        self
    }

    pub fn with_dribbler(mut self, spin: f32) -> Self {
        self.dribbler_spin = spin;
        self
    }

    /// 运动方向（度）
    ///
    /// 以 +Y 为 0°，顺时针为正：先取 `atan(vy / vx)`，
    /// `vx < 0` 时加 180°，再取反并加 90°。
    /// 静止（`vx == vy == 0`）时为 0°。
    pub fn direction_degrees(&self) -> i32 {
        let vx = f64::from(self.vx);
        let vy = f64::from(self.vy);
        if vx == 0.0 && vy == 0.0 {
            return 0;
        }

        let mut direction = if vx == 0.0 {
            // atan(±inf)
            if vy > 0.0 { 90 } else { -90 }
        } else {
            (vy / vx).atan().to_degrees() as i32
        };
        if vx < 0.0 {
            direction += 180;
        }
        -direction + 90
    }

    /// 合速度（截断为整数）
    pub fn speed(&self) -> u16 {
        let vx = f64::from(self.vx);
        let vy = f64::from(self.vy);
        (vx * vx + vy * vy).sqrt() as u16
    }

    /// 踢球力度：负值为挑射，已乘以 `MAX_KICK_SPEED`
    pub fn kick_power(&self) -> i8 {
        let mut kick = self.flat_kick as i32;
        if self.chip_kick > 0.0 {
            kick = -(self.chip_kick as i32);
        }
        let scaled = (f64::from(kick) * MAX_KICK_SPEED) as i32;
        scaled.clamp(i8::MIN as i32, i8::MAX as i32) as i8
    }

    pub fn dribble(&self) -> bool {
        self.dribbler_spin.abs() > 0.0
    }
}

impl RobotCommand {
    /// 从速度指令构建线上指令
    ///
    /// # 参数
    /// - `robot_id`: 目标机器人 ID
    /// - `velocity`: 策略层速度指令
    ///
    /// # 示例
    ///
    /// ```
    /// use fieldlink_protocol::{RobotCommand, VelocityCommand};
    ///
    /// let cmd = RobotCommand::from_velocity(3, VelocityCommand::new(0.0, 1000.0, 0.0));
    /// assert_eq!(cmd.direction, 0);
    /// assert_eq!(cmd.direction_speed, 1000);
    /// ```
    pub fn from_velocity(robot_id: u8, velocity: VelocityCommand) -> Self {
        Self {
            message_type: MESSAGE_TYPE_MOVE,
            robot_id,
            direction: velocity.direction_degrees() as i16,
            direction_speed: velocity.speed(),
            rotation_speed: (velocity.vr as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            kick_power: velocity.kick_power(),
            dribble: velocity.dribble(),
            travel_distance: 0,
            rotation_angle: 0,
        }
    }
}

impl From<(u8, VelocityCommand)> for RobotCommand {
    fn from((robot_id, velocity): (u8, VelocityCommand)) -> Self {
        RobotCommand::from_velocity(robot_id, velocity)
    }
}
