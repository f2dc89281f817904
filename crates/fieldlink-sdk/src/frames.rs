//! 领域数据帧
//!
//! 五条标准 Pipeline 的载荷类型。引擎只按类型区分它们，不解析内容；
//! 视觉、几何、裁判盒报文的解码由上游负责。
//!
//! 坐标单位为毫米，角度单位为弧度，场地中心为原点。

use fieldlink_protocol::{RadioMessage, RobotCommand, VelocityCommand};

pub use fieldlink_driver::RadioPacket;

/// 视觉检测到的球
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionBall {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

/// 视觉检测到的机器人
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionRobot {
    pub robot_id: u8,
    pub x: f32,
    pub y: f32,
    pub orientation: f32,
    pub confidence: f32,
}

/// 单个摄像头的一帧检测结果
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionFrame {
    pub camera_id: u32,
    pub frame_number: u32,
    /// 采集时间戳（秒）
    pub t_capture: f64,
    pub balls: Vec<DetectionBall>,
    pub robots_blue: Vec<DetectionRobot>,
    pub robots_yellow: Vec<DetectionRobot>,
}

impl DetectionFrame {
    /// 置信度最高的球
    pub fn best_ball(&self) -> Option<&DetectionBall> {
        self.balls
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// 指定队伍的机器人
    pub fn robots(&self, team: TeamColor) -> &[DetectionRobot] {
        match team {
            TeamColor::Blue => &self.robots_blue,
            TeamColor::Yellow => &self.robots_yellow,
        }
    }
}

/// 队伍颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TeamColor {
    #[default]
    Blue,
    Yellow,
}

/// 场地几何
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeometryFrame {
    pub field_length: f32,
    pub field_width: f32,
    pub goal_width: f32,
    pub goal_depth: f32,
    pub boundary_width: f32,
}

impl Default for GeometryFrame {
    /// B 组场地尺寸
    fn default() -> Self {
        Self {
            field_length: 9000.0,
            field_width: 6000.0,
            goal_width: 1000.0,
            goal_depth: 180.0,
            boundary_width: 300.0,
        }
    }
}

impl GeometryFrame {
    /// 点是否在场地线内（含边线）
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x.abs() <= self.field_length / 2.0 && y.abs() <= self.field_width / 2.0
    }
}

/// 裁判盒指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RefereeCommand {
    #[default]
    Halt,
    Stop,
    NormalStart,
    ForceStart,
    PrepareKickoff(TeamColor),
    PreparePenalty(TeamColor),
    DirectFree(TeamColor),
    IndirectFree(TeamColor),
    Timeout(TeamColor),
    BallPlacement(TeamColor),
}

impl RefereeCommand {
    /// 该指令下机器人是否必须停止移动
    pub fn requires_halt(&self) -> bool {
        matches!(self, RefereeCommand::Halt | RefereeCommand::Timeout(_))
    }
}

/// 裁判盒状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefereeState {
    pub command: RefereeCommand,
    /// 每条新指令递增
    pub command_counter: u32,
    pub blue_score: u32,
    pub yellow_score: u32,
}

/// 单个机器人的策略输出
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotTarget {
    pub robot_id: u8,
    pub velocity: VelocityCommand,
}

/// 一个控制周期的策略输出
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StrategyFrame {
    pub targets: Vec<RobotTarget>,
}

impl StrategyFrame {
    pub fn with_target(mut self, robot_id: u8, velocity: VelocityCommand) -> Self {
        self.targets.push(RobotTarget { robot_id, velocity });
        self
    }

    /// 换算为线上指令
    pub fn to_radio_message(&self) -> RadioMessage {
        self.targets
            .iter()
            .map(|t| RobotCommand::from_velocity(t.robot_id, t.velocity))
            .collect()
    }

    /// 所有机器人原地停止
    pub fn halted(&self) -> StrategyFrame {
        StrategyFrame {
            targets: self
                .targets
                .iter()
                .map(|t| RobotTarget {
                    robot_id: t.robot_id,
                    velocity: VelocityCommand::default(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_ball_picks_highest_confidence() {
        let frame = DetectionFrame {
            balls: vec![
                DetectionBall {
                    x: 1.0,
                    y: 0.0,
                    confidence: 0.3,
                },
                DetectionBall {
                    x: 2.0,
                    y: 0.0,
                    confidence: 0.9,
                },
            ],
            ..Default::default()
        };
        assert_eq!(frame.best_ball().map(|b| b.x), Some(2.0));
        assert!(DetectionFrame::default().best_ball().is_none());
    }

    #[test]
    fn test_geometry_contains() {
        let geometry = GeometryFrame::default();
        assert!(geometry.contains(0.0, 0.0));
        assert!(geometry.contains(4500.0, -3000.0));
        assert!(!geometry.contains(4501.0, 0.0));
    }

    #[test]
    fn test_referee_halt() {
        assert!(RefereeCommand::Halt.requires_halt());
        assert!(RefereeCommand::Timeout(TeamColor::Yellow).requires_halt());
        assert!(!RefereeCommand::Stop.requires_halt());
    }

    #[test]
    fn test_strategy_to_radio_message() {
        let strategy = StrategyFrame::default()
            .with_target(1, VelocityCommand::new(300.0, 400.0, 0.0))
            .with_target(2, VelocityCommand::new(0.0, 0.0, 2.0));

        let message = strategy.to_radio_message();
        assert_eq!(message.len(), 2);
        let first = message.iter().next().unwrap();
        assert_eq!(first.robot_id, 1);
        assert_eq!(first.direction_speed, 500);
    }

    #[test]
    fn test_halted_zeroes_velocity() {
        let strategy = StrategyFrame::default().with_target(3, VelocityCommand::new(1.0, 1.0, 1.0));
        let halted = strategy.halted();
        assert_eq!(halted.targets[0].robot_id, 3);
        assert_eq!(halted.targets[0].velocity, VelocityCommand::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_detection_serde() {
        let frame = DetectionFrame {
            camera_id: 2,
            robots_blue: vec![DetectionRobot {
                robot_id: 4,
                ..Default::default()
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: DetectionFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
