//! 输入验证模块
//!
//! 命令行参数在进入协议层之前的检查

use anyhow::{Context, Result, bail};
use std::path::Path;

use fieldlink_sdk::protocol::COMMAND_FRAME_LEN;

/// 速度指令验证器
pub struct VelocityValidator {
    /// 最大平移速度（mm/s）
    max_speed: f32,
    /// 最大旋转速度
    max_rotation: f32,
}

impl VelocityValidator {
    pub fn new(max_speed: f32, max_rotation: f32) -> Self {
        Self {
            max_speed,
            max_rotation,
        }
    }

    /// 线上字段可表示的范围
    pub fn wire_range() -> Self {
        Self::new(u16::MAX as f32, i16::MAX as f32)
    }

    /// 验证速度分量
    ///
    /// # 错误
    /// 分量为 NaN/无穷大，或合速度/旋转速度超出范围
    pub fn validate(&self, vx: f32, vy: f32, vr: f32) -> Result<()> {
        for (name, value) in [("vx", vx), ("vy", vy), ("vr", vr)] {
            if !value.is_finite() {
                bail!("{} 必须是有限数值，得到 {}", name, value);
            }
        }

        let speed = (vx * vx + vy * vy).sqrt();
        if speed > self.max_speed {
            bail!("合速度 {:.1} 超出范围 [0, {:.1}]", speed, self.max_speed);
        }
        if vr.abs() > self.max_rotation {
            bail!(
                "旋转速度 {:.1} 超出范围 [{:.1}, {:.1}]",
                vr,
                -self.max_rotation,
                self.max_rotation
            );
        }
        Ok(())
    }
}

/// 验证踢球力度（0.0 ~ 1.0）
pub fn validate_kick(name: &str, power: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&power) {
        bail!("{} 力度 {} 超出范围 [0.0, 1.0]", name, power);
    }
    Ok(())
}

/// 解析十六进制指令流
///
/// 接受空白、`:` 分隔以及 `0x` 前缀；长度必须是整帧。
pub fn parse_hex_frames(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();

    let bytes =
        hex::decode(&cleaned).with_context(|| format!("无效的十六进制输入: {}", input))?;
    if bytes.is_empty() || bytes.len() % COMMAND_FRAME_LEN != 0 {
        bail!(
            "字节数 {} 不是 {} 字节指令帧的整数倍",
            bytes.len(),
            COMMAND_FRAME_LEN
        );
    }
    Ok(bytes)
}

/// 验证文件存在
pub fn validate_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("文件不存在: {}", path.display());
    }
    if !path.is_file() {
        bail!("不是文件: {}", path.display());
    }
    Ok(())
}
