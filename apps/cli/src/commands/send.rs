//! send 命令
//!
//! 通过已配置（或命令行指定）的传输方式发送一条指令

use anyhow::{Result, bail};
use clap::Args;
use fieldlink_sdk::topology::open_sender;
use fieldlink_sdk::tools::TransportEntry;
use fieldlink_sdk::{RadioMessage, SendMethod, TransportRegistry};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;

use super::encode::CommandArgs;
use crate::transports::load_transports;

/// 发送命令参数
#[derive(Args, Debug)]
pub struct SendCommand {
    #[command(flatten)]
    pub command: CommandArgs,

    /// 配置文件（默认读取当前目录的 fieldlink.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 直接指定 UDP 目标（host:port），覆盖配置中的 udp 条目
    #[arg(long)]
    pub udp: Option<String>,

    /// 使用的传输方式（逗号分隔），缺省时使用默认方式
    #[arg(long, value_delimiter = ',')]
    pub via: Vec<SendMethod>,

    /// 重复发送次数
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// 重复发送间隔（毫秒）
    #[arg(long, default_value_t = 16)]
    pub interval_ms: u64,
}

impl SendCommand {
    pub fn execute(&self) -> Result<()> {
        let command = self.command.to_command()?;
        let transports = load_transports(self.config.as_deref())?;
        if let Some(address) = &self.udp {
            let sender = open_sender(&TransportEntry::network(SendMethod::Udp, address))?;
            transports.register(SendMethod::Udp, sender);
        }
        if transports.methods().is_empty() {
            bail!("没有可用的传输方式：请提供配置文件或 --udp");
        }

        let message = RadioMessage::single(command);
        let mut failures = 0;
        for attempt in 0..self.repeat {
            if attempt > 0 {
                thread::sleep(Duration::from_millis(self.interval_ms));
            }
            if !send(&transports, &message, &self.via) {
                failures += 1;
            }
        }

        transports.unregister_all();
        if failures > 0 {
            bail!("{} / {} 次发送失败", failures, self.repeat);
        }
        info!("Sent {} time(s) to robot {}", self.repeat, command.robot_id);
        println!("✅ 已发送 {} 次", self.repeat);
        Ok(())
    }
}

fn send(transports: &TransportRegistry, message: &RadioMessage, via: &[SendMethod]) -> bool {
    if via.is_empty() {
        transports.send_default(message)
    } else {
        transports.send(message, via)
    }
}
