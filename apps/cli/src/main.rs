//! # Fieldlink CLI
//!
//! 机器人无线控制命令行工具。
//!
//! ```bash
//! # 生成并检查配置
//! fieldlink-cli config init
//! fieldlink-cli config check fieldlink.toml
//!
//! # 编码 / 解码单条指令
//! fieldlink-cli encode --robot 3 --vx 300 --vy 400 --spaced
//! fieldlink-cli decode "01 03 25 00 F4 01 00 00 00 00 00 00 00 00 D2"
//!
//! # 发送一条指令
//! fieldlink-cli send --robot 3 --vy 500 --udp 192.168.1.50:10001
//!
//! # 运行标准拓扑（合成视觉输入）
//! fieldlink-cli run --mock --duration 5
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod transports;
mod validation;

use commands::{ConfigCommand, DecodeCommand, EncodeCommand, RunCommand, SendCommand};

/// Fieldlink CLI - 机器人无线控制命令行工具
#[derive(Parser, Debug)]
#[command(name = "fieldlink-cli")]
#[command(about = "Command-line interface for fieldlink robot radio control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 把速度指令编码为十六进制控制帧
    Encode {
        #[command(flatten)]
        args: EncodeCommand,
    },

    /// 解码并校验十六进制控制帧
    Decode {
        #[command(flatten)]
        args: DecodeCommand,
    },

    /// 通过传输层发送一条指令
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 运行标准 Pipeline 拓扑
    Run {
        #[command(flatten)]
        args: RunCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    fieldlink_sdk::init_logging("fieldlink_cli=info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),

        Commands::Encode { args } => args.execute(),

        Commands::Decode { args } => args.execute(),

        Commands::Send { args } => args.execute(),

        Commands::Run { args } => args.execute(),
    }
}
