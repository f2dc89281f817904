//! 配置管理命令
//!
//! 检查、查看和生成 `fieldlink.toml`

use anyhow::{Result, bail};
use clap::Subcommand;
use fieldlink_sdk::tools::TransportEntry;
use fieldlink_sdk::{FieldlinkConfig, SendMethod};
use std::path::{Path, PathBuf};

use crate::transports::DEFAULT_CONFIG_FILE;
use crate::validation::validate_file_exists;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 检查配置文件
    Check {
        /// 配置文件路径
        file: PathBuf,
    },

    /// 以规范格式输出配置（含默认值）
    Show {
        /// 配置文件路径
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },

    /// 生成示例配置
    Init {
        /// 输出路径
        #[arg(default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Check { file } => Self::check_(&file),

            ConfigCommand::Show { file } => Self::show_(&file),

            ConfigCommand::Init { file, force } => Self::init_(&file, force),
        }
    }

    fn check_(file: &Path) -> Result<()> {
        validate_file_exists(file)?;
        let config = FieldlinkConfig::load_from_file(file)?;

        println!("✅ 配置有效: {}", file.display());
        println!("  Pipeline:");
        println!("    队列容量:   {}", config.pipeline.queue_capacity);
        match config.pipeline.stage_budget() {
            Some(budget) => println!("    阶段预算:   {:?}", budget),
            None => println!("    阶段预算:   (不限制)"),
        }
        println!("    分发方式:   {:?}", config.pipeline.consumer_dispatch);
        println!("  传输:");
        for entry in &config.transports {
            let endpoint = if entry.uses_device() {
                format!(
                    "{} @ {} baud",
                    entry.device.as_deref().unwrap_or_default(),
                    entry.baud_rate()
                )
            } else {
                entry.address.clone().unwrap_or_default()
            };
            let marker = if config.defaults.contains(&entry.method) { " (默认)" } else { "" };
            println!("    {:<12} {}{}", entry.method, endpoint, marker);
        }
        if config.transports.is_empty() {
            println!("    (无)");
        }
        Ok(())
    }

    fn show_(file: &Path) -> Result<()> {
        validate_file_exists(file)?;
        let config = FieldlinkConfig::load_from_file(file)?;
        print!("{}", config.to_toml_string()?);
        Ok(())
    }

    fn init_(file: &Path, force: bool) -> Result<()> {
        if file.exists() && !force {
            bail!("文件已存在: {}（使用 --force 覆盖）", file.display());
        }
        sample_config().save_to_file(file)?;
        println!("✅ 已生成配置: {}", file.display());
        Ok(())
    }
}

/// 示例配置：本机 UDP 基站
pub fn sample_config() -> FieldlinkConfig {
    FieldlinkConfig {
        defaults: vec![SendMethod::Udp],
        transports: vec![TransportEntry::network(SendMethod::Udp, "127.0.0.1:10001")],
        ..Default::default()
    }
}
