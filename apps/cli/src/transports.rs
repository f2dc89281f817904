//! 配置文件定位与传输注册表装配

use anyhow::{Context, Result};
use fieldlink_sdk::topology::register_transports;
use fieldlink_sdk::{FieldlinkConfig, TransportRegistry};
use std::path::Path;
use tracing::debug;

use crate::validation::validate_file_exists;

/// 未指定 `--config` 时查找的文件
pub const DEFAULT_CONFIG_FILE: &str = "fieldlink.toml";

/// 加载配置
///
/// 显式给出的路径必须存在；未给出时若当前目录有 `fieldlink.toml` 则读取它，否则返回 `None`。
pub fn load_config(path: Option<&Path>) -> Result<Option<FieldlinkConfig>> {
    let path = match path {
        Some(path) => {
            validate_file_exists(path)?;
            path
        },
        None => {
            let fallback = Path::new(DEFAULT_CONFIG_FILE);
            if !fallback.is_file() {
                debug!("No {} in the working directory", DEFAULT_CONFIG_FILE);
                return Ok(None);
            }
            fallback
        },
    };

    Ok(Some(FieldlinkConfig::load_from_file(path)?))
}

/// 按配置创建传输注册表（无配置时为空）
pub fn load_transports(path: Option<&Path>) -> Result<TransportRegistry> {
    let transports = TransportRegistry::new();
    if let Some(config) = load_config(path)? {
        register_transports(&transports, &config).context("打开传输失败")?;
    }
    Ok(transports)
}
