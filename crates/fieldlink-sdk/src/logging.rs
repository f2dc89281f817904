//! 日志初始化
//!
//! 库内各 crate 只通过 `tracing` 宏打日志，不安装 subscriber。
//! 应用入口调用 [`init_logging`] 一次即可。

use tracing_subscriber::EnvFilter;

/// 安装全局 `tracing` subscriber，并把 `log` 记录桥接到 `tracing`
///
/// 优先使用 `RUST_LOG`，未设置或无法解析时使用 `default_directive`。
///
/// # 参数
/// - `default_directive`: 默认过滤指令，例如 `"fieldlink=info"`
///
/// # 返回
/// 本次调用是否完成了安装；已存在全局 subscriber 时返回 `false`。
///
/// # 示例
///
/// ```
/// fieldlink_sdk::init_logging("fieldlink=debug");
/// // 第二次调用不会替换已安装的 subscriber
/// assert!(!fieldlink_sdk::init_logging("fieldlink=trace"));
/// ```
pub fn init_logging(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    // 其他库可能已经安装了 log 记录器
    let _ = tracing_log::LogTracer::init_with_filter(log::LevelFilter::Trace);
    true
}
