//! Producer 调度
//!
//! 两种模式：
//! - `Single`: 立即在调用线程上执行一次
//! - `Scheduled(period)`: 在专用线程上按固定频率执行，直到显式停止
//!
//! 每次产生的数据包通过注册表发布到同类型的全部 Pipeline。
//! 单次调用失败（返回 `Err` 或 panic）只跳过本次，不会终止调度。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::driver::{DEFAULT_JOIN_TIMEOUT, JoinTimeout};
use crate::error::DriverError;
use crate::packet::Payload;
use crate::registry::Registry;
use crate::stage::{Producer, guarded_produce};

/// 停止标志的最长检查间隔
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Producer 调度模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionMode {
    /// 立即执行一次
    Single,
    /// 按固定周期重复执行
    Scheduled(Duration),
}

/// Producer 调用统计
#[derive(Debug, Default)]
pub struct ProductionStats {
    /// 调用次数
    pub invocations: AtomicU64,
    /// 成功发布的数据包数
    pub published: AtomicU64,
    /// 产生失败的次数（`Err` 或 panic）
    pub failures: AtomicU64,
    /// 发布失败的次数（没有下游或下游已关闭）
    pub undelivered: AtomicU64,
    /// 因超时而跳过的周期数
    pub skipped_ticks: AtomicU64,
}

/// 统计快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProductionStatsSnapshot {
    pub invocations: u64,
    pub published: u64,
    pub failures: u64,
    pub undelivered: u64,
    pub skipped_ticks: u64,
}

impl ProductionStats {
    pub fn snapshot(&self) -> ProductionStatsSnapshot {
        ProductionStatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}

/// 执行一次 Producer 并发布结果
fn produce_once<T: Payload>(
    registry: &Registry,
    producer: &dyn Producer<T>,
    stats: &ProductionStats,
) -> bool {
    stats.invocations.fetch_add(1, Ordering::Relaxed);
    match guarded_produce(producer) {
        Ok(packet) => {
            if registry.publish(packet) {
                stats.published.fetch_add(1, Ordering::Relaxed);
                true
            } else {
                stats.undelivered.fetch_add(1, Ordering::Relaxed);
                false
            }
        },
        Err(e) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Producer '{}' failed: {}; skipping", producer.name(), e);
            false
        },
    }
}

/// 分段睡眠到 `deadline`，期间检查停止标志
fn sleep_until(deadline: Instant, is_running: &AtomicBool) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        spin_sleep::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

/// 固定频率调度循环
///
/// 锚点按周期推进；一次调用耗时超过周期时跳过错过的锚点，不做补发。
fn schedule_loop<T: Payload>(
    registry: Weak<Registry>,
    producer: Arc<dyn Producer<T>>,
    period: Duration,
    is_running: Arc<AtomicBool>,
    stats: Arc<ProductionStats>,
) {
    #[cfg(feature = "realtime")]
    crate::driver::raise_thread_priority(&format!("Producer '{}'", producer.name()));

    debug!(
        "Producer '{}' scheduled every {:?}",
        producer.name(),
        period
    );

    let mut next_tick = Instant::now();
    while is_running.load(Ordering::Acquire) {
        let Some(strong) = registry.upgrade() else {
            warn!("Producer '{}': registry dropped, stopping", producer.name());
            break;
        };
        produce_once(&strong, &*producer, &stats);
        drop(strong);

        next_tick += period;
        let now = Instant::now();
        if next_tick <= now {
            let behind = now.duration_since(next_tick);
            let (next, missed) = skip_missed_ticks(next_tick, now, period);
            stats.skipped_ticks.fetch_add(missed, Ordering::Relaxed);
            trace!(
                "Producer '{}' overran its period by {:?}, skipping {} tick(s)",
                producer.name(),
                behind,
                missed
            );
            next_tick = next;
        }

        sleep_until(next_tick, &is_running);
    }

    is_running.store(false, Ordering::Release);
    debug!("Producer '{}' stopped", producer.name());
}

/// 启动 Producer
///
/// # 参数
/// - `registry`: 发布目标所在的注册表
/// - `producer`: 数据来源
/// - `mode`: 调度模式
///
/// # 错误
/// - 周期为零：`DriverError::InvalidConfig`
/// - 调度线程创建失败：`DriverError::Spawn`
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use fieldlink_driver::{Packet, PipelineBuilder, ProductionMode, Registry, producer_fn, start_producer};
///
/// let registry = Arc::new(Registry::new());
/// let pipeline = PipelineBuilder::<u8>::new("bytes").build(&registry).unwrap();
///
/// let handle = start_producer(
///     &registry,
///     Arc::new(producer_fn("once", || Ok(Packet::new(9u8)))),
///     ProductionMode::Single,
/// )
/// .unwrap();
///
/// assert_eq!(handle.stats().published, 1);
/// assert_eq!(pipeline.len(), 1);
/// ```
pub fn start_producer<T: Payload>(
    registry: &Arc<Registry>,
    producer: Arc<dyn Producer<T>>,
    mode: ProductionMode,
) -> Result<ProducerHandle, DriverError> {
    let name = producer.name().to_string();
    let stats = Arc::new(ProductionStats::default());

    match mode {
        ProductionMode::Single => {
            produce_once(registry, &*producer, &stats);
            Ok(ProducerHandle {
                name,
                is_running: Arc::new(AtomicBool::new(false)),
                stats,
                thread: None,
            })
        },
        ProductionMode::Scheduled(period) => {
            if period.is_zero() {
                return Err(DriverError::InvalidConfig(format!(
                    "producer '{}' period must be positive",
                    name
                )));
            }

            let is_running = Arc::new(AtomicBool::new(true));
            let thread_running = Arc::clone(&is_running);
            let thread_stats = Arc::clone(&stats);
            let weak = Arc::downgrade(registry);
            let thread_name = format!("producer-{}", name);

            let thread = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || schedule_loop(weak, producer, period, thread_running, thread_stats))
                .map_err(|source| DriverError::Spawn {
                    name: thread_name,
                    source,
                })?;

            Ok(ProducerHandle {
                name,
                is_running,
                stats,
                thread: Some(thread),
            })
        },
    }
}

/// Producer 句柄
///
/// 停止是协作式的：进行中的调用会执行完毕。Drop 时停止并等待线程退出。
pub struct ProducerHandle {
    name: String,
    is_running: Arc<AtomicBool>,
    stats: Arc<ProductionStats>,
    thread: Option<JoinHandle<()>>,
}

impl ProducerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> ProductionStatsSnapshot {
        self.stats.snapshot()
    }

    /// 停止并等待调度线程退出
    pub fn join(mut self, timeout: Duration) -> Result<ProductionStatsSnapshot, DriverError> {
        self.stop();
        if let Some(handle) = self.thread.take() {
            handle
                .join_timeout(timeout)
                .map_err(|_| DriverError::JoinTimeout {
                    name: self.name.clone(),
                    timeout,
                })?;
        }
        Ok(self.stats())
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.stop();

        if let Some(handle) = self.thread.take()
            && let Err(_e) = handle.join_timeout(DEFAULT_JOIN_TIMEOUT)
        {
            error!(
                "Producer thread '{}' panicked or failed to shut down within {:?}",
                self.name, DEFAULT_JOIN_TIMEOUT
            );
        }
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("name", &self.name)
            .field("is_running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

/// 跳过已错过的节拍，返回 `now` 之后的第一个节拍及跳过的数量
///
/// 节拍保持与 `next_tick` 对齐；`next_tick` 须不晚于 `now`。
fn skip_missed_ticks(next_tick: Instant, now: Instant, period: Duration) -> (Instant, u64) {
    let behind = now.duration_since(next_tick);
    let missed = behind.as_nanos() / period.as_nanos() + 1;
    let next = u64::try_from(period.as_nanos() * missed)
        .ok()
        .and_then(|nanos| next_tick.checked_add(Duration::from_nanos(nanos)))
        .unwrap_or(now + period);
    (next, u64::try_from(missed).unwrap_or(u64::MAX))
}
