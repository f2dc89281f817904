//! 性能指标模块
//!
//! 提供零开销的原子计数器，用于监控 Pipeline 与传输扇出的健康状态。
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline 实时指标
///
/// # 使用示例
///
/// ```rust
/// use fieldlink_driver::PipelineMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = PipelineMetrics::default();
/// metrics.enqueued.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.enqueued, 1);
/// ```
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// 成功入队的数据包数
    pub enqueued: AtomicU64,

    /// 队列满时丢弃的最旧数据包数
    ///
    /// 如果这个值持续增长，说明驱动线程处理速度跟不上生产速度。
    pub dropped_oldest: AtomicU64,

    /// Pipeline 关闭后被拒绝的入队请求数
    pub rejected: AtomicU64,

    /// 出队并处理的数据包数
    pub processed: AtomicU64,

    /// 所有 Consumer 均成功的数据包数
    pub succeeded: AtomicU64,

    /// 至少一个 Consumer 失败的数据包数
    pub failed: AtomicU64,

    /// Coupler 失败次数（透传）
    pub coupler_failures: AtomicU64,

    /// Consumer 失败次数（返回 false 或 panic）
    pub consumer_failures: AtomicU64,

    /// 阶段超出时间预算次数
    pub stage_timeouts: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 使用 `Ordering::Relaxed`，不同计数器之间可能有微小的时间差。
    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            coupler_failures: self.coupler_failures.load(Ordering::Relaxed),
            consumer_failures: self.consumer_failures.load(Ordering::Relaxed),
            stage_timeouts: self.stage_timeouts.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器（用于性能测试）
    pub fn reset(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.dropped_oldest.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.coupler_failures.store(0, Ordering::Relaxed);
        self.consumer_failures.store(0, Ordering::Relaxed);
        self.stage_timeouts.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pipeline 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineMetricsSnapshot {
    pub enqueued: u64,
    pub dropped_oldest: u64,
    pub rejected: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub coupler_failures: u64,
    pub consumer_failures: u64,
    pub stage_timeouts: u64,
}

impl PipelineMetricsSnapshot {
    /// 丢弃率（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。如果没有任何入队，返回 0.0。
    pub fn drop_rate(&self) -> f64 {
        if self.enqueued == 0 {
            return 0.0;
        }
        (self.dropped_oldest as f64 / self.enqueued as f64) * 100.0
    }

    /// 队列中尚未处理的数据包数（近似值）
    pub fn backlog(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.dropped_oldest)
            .saturating_sub(self.processed)
    }
}

/// 传输扇出指标
#[derive(Debug, Default)]
pub struct TransportMetrics {
    /// 分发给发送器的次数（每个方法计一次）
    pub dispatched: AtomicU64,
    /// 发送器返回失败的次数
    pub sender_failures: AtomicU64,
    /// 请求了未注册方法的次数
    pub missing_handlers: AtomicU64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            sender_failures: self.sender_failures.load(Ordering::Relaxed),
            missing_handlers: self.missing_handlers.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.dispatched.store(0, Ordering::Relaxed);
        self.sender_failures.store(0, Ordering::Relaxed);
        self.missing_handlers.store(0, Ordering::Relaxed);
    }
}

/// 传输扇出指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportMetricsSnapshot {
    pub dispatched: u64,
    pub sender_failures: u64,
    pub missing_handlers: u64,
}
