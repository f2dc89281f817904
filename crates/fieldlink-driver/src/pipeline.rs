//! Pipeline 核心
//!
//! 一个 `Pipeline<T>` 由三部分组成：
//! - 有界 FIFO 队列（多生产者并发入队，满时丢弃最旧的数据包）
//! - 按优先级排序的 Coupler 链（串行折叠，失败透传）
//! - Consumer 集合（结果按逻辑与聚合，不短路）
//!
//! Coupler / Consumer 列表通过 `ArcSwap` 发布，处理路径上无锁读取；
//! 注册操作在写锁内复制、修改、排序后整体替换。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::budget::{CallTicket, StageRunner, stage_key};
use crate::error::{DriverError, StageError};
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::packet::{Packet, Payload};
use crate::priority::Priority;
use crate::stage::{Consumer, Coupler, Producer, guarded_consume, guarded_transform, same_instance};

/// Consumer 分发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConsumerDispatch {
    /// 按注册顺序依次调用（默认，延迟抖动最小）
    #[default]
    Sequential,
    /// 每个 Consumer 一个线程并行调用
    Parallel,
}

/// Pipeline 配置
///
/// # Example
///
/// ```
/// use fieldlink_driver::{ConsumerDispatch, PipelineConfig};
/// use std::time::Duration;
///
/// // 默认配置（容量 64，20ms 阶段预算，顺序分发）
/// let config = PipelineConfig::default();
///
/// // 自定义配置
/// let config = PipelineConfig {
///     queue_capacity: 8,
///     stage_budget: None,
///     consumer_dispatch: ConsumerDispatch::Parallel,
///     idle_wait: Duration::from_millis(1),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 队列容量，满时丢弃最旧的数据包
    pub queue_capacity: usize,
    /// 单次 Coupler / Consumer 调用的时间预算，`None` 表示不限制
    pub stage_budget: Option<Duration>,
    /// Consumer 分发方式
    pub consumer_dispatch: ConsumerDispatch,
    /// 驱动线程在空队列上的阻塞等待时长
    pub idle_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            stage_budget: Some(Duration::from_millis(20)),
            consumer_dispatch: ConsumerDispatch::Sequential,
            idle_wait: Duration::from_millis(2),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.queue_capacity == 0 {
            return Err(DriverError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.stage_budget == Some(Duration::ZERO) {
            return Err(DriverError::InvalidConfig(
                "stage_budget must be positive (use None to disable)".to_string(),
            ));
        }
        Ok(())
    }
}

/// 单次 `process_packet` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// 队列为空，未做任何处理
    Empty,
    /// 至少一个 Consumer 失败
    Failed,
    /// 所有 Consumer 均成功（没有 Consumer 时也视为成功）
    Succeeded,
}

impl ProcessOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, ProcessOutcome::Empty)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Succeeded)
    }
}

impl From<ProcessOutcome> for bool {
    /// 布尔视图：`Empty` 与 `Failed` 都是 `false`
    fn from(outcome: ProcessOutcome) -> bool {
        outcome.is_success()
    }
}

struct CouplerEntry<T> {
    coupler: Arc<dyn Coupler<T>>,
    priority: Priority,
    sequence: u64,
}

impl<T> Clone for CouplerEntry<T> {
    fn clone(&self) -> Self {
        Self {
            coupler: Arc::clone(&self.coupler),
            priority: self.priority,
            sequence: self.sequence,
        }
    }
}

/// 类型化数据流管道
pub struct Pipeline<T: Payload> {
    name: String,
    config: PipelineConfig,
    queue_tx: Sender<Packet<T>>,
    queue_rx: Receiver<Packet<T>>,
    closed: AtomicBool,
    /// 已按（优先级降序，注册序升序）排好序
    couplers: ArcSwap<Vec<CouplerEntry<T>>>,
    consumers: ArcSwap<Vec<Arc<dyn Consumer<T>>>>,
    producers: ArcSwap<Vec<Arc<dyn Producer<T>>>>,
    /// 串行化注册写入；值为下一个 Coupler 序号
    write_lock: Mutex<u64>,
    runner: Option<StageRunner>,
    metrics: Arc<PipelineMetrics>,
}

impl<T: Payload> Pipeline<T> {
    /// 创建独立的 Pipeline（不做自动装配）
    ///
    /// 通常应使用 [`PipelineBuilder`](crate::PipelineBuilder)，
    /// 它会从注册表装配已声明的阶段并登记该 Pipeline。
    pub fn new(name: impl Into<String>, config: PipelineConfig) -> Result<Self, DriverError> {
        config.validate()?;
        let name = name.into();
        let (queue_tx, queue_rx) = bounded(config.queue_capacity);
        let runner = match config.stage_budget {
            Some(budget) => Some(StageRunner::new(name.clone(), budget)?),
            None => None,
        };

        debug!(
            "Pipeline '{}' created for {} (capacity {}, budget {:?}, dispatch {:?})",
            name,
            std::any::type_name::<T>(),
            config.queue_capacity,
            config.stage_budget,
            config.consumer_dispatch
        );

        Ok(Self {
            name,
            config,
            queue_tx,
            queue_rx,
            closed: AtomicBool::new(false),
            couplers: ArcSwap::from_pointee(Vec::new()),
            consumers: ArcSwap::from_pointee(Vec::new()),
            producers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(0),
            runner,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 载荷类型名（用于日志和诊断）
    pub fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// 当前排队的数据包数
    pub fn len(&self) -> usize {
        self.queue_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue_rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.queue_capacity
    }

    // ==================== 队列 ====================

    /// 入队
    ///
    /// 除非 Pipeline 已关闭，总是成功；队列满时丢弃最旧的数据包。
    pub fn enqueue(&self, packet: Packet<T>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            PipelineMetrics::incr(&self.metrics.rejected);
            debug!("Pipeline '{}' is closed, packet rejected", self.name);
            return false;
        }

        let mut packet = packet;
        loop {
            match self.queue_tx.try_send(packet) {
                Ok(()) => {
                    PipelineMetrics::incr(&self.metrics.enqueued);
                    trace!("Packet enqueued on pipeline '{}'", self.name);
                    return true;
                },
                Err(TrySendError::Full(back)) => {
                    if self.queue_rx.try_recv().is_ok() {
                        PipelineMetrics::incr(&self.metrics.dropped_oldest);
                        warn!(
                            "Pipeline '{}' queue full (capacity {}), dropped oldest packet",
                            self.name, self.config.queue_capacity
                        );
                    }
                    packet = back;
                },
                // 接收端由自身持有，不会断开
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    /// 以载荷值构造不可变数据包并入队
    pub fn push(&self, value: T) -> bool {
        self.enqueue(Packet::new(value))
    }

    /// 关闭 Pipeline：之后的 `enqueue` 均返回 `false`，已排队的数据包仍可处理
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Pipeline '{}' closed", self.name);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ==================== 处理 ====================

    /// 处理一个数据包（非阻塞）
    ///
    /// 队列为空时立即返回 [`ProcessOutcome::Empty`]，不调用任何 Consumer。
    pub fn process_packet(&self) -> ProcessOutcome {
        match self.queue_rx.try_recv() {
            Ok(packet) => self.run_packet(packet),
            Err(_) => ProcessOutcome::Empty,
        }
    }

    /// 处理一个数据包，队列为空时最多等待 `wait`
    pub fn process_packet_timeout(&self, wait: Duration) -> ProcessOutcome {
        match self.queue_rx.recv_timeout(wait) {
            Ok(packet) => self.run_packet(packet),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                ProcessOutcome::Empty
            },
        }
    }

    /// 处理当前队列中的全部数据包，返回处理数量
    pub fn drain(&self) -> usize {
        let mut processed = 0;
        while !self.process_packet().is_empty() {
            processed += 1;
        }
        processed
    }

    fn run_packet(&self, packet: Packet<T>) -> ProcessOutcome {
        PipelineMetrics::incr(&self.metrics.processed);
        trace!("Processing packet on pipeline '{}'", self.name);

        let result = self.fold_couplers(packet);
        if self.deliver(&result) {
            PipelineMetrics::incr(&self.metrics.succeeded);
            ProcessOutcome::Succeeded
        } else {
            PipelineMetrics::incr(&self.metrics.failed);
            ProcessOutcome::Failed
        }
    }

    /// 按顺序折叠 Coupler，失败的步骤透传输入
    fn fold_couplers(&self, packet: Packet<T>) -> Packet<T> {
        let couplers = self.couplers.load_full();
        let mut current = packet;
        for entry in couplers.iter() {
            match self.call_coupler(entry, &current) {
                Ok(next) => current = next,
                Err(e) => {
                    PipelineMetrics::incr(&self.metrics.coupler_failures);
                    if matches!(e, StageError::TimedOut(_)) {
                        PipelineMetrics::incr(&self.metrics.stage_timeouts);
                    }
                    warn!(
                        "[{}] coupler '{}' failed: {}; passing packet through unchanged",
                        self.name,
                        entry.coupler.name(),
                        e
                    );
                },
            }
        }
        current
    }

    fn call_coupler(
        &self,
        entry: &CouplerEntry<T>,
        packet: &Packet<T>,
    ) -> Result<Packet<T>, StageError> {
        match &self.runner {
            None => guarded_transform(&*entry.coupler, packet),
            Some(runner) => {
                let coupler = Arc::clone(&entry.coupler);
                let packet = packet.clone();
                runner
                    .run(stage_key(&entry.coupler), move || coupler.transform(&packet))
                    .and_then(|result| result)
            },
        }
    }

    /// 分发给全部 Consumer，结果取逻辑与（不短路）
    fn deliver(&self, packet: &Packet<T>) -> bool {
        let consumers = self.consumers.load_full();
        if consumers.is_empty() {
            return true;
        }

        if self.config.consumer_dispatch == ConsumerDispatch::Parallel && consumers.len() > 1 {
            let results = match &self.runner {
                Some(runner) => self.consume_detached(&consumers, packet, runner),
                None => self.consume_scoped(&consumers, packet),
            };
            return consumers
                .iter()
                .zip(results)
                .fold(true, |acc, (consumer, result)| {
                    self.account_consumer(consumer.name(), result) & acc
                });
        }

        consumers.iter().fold(true, |acc, consumer| {
            let result = self.call_consumer(consumer, packet);
            self.account_consumer(consumer.name(), result) & acc
        })
    }

    fn call_consumer(
        &self,
        consumer: &Arc<dyn Consumer<T>>,
        packet: &Packet<T>,
    ) -> Result<bool, StageError> {
        match &self.runner {
            None => guarded_consume(&**consumer, packet),
            Some(runner) => {
                let key = stage_key(consumer);
                let consumer = Arc::clone(consumer);
                let packet = packet.clone();
                runner.run(key, move || consumer.consume(&packet))
            },
        }
    }

    /// 无预算的并行分发：作用域线程
    fn consume_scoped(
        &self,
        consumers: &[Arc<dyn Consumer<T>>],
        packet: &Packet<T>,
    ) -> Vec<Result<bool, StageError>> {
        thread::scope(|scope| {
            let handles: Vec<_> = consumers
                .iter()
                .map(|consumer| {
                    thread::Builder::new()
                        .spawn_scoped(scope, move || guarded_consume(&**consumer, packet))
                        .map_err(|e| (consumer, e))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        Err(StageError::from_panic(payload))
                    }),
                    // 无法创建线程时就地调用
                    Err((consumer, e)) => {
                        debug!("[{}] spawn failed ({}), consuming inline", self.name, e);
                        guarded_consume(&**consumer, packet)
                    },
                })
                .collect()
        })
    }

    /// 有预算的并行分发：分离线程 + 截止时间
    ///
    /// 超时的 Consumer 进入隔离，直到它的调用返回前不再为它创建线程。
    fn consume_detached(
        &self,
        consumers: &[Arc<dyn Consumer<T>>],
        packet: &Packet<T>,
        runner: &StageRunner,
    ) -> Vec<Result<bool, StageError>> {
        let budget = runner.budget();
        let deadline = Instant::now() + budget;
        let (tx, rx) = unbounded();
        let mut results: Vec<Option<Result<bool, StageError>>> = vec![None; consumers.len()];
        let mut tickets: Vec<Option<CallTicket>> = vec![None; consumers.len()];

        for (index, consumer) in consumers.iter().enumerate() {
            let Some(ticket) = runner.admit(stage_key(consumer)) else {
                trace!("[{}] consumer '{}' is still stuck", self.name, consumer.name());
                results[index] = Some(Err(StageError::TimedOut(budget)));
                continue;
            };

            let worker_consumer = Arc::clone(consumer);
            let worker_packet = packet.clone();
            let worker_tx = tx.clone();
            let worker_ticket = ticket.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-consumer-{}", self.name, index))
                .spawn(move || {
                    let result = guarded_consume(&*worker_consumer, &worker_packet);
                    worker_ticket.finish();
                    let _ = worker_tx.send((index, result));
                });
            match spawned {
                Ok(_) => tickets[index] = Some(ticket),
                Err(e) => {
                    debug!("[{}] spawn failed ({}), consuming inline", self.name, e);
                    results[index] = Some(guarded_consume(&**consumer, packet));
                },
            }
        }
        drop(tx);

        while results.iter().any(Option::is_none) {
            match rx.recv_deadline(deadline) {
                Ok((index, result)) => results[index] = Some(result),
                Err(_) => break,
            }
        }

        results
            .into_iter()
            .zip(tickets)
            .map(|(result, ticket)| match (result, ticket) {
                (Some(result), _) => result,
                (None, Some(ticket)) => {
                    if ticket.abandon() {
                        warn!(
                            "[{}] consumer exceeded time budget of {:?}, abandoning thread",
                            self.name, budget
                        );
                    }
                    Err(StageError::TimedOut(budget))
                },
                (None, None) => Err(StageError::TimedOut(budget)),
            })
            .collect()
    }

    fn account_consumer(&self, name: &str, result: Result<bool, StageError>) -> bool {
        match result {
            Ok(true) => true,
            Ok(false) => {
                PipelineMetrics::incr(&self.metrics.consumer_failures);
                debug!("[{}] consumer '{}' reported failure", self.name, name);
                false
            },
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.consumer_failures);
                if matches!(e, StageError::TimedOut(_)) {
                    PipelineMetrics::incr(&self.metrics.stage_timeouts);
                }
                warn!("[{}] consumer '{}' failed: {}", self.name, name, e);
                false
            },
        }
    }

    // ==================== 注册 ====================

    /// 以默认优先级（`Medium`）注册 Coupler
    pub fn register_coupler(&self, coupler: Arc<dyn Coupler<T>>) -> bool {
        self.register_coupler_with_priority(coupler, Priority::default())
    }

    /// 以指定优先级注册 Coupler
    ///
    /// 同一实例重复注册时只更新优先级（保留原注册顺序），返回 `false`。
    pub fn register_coupler_with_priority(
        &self,
        coupler: Arc<dyn Coupler<T>>,
        priority: Priority,
    ) -> bool {
        let mut next_sequence = self.write_lock.lock();
        let mut entries: Vec<CouplerEntry<T>> = self.couplers.load().iter().cloned().collect();

        let added = match entries
            .iter_mut()
            .find(|entry| same_instance(&entry.coupler, &coupler))
        {
            Some(existing) => {
                existing.priority = priority;
                false
            },
            None => {
                entries.push(CouplerEntry {
                    coupler: Arc::clone(&coupler),
                    priority,
                    sequence: *next_sequence,
                });
                *next_sequence += 1;
                true
            },
        };

        // 稳定顺序：优先级降序，同级按注册顺序
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.sequence.cmp(&b.sequence))
        });
        self.couplers.store(Arc::new(entries));

        debug!(
            "Coupler '{}' registered to pipeline '{}' with priority {}",
            coupler.name(),
            self.name,
            priority
        );
        added
    }

    /// 批量注册 Coupler（同一优先级），返回各次结果的逻辑与
    pub fn register_couplers(
        &self,
        priority: Priority,
        couplers: impl IntoIterator<Item = Arc<dyn Coupler<T>>>,
    ) -> bool {
        couplers.into_iter().fold(true, |acc, coupler| {
            self.register_coupler_with_priority(coupler, priority) & acc
        })
    }

    /// 注册 Consumer，同一实例重复注册返回 `false`
    pub fn register_consumer(&self, consumer: Arc<dyn Consumer<T>>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.consumers.load_full();
        if current.iter().any(|c| same_instance(c, &consumer)) {
            return false;
        }

        let mut consumers: Vec<_> = current.iter().cloned().collect();
        debug!(
            "Consumer '{}' registered to pipeline '{}'",
            consumer.name(),
            self.name
        );
        consumers.push(consumer);
        self.consumers.store(Arc::new(consumers));
        true
    }

    pub fn register_consumers(
        &self,
        consumers: impl IntoIterator<Item = Arc<dyn Consumer<T>>>,
    ) -> bool {
        consumers
            .into_iter()
            .fold(true, |acc, consumer| self.register_consumer(consumer) & acc)
    }

    /// 登记 Producer，同一实例重复登记返回 `false`
    ///
    /// Producer 的数据包通过注册表发布到所有同类型 Pipeline，
    /// 这里只记录关联关系，供诊断与查询使用。
    pub fn register_producer(&self, producer: Arc<dyn Producer<T>>) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.producers.load_full();
        if current.iter().any(|p| same_instance(p, &producer)) {
            return false;
        }

        let mut producers: Vec<_> = current.iter().cloned().collect();
        debug!(
            "Producer '{}' registered to pipeline '{}'",
            producer.name(),
            self.name
        );
        producers.push(producer);
        self.producers.store(Arc::new(producers));
        true
    }

    /// 当前 Coupler 的执行顺序（名称, 优先级）
    pub fn coupler_order(&self) -> Vec<(String, Priority)> {
        self.couplers
            .load()
            .iter()
            .map(|entry| (entry.coupler.name().to_string(), entry.priority))
            .collect()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.load().len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.load().len()
    }
}

impl<T: Payload> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("payload", &self.payload_type())
            .field("queued", &self.len())
            .field("couplers", &self.couplers.load().len())
            .field("consumers", &self.consumer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{consumer_fn, coupler_fn};
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    fn unbudgeted() -> PipelineConfig {
        PipelineConfig {
            stage_budget: None,
            ..Default::default()
        }
    }

    fn append(marker: &'static str) -> Arc<dyn Coupler<String>> {
        Arc::new(coupler_fn(marker, move |p: &Packet<String>| {
            Ok(p.map(|s| format!("{s}{marker}")))
        }))
    }

    fn capture(slot: Arc<Mutex<Vec<String>>>) -> Arc<dyn Consumer<String>> {
        Arc::new(consumer_fn("capture", move |p: &Packet<String>| {
            slot.lock().push(p.read().clone());
            true
        }))
    }

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.stage_budget, Some(Duration::from_millis(20)));
        assert_eq!(config.consumer_dispatch, ConsumerDispatch::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_rejects_zero_capacity() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::<u8>::new("bad", config),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_queue_invokes_nothing() {
        let pipeline = Pipeline::<String>::new("empty", unbudgeted()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        pipeline.register_consumer(Arc::new(consumer_fn("count", move |_p: &Packet<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })));

        assert_eq!(pipeline.process_packet(), ProcessOutcome::Empty);
        assert!(!bool::from(pipeline.process_packet()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.metrics().processed, 0);
    }

    #[test]
    fn test_no_consumers_is_success() {
        let pipeline = Pipeline::<String>::new("sinkless", unbudgeted()).unwrap();
        assert!(pipeline.push(String::new()));
        assert_eq!(pipeline.process_packet(), ProcessOutcome::Succeeded);
    }

    #[test]
    fn test_priority_order_regardless_of_registration() {
        for budget in [None, Some(Duration::from_millis(200))] {
            let config = PipelineConfig {
                stage_budget: budget,
                ..Default::default()
            };
            let pipeline = Pipeline::<String>::new("order", config).unwrap();
            let seen = Arc::new(Mutex::new(Vec::new()));
            // B(LOW) 先注册，A(HIGH) 后注册
            pipeline.register_coupler_with_priority(append("B"), Priority::Low);
            pipeline.register_coupler_with_priority(append("A"), Priority::High);
            pipeline.register_consumer(capture(Arc::clone(&seen)));

            pipeline.push(String::new());
            assert!(pipeline.process_packet().is_success());
            assert_eq!(seen.lock().as_slice(), ["AB".to_string()]);
        }
    }

    #[test]
    fn test_equal_priority_keeps_registration_order() {
        let pipeline = Pipeline::<String>::new("ties", unbudgeted()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        pipeline.register_coupler(append("1"));
        pipeline.register_coupler_with_priority(append("u"), Priority::Urgent);
        pipeline.register_coupler(append("2"));
        pipeline.register_coupler(append("3"));
        pipeline.register_consumer(capture(Arc::clone(&seen)));

        for _ in 0..5 {
            pipeline.push(String::new());
        }
        assert_eq!(pipeline.drain(), 5);
        assert!(seen.lock().iter().all(|s| s == "u123"));
    }

    #[test]
    fn test_reregister_coupler_updates_priority() {
        let pipeline = Pipeline::<String>::new("rereg", unbudgeted()).unwrap();
        let a = append("A");
        let b = append("B");
        assert!(pipeline.register_coupler(Arc::clone(&a)));
        assert!(pipeline.register_coupler(Arc::clone(&b)));
        assert!(!pipeline.register_coupler_with_priority(Arc::clone(&b), Priority::Highest));

        let order: Vec<_> = pipeline.coupler_order().into_iter().map(|(n, _)| n).collect();
        assert_eq!(order, ["B", "A"]);
    }

    #[test]
    fn test_failing_coupler_passes_through() {
        let pipeline = Pipeline::<String>::new("failopen", unbudgeted()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        pipeline.register_coupler_with_priority(append("A"), Priority::High);
        pipeline.register_coupler(Arc::new(coupler_fn("broken", |_p: &Packet<String>| {
            Err(StageError::failed("bad input"))
        })));
        pipeline.register_coupler_with_priority(
            Arc::new(coupler_fn(
                "panics",
                |_p: &Packet<String>| -> Result<Packet<String>, StageError> {
                    panic!("coupler bug")
                },
            )),
            Priority::Low,
        );
        pipeline.register_coupler_with_priority(append("Z"), Priority::Lowest);
        pipeline.register_consumer(capture(Arc::clone(&seen)));

        pipeline.push(String::new());
        assert!(pipeline.process_packet().is_success());
        assert_eq!(seen.lock().as_slice(), ["AZ".to_string()]);
        assert_eq!(pipeline.metrics().coupler_failures, 2);
    }

    #[test]
    fn test_consumer_results_are_anded_without_short_circuit() {
        for dispatch in [ConsumerDispatch::Sequential, ConsumerDispatch::Parallel] {
            for budget in [None, Some(Duration::from_millis(500))] {
                let config = PipelineConfig {
                    consumer_dispatch: dispatch,
                    stage_budget: budget,
                    ..Default::default()
                };
                let pipeline = Pipeline::<String>::new("and", config).unwrap();
                let calls = Arc::new(AtomicUsize::new(0));

                for ok in [false, true, true] {
                    let counter = Arc::clone(&calls);
                    pipeline.register_consumer(Arc::new(consumer_fn(
                        "c",
                        move |_p: &Packet<String>| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            ok
                        },
                    )));
                }
                pipeline.register_consumer(Arc::new(consumer_fn(
                    "panics",
                    |_p: &Packet<String>| -> bool { panic!("sink bug") },
                )));

                pipeline.push(String::new());
                assert_eq!(pipeline.process_packet(), ProcessOutcome::Failed);
                assert_eq!(calls.load(Ordering::SeqCst), 3, "{dispatch:?} {budget:?}");
                assert_eq!(pipeline.metrics().consumer_failures, 2);
            }
        }
    }

    #[test]
    fn test_duplicate_consumer_is_noop() {
        let pipeline = Pipeline::<String>::new("dup", unbudgeted()).unwrap();
        let consumer = capture(Arc::new(Mutex::new(Vec::new())));
        assert!(pipeline.register_consumer(Arc::clone(&consumer)));
        assert!(!pipeline.register_consumer(consumer));
        assert_eq!(pipeline.consumer_count(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let pipeline = Pipeline::<String>::new("fifo", unbudgeted()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        pipeline.register_consumer(capture(Arc::clone(&seen)));
        for s in ["1", "2", "3"] {
            pipeline.push(s.to_string());
        }
        pipeline.drain();
        assert_eq!(seen.lock().as_slice(), ["1", "2", "3"]);
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let config = PipelineConfig {
            queue_capacity: 2,
            stage_budget: None,
            ..Default::default()
        };
        let pipeline = Pipeline::<String>::new("bounded", config).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        pipeline.register_consumer(capture(Arc::clone(&seen)));

        for s in ["old", "mid", "new"] {
            assert!(pipeline.push(s.to_string()));
        }
        assert_eq!(pipeline.len(), 2);
        pipeline.drain();
        assert_eq!(seen.lock().as_slice(), ["mid", "new"]);

        let metrics = pipeline.metrics();
        assert_eq!(metrics.enqueued, 3);
        assert_eq!(metrics.dropped_oldest, 1);
    }

    #[test]
    fn test_close_rejects_new_packets() {
        let pipeline = Pipeline::<String>::new("closing", unbudgeted()).unwrap();
        assert!(pipeline.push("queued".to_string()));
        pipeline.close();
        assert!(pipeline.is_closed());
        assert!(!pipeline.push("late".to_string()));
        assert_eq!(pipeline.metrics().rejected, 1);
        // 已排队的仍可处理
        assert!(pipeline.process_packet().is_success());
    }

    #[test]
    fn test_concurrent_enqueue_no_duplicates() {
        let config = PipelineConfig {
            queue_capacity: 1024,
            stage_budget: None,
            ..Default::default()
        };
        let pipeline = Arc::new(Pipeline::<String>::new("mpsc", config).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        pipeline.register_consumer(capture(Arc::clone(&seen)));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    for i in 0..100 {
                        pipeline.push(format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pipeline.drain(), 400);
        let mut all = seen.lock().clone();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
    }

    #[test]
    fn test_process_packet_timeout_waits() {
        let pipeline = Pipeline::<String>::new("wait", unbudgeted()).unwrap();
        let start = Instant::now();
        assert_eq!(
            pipeline.process_packet_timeout(Duration::from_millis(20)),
            ProcessOutcome::Empty
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    fn budgeted(dispatch: ConsumerDispatch, budget_ms: u64) -> PipelineConfig {
        PipelineConfig {
            stage_budget: Some(Duration::from_millis(budget_ms)),
            consumer_dispatch: dispatch,
            ..Default::default()
        }
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Arc<dyn Consumer<String>> {
        let counter = Arc::clone(calls);
        Arc::new(consumer_fn("count", move |_p: &Packet<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }))
    }

    #[test]
    #[serial]
    fn test_slow_coupler_is_skipped_within_budget() {
        let pipeline =
            Pipeline::<String>::new("slowcpl", budgeted(ConsumerDispatch::Sequential, 30))
                .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        pipeline.register_coupler_with_priority(append("A"), Priority::High);
        pipeline.register_coupler_with_priority(
            Arc::new(coupler_fn("sleepy", |p: &Packet<String>| {
                thread::sleep(Duration::from_millis(300));
                Ok(p.map(|s| format!("{s}S")))
            })),
            Priority::Medium,
        );
        pipeline.register_coupler_with_priority(append("Z"), Priority::Low);
        pipeline.register_consumer(capture(Arc::clone(&seen)));

        pipeline.push(String::new());
        assert_eq!(pipeline.process_packet(), ProcessOutcome::Succeeded);
        assert_eq!(seen.lock().as_slice(), ["AZ".to_string()]);

        let metrics = pipeline.metrics();
        assert_eq!(metrics.stage_timeouts, 1);
        assert_eq!(metrics.coupler_failures, 1);
    }

    #[test]
    #[serial]
    fn test_slow_consumer_fails_packet() {
        for dispatch in [ConsumerDispatch::Sequential, ConsumerDispatch::Parallel] {
            let pipeline = Pipeline::<String>::new("slowcns", budgeted(dispatch, 30)).unwrap();
            let calls = Arc::new(AtomicUsize::new(0));

            pipeline.register_consumer(counting(&calls));
            pipeline.register_consumer(Arc::new(consumer_fn(
                "sleepy",
                |_p: &Packet<String>| {
                    thread::sleep(Duration::from_millis(300));
                    true
                },
            )));
            pipeline.register_consumer(counting(&calls));

            pipeline.push(String::new());
            assert_eq!(pipeline.process_packet(), ProcessOutcome::Failed, "{dispatch:?}");
            assert_eq!(calls.load(Ordering::SeqCst), 2, "{dispatch:?}");

            let metrics = pipeline.metrics();
            assert_eq!(metrics.stage_timeouts, 1, "{dispatch:?}");
            assert_eq!(metrics.consumer_failures, 1, "{dispatch:?}");
        }
    }

    #[test]
    #[serial]
    fn test_hung_consumer_does_not_grow_threads() {
        for (name, dispatch) in [
            ("hangseq", ConsumerDispatch::Sequential),
            ("hangpar", ConsumerDispatch::Parallel),
        ] {
            let pipeline = Pipeline::<u32>::new(name, budgeted(dispatch, 20)).unwrap();
            let (release_tx, release_rx) = bounded::<()>(0);
            let delivered = Arc::new(AtomicUsize::new(0));

            pipeline.register_consumer(Arc::new(consumer_fn("hung", move |_p: &Packet<u32>| {
                let _ = release_rx.recv();
                true
            })));
            let counter = Arc::clone(&delivered);
            pipeline.register_consumer(Arc::new(consumer_fn("ok", move |_p: &Packet<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })));

            for i in 0..50 {
                pipeline.push(i);
                assert_eq!(pipeline.process_packet(), ProcessOutcome::Failed, "{name}");
            }

            assert_eq!(delivered.load(Ordering::SeqCst), 50, "{name}");
            assert_eq!(pipeline.metrics().stage_timeouts, 50, "{name}");
            let runner = pipeline.runner.as_ref().unwrap();
            assert_eq!(runner.stuck_stages(), 1, "{name}");

            #[cfg(target_os = "linux")]
            assert!(
                crate::budget::live_threads(name) <= crate::budget::MAX_STUCK_STAGES + 2,
                "{name}"
            );

            // 卡住的调用返回后恢复调用
            drop(release_tx);
            let deadline = Instant::now() + Duration::from_secs(2);
            while runner.stuck_stages() > 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            pipeline.push(99);
            assert_eq!(pipeline.process_packet(), ProcessOutcome::Succeeded, "{name}");
        }
    }
}
