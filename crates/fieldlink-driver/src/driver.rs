//! Pipeline 驱动线程
//!
//! 每个 Pipeline 由一个专用线程循环调用 `process_packet`：
//! 队列为空时阻塞等待 `idle_wait`，停止标志置位或 Pipeline 关闭且排空后退出。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::error::DriverError;
use crate::metrics::{PipelineMetrics, PipelineMetricsSnapshot};
use crate::packet::Payload;
use crate::pipeline::{Pipeline, ProcessOutcome};

/// 线程退出的默认等待时长
pub(crate) const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 带超时的 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join 目标线程
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            // 超时后看门狗线程继续运行，进程退出时回收
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 尝试提升当前线程优先级
#[cfg(feature = "realtime")]
pub(crate) fn raise_thread_priority(label: &str) {
    use thread_priority::*;
    use tracing::{info, warn};

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => {
            info!("{} thread priority set to MAX (realtime)", label);
        },
        Err(e) => {
            warn!(
                "Failed to set {} thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                label, e
            );
        },
    }
}

/// 驱动循环
///
/// # 参数
/// - `pipeline`: 被驱动的 Pipeline
/// - `is_running`: 运行标志，置为 `false` 后在下一次等待结束时退出
fn drive_loop<T: Payload>(pipeline: Arc<Pipeline<T>>, is_running: Arc<AtomicBool>) {
    #[cfg(feature = "realtime")]
    raise_thread_priority(&format!("Driver '{}'", pipeline.name()));

    let idle_wait = pipeline.config().idle_wait;
    debug!("Driver for pipeline '{}' started", pipeline.name());

    // 使用 Acquire 确保看到 stop() 之前的全部写入
    while is_running.load(Ordering::Acquire) {
        match pipeline.process_packet_timeout(idle_wait) {
            ProcessOutcome::Empty => {
                if pipeline.is_closed() && pipeline.is_empty() {
                    debug!("Pipeline '{}' closed and drained", pipeline.name());
                    break;
                }
            },
            ProcessOutcome::Failed => {
                trace!("Pipeline '{}' packet failed", pipeline.name());
            },
            ProcessOutcome::Succeeded => {},
        }
    }

    is_running.store(false, Ordering::Release);
    debug!("Driver for pipeline '{}' exited", pipeline.name());
}

/// 驱动线程句柄
///
/// Drop 时停止线程并等待其退出（最多 2 秒）。
pub struct DriverHandle {
    name: String,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
    thread: Option<JoinHandle<()>>,
}

/// 为 Pipeline 启动专用驱动线程
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use fieldlink_driver::{Packet, PipelineBuilder, Registry, consumer_fn, spawn_driver};
///
/// let registry = Arc::new(Registry::new());
/// let pipeline = PipelineBuilder::<u8>::new("bytes")
///     .consumer(Arc::new(consumer_fn("sink", |_p: &Packet<u8>| true)))
///     .build(&registry)
///     .unwrap();
///
/// let driver = spawn_driver(Arc::clone(&pipeline)).unwrap();
/// pipeline.push(1);
/// driver.join(Duration::from_secs(1)).unwrap();
/// ```
pub fn spawn_driver<T: Payload>(pipeline: Arc<Pipeline<T>>) -> Result<DriverHandle, DriverError> {
    let name = format!("{}-driver", pipeline.name());
    let is_running = Arc::new(AtomicBool::new(true));
    let metrics = pipeline.metrics_handle();

    let thread_running = Arc::clone(&is_running);
    let thread = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || drive_loop(pipeline, thread_running))
        .map_err(|source| DriverError::Spawn {
            name: name.clone(),
            source,
        })?;

    Ok(DriverHandle {
        name,
        is_running,
        metrics,
        thread: Some(thread),
    })
}

impl DriverHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 请求停止（协作式，不等待）
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 停止并等待线程退出
    pub fn join(mut self, timeout: Duration) -> Result<(), DriverError> {
        self.stop();
        match self.thread.take() {
            Some(handle) => handle.join_timeout(timeout).map_err(|_| DriverError::JoinTimeout {
                name: self.name.clone(),
                timeout,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.stop();

        if let Some(handle) = self.thread.take()
            && let Err(_e) = handle.join_timeout(DEFAULT_JOIN_TIMEOUT)
        {
            error!(
                "Driver thread '{}' panicked or failed to shut down within {:?}",
                self.name, DEFAULT_JOIN_TIMEOUT
            );
        }
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("is_running", &self.is_running())
            .finish()
    }
}
