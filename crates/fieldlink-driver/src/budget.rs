//! 阶段时间预算
//!
//! 在专用工作线程上执行 Coupler / Consumer 调用，调用方最多等待预算时长。
//! 超时后放弃卡住的工作线程（它在当前调用返回后自行退出），并启动新的工作线程，
//! 保证一个挂起的阶段不会拖住整个 Pipeline 的驱动循环。
//!
//! 超时的阶段实例进入隔离：在被放弃的调用返回之前，对它的后续调用直接以
//! `TimedOut` 失败，不再占用新线程。同一 Pipeline 中同时卡住的阶段数达到
//! [`MAX_STUCK_STAGES`] 后，所有阶段调用都直接失败，直到有阶段恢复。
//! 因此每个 Pipeline 的预算线程数不超过 `MAX_STUCK_STAGES + 1`。

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use crate::error::{DriverError, StageError};

/// 每个 Pipeline 同时允许卡住的阶段数
pub const MAX_STUCK_STAGES: usize = 2;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 阶段实例的标识（`Arc` 指向的地址）
pub(crate) fn stage_key<S: ?Sized>(stage: &Arc<S>) -> usize {
    Arc::as_ptr(stage) as *const () as usize
}

const PENDING: u8 = 0;
const DONE: u8 = 1;
const ABANDONED: u8 = 2;

/// 一次受预算约束的阶段调用
///
/// 执行线程在调用返回后 `finish`，调用方在截止时间到达后 `abandon`；
/// 两者在隔离表的锁内完成状态切换，先到者决定结果。
#[derive(Clone)]
pub(crate) struct CallTicket {
    key: usize,
    state: Arc<AtomicU8>,
    stuck: Arc<Mutex<HashSet<usize>>>,
}

impl CallTicket {
    pub(crate) fn finish(&self) {
        let mut stuck = self.stuck.lock();
        if self.state.swap(DONE, Ordering::AcqRel) == ABANDONED {
            stuck.remove(&self.key);
        }
    }

    /// 放弃调用，返回 `true` 表示阶段进入隔离；调用已返回时为 `false`
    pub(crate) fn abandon(&self) -> bool {
        let mut stuck = self.stuck.lock();
        let abandoned = self
            .state
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if abandoned {
            stuck.insert(self.key);
        }
        abandoned
    }
}

/// 带时间预算的阶段执行器
pub(crate) struct StageRunner {
    label: String,
    budget: Duration,
    jobs: Mutex<Sender<Job>>,
    generation: AtomicU64,
    stuck: Arc<Mutex<HashSet<usize>>>,
}

fn spawn_worker(label: &str, generation: u64) -> Result<Sender<Job>, DriverError> {
    let (tx, rx) = unbounded::<Job>();
    let name = format!("{}-stage-{}", label, generation);
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            for job in rx.iter() {
                job();
            }
            trace!("stage worker exiting");
        })
        .map_err(|source| DriverError::Spawn { name, source })?;
    Ok(tx)
}

impl StageRunner {
    pub(crate) fn new(label: impl Into<String>, budget: Duration) -> Result<Self, DriverError> {
        let label = label.into();
        let jobs = spawn_worker(&label, 0)?;
        Ok(Self {
            label,
            budget,
            jobs: Mutex::new(jobs),
            generation: AtomicU64::new(0),
            stuck: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub(crate) fn budget(&self) -> Duration {
        self.budget
    }

    /// 当前处于隔离中的阶段数
    pub(crate) fn stuck_stages(&self) -> usize {
        self.stuck.lock().len()
    }

    /// 为阶段 `key` 申请一次调用；阶段被隔离或卡住的阶段已达上限时返回 `None`
    pub(crate) fn admit(&self, key: usize) -> Option<CallTicket> {
        let stuck = self.stuck.lock();
        if stuck.contains(&key) || stuck.len() >= MAX_STUCK_STAGES {
            return None;
        }
        Some(CallTicket {
            key,
            state: Arc::new(AtomicU8::new(PENDING)),
            stuck: Arc::clone(&self.stuck),
        })
    }

    /// 替换工作线程，旧线程在当前任务结束后退出
    fn replace_worker(&self) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        match spawn_worker(&self.label, generation) {
            Ok(jobs) => {
                *self.jobs.lock() = jobs;
                true
            },
            Err(e) => {
                error!("[{}] failed to replace stage worker: {}", self.label, e);
                false
            },
        }
    }

    /// 在预算内执行阶段 `key` 的调用 `f`
    ///
    /// - `Ok(r)`: 按时完成
    /// - `Err(TimedOut)`: 超出预算（工作线程已被替换），或阶段仍在隔离中
    /// - `Err(Panicked)`: `f` 内部 panic
    pub(crate) fn run<R, F>(&self, key: usize, f: F) -> Result<R, StageError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let Some(ticket) = self.admit(key) else {
            trace!("[{}] stage is still stuck, skipping call", self.label);
            return Err(StageError::TimedOut(self.budget));
        };

        let (result_tx, result_rx) = bounded(1);
        let worker_ticket = ticket.clone();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            worker_ticket.finish();
            // 调用方可能已超时离开
            let _ = result_tx.send(result);
        });

        let rejected = self.jobs.lock().send(job).err();
        if let Some(crossbeam_channel::SendError(job)) = rejected {
            warn!("[{}] stage worker gone, restarting", self.label);
            if !self.replace_worker() || self.jobs.lock().send(job).is_err() {
                return Err(StageError::Panicked("stage worker unavailable".to_string()));
            }
        }

        let received = match result_rx.recv_timeout(self.budget) {
            Err(RecvTimeoutError::Timeout) if ticket.abandon() => {
                warn!(
                    "[{}] stage exceeded time budget of {:?}, abandoning worker",
                    self.label, self.budget
                );
                self.replace_worker();
                return Err(StageError::TimedOut(self.budget));
            },
            // 截止时刻调用恰好返回，结果随后送达
            Err(RecvTimeoutError::Timeout) => result_rx.recv().ok(),
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Disconnected) => None,
        };

        match received {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => Err(StageError::from_panic(payload)),
            None => Err(StageError::Panicked("stage worker disconnected".to_string())),
        }
    }
}

/// 名称以 `prefix` 开头的存活线程数（仅 Linux）
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn live_threads(prefix: &str) -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .filter_map(Result::ok)
                .filter_map(|task| std::fs::read_to_string(task.path().join("comm")).ok())
                .filter(|name| name.starts_with(prefix))
                .count()
        })
        .unwrap_or(0)
}
