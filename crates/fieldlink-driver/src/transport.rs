//! 传输注册表与扇出发送
//!
//! 每种 [`SendMethod`] 最多对应一个发送器。发送时：
//! - 没有发送器的方式记录警告并计为失败
//! - 有发送器的方式并行发送，互不短路
//! - 总结果 = 全部发送成功 且 没有缺失的方式
//!
//! 注册表本身实现 `Consumer<RadioPacket>`，作为 Radio Pipeline 的终端消费者。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use fieldlink_protocol::RadioMessage;
use fieldlink_transport::{SendMethod, Sender, TransportError};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::packet::Packet;
use crate::radio::RadioPacket;
use crate::stage::Consumer;

type Route = (SendMethod, Arc<dyn Sender>);

/// 传输注册表
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use fieldlink_driver::TransportRegistry;
/// use fieldlink_protocol::{RadioMessage, RobotCommand};
/// use fieldlink_transport::{SendMethod, UdpSender};
///
/// let transports = TransportRegistry::new();
/// transports.register(SendMethod::Udp, Arc::new(UdpSender::new("127.0.0.1:10001").unwrap()));
///
/// // 第一个注册的方式自动成为默认方式
/// assert_eq!(transports.defaults(), vec![SendMethod::Udp]);
///
/// let message = RadioMessage::single(RobotCommand::stop(3));
/// let sent = transports.send(&message, &[SendMethod::Udp]);
/// # let _ = sent;
/// ```
#[derive(Default)]
pub struct TransportRegistry {
    senders: RwLock<HashMap<SendMethod, Arc<dyn Sender>>>,
    defaults: Mutex<Vec<SendMethod>>,
    metrics: TransportMetrics,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 发送器管理 ====================

    /// 注册发送器
    ///
    /// 覆盖同一方式的已有发送器（先释放旧发送器）。
    /// 若这是唯一的发送器且尚未设置默认方式，`method` 成为默认方式。
    pub fn register(&self, method: SendMethod, sender: Arc<dyn Sender>) {
        // 替换在同一写锁内完成，被替换的发送器在锁外释放
        let (previous, count) = {
            let mut senders = self.senders.write();
            let previous = senders.insert(method, Arc::clone(&sender));
            (previous, senders.len())
        };
        if let Some(previous) = previous {
            info!("Sender for {} is overwritten by '{}'", method, sender.name());
            self.release(method, &*previous);
        }
        info!("Sender '{}' registered for {}", sender.name(), method);

        let mut defaults = self.defaults.lock();
        if count == 1 && defaults.is_empty() {
            debug!("{} becomes the default send method", method);
            defaults.push(method);
        }
    }

    /// 注销并释放发送器
    ///
    /// 没有该方式的发送器或释放失败时返回 `false`。
    pub fn unregister(&self, method: SendMethod) -> bool {
        let Some(sender) = self.senders.write().remove(&method) else {
            warn!("No sender registered for {}, nothing to unregister", method);
            return false;
        };
        self.release(method, &*sender)
    }

    fn release(&self, method: SendMethod, sender: &dyn Sender) -> bool {
        match sender.unregister() {
            Ok(()) => {
                info!("Sender '{}' for {} unregistered", sender.name(), method);
                true
            },
            Err(e) => {
                error!(
                    "Sender '{}' for {} failed to release its transport: {}",
                    sender.name(),
                    method,
                    e
                );
                false
            },
        }
    }

    /// 注销全部发送器，返回各次结果的逻辑与
    pub fn unregister_all(&self) -> bool {
        self.methods()
            .into_iter()
            .fold(true, |acc, method| self.unregister(method) & acc)
    }

    pub fn is_registered(&self, method: SendMethod) -> bool {
        self.senders.read().contains_key(&method)
    }

    /// 已注册的方式（按方式编号排序）
    pub fn methods(&self) -> Vec<SendMethod> {
        let mut methods: Vec<_> = self.senders.read().keys().copied().collect();
        methods.sort();
        methods
    }

    pub fn sender(&self, method: SendMethod) -> Option<Arc<dyn Sender>> {
        self.senders.read().get(&method).cloned()
    }

    // ==================== 默认方式 ====================

    /// 添加默认方式
    ///
    /// 没有对应发送器或已是默认方式时返回 `false`。
    pub fn add_default(&self, method: SendMethod) -> bool {
        if !self.is_registered(method) {
            warn!("Cannot use {} as default: no sender registered", method);
            return false;
        }

        let mut defaults = self.defaults.lock();
        if defaults.contains(&method) {
            debug!("{} is already a default send method", method);
            return false;
        }
        defaults.push(method);
        debug!("{} added to default send methods", method);
        true
    }

    /// 批量添加默认方式，返回各次结果的逻辑与
    pub fn add_defaults(&self, methods: impl IntoIterator<Item = SendMethod>) -> bool {
        methods
            .into_iter()
            .fold(true, |acc, method| self.add_default(method) & acc)
    }

    /// 移除默认方式，不是默认方式时返回 `false`
    pub fn remove_default(&self, method: SendMethod) -> bool {
        let mut defaults = self.defaults.lock();
        match defaults.iter().position(|m| *m == method) {
            Some(index) => {
                defaults.remove(index);
                debug!("{} removed from default send methods", method);
                true
            },
            None => false,
        }
    }

    /// 当前默认方式（按添加顺序）
    pub fn defaults(&self) -> Vec<SendMethod> {
        self.defaults.lock().clone()
    }

    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    // ==================== 发送 ====================

    /// 通过指定方式发送
    ///
    /// 缺失发送器的方式计为失败，但不影响其他方式的发送。
    /// 同一方式在 `methods` 中重复出现时只发送一次。
    pub fn send(&self, message: &RadioMessage, methods: &[SendMethod]) -> bool {
        if methods.is_empty() {
            error!("Send method has not been set, message dropped");
            return false;
        }

        let mut unique: SmallVec<[SendMethod; 8]> = SmallVec::new();
        for method in methods {
            if !unique.contains(method) {
                unique.push(*method);
            }
        }

        let (routes, missing) = {
            let senders = self.senders.read();
            let mut routes: SmallVec<[Route; 8]> = SmallVec::new();
            let mut missing: SmallVec<[SendMethod; 8]> = SmallVec::new();
            for method in unique {
                match senders.get(&method) {
                    Some(sender) => routes.push((method, Arc::clone(sender))),
                    None => missing.push(method),
                }
            }
            (routes, missing)
        };

        for method in &missing {
            self.metrics.missing_handlers.fetch_add(1, Ordering::Relaxed);
            warn!("No sender registered for {}", method);
        }

        let results = self.dispatch(message, &routes);
        let all_sent = routes
            .iter()
            .zip(results)
            .fold(true, |acc, ((method, sender), result)| {
                self.account(*method, &**sender, result) & acc
            });

        all_sent && missing.is_empty()
    }

    /// 通过默认方式发送
    pub fn send_default(&self, message: &RadioMessage) -> bool {
        let defaults = self.defaults();
        self.send(message, &defaults)
    }

    /// 发送出站数据包（未指定方式时使用默认方式）
    pub fn send_packet(&self, packet: &RadioPacket) -> bool {
        if packet.uses_defaults() {
            self.send_default(&packet.message)
        } else {
            self.send(&packet.message, &packet.methods)
        }
    }

    /// 并行分发；单一路由时在当前线程发送
    fn dispatch(
        &self,
        message: &RadioMessage,
        routes: &[Route],
    ) -> Vec<Result<(), TransportError>> {
        self.metrics
            .dispatched
            .fetch_add(routes.len() as u64, Ordering::Relaxed);

        if routes.len() <= 1 {
            return routes
                .iter()
                .map(|(_, sender)| guarded_send(&**sender, message))
                .collect();
        }

        thread::scope(|scope| {
            let handles: Vec<_> = routes
                .iter()
                .map(|(method, sender)| {
                    let spawned = thread::Builder::new()
                        .name(format!("send-{}", method))
                        .spawn_scoped(scope, move || guarded_send(&**sender, message));
                    (sender, spawned)
                })
                .collect();

            handles
                .into_iter()
                .map(|(sender, spawned)| match spawned {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(TransportError::Device("sender thread panicked".into()))
                    }),
                    Err(e) => {
                        debug!("Failed to spawn send thread ({}), sending inline", e);
                        guarded_send(&**sender, message)
                    },
                })
                .collect()
        })
    }

    fn account(
        &self,
        method: SendMethod,
        sender: &dyn Sender,
        result: Result<(), TransportError>,
    ) -> bool {
        match result {
            Ok(()) => {
                trace!("Sent via {} ('{}')", method, sender.name());
                true
            },
            Err(e) => {
                self.metrics.sender_failures.fetch_add(1, Ordering::Relaxed);
                error!("Send via {} ('{}') failed: {}", method, sender.name(), e);
                false
            },
        }
    }
}

/// 发送器边界：panic 折算为设备错误
fn guarded_send(sender: &dyn Sender, message: &RadioMessage) -> Result<(), TransportError> {
    catch_unwind(AssertUnwindSafe(|| sender.send(message))).unwrap_or_else(|_| {
        Err(TransportError::Device(
            format!("sender '{}' panicked", sender.name()).into(),
        ))
    })
}

impl Consumer<RadioPacket> for TransportRegistry {
    fn consume(&self, packet: &Packet<RadioPacket>) -> bool {
        self.send_packet(packet.read())
    }

    fn name(&self) -> &str {
        "transport-registry"
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("methods", &self.methods())
            .field("defaults", &self.defaults())
            .finish()
    }
}
