//! 类型键注册表
//!
//! 每个 `Registry` 是一个显式的装配上下文（不是进程级单例）：
//! 阶段按载荷类型（`TypeId`）声明在这里，Pipeline 构建时按类型取回并自动装配；
//! Producer 与 Translator 通过它把数据包发布到同类型的全部 Pipeline。
//!
//! 不同载荷类型的声明彼此完全隔离，`Pipeline<A>` 不会看到为 `B` 声明的阶段。

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::packet::{Packet, Payload};
use crate::pipeline::Pipeline;
use crate::priority::Priority;
use crate::stage::{Consumer, Coupler, Producer, same_instance};

/// 单一载荷类型的装配表
struct Wiring<T: Payload> {
    producers: Vec<Arc<dyn Producer<T>>>,
    couplers: Vec<(Arc<dyn Coupler<T>>, Priority)>,
    consumers: Vec<Arc<dyn Consumer<T>>>,
    pipelines: Vec<Arc<Pipeline<T>>>,
}

impl<T: Payload> Default for Wiring<T> {
    fn default() -> Self {
        Self {
            producers: Vec::new(),
            couplers: Vec::new(),
            consumers: Vec::new(),
            pipelines: Vec::new(),
        }
    }
}

type Slot<T> = Arc<Mutex<Wiring<T>>>;

/// 擦除载荷类型后的 Pipeline 视图
trait ErasedPipeline: Send + Sync {
    fn info(&self) -> PipelineInfo;
    fn close_erased(&self);
    fn is(&self, name: &str, payload: &'static str) -> bool;
}

impl<T: Payload> ErasedPipeline for Pipeline<T> {
    fn info(&self) -> PipelineInfo {
        PipelineInfo {
            name: self.name().to_string(),
            payload: self.payload_type(),
            queued: self.len(),
            closed: self.is_closed(),
        }
    }

    fn close_erased(&self) {
        self.close();
    }

    fn is(&self, name: &str, payload: &'static str) -> bool {
        self.name() == name && self.payload_type() == payload
    }
}

/// Pipeline 概要信息（跨载荷类型的诊断视图）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    pub name: String,
    pub payload: &'static str,
    pub queued: usize,
    pub closed: bool,
}

/// 类型键装配上下文
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use fieldlink_driver::{Packet, PipelineBuilder, Registry, consumer_fn};
///
/// let registry = Arc::new(Registry::new());
/// registry.declare_consumer::<u32>(Arc::new(consumer_fn("even", |p: &Packet<u32>| *p.read() % 2 == 0)));
///
/// let pipeline = PipelineBuilder::<u32>::new("numbers").build(&registry).unwrap();
/// assert_eq!(pipeline.consumer_count(), 1);
///
/// assert!(registry.publish(Packet::new(4u32)));
/// assert!(pipeline.process_packet().is_success());
/// ```
#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    all: RwLock<Vec<Arc<dyn ErasedPipeline>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot<T: Payload>(&self) -> Slot<T> {
        let key = TypeId::of::<T>();
        if let Some(slot) = self
            .slots
            .read()
            .get(&key)
            .and_then(|boxed| boxed.downcast_ref::<Slot<T>>())
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        slots
            .entry(key)
            .or_insert_with(|| Box::new(Slot::<T>::default()))
            .downcast_ref::<Slot<T>>()
            .cloned()
            // 同一 TypeId 必为同一类型
            .unwrap_or_default()
    }

    fn existing_slot<T: Payload>(&self) -> Option<Slot<T>> {
        self.slots
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<Slot<T>>())
            .cloned()
    }

    // ==================== 声明 ====================

    /// 为载荷类型 `T` 声明 Producer
    ///
    /// 只影响之后构建的 Pipeline 的登记信息；Producer 的调度见
    /// [`start_producer`](crate::start_producer)。同一实例重复声明返回 `false`。
    pub fn declare_producer<T: Payload>(&self, producer: Arc<dyn Producer<T>>) -> bool {
        let slot = self.slot::<T>();
        let mut wiring = slot.lock();
        if wiring.producers.iter().any(|p| same_instance(p, &producer)) {
            return false;
        }
        debug!(
            "Producer '{}' declared for {}",
            producer.name(),
            std::any::type_name::<T>()
        );
        wiring.producers.push(producer);
        true
    }

    /// 以默认优先级声明 Coupler
    pub fn declare_coupler<T: Payload>(&self, coupler: Arc<dyn Coupler<T>>) -> bool {
        self.declare_coupler_with_priority(coupler, Priority::default())
    }

    /// 以指定优先级声明 Coupler
    ///
    /// 同一实例重复声明时更新优先级，返回 `false`。
    pub fn declare_coupler_with_priority<T: Payload>(
        &self,
        coupler: Arc<dyn Coupler<T>>,
        priority: Priority,
    ) -> bool {
        let slot = self.slot::<T>();
        let mut wiring = slot.lock();
        if let Some(entry) = wiring
            .couplers
            .iter_mut()
            .find(|(c, _)| same_instance(c, &coupler))
        {
            entry.1 = priority;
            return false;
        }
        debug!(
            "Coupler '{}' declared for {} with priority {}",
            coupler.name(),
            std::any::type_name::<T>(),
            priority
        );
        wiring.couplers.push((coupler, priority));
        true
    }

    /// 为载荷类型 `T` 声明 Consumer，同一实例重复声明返回 `false`
    pub fn declare_consumer<T: Payload>(&self, consumer: Arc<dyn Consumer<T>>) -> bool {
        let slot = self.slot::<T>();
        let mut wiring = slot.lock();
        if wiring.consumers.iter().any(|c| same_instance(c, &consumer)) {
            return false;
        }
        debug!(
            "Consumer '{}' declared for {}",
            consumer.name(),
            std::any::type_name::<T>()
        );
        wiring.consumers.push(consumer);
        true
    }

    // ==================== 查询 ====================

    pub fn producers<T: Payload>(&self) -> Vec<Arc<dyn Producer<T>>> {
        self.existing_slot::<T>()
            .map(|slot| slot.lock().producers.clone())
            .unwrap_or_default()
    }

    /// 已声明的 Coupler（按声明顺序）
    pub fn couplers<T: Payload>(&self) -> Vec<(Arc<dyn Coupler<T>>, Priority)> {
        self.existing_slot::<T>()
            .map(|slot| slot.lock().couplers.clone())
            .unwrap_or_default()
    }

    pub fn consumers<T: Payload>(&self) -> Vec<Arc<dyn Consumer<T>>> {
        self.existing_slot::<T>()
            .map(|slot| slot.lock().consumers.clone())
            .unwrap_or_default()
    }

    /// 载荷类型 `T` 的全部 Pipeline（按登记顺序）
    pub fn pipelines<T: Payload>(&self) -> Vec<Arc<Pipeline<T>>> {
        self.existing_slot::<T>()
            .map(|slot| slot.lock().pipelines.clone())
            .unwrap_or_default()
    }

    /// 按名称查找载荷类型 `T` 的 Pipeline
    pub fn pipeline<T: Payload>(&self, name: &str) -> Option<Arc<Pipeline<T>>> {
        let slot = self.existing_slot::<T>()?;
        let wiring = slot.lock();
        wiring
            .pipelines
            .iter()
            .find(|pipeline| pipeline.name() == name)
            .cloned()
    }

    /// 所有载荷类型的 Pipeline 概要
    pub fn pipeline_infos(&self) -> Vec<PipelineInfo> {
        self.all.read().iter().map(|p| p.info()).collect()
    }

    // ==================== Pipeline 登记 ====================

    /// 登记一个 Pipeline，同类型下名称必须唯一
    pub(crate) fn attach<T: Payload>(&self, pipeline: Arc<Pipeline<T>>) -> Result<(), DriverError> {
        let slot = self.slot::<T>();
        let mut wiring = slot.lock();
        if wiring.pipelines.iter().any(|p| p.name() == pipeline.name()) {
            return Err(DriverError::DuplicatePipeline {
                name: pipeline.name().to_string(),
                payload: std::any::type_name::<T>(),
            });
        }

        self.all.write().push(Arc::clone(&pipeline) as Arc<dyn ErasedPipeline>);
        info!(
            "Pipeline '{}' registered for {}",
            pipeline.name(),
            pipeline.payload_type()
        );
        wiring.pipelines.push(pipeline);
        Ok(())
    }

    /// 移除并关闭一个 Pipeline
    pub fn remove_pipeline<T: Payload>(&self, name: &str) -> Option<Arc<Pipeline<T>>> {
        let slot = self.existing_slot::<T>()?;
        let mut wiring = slot.lock();
        let index = wiring.pipelines.iter().position(|p| p.name() == name)?;
        let pipeline = wiring.pipelines.remove(index);
        pipeline.close();

        let payload = std::any::type_name::<T>();
        self.all.write().retain(|p| !p.is(name, payload));
        info!("Pipeline '{}' removed for {}", name, payload);
        Some(pipeline)
    }

    /// 关闭全部 Pipeline（所有载荷类型）
    pub fn close_all(&self) {
        let all = self.all.read();
        debug!("Closing {} pipeline(s)", all.len());
        for pipeline in all.iter() {
            pipeline.close_erased();
        }
    }

    // ==================== 发布 ====================

    /// 把数据包推送到载荷类型 `T` 的全部 Pipeline
    ///
    /// 返回各次入队结果的逻辑与；没有任何同类型 Pipeline 时返回 `false`。
    pub fn publish<T: Payload>(&self, packet: Packet<T>) -> bool {
        let pipelines = self.pipelines::<T>();
        if pipelines.is_empty() {
            warn!(
                "No pipeline registered for {}, packet dropped",
                std::any::type_name::<T>()
            );
            return false;
        }

        pipelines
            .iter()
            .fold(true, |acc, pipeline| pipeline.enqueue(packet.clone()) & acc)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("payload_types", &self.slots.read().len())
            .field("pipelines", &self.pipeline_infos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::stage::{consumer_fn, coupler_fn, producer_fn};

    #[derive(Debug, Clone, PartialEq)]
    struct Detection(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Referee(&'static str);

    fn attached<T: Payload>(registry: &Registry, name: &str) -> Arc<Pipeline<T>> {
        let pipeline = Arc::new(Pipeline::new(name, PipelineConfig::default()).unwrap());
        registry.attach(Arc::clone(&pipeline)).unwrap();
        pipeline
    }

    #[test]
    fn test_declarations_are_keyed_by_type() {
        let registry = Registry::new();
        registry.declare_consumer::<Referee>(Arc::new(consumer_fn(
            "ref",
            |_p: &Packet<Referee>| true,
        )));
        registry.declare_coupler::<Detection>(Arc::new(coupler_fn("id", |p: &Packet<Detection>| {
            Ok(p.clone())
        })));

        assert_eq!(registry.consumers::<Referee>().len(), 1);
        assert!(registry.consumers::<Detection>().is_empty());
        assert_eq!(registry.couplers::<Detection>().len(), 1);
        assert!(registry.couplers::<Referee>().is_empty());
        assert!(registry.producers::<u64>().is_empty());
    }

    #[test]
    fn test_duplicate_declarations() {
        let registry = Registry::new();
        let consumer: Arc<dyn Consumer<u8>> = Arc::new(consumer_fn("c", |_p: &Packet<u8>| true));
        assert!(registry.declare_consumer(Arc::clone(&consumer)));
        assert!(!registry.declare_consumer(consumer));

        let producer: Arc<dyn Producer<u8>> = Arc::new(producer_fn("p", || Ok(Packet::new(1u8))));
        assert!(registry.declare_producer(Arc::clone(&producer)));
        assert!(!registry.declare_producer(producer));

        let coupler: Arc<dyn Coupler<u8>> =
            Arc::new(coupler_fn("k", |p: &Packet<u8>| Ok(p.clone())));
        assert!(registry.declare_coupler(Arc::clone(&coupler)));
        assert!(!registry.declare_coupler_with_priority(coupler, Priority::Urgent));
        assert_eq!(registry.couplers::<u8>()[0].1, Priority::Urgent);
    }

    #[test]
    fn test_publish_reaches_every_pipeline_of_type() {
        let registry = Registry::new();
        let a = attached::<Detection>(&registry, "a");
        let b = attached::<Detection>(&registry, "b");
        let other = attached::<Referee>(&registry, "referee");

        assert!(registry.publish(Packet::new(Detection(1))));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(other.len(), 0);
    }

    #[test]
    fn test_publish_without_pipeline_fails() {
        let registry = Registry::new();
        assert!(!registry.publish(Packet::new(Detection(1))));
    }

    #[test]
    fn test_publish_to_closed_pipeline_fails() {
        let registry = Registry::new();
        let open = attached::<u16>(&registry, "open");
        let closed = attached::<u16>(&registry, "closed");
        closed.close();

        assert!(!registry.publish(Packet::new(7u16)));
        // 未关闭的 Pipeline 仍然收到数据包
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_lookup_by_name() {
        let registry = Registry::new();
        attached::<Detection>(&registry, "vision");
        attached::<Referee>(&registry, "vision");

        assert!(registry.pipeline::<Detection>("vision").is_some());
        assert!(registry.pipeline::<Referee>("vision").is_some());
        assert!(registry.pipeline::<Detection>("missing").is_none());
        assert_eq!(registry.pipeline_infos().len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected_per_type() {
        let registry = Registry::new();
        attached::<Detection>(&registry, "vision");
        let duplicate =
            Arc::new(Pipeline::<Detection>::new("vision", PipelineConfig::default()).unwrap());
        assert!(matches!(
            registry.attach(duplicate),
            Err(DriverError::DuplicatePipeline { .. })
        ));
    }

    #[test]
    fn test_remove_and_close_all() {
        let registry = Registry::new();
        let keep = attached::<Detection>(&registry, "keep");
        attached::<Detection>(&registry, "drop");

        let removed = registry.remove_pipeline::<Detection>("drop").unwrap();
        assert!(removed.is_closed());
        assert_eq!(registry.pipelines::<Detection>().len(), 1);
        assert_eq!(registry.pipeline_infos().len(), 1);

        registry.close_all();
        assert!(keep.is_closed());
        assert!(registry.pipeline_infos().iter().all(|info| info.closed));
    }
}
