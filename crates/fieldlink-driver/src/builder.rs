//! Pipeline Builder
//!
//! 提供链式 API 创建并登记 Pipeline：
//! 1. 按载荷类型从注册表取回已声明的 Producer / Coupler / Consumer（自动装配）
//! 2. 追加显式传入的阶段
//! 3. 把 Pipeline 登记到注册表，之后发布到该类型的数据包都会进入它的队列

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::DriverError;
use crate::packet::Payload;
use crate::pipeline::{ConsumerDispatch, Pipeline, PipelineConfig};
use crate::priority::Priority;
use crate::registry::Registry;
use crate::stage::{Consumer, Coupler, Producer};

/// Pipeline Builder
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use fieldlink_driver::{Packet, PipelineBuilder, Priority, Registry, coupler_fn};
///
/// let registry = Arc::new(Registry::new());
/// let pipeline = PipelineBuilder::<String>::new("strategy")
///     .queue_capacity(16)
///     .stage_budget(Some(Duration::from_millis(5)))
///     .coupler(
///         Arc::new(coupler_fn("trim", |p: &Packet<String>| Ok(p.map(|s| s.trim().to_string())))),
///         Priority::High,
///     )
///     .build(&registry)
///     .unwrap();
///
/// assert_eq!(pipeline.name(), "strategy");
/// assert_eq!(pipeline.capacity(), 16);
/// ```
pub struct PipelineBuilder<T: Payload> {
    name: String,
    config: PipelineConfig,
    auto_wire: bool,
    producers: Vec<Arc<dyn Producer<T>>>,
    couplers: Vec<(Arc<dyn Coupler<T>>, Priority)>,
    consumers: Vec<Arc<dyn Consumer<T>>>,
}

impl<T: Payload> PipelineBuilder<T> {
    /// 创建新的 Builder（默认配置，启用自动装配）
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PipelineConfig::default(),
            auto_wire: true,
            producers: Vec::new(),
            couplers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// 整体替换配置
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// 设置阶段时间预算（`None` 表示不限制）
    pub fn stage_budget(mut self, budget: Option<Duration>) -> Self {
        self.config.stage_budget = budget;
        self
    }

    pub fn consumer_dispatch(mut self, dispatch: ConsumerDispatch) -> Self {
        self.config.consumer_dispatch = dispatch;
        self
    }

    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.config.idle_wait = wait;
        self
    }

    /// 是否从注册表自动装配已声明的阶段（默认 `true`）
    pub fn auto_wire(mut self, enabled: bool) -> Self {
        self.auto_wire = enabled;
        self
    }

    pub fn producer(mut self, producer: Arc<dyn Producer<T>>) -> Self {
        self.producers.push(producer);
        self
    }

    pub fn coupler(mut self, coupler: Arc<dyn Coupler<T>>, priority: Priority) -> Self {
        self.couplers.push((coupler, priority));
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn Consumer<T>>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// 创建 Pipeline 并登记到注册表
    ///
    /// # 错误
    ///
    /// - 配置无效
    /// - 同类型下已存在同名 Pipeline
    /// - 阶段工作线程创建失败
    pub fn build(self, registry: &Arc<Registry>) -> Result<Arc<Pipeline<T>>, DriverError> {
        if registry.pipeline::<T>(&self.name).is_some() {
            return Err(DriverError::DuplicatePipeline {
                name: self.name,
                payload: std::any::type_name::<T>(),
            });
        }

        let auto_wire = self.auto_wire;
        let pipeline = Arc::new(self.assemble(auto_wire.then_some(&**registry))?);
        registry.attach(Arc::clone(&pipeline))?;

        info!(
            "Pipeline '{}' built for {} ({} coupler(s), {} consumer(s))",
            pipeline.name(),
            pipeline.payload_type(),
            pipeline.coupler_order().len(),
            pipeline.consumer_count()
        );
        Ok(pipeline)
    }

    /// 创建不登记到任何注册表的 Pipeline（只使用显式传入的阶段）
    pub fn build_detached(self) -> Result<Pipeline<T>, DriverError> {
        self.assemble(None)
    }

    fn assemble(self, registry: Option<&Registry>) -> Result<Pipeline<T>, DriverError> {
        let pipeline = Pipeline::new(self.name, self.config)?;

        // 先装配已声明的阶段，再追加显式阶段，同优先级下前者先执行
        if let Some(registry) = registry {
            for producer in registry.producers::<T>() {
                pipeline.register_producer(producer);
            }
            for (coupler, priority) in registry.couplers::<T>() {
                pipeline.register_coupler_with_priority(coupler, priority);
            }
            for consumer in registry.consumers::<T>() {
                pipeline.register_consumer(consumer);
            }
        }

        for producer in self.producers {
            pipeline.register_producer(producer);
        }
        for (coupler, priority) in self.couplers {
            pipeline.register_coupler_with_priority(coupler, priority);
        }
        for consumer in self.consumers {
            pipeline.register_consumer(consumer);
        }

        Ok(pipeline)
    }
}
