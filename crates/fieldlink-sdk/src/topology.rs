//! 标准 Pipeline 拓扑
//!
//! ```text
//! detection ─┐
//! geometry  ─┼─▶ (策略 Consumer / Translator) ─▶ strategy ─▶ radio ─▶ TransportRegistry ─▶ 发送器
//! referee   ─┘
//! ```
//!
//! 这里只负责创建五条命名 Pipeline 并把传输注册表挂到 radio 上；
//! 之间的 Translator 由应用自行声明（在 `build` 之前声明即可自动装配）。

use std::sync::Arc;

use fieldlink_driver::{
    ConsumerDispatch, DriverError, DriverHandle, Pipeline, PipelineBuilder, PipelineConfig,
    Registry, TransportRegistry, spawn_driver,
};
use fieldlink_tools::{ConfigError, DispatchMode, FieldlinkConfig, PipelineSection, TransportEntry};
use fieldlink_transport::tcp::DEFAULT_CONNECT_TIMEOUT;
use fieldlink_transport::{SendMethod, Sender, TcpSender, TransportError, UdpSender};
use thiserror::Error;
use tracing::{debug, info};

use crate::frames::{DetectionFrame, GeometryFrame, RadioPacket, RefereeState, StrategyFrame};

/// 拓扑装配错误
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open transport '{method}': {source}")]
    Transport {
        method: SendMethod,
        #[source]
        source: TransportError,
    },
}

/// `[pipeline]` 配置段转换为引擎配置
pub fn pipeline_config(section: &PipelineSection) -> PipelineConfig {
    PipelineConfig {
        queue_capacity: section.queue_capacity,
        stage_budget: section.stage_budget(),
        consumer_dispatch: match section.consumer_dispatch {
            DispatchMode::Sequential => ConsumerDispatch::Sequential,
            DispatchMode::Parallel => ConsumerDispatch::Parallel,
        },
        idle_wait: section.idle_wait(),
    }
}

/// 按 `[[transport]]` 条目打开发送器
///
/// # 错误
/// 端点无效、设备无法打开，或未启用 `serial` feature 时配置了串口类方式。
pub fn open_sender(entry: &TransportEntry) -> Result<Arc<dyn Sender>, TopologyError> {
    entry.validate()?;
    let method = entry.method;
    let wrap = |source: TransportError| TopologyError::Transport { method, source };

    let sender: Arc<dyn Sender> = match method {
        SendMethod::Udp | SendMethod::WifiDirect => {
            let address = entry.address.as_deref().unwrap_or_default();
            Arc::new(UdpSender::new(address).map_err(wrap)?.with_name(method.as_str()))
        },
        SendMethod::Tcp => {
            let address = entry.address.as_deref().unwrap_or_default();
            let timeout = entry.connect_timeout().unwrap_or(DEFAULT_CONNECT_TIMEOUT);
            Arc::new(TcpSender::connect(address, timeout).map_err(wrap)?)
        },
        SendMethod::Serial | SendMethod::Bluetooth => open_serial(entry).map_err(wrap)?,
    };
    Ok(sender)
}

#[cfg(feature = "serial")]
fn open_serial(entry: &TransportEntry) -> Result<Arc<dyn Sender>, TransportError> {
    use fieldlink_transport::SerialSender;

    let device = entry.device.as_deref().unwrap_or_default();
    let sender = SerialSender::open(device, entry.baud_rate())?.with_name(entry.method.as_str());
    Ok(Arc::new(sender))
}

#[cfg(not(feature = "serial"))]
fn open_serial(entry: &TransportEntry) -> Result<Arc<dyn Sender>, TransportError> {
    use fieldlink_transport::{TransportDeviceError, TransportDeviceErrorKind};

    Err(TransportDeviceError::new(
        TransportDeviceErrorKind::UnsupportedConfig,
        format!("'{}' requires the `serial` feature", entry.method),
    )
    .into())
}

/// 按配置注册全部发送器并设置默认方式
///
/// 配置了 `defaults` 时，默认方式与其完全一致；否则沿用注册表的规则
/// （第一个注册的发送器成为默认方式）。
pub fn register_transports(
    transports: &TransportRegistry,
    config: &FieldlinkConfig,
) -> Result<(), TopologyError> {
    config.validate()?;

    for entry in &config.transports {
        transports.register(entry.method, open_sender(entry)?);
    }
    apply_defaults(transports, &config.defaults)
}

/// 把注册表的默认方式设置为 `defaults`（为空时不变）
pub fn apply_defaults(
    transports: &TransportRegistry,
    defaults: &[SendMethod],
) -> Result<(), TopologyError> {
    if defaults.is_empty() {
        return Ok(());
    }

    for method in transports.defaults() {
        if !defaults.contains(&method) {
            transports.remove_default(method);
        }
    }
    let current = transports.defaults();
    for &method in defaults {
        if !current.contains(&method) && !transports.add_default(method) {
            return Err(ConfigError::Invalid(format!(
                "default send method '{}' has no registered sender",
                method
            ))
            .into());
        }
    }
    debug!("Default send methods: {:?}", transports.defaults());
    Ok(())
}

/// 五条标准 Pipeline
pub struct StandardTopology {
    pub detection: Arc<Pipeline<DetectionFrame>>,
    pub geometry: Arc<Pipeline<GeometryFrame>>,
    pub referee: Arc<Pipeline<RefereeState>>,
    pub strategy: Arc<Pipeline<StrategyFrame>>,
    pub radio: Arc<Pipeline<RadioPacket>>,
    transports: Arc<TransportRegistry>,
}

impl StandardTopology {
    pub const PIPELINE_NAMES: [&'static str; 5] =
        ["detection", "geometry", "referee", "strategy", "radio"];

    /// 在 `registry` 中创建五条 Pipeline
    ///
    /// 已在注册表中声明的 Producer/Coupler/Consumer 按载荷类型自动装配；
    /// `transports` 作为 radio Pipeline 的 Consumer。
    ///
    /// # 错误
    /// 配置段无效，或注册表中已有同名同类型的 Pipeline。
    ///
    /// # 示例
    ///
    /// ```
    /// use std::sync::Arc;
    /// use fieldlink_driver::{Registry, TransportRegistry};
    /// use fieldlink_sdk::topology::StandardTopology;
    /// use fieldlink_tools::PipelineSection;
    ///
    /// let registry = Arc::new(Registry::new());
    /// let topology = StandardTopology::build(
    ///     &registry,
    ///     &PipelineSection::default(),
    ///     Arc::new(TransportRegistry::new()),
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(registry.pipeline_infos().len(), 5);
    /// assert_eq!(topology.radio.consumer_count(), 1);
    /// ```
    pub fn build(
        registry: &Arc<Registry>,
        section: &PipelineSection,
        transports: Arc<TransportRegistry>,
    ) -> Result<Self, TopologyError> {
        section.validate()?;
        let config = pipeline_config(section);

        let detection = PipelineBuilder::<DetectionFrame>::new("detection")
            .config(config.clone())
            .build(registry)?;
        let geometry = PipelineBuilder::<GeometryFrame>::new("geometry")
            .config(config.clone())
            .build(registry)?;
        let referee = PipelineBuilder::<RefereeState>::new("referee")
            .config(config.clone())
            .build(registry)?;
        let strategy = PipelineBuilder::<StrategyFrame>::new("strategy")
            .config(config.clone())
            .build(registry)?;
        let radio = PipelineBuilder::<RadioPacket>::new("radio")
            .config(config)
            .consumer(transports.clone())
            .build(registry)?;

        info!("Standard topology ready ({} send methods)", transports.methods().len());
        Ok(Self {
            detection,
            geometry,
            referee,
            strategy,
            radio,
            transports,
        })
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    /// 为每条 Pipeline 启动驱动线程
    ///
    /// 任一线程启动失败时，已启动的线程随返回的错误一起被释放（Drop 时停止并回收）。
    pub fn spawn_drivers(&self) -> Result<Vec<DriverHandle>, DriverError> {
        Ok(vec![
            spawn_driver(self.detection.clone())?,
            spawn_driver(self.geometry.clone())?,
            spawn_driver(self.referee.clone())?,
            spawn_driver(self.strategy.clone())?,
            spawn_driver(self.radio.clone())?,
        ])
    }

    /// 关闭全部 Pipeline（不再接受新数据包）
    pub fn close(&self) {
        self.detection.close();
        self.geometry.close();
        self.referee.close();
        self.strategy.close();
        self.radio.close();
    }
}
