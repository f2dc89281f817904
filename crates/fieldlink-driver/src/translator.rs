//! 跨 Pipeline 转换器
//!
//! `Translator<T, U>` 是 `Pipeline<T>` 上的一个 Consumer：它把收到的 `Packet<T>`
//! 转换为 `Packet<U>`，再发布到注册表中全部 `Pipeline<U>`。
//! 两个 Pipeline 彼此不知道对方的存在，只通过载荷类型关联。

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use tracing::{trace, warn};

use crate::error::StageError;
use crate::packet::{Packet, Payload};
use crate::registry::Registry;
use crate::stage::Consumer;

type TranslateFn<T, U> = dyn Fn(&Packet<T>) -> Result<Packet<U>, StageError> + Send + Sync;

/// 把 `Pipeline<T>` 桥接到全部 `Pipeline<U>` 的 Consumer
///
/// 只持有注册表的弱引用，不会阻止注册表释放。
///
/// # 示例
///
/// ```
/// use std::sync::Arc;
/// use fieldlink_driver::{Packet, PipelineBuilder, Registry, Translator};
///
/// let registry = Arc::new(Registry::new());
/// let lengths = PipelineBuilder::<usize>::new("lengths").build(&registry).unwrap();
///
/// let translator = Translator::new("len", &registry, |p: &Packet<String>| Ok(Packet::new(p.read().len())));
/// let words = PipelineBuilder::<String>::new("words")
///     .consumer(Arc::new(translator))
///     .build(&registry)
///     .unwrap();
///
/// words.push("robot".to_string());
/// assert!(words.process_packet().is_success());
/// assert_eq!(lengths.len(), 1);
/// ```
pub struct Translator<T: Payload, U: Payload> {
    name: String,
    registry: Weak<Registry>,
    translate: Box<TranslateFn<T, U>>,
    _marker: PhantomData<fn(T) -> U>,
}

impl<T: Payload, U: Payload> Translator<T, U> {
    pub fn new<F>(name: impl Into<String>, registry: &Arc<Registry>, translate: F) -> Self
    where
        F: Fn(&Packet<T>) -> Result<Packet<U>, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            registry: Arc::downgrade(registry),
            translate: Box::new(translate),
            _marker: PhantomData,
        }
    }

    /// 只做转换，不发布
    pub fn translate(&self, packet: &Packet<T>) -> Result<Packet<U>, StageError> {
        (self.translate)(packet)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Payload, U: Payload> Consumer<T> for Translator<T, U> {
    /// 转换并发布到全部 `Pipeline<U>`
    ///
    /// 转换失败、注册表已释放或没有任何下游 Pipeline 时返回 `false`。
    fn consume(&self, packet: &Packet<T>) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            warn!("[{}] registry dropped, cannot publish", self.name);
            return false;
        };

        match self.translate(packet) {
            Ok(translated) => {
                trace!(
                    "[{}] {} -> {}",
                    self.name,
                    std::any::type_name::<T>(),
                    std::any::type_name::<U>()
                );
                registry.publish(translated)
            },
            Err(e) => {
                warn!("[{}] translation failed: {}", self.name, e);
                false
            },
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PipelineBuilder;

    #[derive(Debug, Clone, PartialEq)]
    struct Frame(u32);

    #[derive(Debug, Clone, PartialEq)]
    struct Command(u32);

    fn doubling(registry: &Arc<Registry>) -> Translator<Frame, Command> {
        Translator::new("double", registry, |p: &Packet<Frame>| {
            Ok(Packet::new(Command(p.read().0 * 2)))
        })
    }

    #[test]
    fn test_publishes_to_every_downstream_pipeline() {
        let registry = Arc::new(Registry::new());
        let a = PipelineBuilder::<Command>::new("a").build(&registry).unwrap();
        let b = PipelineBuilder::<Command>::new("b").build(&registry).unwrap();

        assert!(doubling(&registry).consume(&Packet::new(Frame(21))));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_without_downstream_fails() {
        let registry = Arc::new(Registry::new());
        assert!(!doubling(&registry).consume(&Packet::new(Frame(1))));
    }

    #[test]
    fn test_translation_error_fails() {
        let registry = Arc::new(Registry::new());
        let downstream = PipelineBuilder::<Command>::new("cmd").build(&registry).unwrap();
        let translator: Translator<Frame, Command> =
            Translator::new("reject", &registry, |_p: &Packet<Frame>| {
                Err(StageError::failed("no robots on field"))
            });

        assert!(!translator.consume(&Packet::new(Frame(1))));
        assert!(downstream.is_empty());
    }

    #[test]
    fn test_dropped_registry_fails() {
        let registry = Arc::new(Registry::new());
        let translator = doubling(&registry);
        drop(registry);
        assert!(!translator.consume(&Packet::new(Frame(1))));
    }

    #[test]
    fn test_translate_only() {
        let registry = Arc::new(Registry::new());
        let out = doubling(&registry).translate(&Packet::new(Frame(4))).unwrap();
        assert_eq!(out.read(), &Command(8));
    }
}
