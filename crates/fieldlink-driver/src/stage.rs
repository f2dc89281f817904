//! 阶段 Trait
//!
//! 数据流由三类阶段组成：
//! - [`Producer`]: 产生数据包
//! - [`Coupler`]: 纯变换，按优先级串联执行
//! - [`Consumer`]: 终端消费者，报告成功/失败
//!
//! 具体阶段是实现一个或多个 Trait 的值，通过组合而不是继承复用。
//! 闭包可以用 [`producer_fn`]、[`coupler_fn`]、[`consumer_fn`] 包装成阶段。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::StageError;
use crate::packet::{Packet, Payload};

/// 数据包来源
pub trait Producer<T: Payload>: Send + Sync {
    /// 产生一个数据包
    ///
    /// 返回 `Err` 时本次调用被跳过，不会终止周期调度。
    fn produce(&self) -> Result<Packet<T>, StageError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 纯变换阶段
///
/// 不得有日志以外的可观察副作用，不得阻塞。
/// 返回 `Err` 时引擎记录日志并把输入原样传给下一阶段。
pub trait Coupler<T: Payload>: Send + Sync {
    fn transform(&self, packet: &Packet<T>) -> Result<Packet<T>, StageError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 终端消费者
///
/// 返回值表示本次消费是否成功；panic 在边界处被捕获并视为 `false`。
pub trait Consumer<T: Payload>: Send + Sync {
    fn consume(&self, packet: &Packet<T>) -> bool;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 闭包 Producer
pub struct FnProducer<F> {
    name: String,
    f: F,
}

/// 闭包 Coupler
pub struct FnCoupler<F> {
    name: String,
    f: F,
}

/// 闭包 Consumer
pub struct FnConsumer<F> {
    name: String,
    f: F,
}

/// 用闭包构造 Producer
///
/// # 示例
///
/// ```
/// use fieldlink_driver::{Packet, Producer, producer_fn};
///
/// let ticker = producer_fn("ticker", || Ok(Packet::new(1u32)));
/// assert_eq!(*ticker.produce().unwrap().read(), 1);
/// ```
pub fn producer_fn<T, F>(name: impl Into<String>, f: F) -> FnProducer<F>
where
    T: Payload,
    F: Fn() -> Result<Packet<T>, StageError> + Send + Sync,
{
    FnProducer {
        name: name.into(),
        f,
    }
}

/// 用闭包构造 Coupler
///
/// # 示例
///
/// ```
/// use fieldlink_driver::{Coupler, Packet, coupler_fn};
///
/// let upper = coupler_fn("upper", |p: &Packet<String>| Ok(p.map(|s| s.to_uppercase())));
/// let out = upper.transform(&Packet::new("ab".to_string())).unwrap();
/// assert_eq!(out.read(), "AB");
/// ```
pub fn coupler_fn<T, F>(name: impl Into<String>, f: F) -> FnCoupler<F>
where
    T: Payload,
    F: Fn(&Packet<T>) -> Result<Packet<T>, StageError> + Send + Sync,
{
    FnCoupler {
        name: name.into(),
        f,
    }
}

/// 用闭包构造 Consumer
pub fn consumer_fn<T, F>(name: impl Into<String>, f: F) -> FnConsumer<F>
where
    T: Payload,
    F: Fn(&Packet<T>) -> bool + Send + Sync,
{
    FnConsumer {
        name: name.into(),
        f,
    }
}

impl<T, F> Producer<T> for FnProducer<F>
where
    T: Payload,
    F: Fn() -> Result<Packet<T>, StageError> + Send + Sync,
{
    fn produce(&self) -> Result<Packet<T>, StageError> {
        (self.f)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, F> Coupler<T> for FnCoupler<F>
where
    T: Payload,
    F: Fn(&Packet<T>) -> Result<Packet<T>, StageError> + Send + Sync,
{
    fn transform(&self, packet: &Packet<T>) -> Result<Packet<T>, StageError> {
        (self.f)(packet)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<T, F> Consumer<T> for FnConsumer<F>
where
    T: Payload,
    F: Fn(&Packet<T>) -> bool + Send + Sync,
{
    fn consume(&self, packet: &Packet<T>) -> bool {
        (self.f)(packet)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// === 边界调用：把 panic 折算为 StageError ===

pub(crate) fn guarded_produce<T: Payload>(
    producer: &(impl Producer<T> + ?Sized),
) -> Result<Packet<T>, StageError> {
    catch_unwind(AssertUnwindSafe(|| producer.produce()))
        .unwrap_or_else(|payload| Err(StageError::from_panic(payload)))
}

pub(crate) fn guarded_transform<T: Payload>(
    coupler: &(impl Coupler<T> + ?Sized),
    packet: &Packet<T>,
) -> Result<Packet<T>, StageError> {
    catch_unwind(AssertUnwindSafe(|| coupler.transform(packet)))
        .unwrap_or_else(|payload| Err(StageError::from_panic(payload)))
}

pub(crate) fn guarded_consume<T: Payload>(
    consumer: &(impl Consumer<T> + ?Sized),
    packet: &Packet<T>,
) -> Result<bool, StageError> {
    catch_unwind(AssertUnwindSafe(|| consumer.consume(packet))).map_err(StageError::from_panic)
}

/// 比较两个 trait object 是否指向同一个实例（忽略 vtable）
pub(crate) fn same_instance<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
