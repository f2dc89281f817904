//! 数据包
//!
//! `Packet<T>` 在 Pipeline 中承载一个类型为 `T` 的值。
//! 载荷以 `Arc<T>` 共享，克隆数据包不会复制载荷；
//! 变换阶段总是返回新的数据包，而不是原地修改。

use std::fmt;
use std::sync::Arc;

/// 可以在 Pipeline 中流动的载荷类型
///
/// 自动为所有 `Send + Sync + 'static` 类型实现。
pub trait Payload: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Payload for T {}

/// 携带单个载荷值的数据包
///
/// 默认不可变：只能通过 [`save`](Packet::save) 得到持有新值的数据包。
/// 以 [`Packet::mutable`] 创建的数据包额外允许 [`modify`](Packet::modify) 原地修改。
pub struct Packet<T> {
    value: Arc<T>,
    mutable: bool,
}

impl<T> Packet<T> {
    /// 创建不可变数据包
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(value),
            mutable: false,
        }
    }

    /// 创建可变数据包
    pub fn mutable(value: T) -> Self {
        Self {
            value: Arc::new(value),
            mutable: true,
        }
    }

    /// 读取当前值（无副作用）
    #[inline]
    pub fn read(&self) -> &T {
        &self.value
    }

    /// 共享的载荷指针
    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// 返回持有 `value` 的数据包，保留可变性标记
    pub fn save(&self, value: T) -> Packet<T> {
        Packet {
            value: Arc::new(value),
            mutable: self.mutable,
        }
    }

    /// 以当前值计算新值并保存
    pub fn map(&self, f: impl FnOnce(&T) -> T) -> Packet<T> {
        self.save(f(&self.value))
    }

    /// 组合辅助：`packet.apply(f)` 等价于 `f(packet)`
    pub fn apply(self, f: impl FnOnce(Packet<T>) -> Packet<T>) -> Packet<T> {
        f(self)
    }

    /// 原地修改（仅限可变数据包）
    ///
    /// 不可变数据包返回 `false` 且值保持不变。
    /// 若载荷仍被其他数据包共享，会先复制一份（写时复制）。
    pub fn modify(&mut self, f: impl FnOnce(&mut T)) -> bool
    where
        T: Clone,
    {
        if !self.mutable {
            return false;
        }
        f(Arc::make_mut(&mut self.value));
        true
    }

    /// 取出载荷值
    pub fn into_inner(self) -> T
    where
        T: Clone,
    {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl<T> Clone for Packet<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            mutable: self.mutable,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("value", &self.value)
            .field("mutable", &self.mutable)
            .finish()
    }
}

impl<T: PartialEq> PartialEq for Packet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.mutable == other.mutable && self.value == other.value
    }
}

impl<T> From<T> for Packet<T> {
    fn from(value: T) -> Self {
        Packet::new(value)
    }
}
