//! 变换阶段优先级
//!
//! Pipeline 按优先级从高到低依次执行 Coupler；
//! 同一优先级内按注册顺序执行（稳定排序）。

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 优先级（8 级，全序）
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum Priority {
    Lowest = 0,
    Lower = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Higher = 5,
    Highest = 6,
    Urgent = 7,
}

impl Priority {
    /// 由低到高的全部优先级
    pub const ALL: [Priority; 8] = [
        Priority::Lowest,
        Priority::Lower,
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Higher,
        Priority::Highest,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Lowest => "lowest",
            Priority::Lower => "lower",
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Higher => "higher",
            Priority::Highest => "highest",
            Priority::Urgent => "urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
