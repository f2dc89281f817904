//! 出站无线数据包
//!
//! Radio Pipeline 的载荷：一个控制周期内全队的指令，加上本次要使用的传输方式。

use fieldlink_protocol::{RadioMessage, RobotCommand};
use fieldlink_transport::SendMethod;
use smallvec::SmallVec;

/// 出站数据包
///
/// `methods` 为空表示使用传输注册表的默认方式。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioPacket {
    pub message: RadioMessage,
    pub methods: SmallVec<[SendMethod; 4]>,
}

impl RadioPacket {
    /// 使用默认传输方式的数据包
    pub fn new(message: RadioMessage) -> Self {
        Self {
            message,
            methods: SmallVec::new(),
        }
    }

    /// 指定传输方式的数据包
    pub fn with_methods(
        message: RadioMessage,
        methods: impl IntoIterator<Item = SendMethod>,
    ) -> Self {
        Self {
            message,
            methods: methods.into_iter().collect(),
        }
    }

    /// 追加一种传输方式
    pub fn via(mut self, method: SendMethod) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    /// 是否使用注册表默认方式
    pub fn uses_defaults(&self) -> bool {
        self.methods.is_empty()
    }
}

impl From<RadioMessage> for RadioPacket {
    fn from(message: RadioMessage) -> Self {
        Self::new(message)
    }
}

impl From<RobotCommand> for RadioPacket {
    fn from(command: RobotCommand) -> Self {
        Self::new(RadioMessage::single(command))
    }
}
