//! Mock 发送器
//!
//! 不依赖任何介质，记录调用次数和最后一条消息。
//! 结果可以在运行时切换，用于验证注册表的扇出与聚合语义。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{RadioMessage, Sender, TransportDeviceError, TransportError};

/// 记录调用的测试发送器
#[derive(Debug)]
pub struct MockSender {
    name: String,
    succeed: AtomicBool,
    unregister_ok: AtomicBool,
    unregistered: AtomicBool,
    sends: AtomicUsize,
    frames: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    last_message: Mutex<Option<RadioMessage>>,
}

impl MockSender {
    /// 总是成功的发送器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeed: AtomicBool::new(true),
            unregister_ok: AtomicBool::new(true),
            unregistered: AtomicBool::new(false),
            sends: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            delay: Mutex::new(None),
            last_message: Mutex::new(None),
        }
    }

    /// 总是失败的发送器
    pub fn failing(name: impl Into<String>) -> Self {
        let sender = Self::new(name);
        sender.set_succeed(false);
        sender
    }

    /// 切换 `send` 的结果
    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::Release);
    }

    /// 切换 `unregister` 的结果
    pub fn set_unregister_ok(&self, ok: bool) {
        self.unregister_ok.store(ok, Ordering::Release);
    }

    /// 每次 `send` 前休眠（模拟慢速介质）
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// `send` 被调用的次数（无论成功与否）
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::Acquire)
    }

    /// 累计收到的指令帧数
    pub fn frame_count(&self) -> usize {
        self.frames.load(Ordering::Acquire)
    }

    pub fn last_message(&self) -> Option<RadioMessage> {
        self.last_message.lock().clone()
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered.load(Ordering::Acquire)
    }
}

impl Sender for MockSender {
    fn send(&self, message: &RadioMessage) -> Result<(), TransportError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.sends.fetch_add(1, Ordering::AcqRel);
        self.frames.fetch_add(message.len(), Ordering::AcqRel);
        *self.last_message.lock() = Some(message.clone());

        if self.succeed.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::Device(TransportDeviceError::from(format!(
                "mock sender '{}' configured to fail",
                self.name
            ))))
        }
    }

    fn unregister(&self) -> Result<(), TransportError> {
        self.unregistered.store(true, Ordering::Release);
        if self.unregister_ok.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::Device(TransportDeviceError::from(format!(
                "mock sender '{}' failed to release",
                self.name
            ))))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink_protocol::RobotCommand;

    #[test]
    fn test_mock_sender_records_calls() {
        let sender = MockSender::new("udp");
        let msg = RadioMessage::single(RobotCommand::stop(2)).with_command(RobotCommand::stop(3));
        assert!(sender.send(&msg).is_ok());
        assert_eq!(sender.send_count(), 1);
        assert_eq!(sender.frame_count(), 2);
        assert_eq!(sender.last_message(), Some(msg));
    }

    #[test]
    fn test_mock_sender_switchable_result() {
        let sender = MockSender::failing("usb");
        assert!(sender.send(&RadioMessage::new()).is_err());
        sender.set_succeed(true);
        assert!(sender.send(&RadioMessage::new()).is_ok());
        assert_eq!(sender.send_count(), 2);
    }

    #[test]
    fn test_mock_sender_unregister() {
        let sender = MockSender::new("tcp");
        sender.set_unregister_ok(false);
        assert!(sender.unregister().is_err());
        assert!(sender.is_unregistered());
    }
}
