//! 中断开关的 Mock 实现

use core::sync::atomic::{AtomicBool, Ordering};

/// Mock 的中断开关状态
///
/// 宿主机测试中没有真实的中断，这里只跟踪"启用/禁用"标志，
/// 以便验证保存与恢复配对正确。
pub struct MockArchOps {
    enabled: AtomicBool,
}

impl MockArchOps {
    /// 创建一个初始为"中断启用"的实例
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    /// 保存当前状态并标记为禁用，返回之前的状态字
    ///
    /// # Safety
    /// 仅用于测试环境的可控输入。
    pub unsafe fn save_and_disable(&self) -> usize {
        self.enabled.swap(false, Ordering::SeqCst) as usize
    }

    /// 恢复之前保存的状态字
    ///
    /// # Safety
    /// `flags` 必须来自之前的 `save_and_disable`。
    pub unsafe fn restore(&self, flags: usize) {
        self.enabled.store(flags != 0, Ordering::SeqCst);
    }

    /// 当前是否处于"中断启用"状态
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Default for MockArchOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
