//! 同步原语
//!
//! 向其它内核模块提供基本的互斥原语：中断保护器和自旋锁。
//! 表结构类的临界区应当足够短，并且在持锁期间绝不允许挂起，
//! 这里的锁在获取时禁用本地中断，从构造上排除了挂起点。
//!
//! # 架构依赖
//!
//! 此 crate 通过 [`ArchOps`] trait 抽象架构相关操作。
//! 使用前必须调用 [`register_arch_ops`] 注册实现。

#![no_std]

mod intr_guard;
mod raw_spin_lock;
mod spin_lock;

pub use intr_guard::IntrGuard;
pub use raw_spin_lock::{RawSpinLock, RawSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};

use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关操作的 trait
///
/// 由内核二进制实现并注册，提供本地 CPU 的中断开关能力。
pub trait ArchOps: Send + Sync {
    /// 读取并禁用本地中断，返回之前的状态字
    ///
    /// # Safety
    /// 调用者必须保证处于允许操作中断状态的上下文中
    unsafe fn save_and_disable_interrupts(&self) -> usize;

    /// 恢复之前保存的中断状态
    ///
    /// # Safety
    /// `flags` 必须是之前 `save_and_disable_interrupts` 返回的值
    unsafe fn restore_interrupts(&self, flags: usize);

    /// 判断一个状态字是否表示中断已启用
    fn interrupts_enabled(&self, flags: usize) -> bool;
}

/// 全局架构操作实例（存储 fat pointer 的两个部分）
static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchOps) {
    let ptr = ops as *const dyn ArchOps;
    // SAFETY: fat pointer 的布局是 (data, vtable)，拆分后存储
    let (data, vtable) = unsafe { core::mem::transmute::<*const dyn ArchOps, (usize, usize)>(ptr) };
    ARCH_OPS_DATA.store(data, Ordering::Release);
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的架构操作实例
#[inline]
pub(crate) fn arch_ops() -> &'static dyn ArchOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("sync: ArchOps not registered, call register_arch_ops first");
    }
    // SAFETY: data 和 vtable 由 register_arch_ops 设置，重组后有效
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchOps>((data, vtable)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use test_support::mock::arch::MOCK_ARCH_OPS;

    // sync 拥有 ArchOps，因此可以在 cfg(test) 下为 test-support
    // 的 Mock 类型实现它。
    impl ArchOps for test_support::mock::arch::MockArchOps {
        unsafe fn save_and_disable_interrupts(&self) -> usize {
            unsafe { self.save_and_disable() }
        }

        unsafe fn restore_interrupts(&self, flags: usize) {
            unsafe { self.restore(flags) }
        }

        fn interrupts_enabled(&self, flags: usize) -> bool {
            flags != 0
        }
    }

    // 0 = uninit, 1 = initializing, 2 = ready
    static INIT: AtomicUsize = AtomicUsize::new(0);

    pub(crate) fn init_mock_arch_ops() {
        match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                // Safety: tests share a single global mock ArchOps.
                unsafe { register_arch_ops(&MOCK_ARCH_OPS) };
                INIT.store(2, Ordering::Release);
            }
            Err(_) => {
                while INIT.load(Ordering::Acquire) != 2 {
                    core::hint::spin_loop();
                }
            }
        }
    }

    #[test]
    fn test_register_and_dispatch() {
        init_mock_arch_ops();
        let flags = unsafe { arch_ops().save_and_disable_interrupts() };
        unsafe { arch_ops().restore_interrupts(flags) };
    }
}
