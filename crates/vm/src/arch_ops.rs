//! 架构相关虚拟内存操作 trait 定义和注册

use crate::tlb::TlbEntry;
use core::sync::atomic::{AtomicUsize, Ordering};

/// 架构相关虚拟内存操作
///
/// 此 trait 抽象了请求调页依赖的硬件原语：直接映射区地址转换、
/// TLB 槽位的原始读写指令，以及受害帧采样使用的机器随机源。
/// 内核二进制需要为具体架构实现此 trait。
pub trait ArchVmOps: Send + Sync {
    /// 将物理地址转换为内核可直接访问的虚拟地址（直接映射区域）
    fn paddr_to_vaddr(&self, paddr: usize) -> usize;

    /// 读取一个 TLB 槽位的条目
    fn tlb_read(&self, slot: usize) -> TlbEntry;

    /// 写入一个 TLB 槽位的条目
    fn tlb_write(&self, slot: usize, entry: TlbEntry);

    /// 机器随机源的下一个值
    fn random(&self) -> u32;
}

static ARCH_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static ARCH_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册架构操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次
pub unsafe fn register_arch_ops(ops: &'static dyn ArchVmOps) {
    let ptr = ops as *const dyn ArchVmOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn ArchVmOps, (usize, usize)>(ptr) };
    ARCH_OPS_DATA.store(data, Ordering::Release);
    ARCH_OPS_VTABLE.store(vtable, Ordering::Release);
}

/// 获取已注册的架构操作实现
///
/// # Panics
/// 如果尚未调用 [`register_arch_ops`] 注册实现，则 panic
#[inline]
pub fn arch_ops() -> &'static dyn ArchVmOps {
    let data = ARCH_OPS_DATA.load(Ordering::Acquire);
    let vtable = ARCH_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        panic!("vm: ArchVmOps not registered");
    }
    // SAFETY: 重组 fat pointer
    unsafe { &*core::mem::transmute::<(usize, usize), *const dyn ArchVmOps>((data, vtable)) }
}
