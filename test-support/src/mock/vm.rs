//! 虚拟内存子系统的 Mock 实现
//!
//! 提供宿主机测试所需的三件硬件仿真：一块连续的"物理内存"、
//! 一组 TLB 槽位和一个确定性的随机源，以及一个 Vec 后备的
//! 交换区存储（支持注入 I/O 失败）。

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// 仿真物理内存大小（字节）
pub const MOCK_PHYS_BYTES: usize = 2 * 1024 * 1024;

/// 仿真页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// 仿真 TLB 槽位数量
pub const MOCK_TLB_SLOTS: usize = 16;

/// 物理内存仿真区
struct PhysArena(UnsafeCell<[u8; MOCK_PHYS_BYTES]>);

// Safety: 每个测试通过 `reserve_frames` 取得互不重叠的帧窗口，
// 并发测试不会触碰同一区域。
unsafe impl Sync for PhysArena {}

/// 一个 TLB 槽位的原始内容
struct MockTlbSlot {
    vaddr: AtomicUsize,
    paddr: AtomicUsize,
    flags: AtomicU32,
}

impl MockTlbSlot {
    const fn new() -> Self {
        Self {
            vaddr: AtomicUsize::new(0),
            paddr: AtomicUsize::new(0),
            flags: AtomicU32::new(0),
        }
    }
}

/// Mock 的虚拟内存架构操作
///
/// `vm` crate 在 `cfg(test)` 下为此类型实现 `ArchVmOps`。
pub struct MockVmOps {
    arena: PhysArena,
    next_frame: AtomicUsize,
    rng_state: AtomicU32,
    slots: [MockTlbSlot; MOCK_TLB_SLOTS],
}

impl MockVmOps {
    /// 创建一个全零物理内存、全无效 TLB 的实例
    pub const fn new() -> Self {
        Self {
            arena: PhysArena(UnsafeCell::new([0u8; MOCK_PHYS_BYTES])),
            next_frame: AtomicUsize::new(0),
            rng_state: AtomicU32::new(0x9e37_79b9),
            slots: [const { MockTlbSlot::new() }; MOCK_TLB_SLOTS],
        }
    }

    /// 为一个测试预留 `n` 个帧，返回窗口的起始帧号
    ///
    /// 并发测试各自取得互不重叠的窗口。
    pub fn reserve_frames(&self, n: usize) -> usize {
        let base = self.next_frame.fetch_add(n, Ordering::SeqCst);
        assert!(
            (base + n) * MOCK_PAGE_SIZE <= MOCK_PHYS_BYTES,
            "mock phys arena exhausted"
        );
        base
    }

    /// 将物理地址转换为仿真区内的指针
    pub fn paddr_to_ptr(&self, paddr: usize) -> *mut u8 {
        assert!(paddr < MOCK_PHYS_BYTES, "paddr outside mock arena");
        unsafe { (self.arena.0.get() as *mut u8).add(paddr) }
    }

    /// 确定性伪随机序列的下一个值
    pub fn next_random(&self) -> u32 {
        self.rng_state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                Some(s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223))
            })
            .unwrap()
    }

    /// 读取一个 TLB 槽位的原始内容 (vaddr, paddr, flags)
    pub fn tlb_load(&self, slot: usize) -> (usize, usize, u32) {
        let s = &self.slots[slot];
        (
            s.vaddr.load(Ordering::SeqCst),
            s.paddr.load(Ordering::SeqCst),
            s.flags.load(Ordering::SeqCst),
        )
    }

    /// 写入一个 TLB 槽位的原始内容
    pub fn tlb_store(&self, slot: usize, vaddr: usize, paddr: usize, flags: u32) {
        let s = &self.slots[slot];
        s.vaddr.store(vaddr, Ordering::SeqCst);
        s.paddr.store(paddr, Ordering::SeqCst);
        s.flags.store(flags, Ordering::SeqCst);
    }
}

impl Default for MockVmOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_OPS: MockVmOps = MockVmOps::new();

/// Mock 的虚拟内存配置
///
/// `vm` crate 在 `cfg(test)` 下为此类型实现 `VmConfig`。
pub struct MockVmConfig;

impl MockVmConfig {
    /// 创建实例
    pub const fn new() -> Self {
        Self
    }

    /// 页大小（测试默认 4096）
    pub fn page_size(&self) -> usize {
        MOCK_PAGE_SIZE
    }

    /// TLB 槽位数量
    pub fn tlb_slot_count(&self) -> usize {
        MOCK_TLB_SLOTS
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_CONFIG: MockVmConfig = MockVmConfig::new();

/// Vec 后备的交换区存储
///
/// `vm` crate 在 `cfg(test)` 下为此类型实现 `BackingStore`。
/// 读写失败可以通过 `set_fail_reads` / `set_fail_writes` 注入。
pub struct MockSwapStore {
    data: UnsafeCell<Vec<u8>>,
    locked: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

// Safety: 所有对 data 的访问都经过 with_data 的自旋互斥。
unsafe impl Send for MockSwapStore {}
unsafe impl Sync for MockSwapStore {}

impl MockSwapStore {
    /// 创建一个全零、容量为 `capacity` 字节的存储
    pub fn new(capacity: usize) -> Self {
        Self::with_bytes(vec![0u8; capacity])
    }

    /// 从给定内容创建
    pub fn with_bytes(data: Vec<u8>) -> Self {
        Self {
            data: UnsafeCell::new(data),
            locked: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn with_data<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        let result = f(unsafe { &mut *self.data.get() });
        self.locked.store(false, Ordering::Release);
        result
    }

    /// 容量（字节）
    pub fn capacity(&self) -> usize {
        self.with_data(|d| d.len())
    }

    /// 从 offset 读取到 buf，返回读取的字节数
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, ()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(());
        }
        self.with_data(|d| {
            if offset >= d.len() {
                return Ok(0);
            }
            let take = buf.len().min(d.len() - offset);
            buf[..take].copy_from_slice(&d[offset..offset + take]);
            Ok(take)
        })
    }

    /// 将 buf 写入 offset，返回写入的字节数
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, ()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(());
        }
        self.with_data(|d| {
            if offset >= d.len() {
                return Ok(0);
            }
            let take = buf.len().min(d.len() - offset);
            d[offset..offset + take].copy_from_slice(&buf[..take]);
            Ok(take)
        })
    }

    /// 注入读失败
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 注入写失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 取出当前内容的拷贝（用于断言）
    pub fn snapshot(&self) -> Vec<u8> {
        self.with_data(|d| d.clone())
    }
}
