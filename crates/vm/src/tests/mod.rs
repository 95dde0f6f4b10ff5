// Unit tests for the vm crate.
//
// These run on the host with standard `cargo test`. The mock platform
// (interrupt flags, physical memory arena, TLB slots, swap store) comes
// from `test-support`; the traits this crate owns are implemented for
// the mock types here, under cfg(test).

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use sync::SpinLock;
use test_support::mock::arch::MOCK_ARCH_OPS;
use test_support::mock::vm::{
    MockSwapStore, MockVmConfig, MockVmOps, MOCK_PAGE_SIZE, MOCK_VM_CONFIG, MOCK_VM_OPS,
};

use crate::address::{Paddr, Ppn, Vaddr, Vpn};
use crate::fault::VmManager;
use crate::frame_table::FrameTable;
use crate::process::SegmentLayout;
use crate::stats::VmStats;
use crate::swap::SwapTable;
use crate::tlb::{TlbEntry, TlbFlags};

mod frame_table;

pub(crate) const PAGE_SIZE: usize = MOCK_PAGE_SIZE;

// vm 拥有这些 trait，因此可以在 cfg(test) 下为 test-support
// 的 Mock 类型实现它们。

impl crate::ArchVmOps for MockVmOps {
    fn paddr_to_vaddr(&self, paddr: usize) -> usize {
        self.paddr_to_ptr(paddr) as usize
    }

    fn tlb_read(&self, slot: usize) -> TlbEntry {
        let (vaddr, paddr, flags) = self.tlb_load(slot);
        TlbEntry {
            vaddr: Vaddr::from_usize(vaddr),
            paddr: Paddr::from_usize(paddr),
            flags: TlbFlags::from_bits_truncate(flags),
        }
    }

    fn tlb_write(&self, slot: usize, entry: TlbEntry) {
        self.tlb_store(
            slot,
            entry.vaddr.as_usize(),
            entry.paddr.as_usize(),
            entry.flags.bits(),
        );
    }

    fn random(&self) -> u32 {
        self.next_random()
    }
}

impl crate::VmConfig for MockVmConfig {
    fn page_size(&self) -> usize {
        MockVmConfig::page_size(self)
    }

    fn tlb_slot_count(&self) -> usize {
        MockVmConfig::tlb_slot_count(self)
    }
}

impl crate::BackingStore for MockSwapStore {
    fn capacity(&self) -> usize {
        MockSwapStore::capacity(self)
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> crate::VmResult<usize> {
        MockSwapStore::read_at(self, offset, buf)
            .map_err(|_| crate::VmError::Io { retryable: true })
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> crate::VmResult<usize> {
        MockSwapStore::write_at(self, offset, buf)
            .map_err(|_| crate::VmError::Io { retryable: true })
    }
}

// sync::ArchOps 和 MockArchOps 都是外部条目，孤儿规则不允许
// 直接写 impl，这里用一个本地包装类型转发。
struct HostPlatform;

impl sync::ArchOps for HostPlatform {
    unsafe fn save_and_disable_interrupts(&self) -> usize {
        unsafe { MOCK_ARCH_OPS.save_and_disable() }
    }

    unsafe fn restore_interrupts(&self, flags: usize) {
        unsafe { MOCK_ARCH_OPS.restore(flags) }
    }

    fn interrupts_enabled(&self, flags: usize) -> bool {
        flags != 0
    }
}

static HOST_PLATFORM: HostPlatform = HostPlatform;

// 0 = uninit, 1 = initializing, 2 = ready
static INIT: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init_test_platform() {
    match INIT.compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            // Safety: tests register a single set of global mocks, once.
            unsafe {
                sync::register_arch_ops(&HOST_PLATFORM);
                crate::register_arch_ops(&MOCK_VM_OPS);
                crate::register_config(&MOCK_VM_CONFIG);
            }
            INIT.store(2, Ordering::Release);
        }
        Err(_) => {
            while INIT.load(Ordering::Acquire) != 2 {
                core::hint::spin_loop();
            }
        }
    }
}

/// Serializes tests that assert on the (shared) mock TLB slots.
pub(crate) static TLB_LOCK: SpinLock<()> = SpinLock::new(());

pub(crate) fn layout(code_base: usize, code_pages: usize) -> SegmentLayout {
    SegmentLayout {
        code_base: Vpn::from_usize(code_base),
        code_pages,
    }
}

/// A frame table over a fresh, test-private window of the mock arena.
pub(crate) fn test_frame_table(total: usize, kernel_reserved: usize) -> FrameTable {
    init_test_platform();
    let base = MOCK_VM_OPS.reserve_frames(total);
    FrameTable::new(Ppn::from_usize(base), total, kernel_reserved)
}

/// A swap table over a fresh Vec-backed store.
pub(crate) fn test_swap_table(chunks: usize) -> (SwapTable, Arc<MockSwapStore>, Arc<VmStats>) {
    init_test_platform();
    let store = Arc::new(MockSwapStore::new(chunks * PAGE_SIZE));
    let stats = Arc::new(VmStats::new());
    let table = SwapTable::new(store.clone(), stats.clone());
    (table, store, stats)
}

pub(crate) struct TestEnv {
    pub manager: VmManager,
    pub store: Arc<MockSwapStore>,
    pub stats: Arc<VmStats>,
}

/// A full manager over test-private frames and a fresh store.
pub(crate) fn test_manager(total: usize, kernel_reserved: usize, swap_chunks: usize) -> TestEnv {
    init_test_platform();
    let base = MOCK_VM_OPS.reserve_frames(total);
    let store = Arc::new(MockSwapStore::new(swap_chunks * PAGE_SIZE));
    let stats = Arc::new(VmStats::new());
    let manager = VmManager::new(
        Ppn::from_usize(base),
        total,
        kernel_reserved,
        store.clone(),
        stats.clone(),
    );
    TestEnv {
        manager,
        store,
        stats,
    }
}

pub(crate) fn vaddr_of_page(page: usize) -> Vaddr {
    Vaddr::from_usize(page * PAGE_SIZE)
}

/// Fills a frame with a recognizable per-tag byte pattern.
pub(crate) fn fill_frame(paddr: Paddr, tag: u8) {
    let ptr = MOCK_VM_OPS.paddr_to_ptr(paddr.as_usize());
    for i in 0..PAGE_SIZE {
        unsafe { ptr.add(i).write(tag.wrapping_add(i as u8)) };
    }
}

pub(crate) fn expected_fill(tag: u8) -> Vec<u8> {
    (0..PAGE_SIZE).map(|i| tag.wrapping_add(i as u8)).collect()
}

pub(crate) fn frame_snapshot(paddr: Paddr) -> Vec<u8> {
    let ptr = MOCK_VM_OPS.paddr_to_ptr(paddr.as_usize());
    let mut out = vec![0u8; PAGE_SIZE];
    unsafe { core::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), PAGE_SIZE) };
    out
}
