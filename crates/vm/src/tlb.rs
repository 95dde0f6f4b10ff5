//! TLB 策略层
//!
//! 硬件 TLB 的读写指令由体系结构层提供（[`crate::ArchVmOps`]），
//! 这里只负责策略：插入时的槽位选择、代码段的只读权限、
//! 以及按物理地址的失效范围。
//!
//! 槽位替换采用轮转覆盖。这与帧替换的随机采样是两个独立演化的
//! 策略，作用域也不同（几十个硬件槽位 vs 全部物理内存），
//! 不要合并。

use crate::address::{Paddr, Vaddr, Vpn};
use crate::arch_ops::arch_ops;
use crate::process::SegmentLayout;
use crate::stats::{StatSink, VmEvent};
use crate::vm_config;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::sync::atomic::{AtomicUsize, Ordering};
use uapi::mm::PageProt;

bitflags! {
    /// TLB 条目标志位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlbFlags: u32 {
        /// 条目有效
        const VALID = 1 << 0;
        /// 允许写入
        const WRITABLE = 1 << 1;
    }
}

/// 一条翻译条目
///
/// 平铺字段表示；打包成硬件寄存器格式是体系结构层的职责。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// 页对齐的虚拟地址
    pub vaddr: Vaddr,
    /// 页对齐的物理地址
    pub paddr: Paddr,
    /// 标志位
    pub flags: TlbFlags,
}

impl TlbEntry {
    /// 一条无效条目
    pub const fn invalid() -> Self {
        TlbEntry {
            vaddr: Vaddr::from_usize(0),
            paddr: Paddr::from_usize(0),
            flags: TlbFlags::empty(),
        }
    }

    /// 条目是否有效
    pub fn is_valid(&self) -> bool {
        self.flags.contains(TlbFlags::VALID)
    }
}

/// TLB 策略层
///
/// 唯一的自有状态是轮转游标；槽位内容始终以硬件为准。
pub struct TlbShim {
    cursor: AtomicUsize,
    stats: Arc<dyn StatSink>,
}

impl TlbShim {
    /// 创建策略层，事件发往 `stats`
    pub fn new(stats: Arc<dyn StatSink>) -> Self {
        TlbShim {
            cursor: AtomicUsize::new(0),
            stats,
        }
    }

    /// 根据进程布局给出一个地址应得的访问权限
    ///
    /// 代码段内的页只读可执行，其余页可读写。
    pub fn segment_prot(&self, vaddr: Vaddr, layout: &SegmentLayout) -> PageProt {
        if layout.contains_code(Vpn::from_addr_floor(vaddr)) {
            PageProt::user_code()
        } else {
            PageProt::user_data()
        }
    }

    /// 写入一条新翻译
    ///
    /// 优先使用第一个无效槽位；槽位全满时按轮转游标覆盖。
    pub fn insert(&self, vaddr: Vaddr, paddr: Paddr, layout: &SegmentLayout) {
        let slots = vm_config().tlb_slot_count();
        let prot = self.segment_prot(vaddr, layout);

        let mut flags = TlbFlags::VALID;
        if prot.contains(PageProt::WRITE) {
            flags |= TlbFlags::WRITABLE;
        }
        let entry = TlbEntry {
            vaddr: Vpn::from_addr_floor(vaddr).start_addr(),
            paddr: paddr.align_down_to_page(),
            flags,
        };

        for slot in 0..slots {
            if !arch_ops().tlb_read(slot).is_valid() {
                arch_ops().tlb_write(slot, entry);
                self.stats.record(VmEvent::TlbFault { free_slot: true });
                return;
            }
        }

        let victim = self.cursor.fetch_add(1, Ordering::Relaxed) % slots;
        arch_ops().tlb_write(victim, entry);
        self.stats.record(VmEvent::TlbFault { free_slot: false });
    }

    /// 使指向某个物理地址的所有缓存翻译失效
    ///
    /// 没有匹配条目时什么都不做：重复失效是幂等的，不是错误。
    pub fn invalidate_one(&self, paddr: Paddr) {
        let target = paddr.align_down_to_page();
        for slot in 0..vm_config().tlb_slot_count() {
            let entry = arch_ops().tlb_read(slot);
            if entry.is_valid() && entry.paddr == target {
                arch_ops().tlb_write(slot, TlbEntry::invalid());
            }
        }
    }

    /// 清空全部槽位（上下文切换或整体重置时使用）
    pub fn invalidate_all(&self) {
        for slot in 0..vm_config().tlb_slot_count() {
            arch_ops().tlb_write(slot, TlbEntry::invalid());
        }
        self.stats.record(VmEvent::TlbInvalidateAll);
    }
}
