//! 虚拟内存事件统计
//!
//! 子系统以 fire-and-forget 的方式向 [`StatSink`] 发布事件，
//! 事件不携带返回值，也不影响任何控制流。内核可以注册自己的
//! 实现；这里附带一个计数器实现 [`VmStats`]，其计数器由独立的
//! 自旋锁保护（事件可能来自不持有表级锁的上下文）。

use sync::SpinLock;

/// 缺页的内容来源分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// 首次触碰，零填充
    ZeroFill,
    /// 从交换区读入
    Swap,
    /// 直接从程序镜像读入
    Image,
}

/// 交换块内容分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapChunkKind {
    /// 持有有效载荷
    Filled,
    /// 内容全零
    Blank,
}

/// 虚拟内存子系统对外发布的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEvent {
    /// TLB 缺失；`free_slot` 表示是否落入空槽位（否则轮转覆盖）
    TlbFault {
        /// 是否找到了空槽位
        free_slot: bool,
    },
    /// 页已驻留，只需重装翻译，无数据搬运
    TlbReload,
    /// 整个 TLB 被清空（按次计，不按条目计）
    TlbInvalidateAll,
    /// 缺页，按内容来源分类
    PageFault(PageSource),
    /// 一页被写出到交换区
    SwapWrite,
    /// 一个交换块被写入，按内容分类
    SwapChunk(SwapChunkKind),
}

/// 事件接收端
///
/// 被动计数器：实现方不得阻塞，也不得反向影响调页决策。
pub trait StatSink: Send + Sync {
    /// 记录一个事件
    fn record(&self, event: VmEvent);
}

/// 丢弃一切事件的接收端
pub struct NullSink;

impl StatSink for NullSink {
    fn record(&self, _event: VmEvent) {}
}

/// 各事件的累计计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStatSnapshot {
    /// TLB 缺失总数
    pub tlb_faults_total: u64,
    /// 落入空槽位的 TLB 缺失
    pub tlb_faults_free: u64,
    /// 需要轮转覆盖的 TLB 缺失
    pub tlb_faults_replace: u64,
    /// 整个 TLB 被清空的次数
    pub tlb_invalidations: u64,
    /// 页已驻留的重装次数
    pub tlb_reloads: u64,
    /// 零填充缺页
    pub faults_zeroed: u64,
    /// 需要磁盘读入的缺页（镜像 + 交换区）
    pub faults_disk: u64,
    /// 从程序镜像读入的缺页
    pub faults_image: u64,
    /// 从交换区读入的缺页
    pub faults_swap: u64,
    /// 写出到交换区的页数
    pub swap_writes: u64,
    /// 写入的有载荷交换块
    pub chunks_filled: u64,
    /// 写入的全零交换块
    pub chunks_blank: u64,
}

impl VmStatSnapshot {
    /// 全零计数
    pub const fn zeroed() -> Self {
        VmStatSnapshot {
            tlb_faults_total: 0,
            tlb_faults_free: 0,
            tlb_faults_replace: 0,
            tlb_invalidations: 0,
            tlb_reloads: 0,
            faults_zeroed: 0,
            faults_disk: 0,
            faults_image: 0,
            faults_swap: 0,
            swap_writes: 0,
            chunks_filled: 0,
            chunks_blank: 0,
        }
    }
}

/// 自旋锁保护的事件计数器
pub struct VmStats {
    counts: SpinLock<VmStatSnapshot>,
}

impl VmStats {
    /// 创建一个全零计数器
    pub const fn new() -> Self {
        VmStats {
            counts: SpinLock::new(VmStatSnapshot::zeroed()),
        }
    }

    /// 读取当前计数
    pub fn snapshot(&self) -> VmStatSnapshot {
        *self.counts.lock()
    }

    /// 将收集到的统计写入日志
    pub fn report(&self) {
        let s = self.snapshot();
        log::info!("[vm] Collected statistics:");
        log::info!(
            "[vm] TLB Faults - Total: {}, Free: {}, Replaced: {}",
            s.tlb_faults_total,
            s.tlb_faults_free,
            s.tlb_faults_replace
        );
        log::info!("[vm] TLB Invalidations - Total: {}", s.tlb_invalidations);
        log::info!("[vm] TLB Reloads - Total: {}", s.tlb_reloads);
        log::info!(
            "[vm] Page Faults - Zeroed: {}, Disk: {}, Image: {}, Swap: {}",
            s.faults_zeroed,
            s.faults_disk,
            s.faults_image,
            s.faults_swap
        );
        log::info!("[vm] Swap Writes - Total: {}", s.swap_writes);
        log::info!(
            "[vm] Swap Chunks - Filled: {}, Blank: {}",
            s.chunks_filled,
            s.chunks_blank
        );
    }
}

impl Default for VmStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatSink for VmStats {
    fn record(&self, event: VmEvent) {
        let mut counts = self.counts.lock();
        match event {
            VmEvent::TlbFault { free_slot } => {
                counts.tlb_faults_total += 1;
                if free_slot {
                    counts.tlb_faults_free += 1;
                } else {
                    counts.tlb_faults_replace += 1;
                }
            }
            VmEvent::TlbReload => counts.tlb_reloads += 1,
            VmEvent::TlbInvalidateAll => counts.tlb_invalidations += 1,
            VmEvent::PageFault(PageSource::ZeroFill) => counts.faults_zeroed += 1,
            VmEvent::PageFault(PageSource::Swap) => {
                counts.faults_disk += 1;
                counts.faults_swap += 1;
            }
            VmEvent::PageFault(PageSource::Image) => {
                counts.faults_disk += 1;
                counts.faults_image += 1;
            }
            VmEvent::SwapWrite => counts.swap_writes += 1,
            VmEvent::SwapChunk(SwapChunkKind::Filled) => counts.chunks_filled += 1,
            VmEvent::SwapChunk(SwapChunkKind::Blank) => counts.chunks_blank += 1,
        }
    }
}

/// 按页内容对交换块分类：全零计为 Blank，否则 Filled
pub(crate) fn classify_chunk(page: &[u8]) -> SwapChunkKind {
    if page.iter().all(|&b| b == 0) {
        SwapChunkKind::Blank
    } else {
        SwapChunkKind::Filled
    }
}
