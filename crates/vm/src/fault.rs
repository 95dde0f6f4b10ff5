//! 缺页处理
//!
//! [`VmManager`] 把帧表、交换表和 TLB 策略层编排成一次完整的
//! 缺页解决：找帧或驱逐、找块或分配、搬运内容、返回物理地址。
//! 返回后由陷入处理程序通过 [`VmManager::install_translation`]
//! 安装翻译。
//!
//! 并发模型：不同进程的缺页只在各张表的短临界区处串行化，
//! 整个解决过程不持有任何全局锁。

use crate::address::{Paddr, Ppn, Vaddr, Vpn};
use crate::arch_ops::arch_ops;
use crate::backing::BackingStore;
use crate::error::{VmError, VmResult};
use crate::frame_table::FrameTable;
use crate::process::SegmentLayout;
use crate::stats::{PageSource, StatSink, VmEvent};
use crate::swap::SwapTable;
use crate::tlb::TlbShim;
use crate::vm_config;
use alloc::sync::Arc;
use uapi::types::Pid;

/// 请求调页管理器
///
/// 持有三个子部件和事件接收端；所有方法都只需要 `&self`。
pub struct VmManager {
    frames: FrameTable,
    swap: SwapTable,
    tlb: TlbShim,
    stats: Arc<dyn StatSink>,
}

impl VmManager {
    /// 创建管理器
    ///
    /// 帧表覆盖 `base` 起的 `total_frames` 个帧，前
    /// `kernel_reserved` 个为内核保留；交换表按 `store` 容量建表。
    pub fn new(
        base: Ppn,
        total_frames: usize,
        kernel_reserved: usize,
        store: Arc<dyn BackingStore>,
        stats: Arc<dyn StatSink>,
    ) -> Self {
        let frames = FrameTable::new(base, total_frames, kernel_reserved);
        let swap = SwapTable::new(store, stats.clone());
        let tlb = TlbShim::new(stats.clone());
        log::info!(
            "[vm] {} frames ({} kernel reserved), {} swap chunks",
            total_frames,
            kernel_reserved,
            swap.chunk_count()
        );
        VmManager {
            frames,
            swap,
            tlb,
            stats,
        }
    }

    /// 帧表
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// 交换表
    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }

    /// TLB 策略层
    pub fn tlb(&self) -> &TlbShim {
        &self.tlb
    }

    /// 注册一个进程
    pub fn register_process(&self, pid: Pid, layout: SegmentLayout) {
        self.frames.register_process(pid, layout);
    }

    /// 解决一次缺页，返回页所在帧的物理地址
    ///
    /// 依次尝试：已驻留（重装，无数据搬运）、空闲帧、驱逐。
    /// 页内容来自交换区中已有的块；没有块则按零填充策略处理。
    /// 资源耗尽以类型化错误返回，由调用方决定进程的命运。
    pub fn resolve(&self, vaddr: Vaddr, pid: Pid) -> VmResult<Paddr> {
        let vpn = Vpn::from_addr_floor(vaddr);

        if let Some(frame) = self.frames.lookup(vpn, pid) {
            self.stats.record(VmEvent::TlbReload);
            return Ok(self.frames.paddr_of(frame));
        }

        let frame = self.acquire_frame()?;
        self.frames.claim(frame, vpn, pid);
        let paddr = self.frames.paddr_of(frame);

        match self.swap.find_chunk(vpn, pid) {
            Some(chunk) => {
                self.swap.read_in(chunk, paddr)?;
                self.stats.record(VmEvent::PageFault(PageSource::Swap));
            }
            None => {
                // 首次触碰：零填充，不发生任何盘读
                zero_frame(paddr);
                self.stats.record(VmEvent::PageFault(PageSource::ZeroFill));
            }
        }

        Ok(paddr)
    }

    /// 拿到一个可用帧：空闲链表优先，否则驱逐
    fn acquire_frame(&self) -> VmResult<usize> {
        if let Some(frame) = self.frames.pop_free() {
            return Ok(frame);
        }
        let (victim, vpn, owner) = self.frames.choose_victim().ok_or(VmError::OutOfFrames)?;
        self.evict(victim, vpn, owner)?;
        Ok(victim)
    }

    /// 把一个占用帧写回交换区并释放
    ///
    /// 顺序与换出的原始约定一致：块分配、帧释放（簿记），然后
    /// 写盘，最后失效旧翻译。释放后的帧仍在空闲链表中，调用方
    /// 按帧号把它重新取走。
    fn evict(&self, frame: usize, vpn: Vpn, owner: Pid) -> VmResult<()> {
        let chunk = self.swap.allocate_chunk()?;
        let paddr = self.frames.paddr_of(frame);
        log::trace!(
            "[vm] evicting frame {} (page {:#x}, pid {}) to chunk {}",
            frame,
            vpn.as_usize(),
            owner,
            chunk
        );
        self.frames.release(frame);
        self.swap.write_out(chunk, paddr, vpn, owner, Some(&self.tlb))?;
        self.stats.record(VmEvent::SwapWrite);
        Ok(())
    }

    /// 为解决完的缺页安装翻译
    ///
    /// 根据进程布局选择权限：代码段只读，其余可读写。
    pub fn install_translation(&self, vaddr: Vaddr, paddr: Paddr, pid: Pid) {
        let layout = self.frames.segment_layout(pid);
        self.tlb.insert(vaddr, paddr, &layout);
    }

    /// 把程序镜像装入交换区，作为进程首批缺页的内容来源
    pub fn load_image(
        &self,
        image: &dyn BackingStore,
        offset: usize,
        start_vpn: Vpn,
        byte_size: usize,
        pid: Pid,
    ) -> VmResult<usize> {
        self.swap.bulk_load_image(image, offset, start_vpn, byte_size, pid)
    }

    /// fork：为子进程复制父进程的全部页
    ///
    /// 已换出的页逐块复制；驻留页各写出一份打上子进程标记，
    /// 父进程的帧保持不动。子进程继承父进程的布局。
    pub fn fork_process(&self, parent: Pid, child: Pid) -> VmResult<()> {
        let layout = self.frames.segment_layout(parent);
        self.frames.register_process(child, layout);

        self.swap.fork_duplicate(parent, child)?;

        for (frame, vpn) in self.frames.resident_pages(parent) {
            let chunk = self.swap.allocate_chunk()?;
            // 管理性写出：父进程的翻译仍然有效，不失效 TLB
            self.swap
                .write_out(chunk, self.frames.paddr_of(frame), vpn, child, None)?;
            self.stats.record(VmEvent::SwapWrite);
        }
        Ok(())
    }

    /// 进程退出：收回全部驻留帧和交换块
    pub fn teardown_process(&self, pid: Pid) {
        let freed = self.frames.remove_process(pid);
        for &(frame, _) in &freed {
            self.tlb.invalidate_one(self.frames.paddr_of(frame));
        }
        let reclaimed = self.swap.reclaim_all(pid);
        log::debug!(
            "[vm] teardown pid {}: {} frames, {} chunks reclaimed",
            pid,
            freed.len(),
            reclaimed
        );
    }

    /// 为内核分配 `n` 个物理连续帧，返回起始物理地址
    ///
    /// 优先使用已空闲的连续区间；否则选出最长的非内核区段，
    /// 把其中的占用帧逐个写回交换区后整段占下。任何地方都不存在
    /// 足够长的区段时返回 [`VmError::OutOfFrames`]。
    pub fn alloc_contiguous(&self, n: usize) -> VmResult<Paddr> {
        let run = self.frames.find_contiguous(n).ok_or(VmError::OutOfFrames)?;
        for (frame, vpn, owner) in run.victims {
            self.evict(frame, vpn, owner)?;
        }
        self.frames.claim_kernel_run(run.start, n);
        Ok(self.frames.paddr_of(run.start))
    }

    /// 归还一段内核连续帧
    pub fn free_contiguous(&self, start: Paddr, n: usize) {
        self.frames.release_run(self.frames.frame_of(start), n);
    }
}

/// 将一个帧清零
fn zero_frame(paddr: Paddr) {
    let page_size = vm_config().page_size();
    let ptr = arch_ops().paddr_to_vaddr(paddr.as_usize()) as *mut u8;
    unsafe {
        core::ptr::write_bytes(ptr, 0, page_size);
    }
}
