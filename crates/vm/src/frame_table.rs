//! 帧表（反置页表）
//!
//! 以物理帧号为索引的定长记录数组，是"帧 -> (虚拟页, 进程)"
//! 映射的唯一权威。空闲帧和每个进程的驻留帧各自组成一条
//! 穿过记录 `next` 域的侵入式单链表；空闲链表的头尾由表本身
//! 持有，驻留链表的头尾和计数记在对应进程的 [`ProcessVm`] 里。
//!
//! 任意时刻每个帧恰好属于三个互斥集合之一：内核保留、空闲、
//! 某个进程驻留。`free + kernel + Σ resident == total` 恒成立。
//!
//! 所有结构性修改都在一个短临界区内完成（自旋锁 + 关本地中断），
//! 临界区内没有任何 I/O 和挂起点。
//!
//! 查找故意只走当前进程的驻留链表而不扫整张表：代价与该进程的
//! 工作集成正比，换来的是记录本身不需要反向索引。

use crate::address::{Paddr, Ppn, Vpn};
use crate::arch_ops::arch_ops;
use crate::process::{ProcessVm, SegmentLayout};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::types::Pid;

/// 每个物理帧一条记录
#[derive(Debug)]
struct FrameRecord {
    /// 映射的虚拟页码，valid 时有意义
    vpn: Vpn,
    /// 占用帧的进程，valid 时有意义
    owner: Pid,
    /// 是否持有该进程的有效页
    valid: bool,
    /// 内核保留：不参与驱逐，也不计入进程配额
    kernel: bool,
    /// 所在链表（空闲或驻留，二者互斥）中的下一个帧号
    next: Option<usize>,
}

impl FrameRecord {
    const fn unused() -> Self {
        FrameRecord {
            vpn: Vpn::from_usize(0),
            owner: 0,
            valid: false,
            kernel: false,
            next: None,
        }
    }
}

/// 一段可供连续分配的帧区间
///
/// `victims` 列出区间内仍被占用、需要先换出的帧。
#[derive(Debug)]
pub struct ContigRun {
    /// 区间起始帧号
    pub start: usize,
    /// 区间内需要驱逐的 (帧号, 虚拟页, 属主)
    pub victims: Vec<(usize, Vpn, Pid)>,
}

struct FrameTableInner {
    base: Ppn,
    boot_reserved: usize,
    records: Vec<FrameRecord>,
    free_head: Option<usize>,
    free_tail: Option<usize>,
    free_count: usize,
    kernel_count: usize,
    procs: BTreeMap<Pid, ProcessVm>,
}

impl FrameTableInner {
    fn record(&self, frame: usize) -> &FrameRecord {
        if frame >= self.records.len() {
            panic!("vm: frame index {} out of range", frame);
        }
        &self.records[frame]
    }

    fn push_free(&mut self, frame: usize) {
        let rec = &mut self.records[frame];
        rec.valid = false;
        rec.next = None;
        match self.free_tail {
            Some(tail) => self.records[tail].next = Some(frame),
            None => self.free_head = Some(frame),
        }
        self.free_tail = Some(frame);
        self.free_count += 1;
    }

    /// 从空闲链表的任意位置摘除一个帧
    ///
    /// 受害帧回收走的就是这条路径，所以不能只支持摘头。
    fn detach_free(&mut self, frame: usize) {
        let mut prev: Option<usize> = None;
        let mut cur = self.free_head;
        while let Some(i) = cur {
            if i == frame {
                let next = self.records[i].next;
                match prev {
                    Some(p) => self.records[p].next = next,
                    None => self.free_head = next,
                }
                if self.free_tail == Some(i) {
                    self.free_tail = prev;
                }
                self.records[i].next = None;
                self.free_count -= 1;
                return;
            }
            prev = cur;
            cur = self.records[i].next;
        }
        panic!("vm: frame {} not on the free list", frame);
    }

    fn pop_free(&mut self) -> Option<usize> {
        let head = self.free_head?;
        self.free_head = self.records[head].next;
        if self.free_head.is_none() {
            self.free_tail = None;
        }
        self.records[head].next = None;
        self.free_count -= 1;
        Some(head)
    }

    fn proc_mut(&mut self, pid: Pid) -> &mut ProcessVm {
        match self.procs.get_mut(&pid) {
            Some(p) => p,
            None => panic!("vm: process {} not registered", pid),
        }
    }

    fn proc(&self, pid: Pid) -> &ProcessVm {
        match self.procs.get(&pid) {
            Some(p) => p,
            None => panic!("vm: process {} not registered", pid),
        }
    }

    fn append_resident(&mut self, frame: usize, pid: Pid) {
        let p = self.proc_mut(pid);
        let old_tail = p.resident_tail;
        p.resident_tail = Some(frame);
        if old_tail.is_none() {
            p.resident_head = Some(frame);
        }
        p.resident_count += 1;
        if let Some(tail) = old_tail {
            self.records[tail].next = Some(frame);
        }
        self.records[frame].next = None;
    }

    fn detach_resident(&mut self, frame: usize, pid: Pid) {
        let mut prev: Option<usize> = None;
        let mut cur = self.proc(pid).resident_head;
        while let Some(i) = cur {
            if i == frame {
                let next = self.records[i].next;
                match prev {
                    Some(p) => self.records[p].next = next,
                    None => self.proc_mut(pid).resident_head = next,
                }
                let p = self.proc_mut(pid);
                if p.resident_tail == Some(i) {
                    p.resident_tail = prev;
                }
                p.resident_count -= 1;
                self.records[i].next = None;
                return;
            }
            prev = cur;
            cur = self.records[i].next;
        }
        panic!("vm: frame {} not on the resident list of pid {}", frame, pid);
    }

    fn claim(&mut self, frame: usize, vpn: Vpn, pid: Pid) {
        let rec = self.record(frame);
        if rec.valid || rec.kernel {
            panic!("vm: claim of non-free frame {}", frame);
        }
        self.detach_free(frame);
        let rec = &mut self.records[frame];
        rec.vpn = vpn;
        rec.owner = pid;
        rec.valid = true;
        self.append_resident(frame, pid);
    }

    fn release(&mut self, frame: usize) {
        let rec = self.record(frame);
        if !rec.valid {
            panic!("vm: release of unclaimed frame {}", frame);
        }
        let owner = rec.owner;
        self.detach_resident(frame, owner);
        // 内容保持原样，只清除归属标记
        self.records[frame].valid = false;
        self.push_free(frame);
    }

    fn lookup(&self, vpn: Vpn, pid: Pid) -> Option<usize> {
        let mut cur = self.proc(pid).resident_head;
        while let Some(i) = cur {
            let rec = &self.records[i];
            if rec.valid && rec.vpn == vpn {
                return Some(i);
            }
            cur = rec.next;
        }
        None
    }

    fn choose_victim(&self) -> Option<(usize, Vpn, Pid)> {
        // 先确认存在可驱逐帧，拒绝采样才能保证终止
        self.records.iter().find(|r| r.valid && !r.kernel)?;
        let total = self.records.len();
        loop {
            let idx = arch_ops().random() as usize % total;
            let rec = &self.records[idx];
            if rec.valid && !rec.kernel {
                return Some((idx, rec.vpn, rec.owner));
            }
        }
    }

    fn find_contiguous(&self, n: usize) -> Option<ContigRun> {
        if n == 0 || n > self.records.len() {
            return None;
        }

        // 第一遍：已空闲的连续帧
        let mut run_start = 0;
        let mut run_len = 0;
        for (idx, rec) in self.records.iter().enumerate() {
            if !rec.valid && !rec.kernel {
                if run_len == 0 {
                    run_start = idx;
                }
                run_len += 1;
                if run_len == n {
                    return Some(ContigRun {
                        start: run_start,
                        victims: Vec::new(),
                    });
                }
            } else {
                run_len = 0;
            }
        }

        // 第二遍：内核保留帧之间最长的非内核区段，占用帧记为受害者
        let mut best: Option<(usize, usize)> = None;
        run_len = 0;
        for (idx, rec) in self.records.iter().enumerate() {
            if !rec.kernel {
                if run_len == 0 {
                    run_start = idx;
                }
                run_len += 1;
                if best.is_none_or(|(_, len)| run_len > len) {
                    best = Some((run_start, run_len));
                }
            } else {
                run_len = 0;
            }
        }

        let (start, len) = best?;
        if len < n {
            return None;
        }
        let victims = (start..start + n)
            .filter(|&i| self.records[i].valid)
            .map(|i| (i, self.records[i].vpn, self.records[i].owner))
            .collect();
        Some(ContigRun { start, victims })
    }

    fn claim_kernel_run(&mut self, start: usize, n: usize) {
        for frame in start..start + n {
            let rec = self.record(frame);
            if rec.valid || rec.kernel {
                panic!("vm: contiguous run frame {} is not free", frame);
            }
            self.detach_free(frame);
            self.records[frame].kernel = true;
        }
        self.kernel_count += n;
    }

    fn release_run(&mut self, start: usize, n: usize) {
        for frame in start..start + n {
            if frame < self.boot_reserved {
                panic!("vm: release of boot-reserved frame {}", frame);
            }
            let rec = self.record(frame);
            if !rec.kernel || rec.valid {
                panic!("vm: frame {} is not a kernel run frame", frame);
            }
            self.records[frame].kernel = false;
            self.push_free(frame);
        }
        self.kernel_count -= n;
    }

    fn remove_process(&mut self, pid: Pid) -> Vec<(usize, Vpn)> {
        let p = match self.procs.remove(&pid) {
            Some(p) => p,
            None => panic!("vm: process {} not registered", pid),
        };
        let mut freed = Vec::with_capacity(p.resident_count);
        let mut cur = p.resident_head;
        while let Some(i) = cur {
            let next = self.records[i].next;
            freed.push((i, self.records[i].vpn));
            self.push_free(i);
            cur = next;
        }
        freed
    }

    fn resident_pages(&self, pid: Pid) -> Vec<(usize, Vpn)> {
        let p = self.proc(pid);
        let mut pages = Vec::with_capacity(p.resident_count);
        let mut cur = p.resident_head;
        while let Some(i) = cur {
            pages.push((i, self.records[i].vpn));
            cur = self.records[i].next;
        }
        pages
    }
}

/// 帧表
///
/// 内部状态由一把自旋锁保护；锁的持有区间就是规格里的
/// "关中断临界区"，里面不做 I/O。
pub struct FrameTable {
    inner: SpinLock<FrameTableInner>,
}

impl FrameTable {
    /// 建表
    ///
    /// 前 `kernel_reserved` 个帧标记为内核保留，其余全部挂入
    /// 空闲链表（升序）。记录数组一次分配到最大规模，之后不再
    /// 伸缩。
    pub fn new(base: Ppn, total_frames: usize, kernel_reserved: usize) -> Self {
        assert!(kernel_reserved <= total_frames);
        let mut inner = FrameTableInner {
            base,
            boot_reserved: kernel_reserved,
            records: {
                let mut v = Vec::with_capacity(total_frames);
                v.resize_with(total_frames, FrameRecord::unused);
                v
            },
            free_head: None,
            free_tail: None,
            free_count: 0,
            kernel_count: kernel_reserved,
            procs: BTreeMap::new(),
        };
        for frame in 0..kernel_reserved {
            inner.records[frame].kernel = true;
        }
        for frame in kernel_reserved..total_frames {
            inner.push_free(frame);
        }
        FrameTable {
            inner: SpinLock::new(inner),
        }
    }

    /// 注册一个进程的地址空间布局
    ///
    /// # Panics
    /// 重复注册同一个 pid 属于进程层缺陷，panic。
    pub fn register_process(&self, pid: Pid, layout: SegmentLayout) {
        let mut inner = self.inner.lock();
        if inner.procs.insert(pid, ProcessVm::new(layout)).is_some() {
            panic!("vm: process {} already registered", pid);
        }
    }

    /// 查询进程的地址空间布局
    pub fn segment_layout(&self, pid: Pid) -> SegmentLayout {
        self.inner.lock().proc(pid).layout
    }

    /// 查询进程当前的驻留帧数
    pub fn resident_count(&self, pid: Pid) -> usize {
        self.inner.lock().proc(pid).resident_count
    }

    /// 将一个空闲帧划给 `(vpn, pid)`
    ///
    /// `frame` 可以位于空闲链表的任意位置（回收指定受害帧时
    /// 就是这样），链表按需拼接。帧被追加到该进程驻留链表尾部。
    pub fn claim(&self, frame: usize, vpn: Vpn, pid: Pid) {
        self.inner.lock().claim(frame, vpn, pid);
    }

    /// 释放一个占用帧
    ///
    /// 从属主的驻留链表摘除并挂回空闲链表；内容不清零。
    pub fn release(&self, frame: usize) {
        self.inner.lock().release(frame);
    }

    /// 在 `pid` 的驻留链表中查找虚拟页
    ///
    /// 只走该进程自己的链表，代价与其驻留集成正比。
    pub fn lookup(&self, vpn: Vpn, pid: Pid) -> Option<usize> {
        self.inner.lock().lookup(vpn, pid)
    }

    /// 摘取空闲链表头部的帧
    pub fn pop_free(&self) -> Option<usize> {
        self.inner.lock().pop_free()
    }

    /// 随机选出一个驱逐候选帧
    ///
    /// 对机器随机源做拒绝采样，内核保留帧永远不会被选中。
    /// 返回帧号及其当前标记；没有可驱逐帧时返回 None。
    pub fn choose_victim(&self) -> Option<(usize, Vpn, Pid)> {
        self.inner.lock().choose_victim()
    }

    /// 寻找一段长度为 `n` 的连续帧区间
    ///
    /// 优先返回已全部空闲的区间；否则返回内核保留帧之间最长的
    /// 非内核区段（若足够长），并列出其中需要先换出的占用帧。
    pub fn find_contiguous(&self, n: usize) -> Option<ContigRun> {
        self.inner.lock().find_contiguous(n)
    }

    /// 将一段已空闲的连续帧划为内核保留
    pub fn claim_kernel_run(&self, start: usize, n: usize) {
        self.inner.lock().claim_kernel_run(start, n);
    }

    /// 归还一段内核连续帧
    ///
    /// 只接受 [`Self::claim_kernel_run`] 划出的帧；启动时保留的
    /// 帧不可归还。
    pub fn release_run(&self, start: usize, n: usize) {
        self.inner.lock().release_run(start, n);
    }

    /// 进程退出：释放其全部驻留帧并注销进程
    ///
    /// 返回被释放的 (帧号, 虚拟页)，供调用方做 TLB 清理。
    pub fn remove_process(&self, pid: Pid) -> Vec<(usize, Vpn)> {
        self.inner.lock().remove_process(pid)
    }

    /// 列出进程当前驻留的 (帧号, 虚拟页)
    pub fn resident_pages(&self, pid: Pid) -> Vec<(usize, Vpn)> {
        self.inner.lock().resident_pages(pid)
    }

    /// 帧号对应的物理地址
    pub fn paddr_of(&self, frame: usize) -> Paddr {
        let inner = self.inner.lock();
        if frame >= inner.records.len() {
            panic!("vm: frame index {} out of range", frame);
        }
        inner.base.offset(frame).start_addr()
    }

    /// 物理地址对应的帧号
    pub fn frame_of(&self, paddr: Paddr) -> usize {
        let inner = self.inner.lock();
        let ppn = Ppn::from_addr_floor(paddr);
        if ppn < inner.base || ppn.as_usize() - inner.base.as_usize() >= inner.records.len() {
            panic!("vm: paddr {:#x} outside the frame table", paddr.as_usize());
        }
        ppn.as_usize() - inner.base.as_usize()
    }

    /// 总帧数
    pub fn total_frames(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// 空闲帧数
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// 内核保留帧数
    pub fn kernel_frames(&self) -> usize {
        self.inner.lock().kernel_count
    }

    /// 获取帧表的当前状态
    /// # 返回值
    /// - 总帧数
    /// - 空闲帧数
    /// - 内核保留帧数
    /// - 所有进程驻留帧数之和
    pub fn get_stats(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.lock();
        let resident: usize = inner.procs.values().map(|p| p.resident_count).sum();
        (
            inner.records.len(),
            inner.free_count,
            inner.kernel_count,
            resident,
        )
    }
}
