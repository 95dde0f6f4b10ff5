//! 交换表
//!
//! 按块平铺在后备存储上的磁盘侧分配器，是"哪些页当前被换出"
//! 的唯一权威：一个被占用的块携带 `(虚拟页, 进程)` 标记，
//! 不在交换表中而在帧表中，则说明页是驻留的。
//!
//! 空闲块组成一条与帧表同构的侵入式单链表。所有簿记修改都在
//! 自旋锁临界区内完成；对后备存储的读写一律发生在临界区**外**：
//!
//! - 换出：先提交簿记（块被标记占用），再写盘。规格允许这个
//!   "先占用、内容后落盘"的窗口。
//! - 换入：先读盘，再释放块。顺序反过来会让并发的块分配在读
//!   完成前复用并覆盖这个块。

use crate::address::{Paddr, Vpn};
use crate::arch_ops::arch_ops;
use crate::backing::BackingStore;
use crate::error::{VmError, VmResult};
use crate::stats::{classify_chunk, StatSink, SwapChunkKind, VmEvent};
use crate::tlb::TlbShim;
use crate::vm_config;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::types::Pid;

/// 每个磁盘块一条记录
#[derive(Debug)]
struct SwapRecord {
    /// 占用此块的虚拟页码，占用时有意义
    vpn: Vpn,
    /// 占用此块的进程，占用时有意义
    owner: Pid,
    /// 是否空闲可分配
    free: bool,
    /// 空闲链表中的下一个块号
    next: Option<usize>,
}

struct SwapInner {
    records: Vec<SwapRecord>,
    free_head: Option<usize>,
    free_tail: Option<usize>,
    free_count: usize,
}

impl SwapInner {
    fn record(&self, chunk: usize) -> &SwapRecord {
        if chunk >= self.records.len() {
            panic!("vm: chunk index {} out of range", chunk);
        }
        &self.records[chunk]
    }

    fn push_free(&mut self, chunk: usize) {
        let rec = &mut self.records[chunk];
        rec.free = true;
        rec.next = None;
        match self.free_tail {
            Some(tail) => self.records[tail].next = Some(chunk),
            None => self.free_head = Some(chunk),
        }
        self.free_tail = Some(chunk);
        self.free_count += 1;
    }

    fn pop_free(&mut self) -> Option<usize> {
        let head = self.free_head?;
        self.free_head = self.records[head].next;
        if self.free_head.is_none() {
            self.free_tail = None;
        }
        let rec = &mut self.records[head];
        rec.next = None;
        rec.free = false;
        self.free_count -= 1;
        Some(head)
    }

    fn find(&self, vpn: Vpn, pid: Pid) -> Option<usize> {
        self.records
            .iter()
            .position(|r| !r.free && r.vpn == vpn && r.owner == pid)
    }
}

/// 交换表
///
/// 簿记在锁内，存储读写在锁外。
pub struct SwapTable {
    inner: SpinLock<SwapInner>,
    store: Arc<dyn BackingStore>,
    stats: Arc<dyn StatSink>,
}

impl SwapTable {
    /// 按后备存储容量建表
    ///
    /// 块数 = 容量 / 页大小，全部块初始为空闲。
    pub fn new(store: Arc<dyn BackingStore>, stats: Arc<dyn StatSink>) -> Self {
        let chunks = store.capacity() / vm_config().page_size();
        let mut inner = SwapInner {
            records: {
                let mut v = Vec::with_capacity(chunks);
                v.resize_with(chunks, || SwapRecord {
                    vpn: Vpn::from_usize(0),
                    owner: 0,
                    free: false,
                    next: None,
                });
                v
            },
            free_head: None,
            free_tail: None,
            free_count: 0,
        };
        for chunk in 0..chunks {
            inner.push_free(chunk);
        }
        log::debug!("[vm] swap area: {} chunks", chunks);
        SwapTable {
            inner: SpinLock::new(inner),
            store,
            stats,
        }
    }

    /// 总块数
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// 空闲块数
    pub fn free_chunks(&self) -> usize {
        self.inner.lock().free_count
    }

    /// 分配一个空闲块
    ///
    /// 空闲链表为空时返回 [`VmError::SwapFull`]。
    pub fn allocate_chunk(&self) -> VmResult<usize> {
        match self.inner.lock().pop_free() {
            Some(chunk) => Ok(chunk),
            None => Err(VmError::SwapFull),
        }
    }

    /// 分配并立即打上标记（镜像装载和 fork 复制使用）
    fn allocate_tagged(&self, vpn: Vpn, pid: Pid) -> VmResult<usize> {
        let mut inner = self.inner.lock();
        let chunk = inner.pop_free().ok_or(VmError::SwapFull)?;
        let rec = &mut inner.records[chunk];
        rec.vpn = vpn;
        rec.owner = pid;
        Ok(chunk)
    }

    /// 将一个帧的内容换出到已分配的块
    ///
    /// 簿记先于写盘提交；`tlb` 为 Some 时（驱逐路径）在写盘后
    /// 失效掉指向源帧的缓存翻译，管理性写出传 None。
    pub fn write_out(
        &self,
        chunk: usize,
        src: Paddr,
        vpn: Vpn,
        pid: Pid,
        tlb: Option<&TlbShim>,
    ) -> VmResult<()> {
        let page_size = vm_config().page_size();
        {
            let mut inner = self.inner.lock();
            if inner.record(chunk).free {
                panic!("vm: write_out to unallocated chunk {}", chunk);
            }
            debug_assert!(
                !inner
                    .records
                    .iter()
                    .enumerate()
                    .any(|(i, r)| i != chunk && !r.free && r.vpn == vpn && r.owner == pid),
                "vm: duplicate (vpn, pid) in swap table"
            );
            let rec = &mut inner.records[chunk];
            rec.vpn = vpn;
            rec.owner = pid;
        }

        // 簿记已提交，盘 I/O 在临界区外进行
        let src_ptr = arch_ops().paddr_to_vaddr(src.as_usize()) as *const u8;
        let buf = unsafe { core::slice::from_raw_parts(src_ptr, page_size) };
        let written = self.store.write_at(chunk * page_size, buf)?;
        if written != page_size {
            log::error!(
                "Partial swap write at chunk {}: expected {}, got {}",
                chunk,
                page_size,
                written
            );
            return Err(VmError::Io { retryable: false });
        }
        self.stats.record(VmEvent::SwapChunk(classify_chunk(buf)));

        if let Some(tlb) = tlb {
            tlb.invalidate_one(src);
        }
        Ok(())
    }

    /// 将一个块的内容读入帧并释放该块
    pub fn read_in(&self, chunk: usize, dst: Paddr) -> VmResult<()> {
        let page_size = vm_config().page_size();
        {
            let inner = self.inner.lock();
            if inner.record(chunk).free {
                panic!("vm: read_in from free chunk {}", chunk);
            }
        }

        let dst_ptr = arch_ops().paddr_to_vaddr(dst.as_usize()) as *mut u8;
        let buf = unsafe { core::slice::from_raw_parts_mut(dst_ptr, page_size) };
        let read = self.store.read_at(chunk * page_size, buf)?;
        if read != page_size {
            log::warn!(
                "Partial swap read at chunk {}: expected {}, got {}",
                chunk,
                page_size,
                read
            );
            return Err(VmError::Io { retryable: true });
        }

        self.inner.lock().push_free(chunk);
        Ok(())
    }

    /// 查找 `(vpn, pid)` 当前占用的块
    ///
    /// 每次确定换出页的缺页都会走到这里；线性扫描。
    pub fn find_chunk(&self, vpn: Vpn, pid: Pid) -> Option<usize> {
        self.inner.lock().find(vpn, pid)
    }

    /// 将程序镜像直接装入交换区
    ///
    /// 逐页读镜像、分配块、写盘，页码从 `start_vpn` 起递增，
    /// 不经过任何物理帧。最后不足一页的部分补零成整页写入。
    /// 装载中途交换区耗尽是不可恢复的装载错误，原样上抛。
    pub fn bulk_load_image(
        &self,
        image: &dyn BackingStore,
        offset: usize,
        start_vpn: Vpn,
        byte_size: usize,
        pid: Pid,
    ) -> VmResult<usize> {
        if byte_size == 0 {
            return Ok(0);
        }
        let page_size = vm_config().page_size();
        let chunks = byte_size.div_ceil(page_size);
        let mut buf = vec![0u8; page_size];

        for i in 0..chunks {
            let image_off = i * page_size;
            let take = page_size.min(byte_size - image_off);
            buf.fill(0);
            let read = image.read_at(offset + image_off, &mut buf[..take])?;
            if read != take {
                log::error!(
                    "Short image read at offset {}: expected {}, got {}",
                    offset + image_off,
                    take,
                    read
                );
                return Err(VmError::Io { retryable: false });
            }

            let chunk = self.allocate_tagged(start_vpn.offset(i), pid)?;
            let written = self.store.write_at(chunk * page_size, &buf)?;
            if written != page_size {
                log::error!(
                    "Partial swap write at chunk {}: expected {}, got {}",
                    chunk,
                    page_size,
                    written
                );
                return Err(VmError::Io { retryable: false });
            }
            self.stats.record(VmEvent::SwapChunk(SwapChunkKind::Filled));
        }

        log::debug!(
            "[vm] image for pid {}: {} bytes into {} chunks from page {}",
            pid,
            byte_size,
            chunks,
            start_vpn.as_usize()
        );
        Ok(chunks)
    }

    /// 为 fork 复制 `src_pid` 的全部换出页
    ///
    /// 每个源块分配一个新块、逐字节复制，并以 `dst_pid` 和相同
    /// 页码打标记。源块保持不动。
    pub fn fork_duplicate(&self, src_pid: Pid, dst_pid: Pid) -> VmResult<usize> {
        let page_size = vm_config().page_size();
        let src_chunks: Vec<(usize, Vpn)> = {
            let inner = self.inner.lock();
            inner
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.free && r.owner == src_pid)
                .map(|(i, r)| (i, r.vpn))
                .collect()
        };

        let mut buf = vec![0u8; page_size];
        for &(src_chunk, vpn) in &src_chunks {
            let dst_chunk = self.allocate_tagged(vpn, dst_pid)?;
            let read = self.store.read_at(src_chunk * page_size, &mut buf)?;
            if read != page_size {
                log::warn!(
                    "Partial swap read at chunk {}: expected {}, got {}",
                    src_chunk,
                    page_size,
                    read
                );
                return Err(VmError::Io { retryable: true });
            }
            let written = self.store.write_at(dst_chunk * page_size, &buf)?;
            if written != page_size {
                log::error!(
                    "Partial swap write at chunk {}: expected {}, got {}",
                    dst_chunk,
                    page_size,
                    written
                );
                return Err(VmError::Io { retryable: false });
            }
            self.stats.record(VmEvent::SwapChunk(classify_chunk(&buf)));
        }
        Ok(src_chunks.len())
    }

    /// 进程退出：释放其占用的全部块
    pub fn reclaim_all(&self, pid: Pid) -> usize {
        let mut inner = self.inner.lock();
        let owned: Vec<usize> = inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.free && r.owner == pid)
            .map(|(i, _)| i)
            .collect();
        for &chunk in &owned {
            inner.push_free(chunk);
        }
        owned.len()
    }

    /// 列出全部被占用的块 (仅用于测试)
    #[cfg(test)]
    pub(crate) fn occupied_chunks(&self) -> Vec<(usize, Vpn, Pid)> {
        let inner = self.inner.lock();
        inner
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.free)
            .map(|(i, r)| (i, r.vpn, r.owner))
            .collect()
    }
}
