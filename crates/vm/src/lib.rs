//! 请求调页子系统
//!
//! 把多个并发进程的虚拟页映射到一小片固定的物理帧池上，
//! 溢出部分落到磁盘交换区，并保持硬件 TLB 与自身簿记一致。
//!
//! # 组成
//!
//! - [`frame_table`]：帧表（反置页表），帧 -> (虚拟页, 进程)
//!   映射的唯一权威，带侵入式空闲/驻留链表。
//! - [`swap`]：交换表，磁盘块 -> (虚拟页, 进程) 映射的唯一权威，
//!   以及镜像装载、fork 复制和进程回收。
//! - [`fault`]：缺页处理，编排上面两张表完成一次缺页解决。
//! - [`tlb`]：TLB 策略层，槽位选择、权限选择和失效范围。
//! - [`stats`]：事件统计，被动计数，不影响控制流。
//!
//! # 架构解耦
//!
//! 通过 trait 抽象与架构特定组件解耦：
//! - [`ArchVmOps`]: 地址转换、TLB 原始读写、机器随机源
//! - [`VmConfig`]: 页大小等布局常量
//!
//! 使用前必须调用 [`register_arch_ops`] 和 [`register_config`]
//! 注册实现（`sync` 的 `ArchOps` 也要注册）。

#![no_std]

extern crate alloc;

mod arch_ops;
mod backing;
mod config;
mod error;
mod global;

pub mod address;
pub mod fault;
pub mod frame_table;
pub mod process;
pub mod stats;
pub mod swap;
pub mod tlb;

#[cfg(test)]
mod tests;

pub use arch_ops::{ArchVmOps, arch_ops, register_arch_ops};
pub use backing::BackingStore;
pub use config::{VmConfig, register_config, vm_config};
pub use error::{VmError, VmResult};
pub use global::{init_vm, vm};

// Re-export 常用类型
pub use address::{Paddr, Ppn, Vaddr, Vpn};
pub use fault::VmManager;
pub use frame_table::{ContigRun, FrameTable};
pub use process::{ProcessVm, SegmentLayout};
pub use stats::{NullSink, PageSource, StatSink, SwapChunkKind, VmEvent, VmStatSnapshot, VmStats};
pub use swap::SwapTable;
pub use tlb::{TlbEntry, TlbFlags, TlbShim};
