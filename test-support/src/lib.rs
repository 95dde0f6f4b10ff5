//! 测试支持 crate
//!
//! 提供宿主机 `cargo test` 所需的 Mock 实现：中断开关、
//! 物理内存仿真、TLB 槽位和交换区后备存储。

#![no_std]

pub mod mock;
