//! 地址与页码抽象
//!
//! 定义物理/虚拟地址 (Paddr, Vaddr) 和物理/虚拟页码 (Ppn, Vpn)
//! 的新类型封装，以及它们之间基于页大小的换算。
//! 页大小来自已注册的 [`crate::VmConfig`]。

/// `impl_usize_newtype!` 宏
/// ---------------------
/// 为 usize 新类型实现与 usize 的互相转换。
macro_rules! impl_usize_newtype {
    ($type:ty) => {
        impl $type {
            /// 转换为 usize
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// 从 usize 构造
            pub const fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }
    };
}

/// `impl_page_num!` 宏
/// ---------------------
/// 为页码类型实现与关联地址类型之间的换算。
macro_rules! impl_page_num {
    ($num:ty, $addr:ty) => {
        impl $num {
            /// 将地址向下取整得到页码
            pub fn from_addr_floor(addr: $addr) -> Self {
                Self(addr.as_usize() / crate::vm_config().page_size())
            }

            /// 将地址向上取整得到页码
            pub fn from_addr_ceil(addr: $addr) -> Self {
                Self(addr.as_usize().div_ceil(crate::vm_config().page_size()))
            }

            /// 该页的起始地址
            pub fn start_addr(self) -> $addr {
                <$addr>::from_usize(self.0 * crate::vm_config().page_size())
            }

            /// 向后偏移 `n` 页
            pub fn offset(self, n: usize) -> Self {
                Self(self.0 + n)
            }
        }
    };
}

/// 虚拟地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Vaddr(pub usize);

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Paddr(pub usize);

/// 虚拟页码
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Vpn(pub usize);

/// 物理页码（帧号）
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Ppn(pub usize);

impl_usize_newtype!(Vaddr);
impl_usize_newtype!(Paddr);
impl_usize_newtype!(Vpn);
impl_usize_newtype!(Ppn);

impl_page_num!(Vpn, Vaddr);
impl_page_num!(Ppn, Paddr);

impl Vaddr {
    /// 页内偏移
    pub fn page_offset(self) -> usize {
        self.0 % crate::vm_config().page_size()
    }
}

impl Paddr {
    /// 向下对齐到页边界
    pub fn align_down_to_page(self) -> Self {
        let ps = crate::vm_config().page_size();
        Self(self.0 / ps * ps)
    }
}
