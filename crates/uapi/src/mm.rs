//! 内存管理相关的共用定义

use bitflags::bitflags;

bitflags! {
    /// 页访问权限
    ///
    /// 与 mmap prot 参数兼容的权限位，内核侧也用它表示
    /// 一条翻译允许的访问方式。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageProt: u32 {
        /// 可读
        const READ = 1 << 0;
        /// 可写
        const WRITE = 1 << 1;
        /// 可执行
        const EXEC = 1 << 2;
    }
}

impl PageProt {
    /// 用户代码段权限（只读可执行）
    pub const fn user_code() -> Self {
        Self::READ.union(Self::EXEC)
    }

    /// 用户数据段权限（可读写）
    pub const fn user_data() -> Self {
        Self::READ.union(Self::WRITE)
    }
}
