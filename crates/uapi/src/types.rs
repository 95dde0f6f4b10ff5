//! 内核与用户空间共用的基础类型

/// 进程标识符
pub type Pid = u32;
