//! 虚拟内存操作的错误类型
//!
//! 资源耗尽和设备 I/O 失败以类型化错误返回给调用者，由上层
//! 决定策略（通常是终止超出容量的进程）；簿记不一致属于缺陷，
//! 统一以 `vm:` 前缀的 panic 终止，绝不静默吞掉。

/// 虚拟内存操作中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 没有空闲帧，也没有满足请求的可驱逐帧
    OutOfFrames,
    /// 交换区已无空闲块
    SwapFull,
    /// 后备存储读写失败
    Io {
        /// 是否是值得重试的瞬时设备错误
        retryable: bool,
    },
}

/// 虚拟内存操作的结果类型
pub type VmResult<T> = Result<T, VmError>;
