//! 全局 VM 管理器
//!
//! 管理器的构造需要运行期参数（帧几何、后备存储句柄），
//! 因此这里用 once 语义安装一个全局实例，供陷入处理路径访问。

use crate::fault::VmManager;
use alloc::boxed::Box;
use once_cell::race::OnceBox;

static VM_MANAGER: OnceBox<VmManager> = OnceBox::new();

/// 安装全局 VM 管理器
///
/// # Panics
/// 重复安装属于启动流程缺陷，panic。
pub fn init_vm(manager: VmManager) {
    if VM_MANAGER.set(Box::new(manager)).is_err() {
        panic!("vm: VmManager already initialized");
    }
}

/// 获取全局 VM 管理器
///
/// # Panics
/// 如果尚未调用 [`init_vm`] 安装实例，则 panic
#[inline]
pub fn vm() -> &'static VmManager {
    match VM_MANAGER.get() {
        Some(manager) => manager,
        None => panic!("vm: VmManager not initialized"),
    }
}
