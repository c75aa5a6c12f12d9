//! 场景测试
//!
//! 每个模块在一个完整的内核实例上运行用户程序，覆盖一类进程生命周期场景：
//! - `fork`: fork/join 端到端、fork 回滚、PID 耗尽
//! - `orphan`: 父进程先退出时的孤儿处理与回收
//! - `kill`: Kill 的各种目标（自己、未知、阻塞中、尚未运行）
//! - `exec`: 加载失败保持原状、加载成功替换映像
//! - `file_io`: 文件与控制台系统调用
//! - `boundary`: Halt、致命异常、未知调用号、停机回收
//!
//! 用户程序的代码字是 [`NativeCpu`] 中注册的例程编号，例程记录下观察到
//! 的结果，由测试在宿主上断言。
//!
//! 运行测试：
//! ```bash
//! cargo test --package nachos-kernel
//! ```

mod boundary;
mod orphan;

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::fs::noff::NoffBuilder;
use crate::fs::MemFileSystem;
use crate::kernel::{Kernel, KernelConfig};
use crate::machine::NativeCpu;

/// 代码字 `index` 的虚拟地址，作为 Fork 的入口参数
pub(crate) fn entry(index: i32) -> i32 {
    index * 4
}

/// 每个小程序占 3 页，默认 32 帧可容纳 10 个进程
pub(crate) fn test_config() -> KernelConfig {
    KernelConfig {
        user_stack_size: 256,
        ..KernelConfig::default()
    }
}

/// 例程与宿主之间共享的观察记录
pub(crate) struct Trace<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Trace<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> Trace<T> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub(crate) fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    pub(crate) fn events(&self) -> Vec<T> {
        self.0.lock().clone()
    }
}

/// 安装程序并启动内核
///
/// `programs` 中每个程序由代码字（例程编号）组成。
pub(crate) fn boot(
    config: KernelConfig,
    cpu: NativeCpu,
    programs: &[(&str, &[u32])],
) -> (Arc<Kernel>, Arc<MemFileSystem>) {
    let fs = Arc::new(MemFileSystem::new());
    for (name, code) in programs {
        fs.install(name, &NoffBuilder::new().code_words(code).build());
    }
    let kernel = Kernel::new(config, fs.clone(), Arc::new(cpu));
    (kernel, fs)
}
