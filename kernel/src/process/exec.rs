//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 程序加载 (exec) 实现
//!
//! 顺序不能颠倒：先完整构造并校验新地址空间，成功后才销毁旧地址空间。
//! 新映像无法加载时，调用者的地址空间、寄存器和打开的文件都保持原样。
//!
//! 加载期间新旧两个地址空间同时占用物理帧。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::convert::Infallible;
use std::panic;

use log::{debug, info};

use super::current_process;
use crate::errno::KResult;
use crate::fs;
use crate::kernel::Kernel;
use crate::machine::RESULT_REG;
use crate::mm::AddrSpace;

/// 成功 exec 后用于展开到用户入口循环的标记
///
/// 旧映像的用户代码不再继续执行，新映像从入口重新开始。
#[derive(Debug)]
pub struct ImageReplaced;

/// 把名为 `name` 的程序加载到当前进程
///
/// 只在失败时返回：
/// - `Err(Errno::NoSuchFileOrDirectory)`: 程序不存在
/// - `Err(Errno::ExecFormatError)`: 不是合法的 NOFF 映像
/// - `Err(Errno::OutOfMemory)`: 物理帧不足
///
/// 成功时新映像的结果寄存器中是进程的 PID。
pub fn do_exec(kernel: &Arc<Kernel>, name: &str) -> KResult<Infallible> {
    let (thread, pid) = current_process();

    let file = kernel.fs().open(name)?;
    let image = fs::read_all(&*file);
    let mut space = AddrSpace::load(&image, kernel.frames(), kernel.machine(), kernel.config())
        .inspect_err(|err| debug!(target: "proc", "exec {} by {} failed: {}", name, pid, err))?;
    space.set_owner(pid);

    let old = thread.replace_space(space);
    drop(old);
    thread.with_space(|space| {
        space.init_registers();
        space.restore_state();
    });
    kernel.machine().write_register(RESULT_REG, pid as i32);

    info!(target: "proc", "process {} exec {}", pid, name);
    panic::resume_unwind(Box::new(ImageReplaced))
}
