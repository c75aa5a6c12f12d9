//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 进程创建 (fork) 实现
//!
//! 流程 (参考 Linux kernel/fork.c):
//! 1. 分配 PID
//! 2. 复制父进程的地址空间 (copy_mm)，失败时释放 PID
//! 3. 复制寄存器 (copy_thread)，子进程从调用者给出的入口地址开始执行
//! 4. 登记 PCB，加入父进程的子进程集合，放入就绪队列 (wake_up_process)
//!
//! 子进程的文件描述符表只含控制台描述符。

use alloc::sync::Arc;

use log::debug;

use super::{current_process, Pid};
use crate::errno::KResult;
use crate::kernel::Kernel;
use crate::machine::{INSTRUCTION_WIDTH, NEXT_PC_REG, PC_REG, PREV_PC_REG};

/// 创建子进程
///
/// # 返回
/// - `Ok(pid)`: 子进程的 PID（在父进程中返回）
/// - `Err(Errno::TryAgain)`: PID 耗尽或无法创建执行上下文
/// - `Err(Errno::OutOfMemory)`: 物理帧不足以复制地址空间
pub fn do_fork(kernel: &Arc<Kernel>, entry: i32) -> KResult<Pid> {
    let (parent, ppid) = current_process();
    let processes = kernel.processes();
    let _guard = processes.lock().guard();

    let pid = processes.with_table(|table| table.alloc_pid())?;
    let cloned = match parent.with_space(|space| space.fork_clone()) {
        Some(cloned) => cloned,
        None => panic!("process {} has no address space", ppid),
    };
    let space = match cloned {
        Ok(space) => space,
        Err(err) => {
            debug!(target: "proc", "fork by {} failed: {}", ppid, err);
            processes.with_table(|table| table.free_pid(pid));
            return Err(err);
        }
    };

    // copy_thread: 子进程继承调用时的寄存器，从 entry 开始执行
    let mut regs = kernel.machine().registers();
    regs[PREV_PC_REG] = entry;
    regs[PC_REG] = entry;
    regs[NEXT_PC_REG] = entry.wrapping_add(INSTRUCTION_WIDTH);

    processes.install_locked(kernel, pid, Some(ppid), parent.name(), space, regs)?;
    debug!(target: "proc", "process {} forked {} at entry {}", ppid, pid, entry);
    Ok(pid)
}
