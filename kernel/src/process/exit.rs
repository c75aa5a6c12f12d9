//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 进程退出 (exit) 与强制终止 (kill)
//!
//! 退出的清理步骤（Kill 对目标执行同样的步骤）：
//! 1. 记录退出状态，进入 `ExitedUnreaped`
//! 2. 关闭所有打开的文件
//! 3. 处理子进程：已退出的立即回收，仍在运行的成为孤儿（父进程置空）
//! 4. 唤醒在 Join 中等待的父进程
//! 5. 没有父进程时立即回收自己，因为不会再有人 Join
//!
//! 地址空间随执行上下文结束而销毁，物理帧归还分配器。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

use log::{debug, info};

use super::manager::ProcessTable;
use super::{current_process, Pid, ProcessState};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::sched;
use crate::sync::Condition;

/// 当前进程以 `status` 退出，不再返回
pub fn do_exit(kernel: &Arc<Kernel>, status: i32) -> ! {
    let (_, pid) = current_process();
    let processes = kernel.processes();
    {
        let _guard = processes.lock().guard();
        if let Some(join_cond) = processes.with_table(|table| exit_locked(table, pid, status)) {
            join_cond.broadcast(processes.lock());
        }
    }
    info!(target: "proc", "process {} exited with status {}", pid, status);
    sched::exit_current()
}

/// 强制终止进程 `pid`
///
/// - `pid` 是调用者自己：等同于 `Exit(0)`，不返回
/// - `pid` 不存在或已退出：返回 `Errno::NoSuchProcess`
/// - 否则目标以 `killed_exit_status` 退出；若它阻塞在某个等待队列上，
///   先被摘除，然后在下一次恢复运行时直接结束
pub fn do_kill(kernel: &Arc<Kernel>, pid: Pid) -> KResult<()> {
    let (_, me) = current_process();
    if pid == me {
        do_exit(kernel, 0);
    }

    let status = kernel.config().killed_exit_status;
    let processes = kernel.processes();
    let thread = {
        let _guard = processes.lock().guard();
        let (thread, join_cond) = processes.with_table(|table| {
            let thread = match table.get(pid) {
                Some(pcb) if !pcb.has_exited() => Arc::clone(&pcb.thread),
                _ => return Err(Errno::NoSuchProcess),
            };
            Ok((thread, exit_locked(table, pid, status)))
        })?;
        if let Some(join_cond) = join_cond {
            join_cond.broadcast(processes.lock());
        }
        thread
    };

    kernel.scheduler().terminate(&thread);
    info!(target: "proc", "process {} killed by {}", pid, me);
    Ok(())
}

/// 对进程 `pid` 执行退出清理，调用者持有进程表锁
///
/// 返回需要广播的 Join 条件变量；进程不存在或已退出时返回 `None`。
pub(crate) fn exit_locked(table: &mut ProcessTable, pid: Pid, status: i32) -> Option<Arc<Condition>> {
    let pcb = table.get_mut(pid)?;
    if pcb.has_exited() {
        return None;
    }
    pcb.state = ProcessState::ExitedUnreaped;
    pcb.exit_status = Some(status);
    let closed = pcb.fds.close_all();
    let parent = pcb.parent;
    let join_cond = Arc::clone(&pcb.join_cond);
    let children = mem::take(&mut pcb.children);
    debug!(
        target: "proc",
        "process {}: status {}, closed {} files, {} children",
        pid,
        status,
        closed,
        children.len()
    );

    let mut exited = Vec::new();
    for child in children {
        match table.get_mut(child) {
            Some(pcb) if pcb.state == ProcessState::ExitedUnreaped => exited.push(child),
            Some(pcb) => pcb.parent = None,
            None => {}
        }
    }
    for child in exited {
        table.reap(child);
    }

    if parent.is_none() {
        table.reap(pid);
    }
    Some(join_cond)
}
