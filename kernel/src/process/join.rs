//! 等待子进程退出 (join)
//!
//! 经典的管程循环：持有进程表锁，目标未退出时在它的 Join 条件变量上等待。
//! 条件变量是 Mesa 语义，醒来后必须重新检查目标状态。

use alloc::sync::Arc;

use log::debug;

use super::{current_process, Pid, ProcessState};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;

/// 等待子进程 `pid` 退出，取走退出状态并回收它
///
/// `pid` 不是调用者当前的子进程（包括已被回收的）时返回 `Errno::NoChild`。
pub fn do_join(kernel: &Arc<Kernel>, pid: Pid) -> KResult<i32> {
    let (_, me) = current_process();
    let processes = kernel.processes();
    let _guard = processes.lock().guard();

    loop {
        let waiting_on = processes.with_table(|table| {
            let is_child = table.get(me).is_some_and(|pcb| pcb.children.contains(&pid));
            let child = table.get(pid).filter(|_| is_child).ok_or(Errno::NoChild)?;
            Ok(match child.state {
                ProcessState::ExitedUnreaped => None,
                _ => Some(Arc::clone(&child.join_cond)),
            })
        })?;
        match waiting_on {
            Some(join_cond) => join_cond.wait(processes.lock()),
            None => break,
        }
    }

    let status = processes.with_table(|table| {
        table
            .reap(pid)
            .and_then(|pcb| pcb.exit_status)
            .ok_or(Errno::NoChild)
    })?;
    debug!(target: "proc", "process {} joined {} (status {})", me, pid, status);
    Ok(status)
}
