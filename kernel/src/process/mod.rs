//! 进程管理模块
//!
//! 进程生命周期：`Created → Running → ExitedUnreaped → Reaped`
//! - `pid`: PID 位图分配器
//! - `pcb`: 进程控制块
//! - `manager`: 进程表与锁
//! - `fork` / `exec` / `exit` / `join`: 进程操作，`exit` 同时实现 Kill
//! - `wait`: 等待队列，同步原语和调度器共用

pub mod exec;
pub mod exit;
pub mod fork;
pub mod join;
pub mod manager;
pub mod pcb;
pub mod pid;
pub mod wait;

use alloc::sync::Arc;

pub use exec::{do_exec, ImageReplaced};
pub use exit::{do_exit, do_kill};
pub use fork::do_fork;
pub use join::do_join;
pub use manager::{ProcessManager, ProcessTable};
pub use pcb::{Pcb, ProcessInfo};
pub use pid::PidAllocator;

use crate::sched::{self, Thread};

/// 进程 ID
pub type Pid = u32;

/// 进程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// 已创建，执行上下文尚未被调度
    Created,
    /// 执行上下文已开始运行
    Running,
    /// 已退出，退出状态等待父进程取走
    ExitedUnreaped,
    /// 已回收（终态，PCB 已从进程表删除）
    Reaped,
}

/// 获取当前进程的 PID
///
/// 宿主上下文和内核线程返回 `None`。
pub fn current_pid() -> Option<Pid> {
    sched::current().and_then(|thread| thread.pid())
}

/// 当前用户进程的执行上下文和 PID
///
/// 只有用户进程能发起进程操作，其他上下文调用属于内核错误。
pub(crate) fn current_process() -> (Arc<Thread>, Pid) {
    let Some(thread) = sched::current() else {
        panic!("process operation invoked from the host context");
    };
    match thread.pid() {
        Some(pid) => (thread, pid),
        None => panic!("thread {} ({}) is not a user process", thread.tid(), thread.name()),
    }
}
