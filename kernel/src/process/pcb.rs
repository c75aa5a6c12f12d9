//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程控制块 (PCB)
//!
//! 父子关系只用 PID 表示，不持有对方的 PCB；PCB 的唯一所有者是进程表。
//! 退出状态与生命周期状态分开存放，"是否已退出" 只看 `state`。

use alloc::collections::BTreeSet;
use alloc::sync::Arc;

use super::{Pid, ProcessState};
use crate::fs::FdTable;
use crate::sched::Thread;
use crate::sync::Condition;

/// 进程控制块
pub struct Pcb {
    pub pid: Pid,
    /// 父进程；父进程先于本进程退出后为 `None`
    pub parent: Option<Pid>,
    pub children: BTreeSet<Pid>,
    pub state: ProcessState,
    /// 仅在 `ExitedUnreaped` 之后有值
    pub exit_status: Option<i32>,
    /// 父进程在 Join 中等待本进程退出
    pub join_cond: Arc<Condition>,
    pub fds: FdTable,
    /// 独占的执行上下文
    pub thread: Arc<Thread>,
}

impl Pcb {
    pub fn new(pid: Pid, parent: Option<Pid>, thread: Arc<Thread>, max_open_files: usize) -> Self {
        Self {
            pid,
            parent,
            children: BTreeSet::new(),
            state: ProcessState::Created,
            exit_status: None,
            join_cond: Arc::new(Condition::new("join")),
            fds: FdTable::new(max_open_files),
            thread,
        }
    }

    pub fn has_exited(&self) -> bool {
        matches!(self.state, ProcessState::ExitedUnreaped | ProcessState::Reaped)
    }

    /// 供外部观察的快照
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            parent: self.parent,
            children: self.children.clone(),
            state: self.state,
            exit_status: self.exit_status,
            open_files: self.fds.num_open_files(),
        }
    }
}

/// PCB 快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub children: BTreeSet<Pid>,
    pub state: ProcessState,
    pub exit_status: Option<i32>,
    pub open_files: usize,
}
