//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程管理器
//!
//! 持有 PID 分配器和进程表 (PID → PCB)，两者由同一把内核锁保护：
//! 所有读写都必须在持有 `ProcessManager::lock()` 时通过 `with_table` 进行。
//!
//! 不变量：`pcbs` 中存在 `pid` 当且仅当 `pid` 在分配器中被占用。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, warn};
use spin::Mutex;

use super::pcb::{Pcb, ProcessInfo};
use super::pid::PidAllocator;
use super::{Pid, ProcessState};
use crate::errno::KResult;
use crate::kernel::Kernel;
use crate::machine::Registers;
use crate::mm::AddrSpace;
use crate::sync::Lock;

/// 进程表
pub struct ProcessTable {
    pids: PidAllocator,
    pcbs: BTreeMap<Pid, Pcb>,
}

impl ProcessTable {
    fn new(max_processes: usize) -> Self {
        Self {
            pids: PidAllocator::new(max_processes),
            pcbs: BTreeMap::new(),
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.pcbs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.pcbs.get_mut(&pid)
    }

    pub fn alloc_pid(&mut self) -> KResult<Pid> {
        self.pids.alloc()
    }

    /// 释放尚未登记 PCB 的 PID（创建失败时回滚）
    pub fn free_pid(&mut self, pid: Pid) {
        assert!(
            !self.pcbs.contains_key(&pid),
            "pid {} is still registered",
            pid
        );
        self.pids.free(pid);
    }

    /// 登记 PCB，并把它加入父进程的子进程集合
    pub fn insert(&mut self, pcb: Pcb) {
        assert!(self.pids.is_allocated(pcb.pid), "pcb {} has no allocated pid", pcb.pid);
        if let Some(parent) = pcb.parent.and_then(|ppid| self.pcbs.get_mut(&ppid)) {
            parent.children.insert(pcb.pid);
        }
        self.pcbs.insert(pcb.pid, pcb);
    }

    /// 回收进程：从进程表中删除并释放 PID
    ///
    /// 返回的 PCB 状态为 `Reaped`。
    pub fn reap(&mut self, pid: Pid) -> Option<Pcb> {
        let mut pcb = self.pcbs.remove(&pid)?;
        if let Some(parent) = pcb.parent.and_then(|ppid| self.pcbs.get_mut(&ppid)) {
            parent.children.remove(&pid);
        }
        pcb.state = ProcessState::Reaped;
        self.pids.free(pid);
        debug!(target: "proc", "reaped process {} (status {:?})", pid, pcb.exit_status);
        Some(pcb)
    }

    pub fn len(&self) -> usize {
        self.pcbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcbs.is_empty()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.pcbs.keys().copied().collect()
    }
}

/// 进程管理器
pub struct ProcessManager {
    lock: Lock,
    table: Mutex<ProcessTable>,
    max_open_files: usize,
}

impl ProcessManager {
    pub fn new(max_processes: usize, max_open_files: usize) -> Self {
        Self {
            lock: Lock::new("process table"),
            table: Mutex::new(ProcessTable::new(max_processes)),
            max_open_files,
        }
    }

    /// 保护进程表的锁
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// 在持有锁的情况下访问进程表
    ///
    /// `f` 中不能阻塞。
    pub fn with_table<R>(&self, f: impl FnOnce(&mut ProcessTable) -> R) -> R {
        if !self.lock.is_held_by_current_thread() {
            panic!("process table accessed without holding lock {}", self.lock.name());
        }
        f(&mut self.table.lock())
    }

    /// 为已分配的 `pid` 创建执行上下文、登记 PCB 并放入就绪队列
    ///
    /// 调用者必须持有锁。任何一步失败时回滚：PCB 注销、PID 释放、
    /// 地址空间随线程一起销毁。
    pub(crate) fn install_locked(
        &self,
        kernel: &Arc<Kernel>,
        pid: Pid,
        parent: Option<Pid>,
        name: &str,
        mut space: AddrSpace,
        regs: Registers,
    ) -> KResult<Pid> {
        let sched = kernel.scheduler();
        let thread = sched.create_thread(name);
        thread.set_pid(pid);
        thread.set_user_registers(regs);
        space.set_owner(pid);
        thread.replace_space(space);

        let pcb = Pcb::new(pid, parent, Arc::clone(&thread), self.max_open_files);
        self.with_table(|table| table.insert(pcb));

        let entry_kernel = Arc::clone(kernel);
        if let Err(err) = sched.fork(&thread, move || entry_kernel.user_entry()) {
            warn!(target: "proc", "cannot start process {}: {}", pid, err);
            self.with_table(|table| table.reap(pid));
            drop(thread.space.lock().take());
            return Err(err);
        }

        debug!(target: "proc", "process {} ({}) created, parent {:?}", pid, name, parent);
        Ok(pid)
    }

    /// 创建没有父进程的进程（第一个用户进程）
    pub(crate) fn create_process(
        &self,
        kernel: &Arc<Kernel>,
        name: &str,
        space: AddrSpace,
    ) -> KResult<Pid> {
        let regs = space.initial_registers();
        let _guard = self.lock.guard();
        let pid = self.with_table(|table| table.alloc_pid())?;
        self.install_locked(kernel, pid, None, name, space, regs)
    }

    /// 进程第一次被调度：Created → Running
    pub(crate) fn mark_running(&self, pid: Pid) {
        let _guard = self.lock.guard();
        self.with_table(|table| {
            if let Some(pcb) = table.get_mut(pid) {
                if pcb.state == ProcessState::Created {
                    pcb.state = ProcessState::Running;
                }
            }
        });
    }

    /// 查询进程快照；已回收或不存在时返回 `None`
    pub fn lookup(&self, pid: Pid) -> Option<ProcessInfo> {
        let _guard = self.lock.guard();
        self.with_table(|table| table.get(pid).map(Pcb::info))
    }

    /// 进程表中的 PCB 数量（含已退出未回收的）
    pub fn len(&self) -> usize {
        let _guard = self.lock.guard();
        self.with_table(|table| table.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 进程表中所有 PID，升序
    pub fn pids(&self) -> Vec<Pid> {
        let _guard = self.lock.guard();
        self.with_table(|table| table.pids())
    }

    /// 空闲 PID 数量
    pub fn num_free_pids(&self) -> usize {
        let _guard = self.lock.guard();
        self.with_table(|table| table.pids.num_free())
    }

    /// 当前上下文所属的进程
    pub fn current_pid(&self) -> Option<Pid> {
        super::current_pid()
    }

    /// 描述进程树，调试用
    pub fn dump(&self) -> String {
        let _guard = self.lock.guard();
        self.with_table(|table| {
            let mut out = String::new();
            for pcb in table.pcbs.values() {
                out.push_str(&alloc::format!(
                    "{} parent={:?} children={:?} {:?} status={:?}\n",
                    pcb.pid,
                    pcb.parent,
                    pcb.children,
                    pcb.state,
                    pcb.exit_status
                ));
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::sched::Scheduler;

    fn pcb(sched: &Arc<Scheduler>, table: &mut ProcessTable, parent: Option<Pid>) -> Pid {
        let pid = table.alloc_pid().unwrap();
        table.insert(Pcb::new(pid, parent, sched.create_thread("p"), 4));
        pid
    }

    #[test]
    fn table_keeps_pid_and_pcb_in_step() {
        let sched = Scheduler::new(Arc::new(Machine::new(128, 1)));
        let mut table = ProcessTable::new(4);
        let parent = pcb(&sched, &mut table, None);
        let child = pcb(&sched, &mut table, Some(parent));
        assert!(table.get(parent).unwrap().children.contains(&child));
        assert_eq!(table.pids(), [parent, child]);

        let reaped = table.reap(child).unwrap();
        assert_eq!(reaped.state, ProcessState::Reaped);
        assert!(table.get(parent).unwrap().children.is_empty());
        assert!(!table.pids.is_allocated(child));
        assert!(table.reap(child).is_none());

        assert_eq!(table.alloc_pid(), Ok(child));
    }

    #[test]
    fn host_may_inspect_an_uncontended_table() {
        let manager = ProcessManager::new(4, 4);
        assert!(manager.is_empty());
        assert_eq!(manager.lookup(0), None);
        assert_eq!(manager.num_free_pids(), 4);
        assert!(manager.lock().owner().is_none());
    }

    #[test]
    #[should_panic(expected = "without holding lock")]
    fn table_access_requires_the_lock() {
        let manager = ProcessManager::new(4, 4);
        manager.with_table(|table| table.len());
    }
}
