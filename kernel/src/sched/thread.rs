//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 执行上下文 (Thread)
//!
//! 每个线程有：
//! - 生命周期状态 `JustCreated → Ready → Running → Blocked → Finished`
//! - 切换时保存的用户寄存器
//! - 独占的地址空间（用户进程才有）
//! - 所属进程的 PID（用户进程才有）
//! - 正在阻塞的等待队列，`Kill` 需要据此把线程从队列中间摘除

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use super::switch::Baton;
use super::Scheduler;
use crate::machine::{Registers, NUM_TOTAL_REGS};
use crate::mm::AddrSpace;
use crate::process::wait::WaitQueue;
use crate::process::Pid;

/// 线程 ID
pub type Tid = u32;

/// 宿主（启动）上下文的线程 ID
///
/// 宿主上下文可以在调度器运行前获取无竞争的锁，但永远不能阻塞。
pub const HOST_TID: Tid = 0;

/// 线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// 已创建，尚未第一次运行
    JustCreated,
    /// 在就绪队列中
    Ready,
    /// 正在 CPU 上运行
    Running,
    /// 阻塞在某个等待队列上
    Blocked,
    /// 已结束
    Finished,
}

/// 线程被终止时用于展开栈的标记
///
/// `Exit`、`Halt` 和被 `Kill` 的线程都通过它回到线程入口，
/// 由调度器完成收尾。它不是错误。
#[derive(Debug)]
pub struct ThreadExit;

/// 执行上下文
pub struct Thread {
    tid: Tid,
    name: String,
    state: Mutex<ThreadState>,
    pub(crate) baton: Baton,
    killed: AtomicBool,
    blocked_on: Mutex<Option<Weak<WaitQueue>>>,
    user_regs: Mutex<Registers>,
    pub(crate) space: Mutex<Option<AddrSpace>>,
    pid: Mutex<Option<Pid>>,
    scheduler: Weak<Scheduler>,
}

impl Thread {
    pub(crate) fn new(tid: Tid, name: &str, scheduler: Weak<Scheduler>) -> Self {
        Self {
            tid,
            name: String::from(name),
            state: Mutex::new(ThreadState::JustCreated),
            baton: Baton::new(),
            killed: AtomicBool::new(false),
            blocked_on: Mutex::new(None),
            user_regs: Mutex::new([0; NUM_TOTAL_REGS]),
            space: Mutex::new(None),
            pid: Mutex::new(None),
            scheduler,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    /// 线程是否已被 `Kill`
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub(crate) fn set_killed(&self) {
        self.killed.store(true, Ordering::Release);
    }

    /// 所属进程
    pub fn pid(&self) -> Option<Pid> {
        *self.pid.lock()
    }

    pub fn set_pid(&self, pid: Pid) {
        *self.pid.lock() = Some(pid);
    }

    /// 所属调度器
    ///
    /// 调度器先于线程销毁属于内核错误。
    pub fn scheduler(&self) -> Arc<Scheduler> {
        match self.scheduler.upgrade() {
            Some(sched) => sched,
            None => panic!("thread {} outlived its scheduler", self.tid),
        }
    }

    pub(crate) fn set_blocked_on(&self, queue: Option<Weak<WaitQueue>>) {
        *self.blocked_on.lock() = queue;
    }

    pub(crate) fn take_blocked_on(&self) -> Option<Arc<WaitQueue>> {
        self.blocked_on.lock().take().and_then(|q| q.upgrade())
    }

    /// 保存的用户寄存器
    pub fn user_registers(&self) -> Registers {
        *self.user_regs.lock()
    }

    pub fn set_user_registers(&self, regs: Registers) {
        *self.user_regs.lock() = regs;
    }

    /// 安装地址空间，返回旧的地址空间
    pub fn replace_space(&self, space: AddrSpace) -> Option<AddrSpace> {
        self.space.lock().replace(space)
    }

    /// 线程是否拥有地址空间（即是否为用户进程）
    pub fn has_space(&self) -> bool {
        self.space.lock().is_some()
    }

    /// 在持有地址空间的情况下执行 `f`
    pub fn with_space<R>(&self, f: impl FnOnce(&AddrSpace) -> R) -> Option<R> {
        self.space.lock().as_ref().map(f)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// 当前正在运行的线程
///
/// 宿主上下文返回 `None`。
pub fn current() -> Option<Arc<Thread>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// 当前上下文的线程 ID，宿主上下文为 [`HOST_TID`]
pub fn current_tid() -> Tid {
    CURRENT.with(|c| c.borrow().as_ref().map_or(HOST_TID, |t| t.tid()))
}

pub(crate) fn set_current(thread: Arc<Thread>) {
    CURRENT.with(|c| *c.borrow_mut() = Some(thread));
}

pub(crate) fn clear_current() {
    CURRENT.with(|c| *c.borrow_mut() = None);
}
