//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 调度器实现
//!
//! 单核协作式 FIFO 调度器。切换只发生在显式的挂起点：
//! - `yield_now()`: 当前线程回到就绪队列尾部
//! - `sleep()`: 当前线程阻塞（必须先关中断，并已加入某个等待队列）
//! - 线程结束
//!
//! 宿主线程通过 `run()` 驱动调度器：它把 CPU 交给就绪队列头部的线程，
//! 然后等待，直到就绪队列为空或内核停机。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use log::{debug, error, trace, warn};
use spin::Mutex;

use super::switch::Baton;
use super::thread::{self, Thread, ThreadExit, ThreadState, Tid, HOST_TID};
use crate::errno::{Errno, KResult};
use crate::machine::{IntStatus, Interrupt, Machine};

/// `run()` 返回时调度器的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 某个上下文执行了 Halt
    Halted,
    /// 就绪队列已空，`blocked` 个线程仍处于阻塞状态
    Idle { blocked: usize },
}

struct RunQueue {
    /// 就绪队列（FIFO）
    ready: VecDeque<Arc<Thread>>,
    /// 持有 CPU 的线程
    current: Option<Arc<Thread>>,
    /// 所有尚未结束的线程
    threads: BTreeMap<Tid, Arc<Thread>>,
    /// 宿主线程句柄；线程结束后由 `reap_finished` 回收
    handles: BTreeMap<Tid, JoinHandle<()>>,
    halted: bool,
    /// 上下文中发生的内核 panic，由 `run()` 在宿主上重新抛出
    fault: Option<Box<dyn Any + Send>>,
}

/// 调度器
pub struct Scheduler {
    rq: Mutex<RunQueue>,
    interrupt: Arc<Interrupt>,
    host: Baton,
    machine: Arc<Machine>,
    next_tid: AtomicU32,
}

impl Scheduler {
    pub fn new(machine: Arc<Machine>) -> Arc<Self> {
        Arc::new(Self {
            rq: Mutex::new(RunQueue {
                ready: VecDeque::new(),
                current: None,
                threads: BTreeMap::new(),
                handles: BTreeMap::new(),
                halted: false,
                fault: None,
            }),
            interrupt: Arc::new(Interrupt::new()),
            host: Baton::new(),
            machine,
            next_tid: AtomicU32::new(HOST_TID + 1),
        })
    }

    pub fn interrupt(&self) -> &Arc<Interrupt> {
        &self.interrupt
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// 创建线程控制块，尚未绑定入口函数
    pub fn create_thread(self: &Arc<Self>, name: &str) -> Arc<Thread> {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        Arc::new(Thread::new(tid, name, Arc::downgrade(self)))
    }

    /// 为 `thread` 绑定入口函数并放入就绪队列
    ///
    /// 入口函数返回、或以 [`ThreadExit`] 展开时，线程正常结束。
    /// 其他 panic 视为内核错误：内核停机，`run()` 在宿主上重新抛出。
    pub fn fork<F>(self: &Arc<Self>, thread: &Arc<Thread>, entry: F) -> KResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.reap_finished();
        let sched = Arc::clone(self);
        let me = Arc::clone(thread);
        let handle = std::thread::Builder::new()
            .name(String::from(thread.name()))
            .spawn(move || sched.thread_root(me, entry))
            .map_err(|err| {
                warn!(target: "sched", "cannot create host thread for {}: {}", thread.name(), err);
                Errno::TryAgain
            })?;

        debug!(target: "sched", "fork thread {} ({})", thread.tid(), thread.name());
        thread.set_state(ThreadState::Ready);
        let mut rq = self.rq.lock();
        rq.handles.insert(thread.tid(), handle);
        rq.threads.insert(thread.tid(), Arc::clone(thread));
        rq.ready.push_back(Arc::clone(thread));
        Ok(())
    }

    /// 创建并启动一个内核线程
    pub fn spawn<F>(self: &Arc<Self>, name: &str, entry: F) -> KResult<Arc<Thread>>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = self.create_thread(name);
        self.fork(&thread, entry)?;
        Ok(thread)
    }

    fn thread_root<F: FnOnce()>(self: Arc<Self>, thread: Arc<Thread>, entry: F) {
        thread::set_current(Arc::clone(&thread));
        thread.baton.wait();

        let outcome = if self.is_halted() || thread.is_killed() {
            Ok(())
        } else {
            self.interrupt.set_level(IntStatus::IntOn);
            self.restore_context(&thread);
            panic::catch_unwind(AssertUnwindSafe(entry))
        };

        self.finish(&thread, outcome);
        thread::clear_current();
    }

    fn finish(&self, thread: &Arc<Thread>, outcome: std::thread::Result<()>) {
        if let Err(payload) = outcome {
            if !payload.is::<ThreadExit>() {
                error!(target: "sched", "thread {} ({}) panicked, halting", thread.tid(), thread.name());
                let mut rq = self.rq.lock();
                rq.halted = true;
                if rq.fault.is_none() {
                    rq.fault = Some(payload);
                }
            }
        }

        trace!(target: "sched", "thread {} finished", thread.tid());
        thread.set_state(ThreadState::Finished);
        thread.set_blocked_on(None);
        // 地址空间随线程一起销毁，物理页归还分配器
        let space = thread.space.lock().take();
        drop(space);

        let holds_cpu = {
            let mut rq = self.rq.lock();
            rq.threads.remove(&thread.tid());
            let holds = rq
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, thread));
            if holds {
                rq.current = None;
            }
            holds
        };
        if holds_cpu {
            self.dispatch_next();
        }
    }

    /// 把线程标记为就绪并放入就绪队列尾部
    ///
    /// "就绪" 只表示可被调度，不表示立即运行。
    pub fn ready_to_run(&self, thread: &Arc<Thread>) {
        match thread.state() {
            ThreadState::Finished | ThreadState::Ready => return,
            _ => {}
        }
        trace!(target: "sched", "ready thread {}", thread.tid());
        thread.set_state(ThreadState::Ready);
        self.rq.lock().ready.push_back(Arc::clone(thread));
    }

    /// 当前线程让出 CPU
    ///
    /// 宿主上下文调用时什么也不做。
    pub fn yield_now(&self) {
        let Some(current) = thread::current() else {
            return;
        };
        let _irq = self.interrupt.disable();
        current.set_state(ThreadState::Ready);
        self.rq.lock().ready.push_back(Arc::clone(&current));
        self.switch_from(&current);
    }

    /// 阻塞当前线程，直到其他上下文调用 `ready_to_run`
    ///
    /// 调用者必须已关中断，并已把当前线程放入某个等待队列。
    pub fn sleep(&self) {
        assert_eq!(
            self.interrupt.level(),
            IntStatus::IntOff,
            "Scheduler::sleep called with interrupts enabled"
        );
        let current = match thread::current() {
            Some(current) => current,
            None => panic!("the host context cannot block"),
        };
        current.set_state(ThreadState::Blocked);
        self.switch_from(&current);
    }

    /// 强制终止线程
    ///
    /// 若线程阻塞在等待队列上，先把它从队列中摘除再放入就绪队列；
    /// 线程在下一次恢复运行时展开栈并结束，不会再从阻塞点返回。
    pub fn terminate(&self, thread: &Arc<Thread>) {
        debug!(target: "sched", "terminate thread {} ({})", thread.tid(), thread.name());
        thread.set_killed();
        if let Some(queue) = thread.take_blocked_on() {
            queue.remove(thread.tid());
        }
        if thread.state() == ThreadState::Blocked {
            self.ready_to_run(thread);
        }
    }

    /// 停机：不再调度任何线程
    ///
    /// 上下文调用后应以 [`ThreadExit`] 展开（见 [`super::exit_current`]）。
    pub fn halt(&self) {
        debug!(target: "sched", "halt requested");
        self.rq.lock().halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.rq.lock().halted
    }

    /// 尚未结束的线程数量
    pub fn num_threads(&self) -> usize {
        self.rq.lock().threads.len()
    }

    /// 就绪队列长度
    pub fn num_ready(&self) -> usize {
        self.rq.lock().ready.len()
    }

    /// 从宿主上下文运行，直到就绪队列为空或内核停机
    ///
    /// 上下文中发生的内核 panic 会在这里重新抛出。
    pub fn run(&self) -> RunOutcome {
        assert!(
            thread::current().is_none(),
            "Scheduler::run must be called from the host context"
        );

        let next = {
            let mut rq = self.rq.lock();
            if rq.halted {
                None
            } else {
                rq.ready.pop_front()
            }
        };
        if let Some(next) = next {
            self.dispatch(next);
            self.host.wait();
        }
        self.reap_finished();

        let mut rq = self.rq.lock();
        if let Some(payload) = rq.fault.take() {
            drop(rq);
            panic::resume_unwind(payload);
        }
        if rq.halted {
            RunOutcome::Halted
        } else {
            RunOutcome::Idle {
                blocked: rq.threads.len(),
            }
        }
    }

    /// 停机并回收所有剩余线程
    ///
    /// 阻塞或就绪的线程被唤醒后立即展开结束，其地址空间随之释放。
    pub fn shutdown(&self) {
        let (threads, handles) = {
            let mut rq = self.rq.lock();
            rq.halted = true;
            rq.ready.clear();
            rq.current = None;
            let threads: Vec<_> = rq.threads.values().cloned().collect();
            (threads, mem::take(&mut rq.handles))
        };
        debug!(target: "sched", "shutdown: cancelling {} threads", threads.len());
        for thread in &threads {
            thread.set_killed();
            thread.baton.grant();
        }
        for handle in handles.into_values() {
            let _ = handle.join();
        }
    }

    /// 回收已结束线程的宿主线程
    ///
    /// 线程在 `finish` 中离开 `threads` 后只剩下返回，`join` 不会长时间阻塞。
    fn reap_finished(&self) {
        let finished: Vec<JoinHandle<()>> = {
            let mut rq = self.rq.lock();
            let rq = &mut *rq;
            let done: Vec<Tid> = rq
                .handles
                .keys()
                .filter(|tid| !rq.threads.contains_key(tid))
                .copied()
                .collect();
            done.iter().filter_map(|tid| rq.handles.remove(tid)).collect()
        };
        if !finished.is_empty() {
            trace!(target: "sched", "reaping {} host threads", finished.len());
        }
        for handle in finished {
            let _ = handle.join();
        }
    }

    fn dispatch(&self, next: Arc<Thread>) {
        trace!(target: "sched", "switch to thread {} ({})", next.tid(), next.name());
        next.set_state(ThreadState::Running);
        self.rq.lock().current = Some(Arc::clone(&next));
        next.baton.grant();
    }

    /// 结束的线程把 CPU 交给下一个就绪线程，没有则交还宿主
    fn dispatch_next(&self) {
        let next = {
            let mut rq = self.rq.lock();
            if rq.halted {
                None
            } else {
                rq.ready.pop_front()
            }
        };
        match next {
            Some(next) => self.dispatch(next),
            None => self.host.grant(),
        }
    }

    /// 对应 `schedule()` + `context_switch()`
    fn switch_from(&self, current: &Arc<Thread>) {
        self.save_context(current);

        let next = {
            let mut rq = self.rq.lock();
            let next = rq.ready.pop_front();
            if next.is_none() {
                rq.current = None;
            }
            next
        };

        match next {
            Some(next) if Arc::ptr_eq(&next, current) => {
                current.set_state(ThreadState::Running);
            }
            Some(next) => {
                self.dispatch(next);
                current.baton.wait();
                // 中断级别是全局的；挂起点都在关中断区内，恢复运行时重新关闭
                self.interrupt.set_level(IntStatus::IntOff);
            }
            None => {
                self.host.grant();
                current.baton.wait();
                self.interrupt.set_level(IntStatus::IntOff);
            }
        }

        if self.is_halted() || current.is_killed() {
            panic::resume_unwind(Box::new(ThreadExit));
        }
        self.restore_context(current);
    }

    /// 保存用户寄存器和地址空间状态
    fn save_context(&self, thread: &Thread) {
        if thread.has_space() {
            thread.set_user_registers(self.machine.registers());
            thread.with_space(|space| space.save_state());
        }
    }

    /// 恢复用户寄存器并安装地址空间的页表
    fn restore_context(&self, thread: &Thread) {
        if thread.has_space() {
            self.machine.set_registers(&thread.user_registers());
            thread.with_space(|space| space.restore_state());
        }
    }
}
