//! 等待队列 (Wait Queue) 机制
//!
//! 信号量、锁和条件变量的等待者都放在等待队列里：
//! - 线程需要等待时，加入等待队列并调用 `Scheduler::sleep()`
//! - 条件满足时，通过 `wake_one()` / `wake_all()` 按 FIFO 顺序唤醒
//! - `remove()` 可以摘除队列中任意位置的线程，`Kill` 依赖这一点
//!
//! "唤醒" 只是把线程标记为就绪，不代表它下一个运行，也不代表它获得了资源。

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::sched::{Thread, Tid};

/// 等待队列
///
/// 每个阻塞的线程在队列中恰好出现一次。
#[derive(Debug, Default)]
pub struct WaitQueue {
    list: Mutex<VecDeque<Arc<Thread>>>,
}

impl WaitQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 把线程加入队列尾部，并记录它阻塞在本队列上
    ///
    /// 调用者随后应在关中断的情况下调用 `Scheduler::sleep()`。
    pub fn enqueue(self: &Arc<Self>, thread: &Arc<Thread>) {
        let mut list = self.list.lock();
        assert!(
            !list.iter().any(|t| t.tid() == thread.tid()),
            "thread {} is already waiting on this queue",
            thread.tid()
        );
        list.push_back(Arc::clone(thread));
        drop(list);
        thread.set_blocked_on(Some(Arc::downgrade(self)));
    }

    /// 加入队列并阻塞当前线程
    ///
    /// 调用者必须已关中断。
    pub fn sleep_on(self: &Arc<Self>, current: &Arc<Thread>) {
        self.enqueue(current);
        current.scheduler().sleep();
    }

    /// 唤醒队列头部的线程
    ///
    /// 返回被唤醒的线程；队列为空时返回 `None`，不留下任何 "信用"。
    pub fn wake_one(&self) -> Option<Arc<Thread>> {
        let thread = self.list.lock().pop_front()?;
        trace!(target: "sync", "wake thread {}", thread.tid());
        thread.set_blocked_on(None);
        thread.scheduler().ready_to_run(&thread);
        Some(thread)
    }

    /// 唤醒所有等待的线程，返回唤醒的数量
    pub fn wake_all(&self) -> usize {
        let mut woken = 0;
        while self.wake_one().is_some() {
            woken += 1;
        }
        woken
    }

    /// 从队列中任意位置摘除线程
    ///
    /// 对应 Linux 的 remove_wait_queue()
    pub fn remove(&self, tid: Tid) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|thread| thread.tid() != tid);
        before != list.len()
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// 线程是否在队列中
    pub fn contains(&self, tid: Tid) -> bool {
        self.list.lock().iter().any(|thread| thread.tid() == tid)
    }
}
