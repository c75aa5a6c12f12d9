//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 条件变量 (Condition Variable) 机制
//!
//! 核心概念：
//! - 条件变量没有自己的值，只有一个 FIFO 等待队列
//! - 必须与调用者持有的锁配合使用（管程模式）
//! - wait() 原子地入队、释放锁并阻塞，被唤醒后重新获取锁
//! - signal() 唤醒一个等待者，broadcast() 唤醒全部
//!
//! 语义是 Mesa 风格：被唤醒的线程只是变为就绪，等它真正运行并重新拿到锁时，
//! 条件可能已经不成立，所以调用者必须在循环中重新检查等待条件。
//!
//! 与信号量的 V 不同，队列为空时 signal() 什么也不做，不会为之后的
//! wait() 留下 "信用"：在任何 wait() 之前发出的 signal 会丢失。

use alloc::string::String;
use alloc::sync::Arc;

use log::trace;

use super::Lock;
use crate::process::wait::WaitQueue;
use crate::sched;

/// 条件变量
///
/// # 使用示例
/// ```no_run
/// # use nachos_kernel::sync::{Condition, Lock};
/// # fn test(lock: &Lock, cond: &Condition, ready: &dyn Fn() -> bool) {
/// lock.acquire();
/// while !ready() {
///     cond.wait(lock);  // 释放锁并等待，返回前重新获取锁
/// }
/// // ... 条件已满足 ...
/// lock.release();
///
/// // 在另一个线程中：
/// lock.acquire();
/// // ... 修改条件 ...
/// cond.signal(lock);  // 或 broadcast()
/// lock.release();
/// # }
/// ```
pub struct Condition {
    name: String,
    queue: Arc<WaitQueue>,
}

impl Condition {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            queue: WaitQueue::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 等待条件
    ///
    /// # 行为
    /// 1. 关中断
    /// 2. 加入等待队列
    /// 3. 释放锁
    /// 4. 阻塞，直到被 signal/broadcast 标记为就绪
    /// 5. 重新获取锁后返回
    ///
    /// 调用者必须持有 `lock`，且必须从执行上下文中调用。
    pub fn wait(&self, lock: &Lock) {
        self.assert_held(lock, "wait");
        let current = match sched::current() {
            Some(current) => current,
            None => panic!("condition {}: the host context cannot wait", self.name),
        };

        {
            let _irq = sched::interrupts_off();
            trace!(target: "sync", "condition {}: thread {} waits", self.name, current.tid());
            self.queue.enqueue(&current);
            lock.release();
            current.scheduler().sleep();
        }
        lock.acquire();
    }

    /// 唤醒一个等待者（FIFO）
    ///
    /// 被唤醒的线程只有在被调度时才去竞争锁，没有原子的锁交接。
    /// 队列为空时什么也不做。
    pub fn signal(&self, lock: &Lock) {
        self.assert_held(lock, "signal");
        let _irq = sched::interrupts_off();
        if let Some(thread) = self.queue.wake_one() {
            trace!(target: "sync", "condition {}: signal wakes thread {}", self.name, thread.tid());
        }
    }

    /// 唤醒全部等待者
    pub fn broadcast(&self, lock: &Lock) {
        self.assert_held(lock, "broadcast");
        let _irq = sched::interrupts_off();
        let woken = self.queue.wake_all();
        trace!(target: "sync", "condition {}: broadcast wakes {} threads", self.name, woken);
    }

    /// 等待者数量
    pub fn num_waiters(&self) -> usize {
        self.queue.len()
    }

    fn assert_held(&self, lock: &Lock, op: &str) {
        if !lock.is_held_by_current_thread() {
            panic!(
                "condition {}: {} without holding lock {}",
                self.name,
                op,
                lock.name()
            );
        }
    }
}
