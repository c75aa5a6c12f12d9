//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 信号量 (Semaphore) 与锁 (Lock)
//!
//! 核心概念：
//! - 信号量是一个非负整数加一个 FIFO 等待队列
//! - P 操作 (down): 等待值大于 0，然后减 1
//! - V 操作 (up): 值加 1，若有等待者则唤醒队首
//! - 锁是初值为 1 的信号量加上持有者记录，不可重入
//!
//! 原子性来自关中断：在 "检查值，然后要么继续、要么入队阻塞" 的过程中
//! 不会发生上下文切换。

use alloc::string::String;
use alloc::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::process::wait::WaitQueue;
use crate::sched::{self, Tid};

/// 信号量
///
/// 不变量：
/// - 值永远非负
/// - 每个阻塞的线程在等待队列中恰好出现一次
pub struct Semaphore {
    name: String,
    /// 信号量计数值
    value: Mutex<u32>,
    /// 值为 0 时，等待的线程加入此队列
    queue: Arc<WaitQueue>,
}

impl Semaphore {
    /// 创建新信号量
    ///
    /// # 示例
    /// ```
    /// use nachos_kernel::sync::Semaphore;
    ///
    /// let pool = Semaphore::new("pool", 2);
    /// assert!(pool.try_p());
    /// assert_eq!(pool.value(), 1);
    /// ```
    pub fn new(name: &str, value: u32) -> Self {
        Self {
            name: String::from(name),
            value: Mutex::new(value),
            queue: WaitQueue::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// P 操作
    ///
    /// 值为 0 时当前线程入队并阻塞；被唤醒后重新检查，因为多个被唤醒的
    /// 线程可能争抢同一个单位。
    ///
    /// 宿主上下文只能在值大于 0 时调用，否则 panic。
    pub fn p(&self) {
        let _irq = sched::interrupts_off();
        loop {
            {
                let mut value = self.value.lock();
                if *value > 0 {
                    *value -= 1;
                    return;
                }
            }

            let current = match sched::current() {
                Some(current) => current,
                None => panic!("semaphore {}: the host context cannot block", self.name),
            };
            trace!(target: "sync", "semaphore {}: thread {} blocks", self.name, current.tid());
            let _handoff = HandOff { sem: self };
            self.queue.sleep_on(&current);
        }
    }

    /// 尝试 P 操作（非阻塞）
    ///
    /// 成功返回 `true`；值为 0 时返回 `false`，不阻塞。
    pub fn try_p(&self) -> bool {
        let mut value = self.value.lock();
        if *value > 0 {
            *value -= 1;
            true
        } else {
            false
        }
    }

    /// V 操作
    ///
    /// 值加 1；若有等待者，把队首标记为就绪。
    pub fn v(&self) {
        let _irq = sched::interrupts_off();
        if let Some(thread) = self.queue.wake_one() {
            trace!(target: "sync", "semaphore {}: wakes thread {}", self.name, thread.tid());
        }
        let mut value = self.value.lock();
        *value = match value.checked_add(1) {
            Some(next) => next,
            None => panic!("semaphore {}: value overflow", self.name),
        };
    }

    /// 当前值
    ///
    /// 此值仅供参考，实际值可能在调用后改变
    pub fn value(&self) -> u32 {
        *self.value.lock()
    }

    /// 等待者数量
    pub fn num_waiters(&self) -> usize {
        self.queue.len()
    }
}

/// 被终止的等待者展开离开 `p()` 时，把 V 为它留下的单位转交给下一个等待者
struct HandOff<'a> {
    sem: &'a Semaphore,
}

impl Drop for HandOff<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() || self.sem.value() == 0 || self.sem.queue.is_empty() {
            return;
        }
        if let Some(thread) = self.sem.queue.wake_one() {
            trace!(
                target: "sync",
                "semaphore {}: unit passed on to thread {}",
                self.sem.name,
                thread.tid()
            );
        }
    }
}

/// 锁
///
/// 初值为 1 的信号量加持有者记录。
///
/// 不变量：持有者存在当且仅当信号量的值为 0 且是被持有者的 `acquire` 减掉的。
/// 锁不可重入，持有者再次 `acquire` 会死锁。
pub struct Lock {
    name: String,
    sem: Semaphore,
    owner: Mutex<Option<Tid>>,
}

impl Lock {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            sem: Semaphore::new(name, 1),
            owner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 获取锁，锁已被占用时阻塞
    pub fn acquire(&self) {
        self.sem.p();
        *self.owner.lock() = Some(sched::current_tid());
    }

    /// 释放锁
    ///
    /// 非持有者释放属于内核编程错误，直接 panic。
    pub fn release(&self) {
        let tid = sched::current_tid();
        {
            let mut owner = self.owner.lock();
            if *owner != Some(tid) {
                panic!(
                    "lock {}: released by thread {} but held by {:?}",
                    self.name, tid, *owner
                );
            }
            *owner = None;
        }
        self.sem.v();
    }

    /// 当前线程是否持有此锁
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(sched::current_tid())
    }

    /// 持有者
    pub fn owner(&self) -> Option<Tid> {
        *self.owner.lock()
    }

    /// 获取锁守护（RAII）
    ///
    /// 守护离开作用域时自动释放锁。
    ///
    /// # 示例
    /// ```
    /// use nachos_kernel::sync::Lock;
    ///
    /// let lock = Lock::new("table");
    /// {
    ///     let _guard = lock.guard();
    ///     assert!(lock.is_held_by_current_thread());
    /// }
    /// assert!(!lock.is_held_by_current_thread());
    /// ```
    pub fn guard(&self) -> LockGuard<'_> {
        self.acquire();
        LockGuard { lock: self }
    }
}

/// 锁守护（RAII）
pub struct LockGuard<'a> {
    lock: &'a Lock,
}

impl LockGuard<'_> {
    pub fn lock(&self) -> &Lock {
        self.lock
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // 在条件变量上等待时被终止的线程不持有锁，展开时不能释放
        if !std::thread::panicking() || self.lock.is_held_by_current_thread() {
            self.lock.release();
        }
    }
}
