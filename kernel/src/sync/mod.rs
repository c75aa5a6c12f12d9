//! 同步原语 (Synchronization Primitives)
//!
//! - `Semaphore`: 计数信号量，Lock 的基础
//! - `Lock`: 带持有者记录的互斥锁，不可重入
//! - `Condition`: Mesa 风格条件变量，与调用者持有的 Lock 配合使用
//!
//! 同一队列内唤醒顺序为 FIFO。阻塞操作没有超时，也不能被取消；
//! 只有 `Scheduler::terminate` 能把线程从等待队列中强制摘除。

pub mod condvar;
pub mod semaphore;

pub use condvar::Condition;
pub use semaphore::{Lock, LockGuard, Semaphore};
