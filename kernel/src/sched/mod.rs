//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 调度器模块
//!
//! 核心只依赖调度器的四个能力：
//! - 创建绑定入口函数的执行上下文 (`Scheduler::fork`)
//! - 主动让出 CPU (`yield_now`)
//! - 阻塞当前上下文 (`Scheduler::sleep`)
//! - 把另一个上下文标记为就绪 (`Scheduler::ready_to_run`)

pub mod sched;
pub mod switch;
pub mod thread;

use alloc::boxed::Box;
use alloc::sync::Arc;
use std::panic;

pub use sched::{RunOutcome, Scheduler};
pub use thread::{current, current_tid, Thread, ThreadExit, ThreadState, Tid, HOST_TID};

use crate::machine::InterruptGuard;

/// 当前线程让出 CPU；宿主上下文调用时什么也不做
pub fn yield_now() {
    if let Some(thread) = current() {
        thread.scheduler().yield_now();
    }
}

/// 结束当前线程，不再返回
///
/// 展开到线程入口后由调度器完成收尾并切换到下一个线程。
pub fn exit_current() -> ! {
    assert!(current().is_some(), "the host context cannot exit");
    panic::resume_unwind(Box::new(ThreadExit))
}

/// 关闭当前调度器的中断；宿主上下文返回 `None`
///
/// 宿主只在没有任何上下文运行时执行，不需要关中断。
pub fn interrupts_off() -> Option<InterruptGuard> {
    current().map(|thread| thread.scheduler().interrupt().disable())
}

/// 当前线程所属的调度器
pub fn current_scheduler() -> Option<Arc<Scheduler>> {
    current().map(|thread| thread.scheduler())
}
