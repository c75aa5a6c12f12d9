//! Nachos 教学操作系统内核
//!
//! 内核核心：同步原语、协作式调度器的阻塞/唤醒接口、每进程的地址空间，
//! 以及进程生命周期（创建、fork、exec、exit、join、kill）。
//!
//! 内核运行在宿主上：每个执行上下文由一个宿主线程承载，任一时刻只有一个
//! 上下文持有模拟 CPU。用户程序由 [`machine::Cpu`] 的实现执行。
//!
//! ```no_run
//! use std::sync::Arc;
//! use nachos_kernel::fs::{noff::NoffBuilder, MemFileSystem};
//! use nachos_kernel::kernel::{Kernel, KernelConfig};
//! use nachos_kernel::machine::NativeCpu;
//!
//! let fs = Arc::new(MemFileSystem::new());
//! fs.install("hello", &NoffBuilder::new().code_words(&[1]).build());
//! let cpu = Arc::new(NativeCpu::new());
//! cpu.register(1, |ctx| {
//!     ctx.write(b"hello\n", 1);
//! });
//!
//! let kernel = Kernel::new(KernelConfig::default(), fs, cpu);
//! kernel.spawn("hello").unwrap();
//! kernel.run();
//! kernel.shutdown();
//! ```

extern crate alloc;

pub mod collection;
pub mod config;
pub mod console;
pub mod errno;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod machine;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use kernel::{Kernel, KernelConfig};
