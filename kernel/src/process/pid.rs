//! PID 管理
//!
//! 遵循 Linux 内核 kernel/pid.c 的位图分配方式：
//! - PID 从 0 开始编号，总是分配编号最小的空闲 PID
//! - 进程被回收 (reap) 时才释放 PID，之后可以被复用
//! - 容量为 `max_processes`，耗尽时返回 `Errno::TryAgain`
//!
//! 分配器本身不加锁，由进程管理器的锁保护。

use log::trace;

use super::Pid;
use crate::collection::Bitmap;
use crate::errno::{Errno, KResult};

/// PID 位图分配器
#[derive(Debug)]
pub struct PidAllocator {
    map: Bitmap,
}

impl PidAllocator {
    pub fn new(max_processes: usize) -> Self {
        Self {
            map: Bitmap::new(max_processes),
        }
    }

    /// 分配一个新的 PID
    ///
    /// 对应 Linux 内核的 alloc_pid()
    pub fn alloc(&mut self) -> KResult<Pid> {
        let pid = self.map.find().ok_or(Errno::TryAgain)? as Pid;
        trace!(target: "proc", "alloc pid {}", pid);
        Ok(pid)
    }

    /// 释放 PID
    ///
    /// 对应 Linux 内核的 free_pid()。释放未分配的 PID 属于内核错误。
    pub fn free(&mut self, pid: Pid) {
        let index = pid as usize;
        if index >= self.map.len() || !self.map.test(index) {
            panic!("pid {} freed while not allocated", pid);
        }
        self.map.clear(index);
        trace!(target: "proc", "free pid {}", pid);
    }

    pub fn is_allocated(&self, pid: Pid) -> bool {
        let index = pid as usize;
        index < self.map.len() && self.map.test(index)
    }

    /// 空闲 PID 数量
    pub fn num_free(&self) -> usize {
        self.map.num_clear()
    }
}
