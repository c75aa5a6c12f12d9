//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 物理页帧与页帧分配器
//!
//! 分配器是一个位图，每个物理页帧一位。分配总是返回编号最小的空闲帧，
//! 便于测试时预测结果。所有操作都在分配器自己的锁下执行：它是被多个
//! 进程同时使用的共享对象。

use core::fmt;

use log::trace;
use spin::Mutex;

use crate::collection::Bitmap;
use crate::errno::{Errno, KResult};

pub type PhysFrameNr = usize;

/// 物理页帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysFrame {
    pub number: PhysFrameNr,
}

impl PhysFrame {
    pub const fn new(number: PhysFrameNr) -> Self {
        Self { number }
    }
}

impl fmt::Display for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.number)
    }
}

/// 位图页帧分配器
///
/// 不变量：任一时刻每个帧至多有一个持有者。
pub struct FrameAllocator {
    map: Mutex<Bitmap>,
}

impl FrameAllocator {
    pub fn new(total_frames: usize) -> Self {
        Self {
            map: Mutex::new(Bitmap::new(total_frames)),
        }
    }

    /// 分配编号最小的空闲帧
    ///
    /// 没有空闲帧时返回 `Errno::OutOfMemory`。
    pub fn allocate(&self) -> KResult<PhysFrame> {
        let number = self.map.lock().find().ok_or(Errno::OutOfMemory)?;
        trace!(target: "mm", "allocate frame {}", number);
        Ok(PhysFrame::new(number))
    }

    /// 释放帧
    ///
    /// 释放一个空闲帧属于内核编程错误，直接 panic。
    pub fn free(&self, frame: PhysFrame) {
        let mut map = self.map.lock();
        if !map.test(frame.number) {
            panic!("{} freed while not allocated", frame);
        }
        map.clear(frame.number);
        trace!(target: "mm", "free frame {}", frame.number);
    }

    /// 帧是否已分配
    pub fn is_allocated(&self, frame: PhysFrame) -> bool {
        self.map.lock().test(frame.number)
    }

    /// 空闲帧数量
    pub fn num_free(&self) -> usize {
        self.map.lock().num_clear()
    }

    /// 帧总数
    pub fn num_frames(&self) -> usize {
        self.map.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use proptest::prelude::*;

    #[test]
    fn allocates_every_frame_once_then_exhausts() {
        let frames = FrameAllocator::new(8);
        let got: BTreeSet<_> = (0..8).map(|_| frames.allocate().unwrap().number).collect();
        assert_eq!(got.len(), 8);
        assert_eq!(frames.allocate(), Err(Errno::OutOfMemory));
        assert_eq!(frames.num_free(), 0);
    }

    #[test]
    fn freed_frame_is_reused() {
        let frames = FrameAllocator::new(4);
        let a = frames.allocate().unwrap();
        let b = frames.allocate().unwrap();
        assert_eq!((a.number, b.number), (0, 1));
        frames.free(a);
        assert_eq!(frames.allocate().unwrap(), a);
        assert_eq!(frames.allocate().unwrap().number, 2);
    }

    #[test]
    #[should_panic(expected = "freed while not allocated")]
    fn double_free_panics() {
        let frames = FrameAllocator::new(2);
        let a = frames.allocate().unwrap();
        frames.free(a);
        frames.free(a);
    }

    proptest! {
        #[test]
        fn allocations_are_distinct_and_counted(
            total in 1usize..48,
            frees in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let frames = FrameAllocator::new(total);
            let mut held: alloc::vec::Vec<PhysFrame> =
                (0..total).map(|_| frames.allocate().unwrap()).collect();
            prop_assert!(frames.allocate().is_err());

            for index in frees {
                if held.is_empty() {
                    break;
                }
                let frame = held.swap_remove(index.index(held.len()));
                frames.free(frame);
                prop_assert_eq!(frames.num_free(), total - held.len());
            }

            let lowest_free = (0..total).find(|n| !held.iter().any(|f| f.number == *n));
            prop_assert_eq!(frames.allocate().ok().map(|f| f.number), lowest_free);
        }
    }
}
