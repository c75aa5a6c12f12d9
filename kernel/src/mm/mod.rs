//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 内存管理模块
//!
//! - `page`: 位图物理页帧分配器
//! - `addrspace`: 用户地址空间（页表 + 物理帧）

pub mod addrspace;
pub mod page;

pub use addrspace::AddrSpace;
pub use page::{FrameAllocator, PhysFrame, PhysFrameNr};
