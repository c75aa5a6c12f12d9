//! Nachos 内核配置（自动生成）
//!
//! 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 内核名称
pub const KERNEL_NAME: &str = "nachos-kernel";

/// 内核版本
pub const KERNEL_VERSION: &str = "0.1.0";

// ============================================================
// 内存配置
// ============================================================

/// 页大小（字节）
pub const PAGE_SIZE: usize = 128;

/// 物理页帧数量
pub const NUM_PHYS_PAGES: usize = 32;

/// 用户栈大小（字节）
pub const USER_STACK_SIZE: usize = 1024;

/// 栈顶预留字节数
pub const STACK_MARGIN: usize = 16;

// ============================================================
// 进程配置
// ============================================================

/// 最大进程数（PID 位图大小）
pub const MAX_PROCESSES: usize = 128;

/// 每个进程最多打开的文件数
pub const MAX_OPEN_FILES: usize = 20;

/// 被 Kill 的进程的退出状态
pub const KILLED_EXIT_STATUS: i32 = 137;

/// 用户文件名最大长度
pub const MAX_FILENAME_LEN: usize = 255;

// ============================================================
// 调试配置
// ============================================================

/// 默认日志级别
pub const LOG_LEVEL: &str = "warn";
