//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 内核错误代码定义
//!
//! 错误代码沿用 errno 的编号，但对用户程序只暴露一个返回值：
//! 任何失败的系统调用都在结果寄存器中写入 `-1`。
//!
//! 错误分为两类（见 [`ErrorKind`]）：
//! - 资源耗尽：没有空闲物理页、没有空闲 PID、文件表已满
//! - 无效句柄：未知 PID、未知 fd、不是调用者的子进程、错误的用户地址
//!
//! 第三类错误（协议误用，例如非持有者释放锁）不是 `Errno`，
//! 而是直接 `panic!` 停机。

use core::fmt;

/// 系统调用失败时写回用户寄存器的值
pub const SYSCALL_FAILURE: i32 = -1;

/// 内核内部操作的结果类型
pub type KResult<T> = Result<T, Errno>;

/// 错误代码
///
/// 使用方法：
/// ```
/// use nachos_kernel::errno::{Errno, ErrorKind};
///
/// let err = Errno::OutOfMemory;
/// assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
/// assert_eq!(err.as_syscall_return(), -1);
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    /// No such file or directory (ENOENT, 2)
    NoSuchFileOrDirectory = 2,

    /// No such process (ESRCH, 3)
    NoSuchProcess = 3,

    /// Exec format error (ENOEXEC, 8)
    ExecFormatError = 8,

    /// Bad file number (EBADF, 9)
    BadFileNumber = 9,

    /// No child process (ECHILD, 10)
    NoChild = 10,

    /// Try again (EAGAIN, 11)
    TryAgain = 11,

    /// Out of memory (ENOMEM, 12)
    OutOfMemory = 12,

    /// Bad address (EFAULT, 14)
    BadAddress = 14,

    /// Invalid argument (EINVAL, 22)
    InvalidArgument = 22,

    /// Too many open files (EMFILE, 24)
    TooManyOpenFiles = 24,

    /// File name too long (ENAMETOOLONG, 36)
    NameTooLong = 36,

    /// Function not implemented (ENOSYS, 38)
    FunctionNotImplemented = 38,
}

/// 错误分类
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// 资源耗尽：物理页、PID、文件描述符
    ResourceExhausted,
    /// 无效句柄或参数：未知 PID/fd、非子进程、错误的用户地址、无法加载的程序
    InvalidHandle,
}

impl Errno {
    /// 获取错误代码的正数值
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 错误所属的类别
    pub const fn kind(self) -> ErrorKind {
        match self {
            Errno::OutOfMemory | Errno::TryAgain | Errno::TooManyOpenFiles => {
                ErrorKind::ResourceExhausted
            }
            _ => ErrorKind::InvalidHandle,
        }
    }

    /// 写回用户结果寄存器的值
    ///
    /// 两类错误对用户程序都表现为 `-1`。
    #[inline]
    pub const fn as_syscall_return(self) -> i32 {
        SYSCALL_FAILURE
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Errno::NoSuchFileOrDirectory => "no such file or directory",
            Errno::NoSuchProcess => "no such process",
            Errno::ExecFormatError => "exec format error",
            Errno::BadFileNumber => "bad file number",
            Errno::NoChild => "no child process",
            Errno::TryAgain => "try again",
            Errno::OutOfMemory => "out of memory",
            Errno::BadAddress => "bad address",
            Errno::InvalidArgument => "invalid argument",
            Errno::TooManyOpenFiles => "too many open files",
            Errno::NameTooLong => "file name too long",
            Errno::FunctionNotImplemented => "function not implemented",
        };
        write!(f, "{} (errno {})", text, self.as_i32())
    }
}

/// 把内核结果转换为系统调用返回值
///
/// 成功时返回 `value`，失败时返回 `-1`。
pub fn syscall_result(result: KResult<i32>) -> i32 {
    match result {
        Ok(value) => value,
        Err(err) => err.as_syscall_return(),
    }
}
