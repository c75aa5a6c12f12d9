//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 系统调用处理
//!
//! 用户程序通过 syscall 陷入内核：
//! - r2: 系统调用号
//! - r4-r7: 参数 (最多4个)
//! - 返回值: r2，失败时为 -1
//!
//! 返回到调用者之前，分发层显式推进 PC；成功的 Exec 不返回，
//! 新映像从入口开始执行。

pub mod user;

use alloc::sync::Arc;

use log::{debug, trace, warn};

use crate::errno::{syscall_result, Errno, KResult};
use crate::fs::{File, FileDescriptor};
use crate::kernel::Kernel;
use crate::machine::{ExceptionType, ARG_REGS, BAD_VADDR_REG, PC_REG, RESULT_REG};
use crate::process::{self, Pid};
use crate::sched;

#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Join = 3,
    Create = 4,
    Open = 5,
    Read = 6,
    Write = 7,
    Close = 8,
    Fork = 9,
    Yield = 10,
    Kill = 11,
}

impl TryFrom<i32> for Syscall {
    type Error = Errno;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Syscall::Halt,
            1 => Syscall::Exit,
            2 => Syscall::Exec,
            3 => Syscall::Join,
            4 => Syscall::Create,
            5 => Syscall::Open,
            6 => Syscall::Read,
            7 => Syscall::Write,
            8 => Syscall::Close,
            9 => Syscall::Fork,
            10 => Syscall::Yield,
            11 => Syscall::Kill,
            _ => return Err(Errno::FunctionNotImplemented),
        })
    }
}

/// 用户程序陷入内核的入口
///
/// 系统调用处理后返回用户程序；其他异常终止当前进程。
pub fn exception_handler(kernel: &Arc<Kernel>, which: ExceptionType) {
    match which {
        ExceptionType::Syscall => handle_syscall(kernel),
        exception => fatal_exception(kernel, exception),
    }
}

/// 用户程序触发了无法处理的异常：以被杀死的状态结束当前进程
///
/// 内核本身继续运行。
pub fn fatal_exception(kernel: &Arc<Kernel>, exception: ExceptionType) -> ! {
    let machine = kernel.machine();
    warn!(
        target: "syscall",
        "process {:?}: {:?} at pc {} (bad vaddr {})",
        process::current_pid(),
        exception,
        machine.read_register(PC_REG),
        machine.read_register(BAD_VADDR_REG)
    );
    process::do_exit(kernel, kernel.config().killed_exit_status)
}

fn handle_syscall(kernel: &Arc<Kernel>) {
    let machine = kernel.machine();
    let code = machine.read_register(RESULT_REG);
    let args = ARG_REGS.map(|reg| machine.read_register(reg));

    let result = dispatch(kernel, code, args);

    // 阻塞期间机器寄存器已随上下文切换恢复为调用者的
    machine.write_register(RESULT_REG, result);
    machine.advance_pc();
}

/// 根据系统调用号分发
fn dispatch(kernel: &Arc<Kernel>, code: i32, args: [i32; 4]) -> i32 {
    let Ok(call) = Syscall::try_from(code) else {
        debug!(target: "syscall", "unknown syscall {}", code);
        return Errno::FunctionNotImplemented.as_syscall_return();
    };
    trace!(target: "syscall", "{:?} {:?} from {:?}", call, args, process::current_pid());

    match call {
        Syscall::Halt => sys_halt(kernel),
        Syscall::Exit => process::do_exit(kernel, args[0]),
        Syscall::Exec => syscall_result(sys_exec(kernel, args)),
        Syscall::Join => syscall_result(sys_join(kernel, args)),
        Syscall::Create => syscall_result(sys_create(kernel, args)),
        Syscall::Open => syscall_result(sys_open(kernel, args)),
        Syscall::Read => syscall_result(sys_read(kernel, args)),
        Syscall::Write => syscall_result(sys_write(kernel, args)),
        Syscall::Close => syscall_result(sys_close(kernel, args)),
        Syscall::Fork => syscall_result(sys_fork(kernel, args)),
        Syscall::Yield => {
            sched::yield_now();
            0
        }
        Syscall::Kill => syscall_result(sys_kill(kernel, args)),
    }
}

// ============================================================================
// 系统调用实现
// ============================================================================

fn sys_halt(kernel: &Arc<Kernel>) -> ! {
    debug!(target: "syscall", "halt requested by {:?}", process::current_pid());
    kernel.scheduler().halt();
    sched::exit_current()
}

fn sys_exec(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let name = user::copy_string_in(kernel.machine(), args[0], kernel.config().max_filename_len)?;
    match process::do_exec(kernel, &name)? {}
}

fn sys_join(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let pid = Pid::try_from(args[0]).map_err(|_| Errno::NoChild)?;
    process::do_join(kernel, pid)
}

fn sys_create(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let name = user::copy_string_in(kernel.machine(), args[0], kernel.config().max_filename_len)?;
    kernel.fs().create(&name)?;
    Ok(0)
}

fn sys_open(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let name = user::copy_string_in(kernel.machine(), args[0], kernel.config().max_filename_len)?;
    let file = Arc::new(File::new(kernel.fs().open(&name)?));
    let fd = with_fds(kernel, |fds| fds.install(file))?;
    debug!(target: "syscall", "open {} -> fd {}", name, fd);
    Ok(fd as i32)
}

fn sys_read(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let (addr, size) = (args[0], buffer_size(args[1])?);
    let descriptor = lookup_fd(kernel, args[2])?;
    // 先确认缓冲区可写，失败时不消耗任何输入
    if !matches!(descriptor, FileDescriptor::ConsoleOutput) {
        user::check_writable(kernel.machine(), addr, size)?;
    }
    let mut buf = alloc::vec![0u8; size];
    let count = match descriptor {
        FileDescriptor::ConsoleInput => kernel.console().read(&mut buf),
        FileDescriptor::File(file) => file.read(&mut buf),
        FileDescriptor::ConsoleOutput => return Err(Errno::BadFileNumber),
    };
    user::copy_out(kernel.machine(), addr, &buf[..count])?;
    Ok(count as i32)
}

fn sys_write(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let size = buffer_size(args[1])?;
    let descriptor = lookup_fd(kernel, args[2])?;
    let buf = user::copy_in(kernel.machine(), args[0], size)?;
    let count = match descriptor {
        FileDescriptor::ConsoleOutput => kernel.console().write(&buf),
        FileDescriptor::File(file) => file.write(&buf),
        FileDescriptor::ConsoleInput => return Err(Errno::BadFileNumber),
    };
    Ok(count as i32)
}

fn sys_close(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let fd = usize::try_from(args[0]).map_err(|_| Errno::BadFileNumber)?;
    with_fds(kernel, |fds| fds.close(fd))?;
    Ok(0)
}

fn sys_fork(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    process::do_fork(kernel, args[0]).map(|pid| pid as i32)
}

fn sys_kill(kernel: &Arc<Kernel>, args: [i32; 4]) -> KResult<i32> {
    let pid = Pid::try_from(args[0]).map_err(|_| Errno::NoSuchProcess)?;
    process::do_kill(kernel, pid)?;
    Ok(0)
}

// ============================================================================
// 辅助函数
// ============================================================================

fn buffer_size(size: i32) -> KResult<usize> {
    usize::try_from(size).map_err(|_| Errno::InvalidArgument)
}

/// 在持有进程表锁的情况下访问当前进程的文件描述符表
fn with_fds<R>(kernel: &Arc<Kernel>, f: impl FnOnce(&mut crate::fs::FdTable) -> KResult<R>) -> KResult<R> {
    let (_, pid) = process::current_process();
    let processes = kernel.processes();
    let _guard = processes.lock().guard();
    processes.with_table(|table| match table.get_mut(pid) {
        Some(pcb) => f(&mut pcb.fds),
        None => panic!("running process {} is not registered", pid),
    })
}

fn lookup_fd(kernel: &Arc<Kernel>, fd: i32) -> KResult<FileDescriptor> {
    let fd = usize::try_from(fd).map_err(|_| Errno::BadFileNumber)?;
    with_fds(kernel, |fds| fds.get(fd))
}
