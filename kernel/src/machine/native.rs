//! 宿主原生 CPU
//!
//! 用户程序的每个 4 字节代码字是一个例程编号，`NativeCpu` 从 PC 取出
//! 代码字，执行注册的 Rust 例程。例程通过 [`UserContext`] 发起系统调用，
//! 过程与编译后的用户代码执行 syscall 指令陷入内核相同：
//! 调用号写入 r2，参数写入 r4..r7，结果从 r2 读回。
//!
//! 例程返回表示用户程序执行完毕。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::trace;
use spin::Mutex;

use super::{Cpu, ExceptionType, Machine, ARG_REGS, PC_REG, RESULT_REG, STACK_REG};
use crate::kernel::Kernel;
use crate::syscall::{self, Syscall};

/// 用户例程
pub type Routine = Arc<dyn Fn(&mut UserContext<'_>) + Send + Sync>;

/// 系统调用参数在栈顶下方使用的暂存区大小
const SCRATCH_GAP: i32 = 128;

/// 以注册的 Rust 例程代替指令执行的 CPU
#[derive(Default)]
pub struct NativeCpu {
    routines: Mutex<BTreeMap<u32, Routine>>,
}

impl NativeCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册代码字 `id` 对应的例程
    pub fn register<F>(&self, id: u32, routine: F)
    where
        F: Fn(&mut UserContext<'_>) + Send + Sync + 'static,
    {
        self.routines.lock().insert(id, Arc::new(routine));
    }

    fn routine(&self, id: u32) -> Option<Routine> {
        self.routines.lock().get(&id).cloned()
    }
}

impl Cpu for NativeCpu {
    fn run(&self, kernel: &Arc<Kernel>) {
        let machine = kernel.machine();
        let pc = machine.read_register(PC_REG);
        let word = match machine.read_mem(pc, 4) {
            Ok(word) => word as u32,
            Err(exception) => syscall::fatal_exception(kernel, exception),
        };
        let Some(routine) = self.routine(word) else {
            trace!(target: "machine", "no routine for code word {:#x} at pc {}", word, pc);
            syscall::fatal_exception(kernel, ExceptionType::IllegalInstr);
        };
        trace!(target: "machine", "pc {}: routine {}", pc, word);
        routine(&mut UserContext { kernel });
    }
}

/// 用户例程看到的机器视图
pub struct UserContext<'a> {
    kernel: &'a Arc<Kernel>,
}

impl<'a> UserContext<'a> {
    pub fn kernel(&self) -> &'a Arc<Kernel> {
        self.kernel
    }

    fn machine(&self) -> &Arc<Machine> {
        self.kernel.machine()
    }

    pub fn read_register(&self, reg: usize) -> i32 {
        self.machine().read_register(reg)
    }

    pub fn write_register(&self, reg: usize, value: i32) {
        self.machine().write_register(reg, value);
    }

    /// 执行 syscall 指令
    pub fn syscall(&mut self, code: i32, args: [i32; 4]) -> i32 {
        let machine = self.machine();
        machine.write_register(RESULT_REG, code);
        for (reg, arg) in ARG_REGS.iter().zip(args) {
            machine.write_register(*reg, arg);
        }
        syscall::exception_handler(self.kernel, ExceptionType::Syscall);
        self.machine().read_register(RESULT_REG)
    }

    /// 读用户内存中的一个字，地址错误时进程被终止
    pub fn load_word(&self, vaddr: i32) -> i32 {
        self.load(vaddr, 4)
    }

    pub fn store_word(&self, vaddr: i32, value: i32) {
        self.store(vaddr, 4, value);
    }

    pub fn load_byte(&self, vaddr: i32) -> u8 {
        self.load(vaddr, 1) as u8
    }

    pub fn store_byte(&self, vaddr: i32, value: u8) {
        self.store(vaddr, 1, value as i32);
    }

    pub fn store_bytes(&self, vaddr: i32, bytes: &[u8]) {
        for (addr, byte) in (vaddr..).zip(bytes) {
            self.store_byte(addr, *byte);
        }
    }

    pub fn load_bytes(&self, vaddr: i32, len: usize) -> Vec<u8> {
        (vaddr..).take(len).map(|addr| self.load_byte(addr)).collect()
    }

    fn load(&self, vaddr: i32, size: usize) -> i32 {
        match self.machine().read_mem(vaddr, size) {
            Ok(value) => value,
            Err(exception) => syscall::fatal_exception(self.kernel, exception),
        }
    }

    fn store(&self, vaddr: i32, size: usize, value: i32) {
        if let Err(exception) = self.machine().write_mem(vaddr, size, value) {
            syscall::fatal_exception(self.kernel, exception);
        }
    }

    /// 栈顶下方可容纳 `len` 字节的暂存地址，字对齐
    pub fn scratch(&self, len: usize) -> i32 {
        (self.read_register(STACK_REG) - SCRATCH_GAP - len as i32) & !3
    }

    /// 把以 0 结尾的字符串放进暂存区，返回其地址
    fn push_str(&self, s: &str) -> i32 {
        let addr = self.scratch(s.len() + 1);
        self.store_bytes(addr, s.as_bytes());
        self.store_byte(addr + s.len() as i32, 0);
        addr
    }

    pub fn halt(&mut self) -> ! {
        self.syscall(Syscall::Halt as i32, [0; 4]);
        unreachable!("Halt returned to user code");
    }

    pub fn exit(&mut self, status: i32) -> ! {
        self.syscall(Syscall::Exit as i32, [status, 0, 0, 0]);
        unreachable!("Exit returned to user code");
    }

    /// 成功时不返回：新映像从入口开始执行
    pub fn exec(&mut self, name: &str) -> i32 {
        let addr = self.push_str(name);
        self.syscall(Syscall::Exec as i32, [addr, 0, 0, 0])
    }

    pub fn join(&mut self, pid: i32) -> i32 {
        self.syscall(Syscall::Join as i32, [pid, 0, 0, 0])
    }

    pub fn create(&mut self, name: &str) -> i32 {
        let addr = self.push_str(name);
        self.syscall(Syscall::Create as i32, [addr, 0, 0, 0])
    }

    pub fn open(&mut self, name: &str) -> i32 {
        let addr = self.push_str(name);
        self.syscall(Syscall::Open as i32, [addr, 0, 0, 0])
    }

    /// 读入 `buf`，返回读到的字节数或 -1
    pub fn read(&mut self, buf: &mut [u8], fd: i32) -> i32 {
        let addr = self.scratch(buf.len());
        let count = self.syscall(Syscall::Read as i32, [addr, buf.len() as i32, fd, 0]);
        if count > 0 {
            let bytes = self.load_bytes(addr, count as usize);
            buf[..bytes.len()].copy_from_slice(&bytes);
        }
        count
    }

    pub fn write(&mut self, buf: &[u8], fd: i32) -> i32 {
        let addr = self.scratch(buf.len());
        self.store_bytes(addr, buf);
        self.syscall(Syscall::Write as i32, [addr, buf.len() as i32, fd, 0])
    }

    pub fn close(&mut self, fd: i32) -> i32 {
        self.syscall(Syscall::Close as i32, [fd, 0, 0, 0])
    }

    /// 子进程从虚拟地址 `entry` 处的代码字开始执行
    pub fn fork(&mut self, entry: i32) -> i32 {
        self.syscall(Syscall::Fork as i32, [entry, 0, 0, 0])
    }

    pub fn yield_now(&mut self) {
        self.syscall(Syscall::Yield as i32, [0; 4]);
    }

    pub fn kill(&mut self, pid: i32) -> i32 {
        self.syscall(Syscall::Kill as i32, [pid, 0, 0, 0])
    }
}
