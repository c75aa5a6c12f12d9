//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 内核实例
//!
//! 把各个子系统装配在一起：
//! 1. 机器（寄存器 + 物理内存）
//! 2. 物理页帧分配器
//! 3. 调度器
//! 4. 进程管理器
//! 5. 控制台和文件系统
//!
//! 宿主通过 `spawn()` 创建第一个用户进程，然后用 `run()` 驱动调度器。
//! 测试结束时调用 `shutdown()` 回收所有执行上下文。

use alloc::sync::Arc;
use std::panic::{self, AssertUnwindSafe};

use log::info;

use crate::config;
use crate::console::Console;
use crate::errno::KResult;
use crate::fs::{self, FileSystem};
use crate::logger;
use crate::machine::{Cpu, Machine};
use crate::mm::{AddrSpace, FrameAllocator};
use crate::process::{self, ImageReplaced, Pid, ProcessManager};
use crate::sched::{RunOutcome, Scheduler};

/// 运行时配置，默认值来自 Kernel.toml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub page_size: usize,
    pub num_phys_pages: usize,
    pub user_stack_size: usize,
    pub stack_margin: usize,
    pub max_processes: usize,
    pub max_open_files: usize,
    pub killed_exit_status: i32,
    pub max_filename_len: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            page_size: config::PAGE_SIZE,
            num_phys_pages: config::NUM_PHYS_PAGES,
            user_stack_size: config::USER_STACK_SIZE,
            stack_margin: config::STACK_MARGIN,
            max_processes: config::MAX_PROCESSES,
            max_open_files: config::MAX_OPEN_FILES,
            killed_exit_status: config::KILLED_EXIT_STATUS,
            max_filename_len: config::MAX_FILENAME_LEN,
        }
    }
}

/// 内核
pub struct Kernel {
    config: KernelConfig,
    machine: Arc<Machine>,
    frames: Arc<FrameAllocator>,
    scheduler: Arc<Scheduler>,
    processes: ProcessManager,
    console: Console,
    fs: Arc<dyn FileSystem>,
    cpu: Arc<dyn Cpu>,
}

impl Kernel {
    pub fn new(config: KernelConfig, fs: Arc<dyn FileSystem>, cpu: Arc<dyn Cpu>) -> Arc<Self> {
        logger::init();

        let machine = Arc::new(Machine::new(config.page_size, config.num_phys_pages));
        let frames = Arc::new(FrameAllocator::new(config.num_phys_pages));
        let scheduler = Scheduler::new(Arc::clone(&machine));
        let processes = ProcessManager::new(config.max_processes, config.max_open_files);
        info!(
            target: "kernel",
            "{} {}: {} frames of {} bytes, {} pids",
            config::KERNEL_NAME,
            config::KERNEL_VERSION,
            config.num_phys_pages,
            config.page_size,
            config.max_processes
        );

        Arc::new(Self {
            config,
            machine,
            frames,
            scheduler,
            processes,
            console: Console::new(),
            fs,
            cpu,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// 从程序 `program` 创建一个没有父进程的用户进程
    ///
    /// 进程放入就绪队列，在下一次 `run()` 时开始执行。
    pub fn spawn(self: &Arc<Self>, program: &str) -> KResult<Pid> {
        let file = self.fs.open(program)?;
        let image = fs::read_all(&*file);
        let space = AddrSpace::load(&image, &self.frames, &self.machine, &self.config)?;
        let pid = self.processes.create_process(self, program, space)?;
        info!(target: "kernel", "spawned {} as process {}", program, pid);
        Ok(pid)
    }

    /// 运行调度器，直到所有上下文阻塞或结束，或者某个进程执行了 Halt
    pub fn run(&self) -> RunOutcome {
        self.scheduler.run()
    }

    pub fn halt(&self) {
        self.scheduler.halt();
    }

    /// 停机并回收所有执行上下文及其地址空间
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// 用户进程执行上下文的入口
    ///
    /// 用户代码正常结束视为 `Exit(0)`；成功的 Exec 展开到这里后从新映像的
    /// 入口重新开始。
    pub(crate) fn user_entry(self: Arc<Self>) {
        if let Some(pid) = process::current_pid() {
            self.processes.mark_running(pid);
        }
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.cpu.run(&self))) {
                Ok(()) => process::do_exit(&self, 0),
                Err(payload) if payload.is::<ImageReplaced>() => continue,
                Err(payload) => panic::resume_unwind(payload),
            }
        }
    }
}
