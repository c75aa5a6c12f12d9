//! 边界情况测试
//!
//! Halt、致命异常、未知系统调用号、阻塞中停机以及加载失败。

use alloc::sync::Arc;

use super::{boot, entry, test_config, Trace};
use crate::errno::Errno;
use crate::kernel::KernelConfig;
use crate::machine::{NativeCpu, NEXT_PC_REG, PC_REG, STACK_REG};
use crate::sched::RunOutcome;
use crate::sync::Semaphore;

#[test]
fn halt_stops_scheduling() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        t.push(1);
        ctx.halt()
    });
    let t = trace.clone();
    cpu.register(2, move |_| t.push(2));

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1]), ("other", &[2])]);
    kernel.spawn("main").unwrap();
    kernel.spawn("other").unwrap();
    assert_eq!(kernel.run(), RunOutcome::Halted);
    assert_eq!(trace.events(), [1]);
    assert!(kernel.scheduler().is_halted());

    // 停机后不再调度
    assert_eq!(kernel.run(), RunOutcome::Halted);
    kernel.shutdown();
    assert_eq!(trace.events(), [1]);
    assert_eq!(kernel.scheduler().num_threads(), 0);
    assert_eq!(kernel.frames().num_free(), 32);
}

#[test]
fn fatal_exceptions_kill_only_the_faulting_process() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        // 访问地址空间之外
        let child = ctx.fork(entry(1));
        t.push(ctx.join(child));
        // PC 不在地址空间内
        let child = ctx.fork(100_000);
        t.push(ctx.join(child));
        // 未注册的代码字
        let child = ctx.fork(entry(2));
        t.push(ctx.join(child));
        let child = ctx.fork(entry(3));
        t.push(ctx.join(child));
    });
    let t = trace.clone();
    cpu.register(2, move |ctx| {
        let value = ctx.load_word(100_000);
        t.push(value);
    });
    cpu.register(3, |ctx| ctx.exit(7));

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1, 2, 99, 3])]);
    kernel.spawn("main").unwrap();
    assert_eq!(kernel.run(), RunOutcome::Idle { blocked: 0 });

    assert_eq!(trace.events(), [137, 137, 137, 7]);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.frames().num_free(), 32);
    kernel.shutdown();
}

#[test]
fn unknown_syscall_returns_error() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        let pc = ctx.read_register(PC_REG);
        t.push(ctx.syscall(42, [0; 4]));
        t.push(ctx.read_register(PC_REG) - pc);
        t.push(ctx.syscall(-3, [0; 4]));
    });

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1])]);
    kernel.spawn("main").unwrap();
    kernel.run();

    assert_eq!(trace.events(), [-1, 4, -1]);
    kernel.shutdown();
}

#[test]
fn shutdown_reclaims_blocked_processes() {
    let trace = Trace::new();
    let gate = Arc::new(Semaphore::new("gate", 0));
    let cpu = NativeCpu::new();
    let t = trace.clone();
    let g = Arc::clone(&gate);
    cpu.register(1, move |_| {
        t.push(1);
        g.p();
        t.push(2);
    });

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1])]);
    kernel.spawn("main").unwrap();
    assert_eq!(kernel.run(), RunOutcome::Idle { blocked: 1 });
    assert_eq!(gate.num_waiters(), 1);
    assert_eq!(kernel.frames().num_free(), 29);

    kernel.shutdown();
    assert_eq!(trace.events(), [1]);
    assert_eq!(kernel.scheduler().num_threads(), 0);
    assert_eq!(kernel.frames().num_free(), 32);
}

#[test]
fn spawn_failures_leave_no_trace() {
    let cpu = NativeCpu::new();
    let config = KernelConfig {
        num_phys_pages: 4,
        ..KernelConfig::default()
    };
    let (kernel, _) = boot(config, cpu, &[("main", &[1])]);

    assert_eq!(kernel.spawn("missing"), Err(Errno::NoSuchFileOrDirectory));
    assert_eq!(kernel.spawn("main"), Err(Errno::OutOfMemory));
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.processes().num_free_pids(), kernel.config().max_processes);
    assert_eq!(kernel.frames().num_free(), 4);
    assert_eq!(kernel.run(), RunOutcome::Idle { blocked: 0 });
    kernel.shutdown();
}

#[test]
fn new_process_starts_with_initial_registers() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        t.push(ctx.read_register(PC_REG));
        t.push(ctx.read_register(NEXT_PC_REG));
        t.push(ctx.read_register(STACK_REG));
        t.push(ctx.read_register(2));
    });

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1])]);
    kernel.spawn("main").unwrap();
    kernel.run();

    assert_eq!(trace.events(), [0, 4, 368, 0]);
    kernel.shutdown();
}
