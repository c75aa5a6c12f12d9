//! 孤儿进程测试

use super::{boot, entry, test_config, Trace};
use crate::machine::NativeCpu;
use crate::process::{ProcessInfo, ProcessState};

#[test]
fn orphan_reaps_itself() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        t.push(ctx.fork(entry(1)));
    });
    let t = trace.clone();
    cpu.register(2, move |ctx| {
        // 父进程已退出并被回收
        let me = ctx.kernel().processes().current_pid().unwrap();
        let info = ctx.kernel().processes().lookup(me).unwrap();
        t.push(info.parent.map_or(-1, |pid| pid as i32));
        t.push(ctx.join(0));
        ctx.exit(5)
    });

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1, 2])]);
    kernel.spawn("main").unwrap();
    kernel.run();

    assert_eq!(trace.events(), [1, -1, -1]);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.processes().num_free_pids(), kernel.config().max_processes);
    assert_eq!(kernel.frames().num_free(), 32);
    kernel.shutdown();
}

#[test]
fn exited_children_are_reaped_with_their_parent() {
    let trace: Trace<Option<ProcessInfo>> = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        let child = ctx.fork(entry(1)) as u32;
        ctx.yield_now();
        t.push(ctx.kernel().processes().lookup(child));
    });
    cpu.register(2, |ctx| ctx.exit(7));

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1, 2])]);
    kernel.spawn("main").unwrap();
    kernel.run();

    let events = trace.events();
    let info = events[0].as_ref().unwrap();
    assert_eq!(info.parent, Some(0));
    assert_eq!(info.state, ProcessState::ExitedUnreaped);
    assert_eq!(info.exit_status, Some(7));
    assert_eq!(info.open_files, 0);

    assert_eq!(kernel.processes().lookup(1), None);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.frames().num_free(), 32);
    kernel.shutdown();
}

#[test]
fn grandchild_outlives_its_parent() {
    let trace = Trace::new();
    let cpu = NativeCpu::new();
    let t = trace.clone();
    cpu.register(1, move |ctx| {
        let child = ctx.fork(entry(1));
        t.push(ctx.join(child));
    });
    cpu.register(2, |ctx| {
        ctx.fork(entry(2));
        ctx.exit(0)
    });
    let t = trace.clone();
    cpu.register(3, move |ctx| {
        let info = ctx.kernel().processes().lookup(2).unwrap();
        t.push(info.parent.is_none() as i32);
        // 原来的父进程已被回收，祖父进程也不是父进程
        t.push(ctx.join(1));
        t.push(ctx.join(0));
    });

    let (kernel, _) = boot(test_config(), cpu, &[("main", &[1, 2, 3])]);
    kernel.spawn("main").unwrap();
    kernel.run();

    // 子进程退出时祖父进程被唤醒，排在孙进程之后
    assert_eq!(trace.events(), [1, -1, -1, 0]);
    assert!(kernel.processes().is_empty());
    assert_eq!(kernel.frames().num_free(), 32);
    kernel.shutdown();
}
