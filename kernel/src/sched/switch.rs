//! 上下文切换
//!
//! 每个执行上下文由一个宿主线程承载，任一时刻只有持有 "CPU" 的上下文在运行。
//! 切换时，当前上下文把接力棒交给下一个上下文，然后在自己的接力棒上等待，
//! 直到再次被调度。这就是宿主环境下的 `__switch_to()`。

use std::sync::{Condvar, Mutex, PoisonError};

/// 接力棒：一次性的 "可以运行" 许可
///
/// `grant` 可以先于 `wait` 发生，许可不会丢失；`wait` 消耗许可。
#[derive(Debug, Default)]
pub struct Baton {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl Baton {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交出 CPU 给持有此接力棒的上下文
    pub fn grant(&self) {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        *granted = true;
        self.cond.notify_one();
    }

    /// 等待被调度
    pub fn wait(&self) {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        while !*granted {
            granted = self
                .cond
                .wait(granted)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *granted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn grant_before_wait_is_not_lost() {
        let baton = Baton::new();
        baton.grant();
        baton.wait();
    }

    #[test]
    fn handoff_between_threads() {
        let ping = Arc::new(Baton::new());
        let pong = Arc::new(Baton::new());
        let (p, q) = (ping.clone(), pong.clone());
        let handle = std::thread::spawn(move || {
            for _ in 0..3 {
                p.wait();
                q.grant();
            }
        });
        for _ in 0..3 {
            ping.grant();
            pong.wait();
        }
        handle.join().unwrap();
    }
}
