//! 中断开关
//!
//! 单核协作式调度下，同步原语通过关中断保证 "检查状态，然后要么继续、
//! 要么入队并阻塞" 这一序列的原子性。这里只记录中断级别，
//! 阻塞操作（`Scheduler::sleep`）会断言中断已关闭。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// 中断级别
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntStatus {
    IntOff,
    IntOn,
}

/// 中断控制器
#[derive(Debug)]
pub struct Interrupt {
    enabled: AtomicBool,
}

impl Interrupt {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn level(&self) -> IntStatus {
        if self.enabled.load(Ordering::Acquire) {
            IntStatus::IntOn
        } else {
            IntStatus::IntOff
        }
    }

    /// 设置中断级别，返回旧级别
    pub fn set_level(&self, level: IntStatus) -> IntStatus {
        let old = self.enabled.swap(level == IntStatus::IntOn, Ordering::AcqRel);
        if old {
            IntStatus::IntOn
        } else {
            IntStatus::IntOff
        }
    }

    /// 关中断，返回的守卫离开作用域时恢复旧级别
    pub fn disable(self: &Arc<Self>) -> InterruptGuard {
        let old = self.set_level(IntStatus::IntOff);
        InterruptGuard {
            interrupt: Arc::clone(self),
            old,
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// 中断保护 RAII 守卫
///
/// 对应 `local_irq_save()` / `local_irq_restore()`
pub struct InterruptGuard {
    interrupt: Arc<Interrupt>,
    old: IntStatus,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.interrupt.set_level(self.old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_level() {
        let interrupt = Arc::new(Interrupt::new());
        {
            let _outer = interrupt.disable();
            assert_eq!(interrupt.level(), IntStatus::IntOff);
            {
                let _inner = interrupt.disable();
                assert_eq!(interrupt.level(), IntStatus::IntOff);
            }
            assert_eq!(interrupt.level(), IntStatus::IntOff);
        }
        assert_eq!(interrupt.level(), IntStatus::IntOn);
    }
}
