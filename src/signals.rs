//! 信号协调
//!
//! 信号处理函数只做一件事：给对应动作的请求计数加一。真正的动作（轮转检查点、
//! 停止）由主循环在可中断的位置执行。处于“发送 + 写检查点”的临界区时不执行任何
//! 动作，离开临界区后再处理积压的请求，停止优先于轮转。

use crate::error::Result;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::ffi::c_int;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 可以被延后执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// SIGINT / SIGTERM
    Stop,
    /// SIGHUP
    Rotate,
}

impl Action {
    const fn index(self) -> usize {
        match self {
            Action::Stop => 0,
            Action::Rotate => 1,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Stop => f.write_str("STOP"),
            Action::Rotate => f.write_str("ROTATE"),
        }
    }
}

/// 每个动作的请求计数
#[derive(Debug)]
pub struct RequestCounters {
    counters: [AtomicUsize; 2],
}

impl RequestCounters {
    pub const fn new() -> Self {
        Self { counters: [AtomicUsize::new(0), AtomicUsize::new(0)] }
    }

    /// 计数加一，可以在信号处理函数中调用
    pub fn increment(&self, action: Action) {
        self.counters[action.index()].fetch_add(1, Ordering::SeqCst);
    }

    /// 计数清零
    pub fn reset(&self, action: Action) {
        self.counters[action.index()].store(0, Ordering::SeqCst);
    }

    /// 自上次清零以来的请求次数
    pub fn get(&self, action: Action) -> usize {
        self.counters[action.index()].load(Ordering::SeqCst)
    }

    pub fn was_requested(&self, action: Action) -> bool {
        self.get(action) > 0
    }

    /// 读取并清零
    fn take(&self, action: Action) -> usize {
        self.counters[action.index()].swap(0, Ordering::SeqCst)
    }
}

impl Default for RequestCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// 进程级的请求计数，由信号处理函数写入
pub static PROCESS_REQUESTS: RequestCounters = RequestCounters::new();

extern "C" fn on_signal(signum: c_int) {
    if signum == Signal::SIGHUP as c_int {
        PROCESS_REQUESTS.increment(Action::Rotate);
    } else if signum == Signal::SIGINT as c_int
        || signum == Signal::SIGTERM as c_int
    {
        PROCESS_REQUESTS.increment(Action::Stop);
    }
}

/// 注册 SIGHUP、SIGINT、SIGTERM 的处理函数
pub fn install_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: 处理函数只对静态原子变量做自增，是异步信号安全的
        unsafe { sigaction(signal, &action) }
            .map_err(std::io::Error::from)?;
    }
    tracing::debug!("已注册 SIGHUP/SIGINT/SIGTERM 处理函数");
    Ok(())
}

/// 临界区保护与积压请求的调度
#[derive(Debug)]
pub struct SignalCoordinator {
    counters: &'static RequestCounters,
    interruptible: bool,
}

impl SignalCoordinator {
    pub fn new(counters: &'static RequestCounters) -> Self {
        Self { counters, interruptible: true }
    }

    /// 使用进程级计数
    pub fn for_process() -> Self {
        Self::new(&PROCESS_REQUESTS)
    }

    pub fn counters(&self) -> &'static RequestCounters {
        self.counters
    }

    pub fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    /// 进入临界区
    pub fn enter_critical(&mut self) {
        self.interruptible = false;
    }

    /// 离开临界区
    pub fn leave_critical(&mut self) {
        self.interruptible = true;
    }

    /// 取出一个需要立即执行的动作
    ///
    /// 在临界区内总是返回 `None`。停止优先于轮转；取出的动作计数被清零。
    pub fn take_pending(&self) -> Option<Action> {
        if !self.interruptible {
            return None;
        }
        for action in [Action::Stop, Action::Rotate] {
            let count = self.counters.take(action);
            if count > 0 {
                tracing::info!("处理积压请求 {} (共 {} 次)", action, count);
                return Some(action);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        static COUNTERS: RequestCounters = RequestCounters::new();
        assert!(!COUNTERS.was_requested(Action::Rotate));
        COUNTERS.increment(Action::Rotate);
        COUNTERS.increment(Action::Rotate);
        assert_eq!(COUNTERS.get(Action::Rotate), 2);
        assert_eq!(COUNTERS.get(Action::Stop), 0);
        COUNTERS.reset(Action::Rotate);
        assert!(!COUNTERS.was_requested(Action::Rotate));
    }

    #[test]
    fn test_rotate_deferred_until_critical_section_ends() {
        static COUNTERS: RequestCounters = RequestCounters::new();
        let mut coordinator = SignalCoordinator::new(&COUNTERS);

        coordinator.enter_critical();
        COUNTERS.increment(Action::Rotate);
        assert_eq!(coordinator.take_pending(), None);
        assert!(COUNTERS.was_requested(Action::Rotate));

        coordinator.leave_critical();
        assert_eq!(coordinator.take_pending(), Some(Action::Rotate));
        assert_eq!(coordinator.take_pending(), None);
    }

    #[test]
    fn test_stop_takes_priority() {
        static COUNTERS: RequestCounters = RequestCounters::new();
        let mut coordinator = SignalCoordinator::new(&COUNTERS);
        coordinator.enter_critical();
        COUNTERS.increment(Action::Rotate);
        COUNTERS.increment(Action::Stop);
        coordinator.leave_critical();
        assert_eq!(coordinator.take_pending(), Some(Action::Stop));
        assert_eq!(coordinator.take_pending(), Some(Action::Rotate));
    }

    #[test]
    fn test_nothing_pending() {
        static COUNTERS: RequestCounters = RequestCounters::new();
        let coordinator = SignalCoordinator::new(&COUNTERS);
        assert!(coordinator.is_interruptible());
        assert_eq!(coordinator.take_pending(), None);
    }
}
