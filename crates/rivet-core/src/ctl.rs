//! # 取消与截止原语
//!
//! ## 核心意图（Why）
//! - 运行时的每个阻塞点（触发/采集、平台 I/O、控制转发）都必须可被外部
//!   打断：或因截止时间耗尽，或因整机排空；
//! - 取消令牌与截止时间合并进单个调用上下文 [`OpContext`]，随调用链派生，
//!   避免各组件私自约定超时参数。
//!
//! ## 逻辑解析（How）
//! - [`Cancellation`] 以原子位表达取消状态、以 `Notify` 支撑异步等待，
//!   `cancel` 首次成功返回 `true`；
//! - [`OpContext::derive`] 取“父截止时间”与“现在 + 步长超时”的较早者，
//!   保证子操作不会越过父预算。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::CoreError;

#[derive(Debug, Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// 取消令牌：克隆共享同一取消位，可跨任务传播。
///
/// # 教案式说明
/// - **意图 (Why)**：统一表达“整机排空”与“单次调用放弃”两类中断来源；
/// - **契约 (What)**：`cancel` 幂等，首次触发返回 `true`；`cancelled()`
///   在取消后立即完成，可安全地多次等待；
/// - **风险 (Trade-offs)**：不提供回调注册，等待方需将 `cancelled()` 纳入
///   自己的 `select!`。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancelState>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 标记取消；首次触发返回 `true`。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 等待取消发生；若已取消则立即返回。
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// 派生共享同一取消位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// 单次操作的调用上下文：取消令牌 + 可选的绝对截止时间。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `deadline = None` 表示调用方未施加硬超时；
///   - [`derive`](OpContext::derive) 生成步长上下文：截止时间取父级与
///     `now + step` 的较早者，取消位共享；
///   - [`run`](OpContext::run) 把任意 Future 套入“取消/超时”双保险，返回
///     [`CoreError::Cancelled`] 或 [`CoreError::Timeout`]；
/// - **风险 (Trade-offs)**：基于 Tokio 单调时钟，测试中可用暂停时钟复现
///   超时序列。
#[derive(Clone, Debug)]
pub struct OpContext {
    cancellation: Cancellation,
    deadline: Option<Instant>,
}

impl OpContext {
    /// 无截止时间、独立取消位的上下文。
    pub fn unbounded() -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline: None,
        }
    }

    /// 以取消令牌构造（无截止时间）。
    pub fn with_cancellation(cancellation: Cancellation) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    /// 从现在起施加 `timeout` 的硬截止。
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// 派生步长上下文：共享取消位，截止时间不越过父级。
    pub fn derive(&self, step: Duration) -> Self {
        let step_deadline = Instant::now() + step;
        let deadline = match self.deadline {
            Some(parent) => Some(parent.min(step_deadline)),
            None => Some(step_deadline),
        };
        Self {
            cancellation: self.cancellation.clone(),
            deadline,
        }
    }

    /// 取消令牌。
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// 绝对截止时间。
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 距截止时间的剩余时长；`None` 表示无截止。
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// 截止时间是否已过或已被取消。
    pub fn expired(&self) -> bool {
        self.cancellation.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// 在取消/截止双保险下执行 Future。
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, CoreError>
    where
        F: Future,
    {
        if self.cancellation.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    out = tokio::time::timeout_at(deadline, fut) => {
                        out.map_err(|_| CoreError::Timeout)
                    }
                    _ = self.cancellation.cancelled() => Err(CoreError::Cancelled),
                }
            }
            None => {
                tokio::select! {
                    out = fut => Ok(out),
                    _ = self.cancellation.cancelled() => Err(CoreError::Cancelled),
                }
            }
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::unbounded()
    }
}
