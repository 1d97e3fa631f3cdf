//! # 限长邮箱
//!
//! ## 核心意图（Why）
//! - 投递方绝不阻塞：总线在持锁状态下向邮箱推送，推送必须是非阻塞的常数
//!   时间操作；溢出策略为“挤掉最旧、收下最新”，保证订阅方总能看到最近的
//!   状态而不是最老的积压；
//! - 消费方异步等待：邮箱以 `Notify` 唤醒挂起的 `recv`，空闲时不占用调度。
//!
//! ## 并发模型（How）
//! - 队列由 `parking_lot::Mutex<VecDeque>` 保护，临界区只做入队/出队；
//! - 关闭位使用原子布尔，关闭后 `recv` 先排空残余消息再返回 `None`，与
//!   “连接关闭即批量撤销”的清理语义衔接。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::Message;

/// 非阻塞推送的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// 正常入队。
    Stored,
    /// 队列已满，最旧一条被挤出后入队。
    Displaced,
    /// 邮箱已关闭，消息被丢弃。
    Dropped,
}

/// 邮箱核心：总线持有推送端，订阅句柄持有消费端。
#[derive(Debug)]
pub(crate) struct MailboxCore<P> {
    queue: Mutex<VecDeque<Message<P>>>,
    notify: Notify,
    capacity: usize,
    displaced: AtomicU64,
    closed: AtomicBool,
}

impl<P> MailboxCore<P> {
    pub(crate) fn new(capacity: usize) -> Self {
        // 容量为 0 的邮箱没有意义，按 1 兜底。
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            displaced: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 非阻塞推送；满载时弹出最旧一条再入队。
    pub(crate) fn push(&self, msg: Message<P>) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Dropped;
        }
        let outcome = {
            let mut queue = self.queue.lock();
            if queue.len() == self.capacity {
                queue.pop_front();
                queue.push_back(msg);
                PushOutcome::Displaced
            } else {
                queue.push_back(msg);
                PushOutcome::Stored
            }
        };
        if outcome == PushOutcome::Displaced {
            self.displaced.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        outcome
    }

    /// 异步接收下一条消息；邮箱关闭且排空后返回 `None`。
    pub(crate) async fn recv(&self) -> Option<Message<P>> {
        loop {
            // 先登记唤醒，再查队列，避免“查空后入队”的丢失窗口。
            let notified = self.notify.notified();
            if let Some(msg) = self.try_recv() {
                return Some(msg);
            }
            if self.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            notified.await;
        }
    }

    /// 非阻塞取出队首消息。
    pub(crate) fn try_recv(&self) -> Option<Message<P>> {
        self.queue.lock().pop_front()
    }

    /// 当前积压条数。
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// 被挤出的消息累计数。
    pub(crate) fn displaced(&self) -> u64 {
        self.displaced.load(Ordering::Relaxed)
    }

    /// 关闭邮箱并唤醒所有等待者。
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
