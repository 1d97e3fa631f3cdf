//! # 有界事件队列
//!
//! 工作器 → 服务环方向的统一载体：非阻塞推送、挤旧收新、异步消费。与订阅
//! 邮箱共用同一套机制，但载荷为任意事件类型且推送端可被多任务共享。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct QueueInner<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    displaced: AtomicU64,
}

/// 有界挤旧队列句柄；克隆共享同一队列。
#[derive(Clone)]
pub struct EventQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
                notify: Notify::new(),
                capacity: capacity.max(1),
                displaced: AtomicU64::new(0),
            }),
        }
    }

    /// 非阻塞推送；满载时挤出最旧一条。返回 `true` 表示发生了挤出。
    pub fn push(&self, item: T) -> bool {
        let displaced = {
            let mut items = self.inner.items.lock();
            let displaced = if items.len() == self.inner.capacity {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            displaced
        };
        if displaced {
            self.inner.displaced.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.notify.notify_one();
        displaced
    }

    /// 异步等待下一条事件（取消安全：未取走的事件保留在队列中）。
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(item) = self.inner.items.lock().pop_front() {
                return item;
            }
            notified.await;
        }
    }

    /// 非阻塞取出。
    pub fn try_recv(&self) -> Option<T> {
        self.inner.items.lock().pop_front()
    }

    /// 累计挤出条数。
    pub fn displaced(&self) -> u64 {
        self.inner.displaced.load(Ordering::Relaxed)
    }

    /// 当前积压。
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
