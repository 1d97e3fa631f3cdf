//! # 定长缓冲池
//!
//! ## 核心意图（Why）
//! - 串口读取方向的内存占用必须有硬上界：每个注册的读取器拥有固定数量的
//!   定长 slab，读取与事件发布复用这一组缓冲，杜绝无界积压；
//! - 事件携带的帧句柄在所有退出路径（消费方释放、投递失败被丢弃）都把
//!   slab 归还池中——归还逻辑挂在 `Drop` 上，不依赖调用方自觉。
//!
//! ## 所有权模型（How）
//! - [`SlabLease`]：读取器独占持有的可写缓冲，未提交即丢弃也会归还；
//! - [`FrameBuf`]：提交后的只读帧，引用计数共享给任意多个订阅方，最后一个
//!   克隆释放时 slab 回池。

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    slab_size: usize,
    notify: Notify,
}

impl PoolInner {
    fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        buf.resize(self.slab_size, 0);
        self.free.lock().push(buf);
        self.notify.notify_one();
    }
}

impl fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("slab_size", &self.slab_size)
            .field("available", &self.free.lock().len())
            .finish()
    }
}

/// 定长 slab 池。
///
/// # 教案式说明
/// - **契约 (What)**：`new(slabs, slab_size)` 预分配全部缓冲；
///   [`try_acquire`](SlabPool::try_acquire) 非阻塞，[`acquire`](SlabPool::acquire)
///   等待归还；slab 长度恒为 `slab_size`，有效前缀由租约记账；
/// - **风险 (Trade-offs)**：池不感知公平性，归还唤醒任一等待者；读取器
///   一池一主，不存在多等待者竞争。
#[derive(Clone, Debug)]
pub struct SlabPool {
    inner: Arc<PoolInner>,
}

impl SlabPool {
    /// 预分配 `slabs` 块 `slab_size` 字节的缓冲。
    pub fn new(slabs: usize, slab_size: usize) -> Self {
        let free = (0..slabs.max(1))
            .map(|_| BytesMut::zeroed(slab_size))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                slab_size,
                notify: Notify::new(),
            }),
        }
    }

    /// 非阻塞取一块 slab。
    pub fn try_acquire(&self) -> Option<SlabLease> {
        let buf = self.inner.free.lock().pop()?;
        Some(SlabLease {
            buf: Some(buf),
            used: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    /// 等待直到有 slab 可用。
    pub async fn acquire(&self) -> SlabLease {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(lease) = self.try_acquire() {
                return lease;
            }
            notified.await;
        }
    }

    /// 单块 slab 的字节数。
    pub fn slab_size(&self) -> usize {
        self.inner.slab_size
    }

    /// 当前空闲 slab 数。
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// 读取器独占的可写租约。
#[derive(Debug)]
pub struct SlabLease {
    buf: Option<BytesMut>,
    used: usize,
    pool: Arc<PoolInner>,
}

impl SlabLease {
    /// 已写入的有效前缀长度。
    pub fn len(&self) -> usize {
        self.used
    }

    /// 是否尚未写入任何字节。
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// 剩余可写空间。
    pub fn remaining(&self) -> usize {
        self.pool.slab_size - self.used
    }

    /// 尚未写入部分的可变视图，供平台读取调用直接填充。
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let buf = self.buf.as_mut().expect("lease holds its slab until drop");
        &mut buf[self.used..]
    }

    /// 声明已向空闲区写入 `n` 字节。
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.used + n <= self.pool.slab_size);
        self.used += n;
    }

    /// 追加一段字节，返回实际拷入的长度（受剩余空间限制）。
    pub fn extend_from(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        let used = self.used;
        let buf = self.buf.as_mut().expect("lease holds its slab until drop");
        buf[used..used + n].copy_from_slice(&data[..n]);
        self.used += n;
        n
    }

    /// 已写入部分的只读视图。
    pub fn filled(&self) -> &[u8] {
        let buf = self.buf.as_ref().expect("lease holds its slab until drop");
        &buf[..self.used]
    }

    /// 丢弃已写入内容、复位租约。
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// 提交为只读帧；帧的最后一个持有者释放时 slab 回池。
    pub fn commit(mut self) -> FrameBuf {
        let mut buf = self.buf.take().expect("lease holds its slab until drop");
        buf.truncate(self.used);
        FrameBuf {
            shared: Arc::new(FrameShared {
                buf,
                pool: Some(Arc::clone(&self.pool)),
            }),
        }
    }
}

impl Drop for SlabLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[derive(Debug)]
struct FrameShared {
    buf: BytesMut,
    pool: Option<Arc<PoolInner>>,
}

impl Drop for FrameShared {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.buf));
        }
    }
}

/// 引用计数的只读帧。
///
/// # 教案式说明
/// - **契约 (What)**：克隆为常数代价；`Deref<Target = [u8]>` 暴露帧内容；
///   [`detached`](FrameBuf::detached) 构造不挂池的独立帧（反序列化与测试
///   路径使用）；
/// - **风险 (Trade-offs)**：池随帧存活——即使读取器先退出，未消费的帧释放
///   时仍能安全归还。
#[derive(Clone, Debug)]
pub struct FrameBuf {
    shared: Arc<FrameShared>,
}

impl FrameBuf {
    /// 构造与池无关的独立帧。
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            shared: Arc::new(FrameShared {
                buf: BytesMut::from(&data[..]),
                pool: None,
            }),
        }
    }
}

impl Deref for FrameBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.shared.buf
    }
}

impl AsRef<[u8]> for FrameBuf {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl PartialEq for FrameBuf {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl Eq for FrameBuf {}

impl serde::Serialize for FrameBuf {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self)
    }
}

impl<'de> serde::Deserialize<'de> for FrameBuf {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = Vec::<u8>::deserialize(deserializer)?;
        Ok(FrameBuf::detached(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_returns_slab_on_drop() {
        let pool = SlabPool::new(2, 16);
        let lease = pool.try_acquire().unwrap();
        assert_eq!(pool.available(), 1);
        drop(lease);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn frame_returns_slab_when_last_clone_drops() {
        let pool = SlabPool::new(1, 16);
        let mut lease = pool.try_acquire().unwrap();
        lease.extend_from(b"hello");
        let frame = lease.commit();
        let copy = frame.clone();
        assert_eq!(&copy[..], b"hello");
        drop(frame);
        assert_eq!(pool.available(), 0, "a live clone still pins the slab");
        drop(copy);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn extend_is_capped_by_slab_size() {
        let pool = SlabPool::new(1, 4);
        let mut lease = pool.try_acquire().unwrap();
        assert_eq!(lease.extend_from(b"abcdef"), 4);
        assert_eq!(lease.filled(), b"abcd");
    }

    #[tokio::test]
    async fn acquire_waits_for_give_back() {
        let pool = SlabPool::new(1, 8);
        let lease = pool.try_acquire().unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.len() })
        };
        tokio::task::yield_now().await;
        drop(lease);
        assert_eq!(waiter.await.unwrap(), 0);
    }
}
