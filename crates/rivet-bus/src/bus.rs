//! # 总线主体：字典树路由、保留存储与连接生命周期
//!
//! ## 核心意图（Why）
//! - 发布与订阅均为 O(主题层数) 的字典树操作；通配模式存放在其订阅节点上，
//!   发布时沿字面量、`+` 与 `#` 三类分支并行下降完成匹配；
//! - 保留载荷挂在字面量主题节点上，新订阅在返回前即可拿到全部匹配的保留
//!   消息，消除“先订阅还是先发布”的竞态；
//! - 连接是订阅的生命周期边界：连接关闭时批量撤销名下订阅并唤醒消费者。
//!
//! ## 并发纪律（How）
//! - 字典树由单把 `parking_lot::RwLock` 保护：非保留发布走读锁（绝不创建
//!   节点），订阅/撤销/保留写入走写锁；
//! - 持锁期间对邮箱的操作只有非阻塞推送，锁内不存在等待点。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::BusError;
use crate::mailbox::{MailboxCore, PushOutcome};
use crate::message::Message;
use crate::token::{MATCH_ONE, MATCH_REST, Token, Topic};

fn match_one_token() -> &'static Token {
    static TOKEN: std::sync::OnceLock<Token> = std::sync::OnceLock::new();
    TOKEN.get_or_init(|| Token::Text(MATCH_ONE.to_owned()))
}

fn match_rest_token() -> &'static Token {
    static TOKEN: std::sync::OnceLock<Token> = std::sync::OnceLock::new();
    TOKEN.get_or_init(|| Token::Text(MATCH_REST.to_owned()))
}

#[derive(Debug)]
struct SubEntry<P> {
    id: u64,
    mailbox: Arc<MailboxCore<P>>,
}

#[derive(Debug)]
struct Node<P> {
    children: HashMap<Token, Node<P>>,
    subs: Vec<SubEntry<P>>,
    retained: Option<P>,
}

impl<P> Default for Node<P> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            subs: Vec::new(),
            retained: None,
        }
    }
}

impl<P> Node<P> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subs.is_empty() && self.retained.is_none()
    }
}

#[derive(Debug)]
struct BusInner<P> {
    trie: RwLock<Node<P>>,
    conn_seq: AtomicU64,
    sub_seq: AtomicU64,
    displaced: AtomicU64,
}

/// 进程内主题总线。
///
/// # 教案式说明
/// - **意图 (Why)**：为设备运行时提供唯一的发布/订阅面：能力发现、遥测、
///   控制与应答全部经由主题流转，组件间不直接握有对方句柄；
/// - **契约 (What)**：
///   - [`connect`](Bus::connect) 产生连接句柄，订阅经由连接发起；
///   - 克隆 `Bus` 共享同一底层路由状态，克隆代价为常数；
/// - **风险 (Trade-offs)**：载荷按匹配订阅数克隆，调用方应选用克隆廉价的
///   载荷类型（引用计数记录）。
#[derive(Debug)]
pub struct Bus<P> {
    inner: Arc<BusInner<P>>,
}

impl<P> Clone for Bus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for Bus<P>
where
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Bus<P>
where
    P: Clone + Send + 'static,
{
    /// 创建空总线。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                trie: RwLock::new(Node::default()),
                conn_seq: AtomicU64::new(0),
                sub_seq: AtomicU64::new(0),
                displaced: AtomicU64::new(0),
            }),
        }
    }

    /// 打开一条逻辑连接。
    pub fn connect(&self) -> Connection<P> {
        let id = self.inner.conn_seq.fetch_add(1, Ordering::Relaxed);
        Connection {
            inner: Arc::clone(&self.inner),
            id,
            subs: Arc::new(Mutex::new(Vec::new())),
            reply_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 全总线累计被挤出的消息条数（背压观测口）。
    pub fn displaced(&self) -> u64 {
        self.inner.displaced.load(Ordering::Relaxed)
    }
}

impl<P> BusInner<P>
where
    P: Clone + Send + 'static,
{
    fn publish(&self, msg: Message<P>) -> Result<(), BusError> {
        msg.topic.validate_literal()?;
        if msg.retained {
            let mut root = self.trie.write();
            match &msg.payload {
                Some(payload) => {
                    let mut node = &mut *root;
                    for token in msg.topic.tokens() {
                        node = node.children.entry(token.clone()).or_default();
                    }
                    node.retained = Some(payload.clone());
                }
                None => {
                    clear_retained(&mut root, msg.topic.tokens());
                }
            }
            // 清除保留值本身也是一次发布，照常投递给匹配订阅。
            self.deliver(&root, &msg);
        } else {
            let root = self.trie.read();
            self.deliver(&root, &msg);
        }
        Ok(())
    }

    fn deliver(&self, root: &Node<P>, msg: &Message<P>) {
        let mut displaced = 0u64;
        route(root, msg.topic.tokens(), &mut |entry: &SubEntry<P>| {
            if entry.mailbox.push(msg.clone()) == PushOutcome::Displaced {
                displaced += 1;
            }
        });
        if displaced > 0 {
            self.displaced.fetch_add(displaced, Ordering::Relaxed);
            trace!(topic = %msg.topic, displaced, "mailbox overflow displaced oldest entries");
        }
    }

    fn subscribe(
        &self,
        pattern: Topic,
        queue_len: usize,
    ) -> Result<(u64, Arc<MailboxCore<P>>), BusError> {
        pattern.validate_pattern()?;
        let id = self.sub_seq.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(MailboxCore::new(queue_len));

        let mut root = self.trie.write();
        // 先在持锁状态下收集匹配的保留消息，保证先于后续发布入队。
        let mut retained = Vec::new();
        let mut path = Vec::new();
        collect_retained(&root, pattern.tokens(), &mut path, &mut retained);
        for msg in retained {
            mailbox.push(msg);
        }

        let mut node = &mut *root;
        for token in pattern.tokens() {
            node = node.children.entry(token.clone()).or_default();
        }
        node.subs.push(SubEntry {
            id,
            mailbox: Arc::clone(&mailbox),
        });
        Ok((id, mailbox))
    }

    fn unsubscribe(&self, pattern: &Topic, sub_id: u64) {
        let mut root = self.trie.write();
        remove_sub(&mut root, pattern.tokens(), sub_id);
    }
}

/// 沿字面量、`+` 与 `#` 分支下降，对每个命中的订阅调用 `deliver`。
///
/// `#` 订阅存放在其通配节点上，且该节点不会再有子节点（模式校验保证终位），
/// 因此在每一层直接收割即可覆盖“零个或多个尾部令牌”的语义。
fn route<P>(node: &Node<P>, remaining: &[Token], deliver: &mut impl FnMut(&SubEntry<P>)) {
    if let Some(rest) = node.children.get(match_rest_token()) {
        for sub in &rest.subs {
            deliver(sub);
        }
    }
    match remaining.split_first() {
        None => {
            for sub in &node.subs {
                deliver(sub);
            }
        }
        Some((head, tail)) => {
            if let Some(child) = node.children.get(head) {
                route(child, tail, deliver);
            }
            if let Some(child) = node.children.get(match_one_token()) {
                route(child, tail, deliver);
            }
        }
    }
}

fn collect_retained<P: Clone>(
    node: &Node<P>,
    pattern: &[Token],
    path: &mut Vec<Token>,
    out: &mut Vec<Message<P>>,
) {
    match pattern.split_first() {
        None => {
            if let Some(payload) = &node.retained {
                out.push(Message {
                    topic: Topic::new(path.clone()),
                    payload: Some(payload.clone()),
                    retained: true,
                    reply_to: None,
                });
            }
        }
        Some((head, tail)) => {
            if head.is_match_rest() {
                collect_subtree(node, path, out);
            } else if head.is_match_one() {
                for (token, child) in &node.children {
                    path.push(token.clone());
                    collect_retained(child, tail, path, out);
                    path.pop();
                }
            } else if let Some(child) = node.children.get(head) {
                path.push(head.clone());
                collect_retained(child, tail, path, out);
                path.pop();
            }
        }
    }
}

/// `#` 匹配零个或多个尾部令牌：含当前节点自身的保留值。
fn collect_subtree<P: Clone>(node: &Node<P>, path: &mut Vec<Token>, out: &mut Vec<Message<P>>) {
    if let Some(payload) = &node.retained {
        out.push(Message {
            topic: Topic::new(path.clone()),
            payload: Some(payload.clone()),
            retained: true,
            reply_to: None,
        });
    }
    for (token, child) in &node.children {
        path.push(token.clone());
        collect_subtree(child, path, out);
        path.pop();
    }
}

/// 清除保留值并剪掉由此变空的节点链；返回当前节点是否可被父节点移除。
fn clear_retained<P>(node: &mut Node<P>, remaining: &[Token]) -> bool {
    match remaining.split_first() {
        None => node.retained = None,
        Some((head, tail)) => {
            if let Some(child) = node.children.get_mut(head) {
                if clear_retained(child, tail) {
                    node.children.remove(head);
                }
            }
        }
    }
    node.is_empty()
}

fn remove_sub<P>(node: &mut Node<P>, remaining: &[Token], sub_id: u64) -> bool {
    match remaining.split_first() {
        None => {
            if let Some(pos) = node.subs.iter().position(|entry| entry.id == sub_id) {
                let entry = node.subs.swap_remove(pos);
                entry.mailbox.close();
            }
        }
        Some((head, tail)) => {
            if let Some(child) = node.children.get_mut(head) {
                if remove_sub(child, tail, sub_id) {
                    node.children.remove(head);
                }
            }
        }
    }
    node.is_empty()
}

/// 逻辑连接：订阅的生命周期边界，亦是请求应答的发起端。
///
/// # 教案式说明
/// - **意图 (Why)**：组件退出时只需关闭连接即可完成全部订阅清理，不必逐个
///   记账；连接自身不持有任何路由状态；
/// - **契约 (What)**：
///   - [`subscribe`](Connection::subscribe) 返回的 [`Subscription`] 在连接
///     关闭或句柄丢弃时撤销；
///   - [`request`](Connection::request) 在所有退出路径（成功、超时、发布
///     失败）上都会撤销临时应答订阅；
/// - **风险 (Trade-offs)**：`Drop` 中执行关闭意味着析构会短暂争用字典树写
///   锁；总线锁内无等待点，争用窗口为常数级。
#[derive(Debug)]
pub struct Connection<P>
where
    P: Clone + Send + 'static,
{
    inner: Arc<BusInner<P>>,
    id: u64,
    subs: Arc<Mutex<Vec<(u64, Topic)>>>,
    reply_seq: AtomicU64,
    closed: AtomicBool,
}

impl<P> Connection<P>
where
    P: Clone + Send + 'static,
{
    /// 连接编号，仅用于诊断输出。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 以给定模式订阅；返回前投递全部匹配的保留消息。
    pub fn subscribe(
        &self,
        pattern: Topic,
        queue_len: usize,
    ) -> Result<Subscription<P>, BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::ConnectionClosed);
        }
        let (id, mailbox) = self.inner.subscribe(pattern.clone(), queue_len)?;
        self.subs.lock().push((id, pattern.clone()));
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            conn_subs: Arc::clone(&self.subs),
            mailbox,
            pattern,
            id,
        })
    }

    /// 发布一条消息。
    pub fn publish(&self, msg: Message<P>) -> Result<(), BusError> {
        self.inner.publish(msg)
    }

    /// 请求应答：生成唯一回执主题、先订阅后发布、在截止时间内等待回复。
    pub async fn request(
        &self,
        mut msg: Message<P>,
        timeout: Duration,
    ) -> Result<Message<P>, BusError> {
        let seq = self.reply_seq.fetch_add(1, Ordering::Relaxed);
        let reply_topic = Topic::new(vec![
            Token::from("reply"),
            Token::Int(self.id as i64),
            Token::Int(seq as i64),
        ]);
        let sub = self.subscribe(reply_topic.clone(), 4)?;
        msg.reply_to = Some(reply_topic);
        self.publish(msg)?;
        match tokio::time::timeout(timeout, sub.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(BusError::ConnectionClosed),
            Err(_) => Err(BusError::Timeout),
        }
        // `sub` 在此处析构并撤销临时订阅，覆盖所有退出路径。
    }

    /// 关闭连接并批量撤销名下订阅。
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let subs = std::mem::take(&mut *self.subs.lock());
        for (id, pattern) in subs {
            self.inner.unsubscribe(&pattern, id);
        }
    }
}

impl<P> Drop for Connection<P>
where
    P: Clone + Send + 'static,
{
    fn drop(&mut self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let subs = std::mem::take(&mut *self.subs.lock());
            for (id, pattern) in subs {
                self.inner.unsubscribe(&pattern, id);
            }
        }
    }
}

/// 订阅句柄：消费端邮箱加撤销能力。
#[derive(Debug)]
pub struct Subscription<P>
where
    P: Clone + Send + 'static,
{
    inner: Arc<BusInner<P>>,
    conn_subs: Arc<Mutex<Vec<(u64, Topic)>>>,
    mailbox: Arc<MailboxCore<P>>,
    pattern: Topic,
    id: u64,
}

impl<P> Subscription<P>
where
    P: Clone + Send + 'static,
{
    /// 订阅时使用的模式。
    pub fn pattern(&self) -> &Topic {
        &self.pattern
    }

    /// 异步接收下一条消息；订阅被撤销且邮箱排空后返回 `None`。
    pub async fn recv(&self) -> Option<Message<P>> {
        self.mailbox.recv().await
    }

    /// 非阻塞接收。
    pub fn try_recv(&self) -> Option<Message<P>> {
        self.mailbox.try_recv()
    }

    /// 当前积压条数。
    pub fn backlog(&self) -> usize {
        self.mailbox.len()
    }

    /// 本邮箱累计被挤出的消息条数。
    pub fn displaced(&self) -> u64 {
        self.mailbox.displaced()
    }

    /// 订阅是否已被撤销。
    pub fn is_revoked(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl<P> Drop for Subscription<P>
where
    P: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.conn_subs.lock().retain(|(id, _)| *id != self.id);
        self.inner.unsubscribe(&self.pattern, self.id);
    }
}
