//! # rivet-bus
//!
//! ## 定位与职责（Why）
//! - 设备运行时的进程内发布/订阅中枢：上层（HAL 服务、跨节点转发器、诊断
//!   工具）通过统一的主题面交互，互不持有对方句柄；
//! - 提供四项硬能力：通配匹配（`+`/`#`）、按主题保留的最近值存储、限长
//!   邮箱（溢出挤旧）、以及带截止时间的请求应答。
//!
//! ## 架构嵌入（Where）
//! - `token` 定义令牌与主题词汇表；`mailbox` 定义非阻塞投递端；`bus` 承载
//!   字典树路由与连接生命周期；`message` 为载荷不透明的消息壳。
//!
//! ## 并发契约（What）
//! - 总线本体同步且无等待点：发布/订阅在锁内只做内存操作与非阻塞推送；
//! - 单邮箱内投递顺序等于发布顺序（被挤出者除外）；订阅返回前完成保留
//!   消息投递，先于其后的任何实时消息。

mod bus;
mod error;
mod mailbox;
mod message;
mod token;

pub use bus::{Bus, Connection, Subscription};
pub use error::BusError;
pub use mailbox::PushOutcome;
pub use message::Message;
pub use token::{MATCH_ONE, MATCH_REST, Token, Topic};
