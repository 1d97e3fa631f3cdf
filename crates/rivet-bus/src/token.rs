//! # 主题令牌与主题序列
//!
//! ## 核心意图（Why）
//! - 将主题建模为强类型令牌序列而非整串字符串，使整型容量编号（如能力 id）
//!   无需字符串化即可参与路由，并让相等与哈希语义保持结构化；
//! - 通配符（`+` 单层、`#` 尾部多层）以令牌形式存在于订阅模式中，发布主题
//!   则必须全部为字面量，校验规则集中在本模块。
//!
//! ## 架构定位（Where）
//! - `rivet-bus` 的最底层词汇表；字典树按 [`Token`] 作键，保留消息存放在
//!   字面量主题节点上。
//!
//! ## 契约说明（What）
//! - `Topic` 内部为 `Arc<[Token]>`，克隆代价为常数，适合在投递路径上随消息
//!   复制；
//! - 模式合法性（`#` 仅允许出现在末位）由 [`Topic::validate_pattern`] 把关，
//!   订阅入口统一调用。

use std::fmt;
use std::sync::Arc;

use crate::error::BusError;

/// 主题位置上的单个令牌。
///
/// # 教案式说明
/// - **意图 (Why)**：主题的每一层既可能是语义名（`"hal"`）也可能是单调分配的
///   整型编号（能力 id），枚举避免了来回字符串转换与解析歧义；
/// - **契约 (What)**：相等为结构化比较，`Text("7")` 与 `Int(7)` 互不相等；
///   实现 `Hash + Ord`，可直接作为字典树键；
/// - **风险 (Trade-offs)**：`Text` 持有 `String`，构造时发生一次分配；投递
///   热路径仅比较引用，不产生额外拷贝。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    /// 字符串令牌。
    Text(String),
    /// 整型令牌，用于容量编号等单调 id。
    Int(i64),
}

/// 单层通配令牌的字面值。
pub const MATCH_ONE: &str = "+";
/// 尾部多层通配令牌的字面值，仅允许出现在模式末位。
pub const MATCH_REST: &str = "#";

impl Token {
    /// 是否为单层通配 `+`。
    pub fn is_match_one(&self) -> bool {
        matches!(self, Token::Text(s) if s == MATCH_ONE)
    }

    /// 是否为尾部通配 `#`。
    pub fn is_match_rest(&self) -> bool {
        matches!(self, Token::Text(s) if s == MATCH_REST)
    }

    /// 是否为任一通配令牌。
    pub fn is_wildcard(&self) -> bool {
        self.is_match_one() || self.is_match_rest()
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::Text(value.to_owned())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::Text(value)
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Token::Int(value)
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token::Int(i64::from(value))
    }
}

impl From<i32> for Token {
    fn from(value: i32) -> Self {
        Token::Int(i64::from(value))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(s) => f.write_str(s),
            Token::Int(v) => write!(f, "{v}"),
        }
    }
}

/// 有序令牌序列，即一条主题或一个订阅模式。
///
/// # 教案式说明
/// - **意图 (Why)**：主题在总线内被多处持有（消息、保留存储、订阅登记），
///   共享切片让克隆保持 O(1)；
/// - **契约 (What)**：
///   - 空主题不合法，发布与订阅入口均拒绝；
///   - [`validate_literal`](Topic::validate_literal) 供发布方使用：任何通配
///     令牌都会触发 [`BusError::InvalidTopic`]；
///   - [`validate_pattern`](Topic::validate_pattern) 供订阅方使用：`#` 只
///     允许出现在末位；
/// - **风险 (Trade-offs)**：未对令牌文本做字符集限制，上层若需要与外部系统
///   互通应自行约束命名。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic {
    tokens: Arc<[Token]>,
}

impl Topic {
    /// 由令牌向量构造主题。
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    /// 以 `/` 分隔的文本构造字面量主题，便于测试与日志场景。
    pub fn parse(path: &str) -> Self {
        Self::new(path.split('/').map(Token::from).collect())
    }

    /// 令牌切片视图。
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// 主题层数。
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// 是否为空主题。
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// 是否不含任何通配令牌。
    pub fn is_literal(&self) -> bool {
        !self.tokens.iter().any(Token::is_wildcard)
    }

    /// 校验发布主题：非空且全部为字面量令牌。
    pub fn validate_literal(&self) -> Result<(), BusError> {
        if self.is_empty() {
            return Err(BusError::InvalidTopic {
                reason: "empty topic",
            });
        }
        if !self.is_literal() {
            return Err(BusError::InvalidTopic {
                reason: "wildcard token in publish topic",
            });
        }
        Ok(())
    }

    /// 校验订阅模式：非空，且 `#` 仅允许作为末位令牌。
    pub fn validate_pattern(&self) -> Result<(), BusError> {
        if self.is_empty() {
            return Err(BusError::InvalidTopic {
                reason: "empty pattern",
            });
        }
        let last = self.tokens.len() - 1;
        for (idx, token) in self.tokens.iter().enumerate() {
            if token.is_match_rest() && idx != last {
                return Err(BusError::InvalidTopic {
                    reason: "`#` must be the terminal token",
                });
            }
        }
        Ok(())
    }

    /// 以本主题为模式，判断是否匹配给定字面量主题。
    ///
    /// - **契约 (What)**：`+` 恰好匹配一个令牌；`#` 匹配零个或多个尾部令牌；
    ///   其余位置逐一结构化相等；
    /// - **用途 (Where)**：供测试与上层诊断使用；投递热路径走字典树，不经
    ///   过本函数。
    pub fn matches(&self, topic: &Topic) -> bool {
        let mut pattern = self.tokens.iter();
        let mut remaining = topic.tokens();
        loop {
            match (pattern.next(), remaining.split_first()) {
                (None, None) => return true,
                (None, Some(_)) => return false,
                (Some(p), rest) => {
                    if p.is_match_rest() {
                        return true;
                    }
                    match rest {
                        Some((head, tail)) => {
                            if !p.is_match_one() && p != head {
                                return false;
                            }
                            remaining = tail;
                        }
                        None => return false,
                    }
                }
            }
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, token) in self.tokens.iter().enumerate() {
            if idx > 0 {
                f.write_str("/")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl<T: Into<Token>, const N: usize> From<[T; N]> for Topic {
    fn from(tokens: [T; N]) -> Self {
        Topic::new(tokens.into_iter().map(Into::into).collect())
    }
}

/// 便捷构造主题的宏：`topic!["hal", "capability", 3]`。
///
/// 每个元素需实现 `Into<Token>`；字符串与整型可以混用。
#[macro_export]
macro_rules! topic {
    ($($token:expr),+ $(,)?) => {
        $crate::Topic::new(vec![$($crate::Token::from($token)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality_distinguishes_text_and_int() {
        assert_ne!(Token::from("7"), Token::from(7i64));
        assert_eq!(Token::from(7i64), Token::Int(7));
    }

    #[test]
    fn pattern_validation_rejects_inner_hash() {
        assert!(topic!["a", "#", "b"].validate_pattern().is_err());
        assert!(topic!["a", "#"].validate_pattern().is_ok());
        assert!(topic!["#"].validate_pattern().is_ok());
    }

    #[test]
    fn literal_validation_rejects_wildcards() {
        assert!(topic!["a", "+"].validate_literal().is_err());
        assert!(topic!["a", "b"].validate_literal().is_ok());
    }

    #[test]
    fn matching_semantics() {
        let plus = topic!["hal", "capability", "+", "+", "state"];
        assert!(plus.matches(&topic!["hal", "capability", "gpio", 0, "state"]));
        assert!(!plus.matches(&topic!["hal", "capability", "gpio", "state"]));

        let rest = topic!["a", "#"];
        assert!(rest.matches(&topic!["a"]));
        assert!(rest.matches(&topic!["a", "b", "c"]));
        assert!(!rest.matches(&topic!["b"]));
    }
}
