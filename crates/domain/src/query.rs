//! 目标文件查询的类型化模型
//!
//! 查询 DSL 的文本解析发生在 CLI 层；这里定义驱动实际消费的结构。
//! 驱动对无法评估的谓词必须报告 `UnsupportedPredicate`。

use serde::{Deserialize, Serialize};

use shepherd_errors::ShepherdResult;

/// 查询的数据来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySource {
    /// 一个或多个检索根
    Roots(Vec<String>),
    /// 文件名清单（file of filenames）
    Fofn {
        path: String,
        compressed: bool,
        delimiter: u8,
    },
}

/// 可比较的文件属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    Size,
    Name,
    Path,
    Mtime,
    Ctime,
    Atime,
    Depth,
    Owner,
    Group,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Size => "size",
            Attribute::Name => "name",
            Attribute::Path => "path",
            Attribute::Mtime => "mtime",
            Attribute::Ctime => "ctime",
            Attribute::Atime => "atime",
            Attribute::Depth => "depth",
            Attribute::Owner => "owner",
            Attribute::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "size" => Some(Attribute::Size),
            "name" => Some(Attribute::Name),
            "path" => Some(Attribute::Path),
            "mtime" => Some(Attribute::Mtime),
            "ctime" => Some(Attribute::Ctime),
            "atime" => Some(Attribute::Atime),
            "depth" => Some(Attribute::Depth),
            "owner" => Some(Attribute::Owner),
            "group" => Some(Attribute::Group),
            _ => None,
        }
    }
}

/// 谓词键：内置属性或 `:key` 形式的自定义元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Attribute(Attribute),
    Metadata(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }

    /// 对已归一化的数值应用比较
    pub fn compare_i64(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Comparator::Eq => lhs == rhs,
            Comparator::Gt => lhs > rhs,
            Comparator::Ge => lhs >= rhs,
            Comparator::Lt => lhs < rhs,
            Comparator::Le => lhs <= rhs,
        }
    }
}

/// 谓词右值
///
/// 大小单位与时间单位在 DSL 解析阶段归一化：字节数与秒数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Bytes(i64),
    AgeSeconds(i64),
}

/// 单个比较谓词，可带 `not` 前缀
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub key: Key,
    pub comparator: Comparator,
    pub value: Value,
    pub negated: bool,
}

/// 查询表达式树
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Predicate(Predicate),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

impl Expression {
    pub fn and(self, rhs: Expression) -> Expression {
        Expression::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expression) -> Expression {
        Expression::Or(Box::new(self), Box::new(rhs))
    }

    /// 以驱动提供的谓词求值函数遍历整棵表达式树
    ///
    /// 短路求值会吞掉驱动对未访问分支的 `UnsupportedPredicate` 报告，
    /// 因此这里不做短路。
    pub fn evaluate<F>(&self, eval: &F) -> ShepherdResult<bool>
    where
        F: Fn(&Predicate) -> ShepherdResult<bool>,
    {
        match self {
            Expression::Predicate(p) => {
                let hit = eval(p)?;
                Ok(if p.negated { !hit } else { hit })
            }
            Expression::And(lhs, rhs) => {
                let l = lhs.evaluate(eval)?;
                let r = rhs.evaluate(eval)?;
                Ok(l && r)
            }
            Expression::Or(lhs, rhs) => {
                let l = lhs.evaluate(eval)?;
                let r = rhs.evaluate(eval)?;
                Ok(l || r)
            }
        }
    }

    /// 收集表达式中引用的所有键（用于驱动预检）
    pub fn keys(&self) -> Vec<&Key> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a Key>) {
        match self {
            Expression::Predicate(p) => out.push(&p.key),
            Expression::And(lhs, rhs) | Expression::Or(lhs, rhs) => {
                lhs.collect_keys(out);
                rhs.collect_keys(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_predicate(comparator: Comparator, bytes: i64) -> Expression {
        Expression::Predicate(Predicate {
            key: Key::Attribute(Attribute::Size),
            comparator,
            value: Value::Bytes(bytes),
            negated: false,
        })
    }

    #[test]
    fn test_expression_evaluation() {
        let expr = size_predicate(Comparator::Gt, 100).and(size_predicate(Comparator::Lt, 200));

        let eval = |p: &Predicate| {
            let size = 150i64;
            match &p.value {
                Value::Bytes(b) => Ok(p.comparator.compare_i64(size, *b)),
                _ => unreachable!(),
            }
        };

        assert!(expr.evaluate(&eval).unwrap());

        let expr = size_predicate(Comparator::Gt, 500).or(size_predicate(Comparator::Eq, 150));
        assert!(expr.evaluate(&eval).unwrap());
    }

    #[test]
    fn test_negated_predicate() {
        let expr = Expression::Predicate(Predicate {
            key: Key::Attribute(Attribute::Name),
            comparator: Comparator::Eq,
            value: Value::Text("*.bam".to_string()),
            negated: true,
        });

        let eval = |_: &Predicate| Ok(true);
        assert!(!expr.evaluate(&eval).unwrap());
    }

    #[test]
    fn test_key_collection() {
        let expr = size_predicate(Comparator::Gt, 1).and(Expression::Predicate(Predicate {
            key: Key::Metadata("study".to_string()),
            comparator: Comparator::Eq,
            value: Value::Text("xyz".to_string()),
            negated: false,
        }));

        let keys = expr.keys();
        assert_eq!(keys.len(), 2);
        assert!(matches!(keys[1], Key::Metadata(k) if k == "study"));
    }
}
