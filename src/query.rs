//! 目标查询 DSL 解析
//!
//! ```text
//! QUERY     = "take" SOURCE [ "where" EXPRESSION ]
//! SOURCE    = "from" PATH ["compressed"] ["delimited" "by" OCTET]
//!           | 1*PATH
//! EXPRESSION= PREDICATE (("and"|"or") EXPRESSION)* | "(" EXPRESSION ")"
//! PREDICATE = ["not"] KEY COMPARATOR VALUE
//! ```
//!
//! 词法单元即 shell 切分后的参数。`and` 与 `or` 同优先级、左结合，
//! 括号分组。大小与时间单位在此归一化为字节数与秒数。

use once_cell::sync::Lazy;
use regex::Regex;

use shepherd_domain::{
    Attribute, Comparator, Expression, Key, Predicate, QuerySource, Value,
};
use shepherd_errors::{ShepherdError, ShepherdResult};

/// 解析完整的 take 子句
pub fn parse_query(tokens: &[String]) -> ShepherdResult<(QuerySource, Option<Expression>)> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.expect("take")?;
    let source = parser.parse_source()?;

    let criteria = if parser.peek() == Some("where") {
        parser.advance();
        let expression = parser.parse_expression()?;
        Some(expression)
    } else {
        None
    };

    if let Some(extra) = parser.peek() {
        return Err(ShepherdError::Query(format!("查询末尾存在多余内容: {extra}")));
    }
    Ok((source, criteria))
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn advance(&mut self) -> Option<&'a str> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expect(&mut self, keyword: &str) -> ShepherdResult<()> {
        match self.advance() {
            Some(token) if token == keyword => Ok(()),
            Some(token) => Err(ShepherdError::Query(format!(
                "期望 '{keyword}'，得到 '{token}'"
            ))),
            None => Err(ShepherdError::Query(format!("期望 '{keyword}'，查询提前结束"))),
        }
    }

    fn parse_source(&mut self) -> ShepherdResult<QuerySource> {
        if self.peek() == Some("from") {
            self.advance();
            let path = self
                .advance()
                .ok_or_else(|| ShepherdError::Query("'from' 后缺少文件清单路径".to_string()))?
                .to_string();

            let mut compressed = false;
            let mut delimiter = b'\n';
            loop {
                match self.peek() {
                    Some("compressed") => {
                        self.advance();
                        compressed = true;
                    }
                    Some("delimited") => {
                        self.advance();
                        self.expect("by")?;
                        let octet = self.advance().ok_or_else(|| {
                            ShepherdError::Query("'delimited by' 后缺少分隔字节".to_string())
                        })?;
                        delimiter = octet.parse::<u8>().map_err(|_| {
                            ShepherdError::Query(format!("分隔字节无效: {octet}"))
                        })?;
                    }
                    _ => break,
                }
            }
            return Ok(QuerySource::Fofn {
                path,
                compressed,
                delimiter,
            });
        }

        // 一个或多个检索根，直到 where 或结束
        let mut roots = Vec::new();
        while let Some(token) = self.peek() {
            if token == "where" {
                break;
            }
            roots.push(token.to_string());
            self.advance();
        }
        if roots.is_empty() {
            return Err(ShepherdError::Query("'take' 后缺少检索根或文件清单".to_string()));
        }
        Ok(QuerySource::Roots(roots))
    }

    fn parse_expression(&mut self) -> ShepherdResult<Expression> {
        let mut expression = self.parse_operand()?;
        loop {
            match self.peek() {
                Some("and") => {
                    self.advance();
                    expression = expression.and(self.parse_operand()?);
                }
                Some("or") => {
                    self.advance();
                    expression = expression.or(self.parse_operand()?);
                }
                _ => break,
            }
        }
        Ok(expression)
    }

    fn parse_operand(&mut self) -> ShepherdResult<Expression> {
        if self.peek() == Some("(") {
            self.advance();
            let inner = self.parse_expression()?;
            self.expect(")")?;
            return Ok(inner);
        }
        self.parse_predicate().map(Expression::Predicate)
    }

    fn parse_predicate(&mut self) -> ShepherdResult<Predicate> {
        let negated = if self.peek() == Some("not") {
            self.advance();
            true
        } else {
            false
        };

        let key_token = self
            .advance()
            .ok_or_else(|| ShepherdError::Query("谓词缺少键".to_string()))?;
        let key = if let Some(name) = key_token.strip_prefix(':') {
            if name.is_empty() {
                return Err(ShepherdError::Query("':' 后缺少元数据键名".to_string()));
            }
            Key::Metadata(name.to_string())
        } else {
            Key::Attribute(Attribute::parse(key_token).ok_or_else(|| {
                ShepherdError::Query(format!("未知的属性: {key_token}"))
            })?)
        };

        let comparator = match self.advance() {
            Some("=") => Comparator::Eq,
            Some(">") => Comparator::Gt,
            Some(">=") => Comparator::Ge,
            Some("<") => Comparator::Lt,
            Some("<=") => Comparator::Le,
            Some(other) => {
                return Err(ShepherdError::Query(format!("未知的比较符: {other}")))
            }
            None => return Err(ShepherdError::Query("谓词缺少比较符".to_string())),
        };

        let value_token = self
            .advance()
            .ok_or_else(|| ShepherdError::Query("谓词缺少值".to_string()))?;

        Ok(Predicate {
            key,
            comparator,
            value: parse_value(value_token),
            negated,
        })
    }
}

static SIZE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(k|M|G|T|P)(i?)B?$").unwrap());
static TIME_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)(hour|day|week|year)s?$").unwrap());

/// 带单位的值归一化：大小 → 字节数、时间 → 秒数，其余保留原文
pub fn parse_value(token: &str) -> Value {
    if let Some(captures) = SIZE_VALUE.captures(token) {
        let quantity: f64 = captures[1].parse().unwrap_or(0.0);
        let exponent = match &captures[2] {
            "k" => 1,
            "M" => 2,
            "G" => 3,
            "T" => 4,
            _ => 5,
        };
        let base: f64 = if &captures[3] == "i" { 1024.0 } else { 1000.0 };
        return Value::Bytes((quantity * base.powi(exponent)) as i64);
    }

    if let Some(captures) = TIME_VALUE.captures(token) {
        let quantity: f64 = captures[1].parse().unwrap_or(0.0);
        let unit_seconds: i64 = match &captures[2] {
            "hour" => 3600,
            "day" => 86_400,
            "week" => 604_800,
            _ => 31_536_000,
        };
        return Value::AgeSeconds((quantity * unit_seconds as f64) as i64);
    }

    if let Ok(number) = token.parse::<i64>() {
        return Value::Bytes(number);
    }

    Value::Text(token.to_string())
}
