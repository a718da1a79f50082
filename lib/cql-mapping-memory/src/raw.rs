//! `SELECT` statements written as CQL text.
//!
//! Covers the single-table form: a column list or `*`, `WHERE` restrictions
//! joined by `AND` (`=`, `<`, `<=`, `>`, `>=`, `IN`, `CONTAINS`), `LIMIT` and
//! `ALLOW FILTERING`. Values come from `?` markers, in order, or from string
//! and numeric literals.

use std::iter::Peekable;
use std::str::Chars;

use cql_mapping::{Filter, MappingError, Value};

fn invalid(message: impl Into<String>) -> MappingError {
    MappingError::Driver(message.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Literal(Value),
    Marker,
    Symbol(&'static str),
}

fn quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String, MappingError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => {
                if chars.next_if_eq(&quote).is_some() {
                    text.push(quote);
                } else {
                    return Ok(text);
                }
            }
            Some(c) => text.push(c),
            None => return Err(invalid("unterminated quoted text")),
        }
    }
}

fn number(text: &str) -> Result<Value, MappingError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::BigInt(n));
    }
    text.parse::<f64>()
        .map(Value::Double)
        .map_err(|_| invalid(format!("invalid number {}", text)))
}

fn tokenize(cql: &str) -> Result<Vec<Token>, MappingError> {
    let mut tokens = Vec::new();
    let mut chars = cql.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let token = match c {
            '?' => {
                chars.next();
                Token::Marker
            }
            '\'' => {
                chars.next();
                Token::Literal(Value::Text(quoted(&mut chars, '\'')?))
            }
            '"' => {
                chars.next();
                Token::Quoted(quoted(&mut chars, '"')?)
            }
            '<' | '>' => {
                chars.next();
                match (c, chars.next_if_eq(&'=').is_some()) {
                    ('<', true) => Token::Symbol("<="),
                    ('<', false) => Token::Symbol("<"),
                    (_, true) => Token::Symbol(">="),
                    (_, false) => Token::Symbol(">"),
                }
            }
            '=' | ',' | '*' | '(' | ')' | '.' | ';' => {
                chars.next();
                Token::Symbol(match c {
                    '=' => "=",
                    ',' => ",",
                    '*' => "*",
                    '(' => "(",
                    ')' => ")",
                    '.' => ".",
                    _ => ";",
                })
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                while let Some(d) =
                    chars.next_if(|d| d.is_ascii_digit() || matches!(*d, '-' | '.' | 'e' | 'E'))
                {
                    text.push(d);
                }
                Token::Literal(number(&text)?)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(w) = chars.next_if(|w| w.is_alphanumeric() || *w == '_') {
                    word.push(w);
                }
                Token::Word(word)
            }
            other => return Err(invalid(format!("unexpected character '{}' in CQL", other))),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// A parsed single-table `SELECT`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawSelect {
    pub keyspace: Option<String>,
    pub table: String,
    /// Empty for `*`.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub limit: Option<u32>,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    values: std::slice::Iter<'a, Value>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword));
        if found {
            self.position += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), MappingError> {
        if self.keyword(keyword) {
            Ok(())
        } else {
            Err(invalid(format!(
                "expected {} in raw CQL, found {:?}; the in-memory store runs SELECT only",
                keyword,
                self.peek()
            )))
        }
    }

    fn symbol(&mut self, symbol: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if found {
            self.position += 1;
        }
        found
    }

    /// Unquoted names fold to lower case, quoted names keep their case.
    fn identifier(&mut self) -> Result<String, MappingError> {
        let name = match self.peek() {
            Some(Token::Word(word)) => word.to_ascii_lowercase(),
            Some(Token::Quoted(name)) => name.clone(),
            other => return Err(invalid(format!("expected an identifier, found {:?}", other))),
        };
        self.position += 1;
        Ok(name)
    }

    fn value(&mut self) -> Result<Value, MappingError> {
        let value = match self.peek() {
            Some(Token::Marker) => self
                .values
                .next()
                .cloned()
                .ok_or_else(|| invalid("more markers than bound values"))?,
            Some(Token::Literal(value)) => value.clone(),
            other => return Err(invalid(format!("expected a value, found {:?}", other))),
        };
        self.position += 1;
        Ok(value)
    }

    fn restriction(&mut self) -> Result<Filter, MappingError> {
        let column = self.identifier()?;
        if self.keyword("CONTAINS") {
            return Ok(Filter::Contains(column, self.value()?));
        }
        if self.keyword("IN") {
            let candidates = if self.symbol("(") {
                let mut candidates = vec![self.value()?];
                while self.symbol(",") {
                    candidates.push(self.value()?);
                }
                if !self.symbol(")") {
                    return Err(invalid("unclosed IN list"));
                }
                candidates
            } else {
                match self.value()? {
                    Value::List(items) | Value::Set(items) => items,
                    single => vec![single],
                }
            };
            return Ok(Filter::In(column, candidates));
        }

        let operator = match self.peek() {
            Some(Token::Symbol(s)) if matches!(*s, "=" | "<" | "<=" | ">" | ">=") => *s,
            other => return Err(invalid(format!("expected an operator, found {:?}", other))),
        };
        self.position += 1;
        let value = self.value()?;
        Ok(match operator {
            "=" => Filter::Eq(column, value),
            "<" => Filter::Lt(column, value),
            "<=" => Filter::Lte(column, value),
            ">" => Filter::Gt(column, value),
            _ => Filter::Gte(column, value),
        })
    }

    fn select(&mut self) -> Result<RawSelect, MappingError> {
        self.expect_keyword("SELECT")?;
        let mut columns = Vec::new();
        if !self.symbol("*") {
            columns.push(self.identifier()?);
            while self.symbol(",") {
                columns.push(self.identifier()?);
            }
        }

        self.expect_keyword("FROM")?;
        let first = self.identifier()?;
        let (keyspace, table) = if self.symbol(".") {
            (Some(first), self.identifier()?)
        } else {
            (None, first)
        };

        let mut filters = Vec::new();
        if self.keyword("WHERE") {
            filters.push(self.restriction()?);
            while self.keyword("AND") {
                filters.push(self.restriction()?);
            }
        }

        let mut limit = None;
        if self.keyword("LIMIT") {
            let value = self.value()?;
            let rows = value
                .as_i64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid(format!("invalid LIMIT {:?}", value)))?;
            limit = Some(rows);
        }
        if self.keyword("ALLOW") {
            self.expect_keyword("FILTERING")?;
        }
        self.symbol(";");

        if let Some(token) = self.peek() {
            return Err(invalid(format!("unsupported CQL near {:?}", token)));
        }
        Ok(RawSelect {
            keyspace,
            table,
            columns,
            filters,
            limit,
        })
    }
}

/// Parse `cql` as a `SELECT`, binding `?` markers from `values` in order.
pub(crate) fn parse_select(cql: &str, values: &[Value]) -> Result<RawSelect, MappingError> {
    Parser {
        tokens: tokenize(cql)?,
        position: 0,
        values: values.iter(),
    }
    .select()
}
