//! Opaque query strings understood by the record store.
//!
//! The indexing engine never parses these; it hands the string to the store,
//! which parses it on the first key fetch. The grammar is a conjunction of
//! comparisons:
//!
//! ```text
//! query  := clause ( AND clause )*
//! clause := field op literal
//! op     := = | != | < | <= | > | >=
//! literal:= 'text' | number | true | false | null
//! ```
//!
//! The pseudo-field `id` compares against the primary key.

use std::cmp::Ordering;

use massindex_types::Record;
use serde_json::Value;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    op: Op,
    value: Value,
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(Op),
    Literal(Value),
}

fn tokenize(input: &str) -> Result<Vec<Token>, StorageError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '\'')
                .map(|p| start + p)
                .ok_or_else(|| StorageError::Query(format!("unterminated string in {:?}", input)))?;
            tokens.push(Token::Literal(Value::String(chars[start..end].iter().collect())));
            i = end + 1;
        } else if matches!(c, '=' | '!' | '<' | '>') {
            let next = chars.get(i + 1).copied();
            let (op, width) = match (c, next) {
                ('=', _) => (Op::Eq, 1),
                ('!', Some('=')) => (Op::Ne, 2),
                ('<', Some('=')) => (Op::Le, 2),
                ('>', Some('=')) => (Op::Ge, 2),
                ('<', _) => (Op::Lt, 1),
                ('>', _) => (Op::Gt, 1),
                _ => {
                    return Err(StorageError::Query(format!(
                        "unexpected '{}' at offset {}",
                        c, i
                    )))
                }
            };
            tokens.push(Token::Op(op));
            i += width;
        } else if c.is_ascii_digit() || c == '-' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = if let Ok(n) = text.parse::<i64>() {
                Value::from(n)
            } else {
                let f = text
                    .parse::<f64>()
                    .map_err(|_| StorageError::Query(format!("invalid number {:?}", text)))?;
                Value::from(f)
            };
            tokens.push(Token::Literal(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.to_ascii_lowercase().as_str() {
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "null" => Token::Literal(Value::Null),
                _ => Token::Ident(word),
            };
            tokens.push(token);
        } else {
            return Err(StorageError::Query(format!(
                "unexpected '{}' at offset {}",
                c, i
            )));
        }
    }

    Ok(tokens)
}

impl Query {
    /// Parse a query string.
    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(StorageError::Query("empty query".to_string()));
        }

        let mut clauses = Vec::new();
        let mut iter = tokens.into_iter();
        loop {
            let field = match iter.next() {
                Some(Token::Ident(name)) if !name.eq_ignore_ascii_case("and") => name,
                other => {
                    return Err(StorageError::Query(format!(
                        "expected field name, found {:?}",
                        other
                    )))
                }
            };
            let op = match iter.next() {
                Some(Token::Op(op)) => op,
                other => {
                    return Err(StorageError::Query(format!(
                        "expected operator after {}, found {:?}",
                        field, other
                    )))
                }
            };
            let value = match iter.next() {
                Some(Token::Literal(value)) => value,
                other => {
                    return Err(StorageError::Query(format!(
                        "expected literal after {}, found {:?}",
                        field, other
                    )))
                }
            };
            clauses.push(Clause { field, op, value });

            match iter.next() {
                None => break,
                Some(Token::Ident(word)) if word.eq_ignore_ascii_case("and") => continue,
                Some(other) => {
                    return Err(StorageError::Query(format!(
                        "expected AND, found {:?}",
                        other
                    )))
                }
            }
        }

        Ok(Self { clauses })
    }

    /// Whether the record satisfies every clause.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| {
            let key_value;
            let actual = if clause.field == "id" {
                key_value = Value::from(record.key);
                Some(&key_value)
            } else {
                record.field(&clause.field)
            };
            match actual {
                Some(actual) => compare(actual, clause.op, &clause.value),
                None => clause.op == Op::Eq && clause.value.is_null(),
            }
        })
    }
}

fn compare(actual: &Value, op: Op, expected: &Value) -> bool {
    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) => (a == b).then_some(Ordering::Equal),
    };

    match op {
        Op::Eq => ordering == Some(Ordering::Equal),
        Op::Ne => ordering != Some(Ordering::Equal),
        Op::Lt => ordering == Some(Ordering::Less),
        Op::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Op::Gt => ordering == Some(Ordering::Greater),
        Op::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}
