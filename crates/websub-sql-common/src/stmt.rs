//! SQL statement builder
//!
//! Statements are written with `:name` placeholders and bound by name; the
//! final `to_sql` pass rewrites them into `$1..$n` positional placeholders,
//! which both supported drivers understand. Parsing and the rewritten SQL
//! are cached per statement text.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use websub_common::database::Error;

use crate::database::DatabaseExecutor;
use crate::value::Value;

/// The column type
pub type Column = Value;

/// Expected response shape for a statement
#[derive(Debug, Clone, Copy, Default)]
pub enum ExpectedSqlResponse {
    /// A single row
    SingleRow,
    /// All matching rows
    #[default]
    ManyRows,
    /// The affected row count
    AffectedRows,
    /// The first column of the first row
    Pluck,
    /// A multi-statement batch
    Batch,
}

/// One lexed piece of a statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlPart {
    /// Raw SQL text
    Raw(Arc<str>),
    /// A named placeholder and its bound value
    Placeholder(Arc<str>, Option<Value>),
}

/// Statement lexing error
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SqlParseError {
    /// A quote never closed
    #[error("Unterminated string literal")]
    UnterminatedStringLiteral,
    /// `:` not followed by a placeholder name
    #[error("Invalid placeholder name")]
    InvalidPlaceholder,
}

/// Splits a statement into raw SQL and placeholder parts.
///
/// No SQL validation happens here; the only job is extracting `:name`
/// placeholders while leaving string literals alone.
pub fn split_sql_parts(input: &str) -> Result<Vec<SqlPart>, SqlParseError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '\'' | '"' => {
                let quote = c;
                current.push(c);
                chars.next();

                let mut closed = false;
                while let Some(next) = chars.next() {
                    current.push(next);

                    if next == quote {
                        if chars.peek() == Some(&quote) {
                            // Escaped quote inside the literal
                            current.push(quote);
                            chars.next();
                        } else {
                            closed = true;
                            break;
                        }
                    }
                }

                if !closed {
                    return Err(SqlParseError::UnterminatedStringLiteral);
                }
            }

            ':' => {
                if !current.is_empty() {
                    parts.push(SqlPart::Raw(current.clone().into()));
                    current.clear();
                }

                chars.next();
                let mut name = String::new();

                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }

                if name.is_empty() {
                    return Err(SqlParseError::InvalidPlaceholder);
                }

                parts.push(SqlPart::Placeholder(name.into(), None));
            }

            _ => {
                current.push(c);
                chars.next();
            }
        }
    }

    if !current.is_empty() {
        parts.push(SqlPart::Raw(current.into()));
    }

    Ok(parts)
}

type Cache = HashMap<String, (Vec<SqlPart>, Option<Arc<str>>)>;

/// A statement with its bindings
#[derive(Debug, Default)]
pub struct Statement {
    cache: Arc<RwLock<Cache>>,
    cached_sql: Option<Arc<str>>,
    sql: Option<String>,
    /// The lexed statement parts
    pub parts: Vec<SqlPart>,
    /// The expected response shape
    pub expected_response: ExpectedSqlResponse,
}

impl Statement {
    fn new(sql: &str, cache: Arc<RwLock<Cache>>) -> Result<Self, SqlParseError> {
        let parsed = cache
            .read()
            .map(|cache| cache.get(sql).cloned())
            .ok()
            .flatten();

        if let Some((parts, cached_sql)) = parsed {
            Ok(Self {
                parts,
                cached_sql,
                sql: None,
                cache,
                ..Default::default()
            })
        } else {
            let parts = split_sql_parts(sql)?;

            if let Ok(mut cache) = cache.write() {
                cache.insert(sql.to_owned(), (parts.clone(), None));
            } else {
                tracing::warn!("Failed to acquire write lock for SQL statement cache");
            }

            Ok(Self {
                parts,
                sql: Some(sql.to_owned()),
                cache,
                ..Default::default()
            })
        }
    }

    /// Renders the statement into positional-placeholder SQL plus the bound
    /// values, in order. Every placeholder must have been bound.
    pub fn to_sql(self) -> Result<(String, Vec<Value>), Error> {
        if let Some(cached_sql) = self.cached_sql {
            let sql = cached_sql.to_string();
            let values = self
                .parts
                .into_iter()
                .filter_map(|part| match part {
                    SqlPart::Placeholder(name, value) => {
                        Some(value.ok_or(Error::MissingPlaceholder(name.to_string())))
                    }
                    SqlPart::Raw(_) => None,
                })
                .collect::<Result<Vec<_>, Error>>()?;
            return Ok((sql, values));
        }

        let mut placeholder_values = Vec::new();
        let sql = self
            .parts
            .into_iter()
            .map(|part| match part {
                SqlPart::Placeholder(name, value) => {
                    let value = value.ok_or(Error::MissingPlaceholder(name.to_string()))?;
                    placeholder_values.push(value);
                    Ok::<_, Error>(format!("${}", placeholder_values.len()))
                }
                SqlPart::Raw(raw) => Ok(raw.trim().to_string()),
            })
            .collect::<Result<Vec<String>, _>>()?
            .join(" ");

        if let Some(original_sql) = self.sql {
            let _ = self.cache.write().map(|mut cache| {
                if let Some((_, cached_sql)) = cache.get_mut(&original_sql) {
                    *cached_sql = Some(sql.clone().into());
                }
            });
        }

        Ok((sql, placeholder_values))
    }

    /// Binds a placeholder to a value. Every occurrence of the name is bound.
    #[inline]
    pub fn bind<C, V>(mut self, name: C, value: V) -> Self
    where
        C: ToString,
        V: Into<Value>,
    {
        let name = name.to_string();
        let value: Value = value.into();

        for part in self.parts.iter_mut() {
            if let SqlPart::Placeholder(part_name, part_value) = part {
                if **part_name == *name.as_str() {
                    *part_value = Some(value.clone());
                }
            }
        }

        self
    }

    /// Runs the query returning the first column of the first row
    pub async fn pluck<C>(self, conn: &C) -> Result<Option<Value>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.pluck(self).await
    }

    /// Executes a multi-statement batch
    pub async fn batch<C>(self, conn: &C) -> Result<(), Error>
    where
        C: DatabaseExecutor,
    {
        conn.batch(self).await
    }

    /// Executes the statement returning the affected row count
    pub async fn execute<C>(self, conn: &C) -> Result<usize, Error>
    where
        C: DatabaseExecutor,
    {
        conn.execute(self).await
    }

    /// Runs the query and returns the first row, if any
    pub async fn fetch_one<C>(self, conn: &C) -> Result<Option<Vec<Column>>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.fetch_one(self).await
    }

    /// Runs the query and returns every matching row
    pub async fn fetch_all<C>(self, conn: &C) -> Result<Vec<Vec<Column>>, Error>
    where
        C: DatabaseExecutor,
    {
        conn.fetch_all(self).await
    }
}

/// Creates a new statement
#[inline(always)]
pub fn query(sql: &str) -> Result<Statement, Error> {
    static CACHE: Lazy<Arc<RwLock<Cache>>> = Lazy::new(|| Arc::new(RwLock::new(HashMap::new())));
    Statement::new(sql, CACHE.clone()).map_err(|e| Error::Database(Box::new(e)))
}
