// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prepared statements with named parameters.
//!
//! SQL is written with `:name` (or `?name`) placeholders. The text is rewritten once,
//! when the statement is created, into the positional form of the connected backend
//! (`$1, $2, ...` for PostgreSQL, `?` for everything else). A name may appear any
//! number of times; every occurrence receives the value bound to that name.
//!
//! ```ignore
//! let mut stmt = conn.prepare_statement(
//!     "select id, title from tags where owner = :owner or creator = :owner",
//! );
//! stmt.bind_string("owner", "alice");
//! let mut rows = stmt.invoke(&mut conn).await?;
//! while rows.next() {
//!     let id = rows.get_long(0)?;
//! }
//! ```

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::connection::Connection;
use crate::cursor::ResultCursor;
use crate::error::{Result, SqlError};
use crate::value::{SqlType, SqlValue};

/// Positional placeholder syntax used by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL).
    Numbered,
    /// `?` for every position (SQLite, MySQL).
    QuestionMark,
}

impl PlaceholderStyle {
    /// Pick the placeholder style for a sqlx backend name.
    pub fn for_backend(backend_name: &str) -> Self {
        if backend_name.eq_ignore_ascii_case("postgresql") || backend_name.eq_ignore_ascii_case("postgres") {
            PlaceholderStyle::Numbered
        } else {
            PlaceholderStyle::QuestionMark
        }
    }
}

/// SQL text rewritten from named to positional placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSql {
    /// Rewritten SQL.
    pub sql: String,
    /// Parameter name to zero-based positions.
    pub parameters: BTreeMap<String, Vec<usize>>,
    /// Total number of positional placeholders.
    pub slots: usize,
}

#[derive(Clone, PartialEq, Eq)]
enum ScanState {
    Normal,
    SingleQuote,
    DoubleQuote,
    LineComment,
    BlockComment,
    /// Inside a dollar-quoted body; holds the full delimiter (`$$` or `$tag$`).
    DollarQuote(String),
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The dollar-quote delimiter opening at `chars[i]`, if any.
fn dollar_quote_tag(chars: &[char], i: usize) -> Option<String> {
    // `a$b$` is an identifier, not a quote
    if i > 0 && is_ident_part(chars[i - 1]) {
        return None;
    }
    let mut end = i + 1;
    if chars.get(end).is_some_and(|c| is_ident_start(*c)) {
        while end < chars.len() && is_ident_part(chars[end]) {
            end += 1;
        }
    }
    (chars.get(end) == Some(&'$')).then(|| chars[i..=end].iter().collect())
}

fn starts_with_at(chars: &[char], i: usize, tag: &str) -> bool {
    let mut j = i;
    for t in tag.chars() {
        if chars.get(j) != Some(&t) {
            return false;
        }
        j += 1;
    }
    true
}

/// Rewrite `:name` / `?name` placeholders into the positional form of `style`.
///
/// Quoted strings, quoted identifiers, comments, dollar-quoted bodies and `::` casts
/// are copied through untouched.
pub fn compile_named_parameters(raw: &str, style: PlaceholderStyle) -> CompiledSql {
    let chars: Vec<char> = raw.chars().collect();
    let mut sql = String::with_capacity(raw.len());
    let mut parameters: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut slots = 0usize;
    let mut state = ScanState::Normal;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &state {
            ScanState::Normal => match c {
                '\'' => {
                    state = ScanState::SingleQuote;
                    sql.push(c);
                }
                '"' => {
                    state = ScanState::DoubleQuote;
                    sql.push(c);
                }
                '-' if next == Some('-') => {
                    state = ScanState::LineComment;
                    sql.push_str("--");
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = ScanState::BlockComment;
                    sql.push_str("/*");
                    i += 1;
                }
                '$' => match dollar_quote_tag(&chars, i) {
                    Some(tag) => {
                        sql.push_str(&tag);
                        i += tag.chars().count() - 1;
                        state = ScanState::DollarQuote(tag);
                    }
                    None => sql.push(c),
                },
                ':' if next == Some(':') => {
                    sql.push_str("::");
                    i += 1;
                }
                ':' | '?' if next.is_some_and(is_ident_start) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident_part(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();

                    let position = slots;
                    slots += 1;
                    match style {
                        PlaceholderStyle::Numbered => {
                            sql.push('$');
                            sql.push_str(&(position + 1).to_string());
                        }
                        PlaceholderStyle::QuestionMark => sql.push('?'),
                    }
                    parameters.entry(name).or_default().push(position);
                    i = end;
                    continue;
                }
                _ => sql.push(c),
            },
            ScanState::SingleQuote => {
                sql.push(c);
                if c == '\'' {
                    state = ScanState::Normal;
                }
            }
            ScanState::DoubleQuote => {
                sql.push(c);
                if c == '"' {
                    state = ScanState::Normal;
                }
            }
            ScanState::LineComment => {
                sql.push(c);
                if c == '\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if c == '*' && next == Some('/') {
                    sql.push_str("*/");
                    i += 1;
                    state = ScanState::Normal;
                } else {
                    sql.push(c);
                }
            }
            ScanState::DollarQuote(tag) => {
                if c == '$' && starts_with_at(&chars, i, tag) {
                    sql.push_str(tag);
                    i += tag.chars().count() - 1;
                    state = ScanState::Normal;
                } else {
                    sql.push(c);
                }
            }
        }

        i += 1;
    }

    CompiledSql {
        sql,
        parameters,
        slots,
    }
}

/// A SQL statement with named parameters, reusable across bind/invoke/reset cycles.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    raw: String,
    compiled: CompiledSql,
    bindings: HashMap<String, SqlValue>,
}

impl PreparedStatement {
    /// Create a statement, rewriting its placeholders for `style`.
    pub fn new(raw: impl Into<String>, style: PlaceholderStyle) -> Self {
        let raw = raw.into();
        let compiled = compile_named_parameters(&raw, style);
        Self {
            raw,
            compiled,
            bindings: HashMap::new(),
        }
    }

    /// The SQL text as written by the caller.
    pub fn raw_sql(&self) -> &str {
        &self.raw
    }

    /// The SQL text sent to the driver.
    pub fn compiled_sql(&self) -> &str {
        &self.compiled.sql
    }

    /// Positions bound by `name`, empty if the statement does not use it.
    pub fn parameter_positions(&self, name: &str) -> &[usize] {
        self.compiled
            .parameters
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Names of all parameters used by the statement.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.compiled.parameters.keys().map(String::as_str)
    }

    /// Bind a value to `name`. Binding a name the statement does not use is a no-op.
    pub fn bind(&mut self, name: &str, value: impl Into<SqlValue>) -> &mut Self {
        if !self.compiled.parameters.contains_key(name) {
            debug!(parameter = name, "Ignoring binding for parameter not used by statement");
            return self;
        }
        self.bindings.insert(name.to_string(), value.into());
        self
    }

    /// Bind SQL NULL (typed as text) to `name`.
    pub fn bind_null(&mut self, name: &str) -> &mut Self {
        self.bind(name, SqlValue::Null(SqlType::Text))
    }

    pub fn bind_int(&mut self, name: &str, value: i32) -> &mut Self {
        self.bind(name, SqlValue::Int(value))
    }

    pub fn bind_int_nullable(&mut self, name: &str, value: Option<i32>) -> &mut Self {
        self.bind(name, value.map_or(SqlValue::Null(SqlType::Int), SqlValue::Int))
    }

    pub fn bind_long(&mut self, name: &str, value: i64) -> &mut Self {
        self.bind(name, SqlValue::Long(value))
    }

    pub fn bind_long_nullable(&mut self, name: &str, value: Option<i64>) -> &mut Self {
        self.bind(name, value.map_or(SqlValue::Null(SqlType::Long), SqlValue::Long))
    }

    pub fn bind_string(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.bind(name, SqlValue::Text(value.into()))
    }

    pub fn bind_string_nullable(&mut self, name: &str, value: Option<impl Into<String>>) -> &mut Self {
        let value = match value {
            Some(v) => SqlValue::Text(v.into()),
            None => SqlValue::Null(SqlType::Text),
        };
        self.bind(name, value)
    }

    pub fn bind_bool(&mut self, name: &str, value: bool) -> &mut Self {
        self.bind(name, SqlValue::Bool(value))
    }

    pub fn bind_bool_nullable(&mut self, name: &str, value: Option<bool>) -> &mut Self {
        self.bind(name, value.map_or(SqlValue::Null(SqlType::Bool), SqlValue::Bool))
    }

    pub fn bind_double(&mut self, name: &str, value: f64) -> &mut Self {
        self.bind(name, SqlValue::Double(value))
    }

    pub fn bind_double_nullable(&mut self, name: &str, value: Option<f64>) -> &mut Self {
        self.bind(name, value.map_or(SqlValue::Null(SqlType::Double), SqlValue::Double))
    }

    /// Clear all bindings so the statement can be reused.
    pub fn reset(&mut self) {
        self.bindings.clear();
    }

    /// Values in positional order.
    ///
    /// Fails with [`SqlError::UnboundParameter`] if any parameter is missing a value.
    pub fn positional_values(&self) -> Result<Vec<&SqlValue>> {
        let mut ordered: Vec<Option<&SqlValue>> = vec![None; self.compiled.slots];
        for (name, positions) in &self.compiled.parameters {
            let value = self
                .bindings
                .get(name)
                .ok_or_else(|| SqlError::UnboundParameter { name: name.clone() })?;
            for &position in positions {
                ordered[position] = Some(value);
            }
        }

        // Every slot belongs to exactly one name, so all slots are filled here.
        Ok(ordered.into_iter().flatten().collect())
    }

    /// Execute the statement on `conn`.
    ///
    /// Statements without result columns yield a one-row cursor holding the
    /// affected-row count in column 0.
    pub async fn invoke(&self, conn: &mut Connection) -> Result<ResultCursor> {
        let values = self.positional_values()?;
        conn.execute_compiled(&self.compiled.sql, &values).await
    }

    /// Execute the statement and ignore its result.
    pub async fn invoke_and_discard(&self, conn: &mut Connection) -> Result<()> {
        self.invoke(conn).await.map(|_| ())
    }

    /// Bind with `prepare`, execute, and feed every row to `read_row`.
    pub async fn use_and_invoke<P, R>(
        &mut self,
        conn: &mut Connection,
        prepare: P,
        mut read_row: R,
    ) -> Result<()>
    where
        P: FnOnce(&mut Self),
        R: FnMut(&ResultCursor) -> Result<()>,
    {
        prepare(self);
        let mut cursor = self.invoke(conn).await?;
        while cursor.next() {
            read_row(&cursor)?;
        }
        Ok(())
    }

    /// Bind with `prepare` and execute, discarding the result.
    pub async fn use_and_invoke_and_discard<P>(
        &mut self,
        conn: &mut Connection,
        prepare: P,
    ) -> Result<()>
    where
        P: FnOnce(&mut Self),
    {
        prepare(self);
        self.invoke_and_discard(conn).await
    }
}
