// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Forward-only cursor over statement results.

use sqlx::any::AnyRow;
use sqlx::{Row, Type, Decode, Any};

use crate::error::{Result, SqlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    Exhausted,
}

enum Rows {
    Query(Vec<AnyRow>),
    UpdateCount(i64),
}

/// Result of invoking a statement.
///
/// Starts before the first row; call [`ResultCursor::next`] to advance. Once `next`
/// returns `false` the cursor stays exhausted. Statements without result columns
/// produce a single row with the affected-row count in column 0.
pub struct ResultCursor {
    rows: Rows,
    position: Position,
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("rows", &self.row_count())
            .field("position", &self.position)
            .finish()
    }
}

impl ResultCursor {
    pub(crate) fn from_rows(rows: Vec<AnyRow>) -> Self {
        Self {
            rows: Rows::Query(rows),
            position: Position::BeforeFirst,
        }
    }

    pub(crate) fn from_update_count(count: u64) -> Self {
        Self {
            rows: Rows::UpdateCount(i64::try_from(count).unwrap_or(i64::MAX)),
            position: Position::BeforeFirst,
        }
    }

    fn row_count(&self) -> usize {
        match &self.rows {
            Rows::Query(rows) => rows.len(),
            Rows::UpdateCount(_) => 1,
        }
    }

    /// Whether the result came from a statement without result columns.
    pub fn is_update_count(&self) -> bool {
        matches!(self.rows, Rows::UpdateCount(_))
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted.
    pub fn next(&mut self) -> bool {
        let candidate = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::Exhausted => return false,
        };

        if candidate < self.row_count() {
            self.position = Position::At(candidate);
            true
        } else {
            self.position = Position::Exhausted;
            false
        }
    }

    fn current(&self) -> Result<usize> {
        match self.position {
            Position::At(i) => Ok(i),
            _ => Err(SqlError::NoCurrentRow),
        }
    }

    /// Number of columns in the current row.
    pub fn column_count(&self) -> Result<usize> {
        let index = self.current()?;
        Ok(match &self.rows {
            Rows::Query(rows) => rows[index].len(),
            Rows::UpdateCount(_) => 1,
        })
    }

    fn update_count_column(&self, column: usize) -> Result<i64> {
        match self.rows {
            Rows::UpdateCount(count) if column == 0 => Ok(count),
            _ => Err(SqlError::ColumnOutOfRange {
                index: column,
                count: 1,
            }),
        }
    }

    fn decode<T>(&self, column: usize, expected: &'static str) -> Result<Option<T>>
    where
        T: for<'r> Decode<'r, Any> + Type<Any>,
    {
        let index = self.current()?;
        match &self.rows {
            Rows::Query(rows) => rows[index]
                .try_get::<Option<T>, _>(column)
                .map_err(|e| SqlError::column_type(column, expected, e)),
            Rows::UpdateCount(_) => Err(SqlError::ColumnType {
                index: column,
                expected,
                details: "update count rows only hold a long".to_string(),
            }),
        }
    }

    /// Read column `column` as a 64-bit integer.
    pub fn get_long(&self, column: usize) -> Result<Option<i64>> {
        self.current()?;
        if self.is_update_count() {
            return self.update_count_column(column).map(Some);
        }
        self.decode::<i64>(column, "long")
    }

    /// Read column `column` as a 32-bit integer.
    pub fn get_int(&self, column: usize) -> Result<Option<i32>> {
        let Some(value) = self.get_long(column)? else {
            return Ok(None);
        };
        i32::try_from(value)
            .map(Some)
            .map_err(|e| SqlError::ColumnType {
                index: column,
                expected: "int",
                details: e.to_string(),
            })
    }

    /// Read column `column` as text.
    pub fn get_string(&self, column: usize) -> Result<Option<String>> {
        self.decode::<String>(column, "string")
    }

    /// Read column `column` as a boolean. Integer columns read as `value != 0`.
    pub fn get_bool(&self, column: usize) -> Result<Option<bool>> {
        match self.decode::<bool>(column, "bool") {
            Ok(value) => Ok(value),
            Err(SqlError::ColumnType { .. }) => Ok(self.get_long(column)?.map(|v| v != 0)),
            Err(e) => Err(e),
        }
    }

    /// Read column `column` as a double. Integer columns are widened.
    pub fn get_double(&self, column: usize) -> Result<Option<f64>> {
        match self.decode::<f64>(column, "double") {
            Ok(value) => Ok(value),
            Err(SqlError::ColumnType { .. }) => Ok(self.get_long(column)?.map(|v| v as f64)),
            Err(e) => Err(e),
        }
    }
}
