// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ucloud-sql.

use thiserror::Error;

/// Result type using [`SqlError`].
pub type Result<T> = std::result::Result<T, SqlError>;

/// Errors raised by sessions, statements and cursors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqlError {
    /// The underlying driver reported an error.
    #[error("Database error: {0}")]
    Driver(#[from] sqlx::Error),

    /// A named parameter referenced by the statement was never bound.
    #[error("Parameter ':{name}' is used by the statement but was never bound")]
    UnboundParameter {
        /// Name of the parameter, without the leading marker.
        name: String,
    },

    /// A column getter was called before `next()` or after the cursor was exhausted.
    #[error("Cursor is not positioned on a row (call next() first)")]
    NoCurrentRow,

    /// The column index is outside the current row.
    #[error("Column {index} is out of range (row has {count} columns)")]
    ColumnOutOfRange {
        /// Requested column index.
        index: usize,
        /// Number of columns in the row.
        count: usize,
    },

    /// The column could not be read as the requested type.
    #[error("Column {index} cannot be read as {expected}: {details}")]
    ColumnType {
        /// Requested column index.
        index: usize,
        /// Requested type.
        expected: &'static str,
        /// Driver details.
        details: String,
    },

    /// A transaction operation was issued in the wrong state.
    #[error("Invalid transaction state: {0}")]
    TransactionState(&'static str),
}

impl SqlError {
    pub(crate) fn column_type(index: usize, expected: &'static str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => SqlError::ColumnOutOfRange {
                index,
                count: len,
            },
            other => SqlError::ColumnType {
                index,
                expected,
                details: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_display() {
        let err = SqlError::UnboundParameter {
            name: "id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parameter ':id' is used by the statement but was never bound"
        );

        let err = SqlError::ColumnOutOfRange { index: 3, count: 1 };
        assert_eq!(
            err.to_string(),
            "Column 3 is out of range (row has 1 columns)"
        );

        let err = SqlError::NoCurrentRow;
        assert!(err.to_string().contains("next()"));
    }

    #[test]
    fn test_column_type_maps_out_of_bounds() {
        let err = SqlError::column_type(
            5,
            "long",
            sqlx::Error::ColumnIndexOutOfBounds { index: 5, len: 2 },
        );
        assert!(matches!(
            err,
            SqlError::ColumnOutOfRange { index: 5, count: 2 }
        ));

        let err = SqlError::column_type(0, "long", sqlx::Error::RowNotFound);
        assert!(matches!(
            err,
            SqlError::ColumnType {
                index: 0,
                expected: "long",
                ..
            }
        ));
    }
}
