// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Values that can be bound to a prepared statement.

use sqlx::Any;
use sqlx::query::Query;
use sqlx::any::AnyArguments;

/// SQL type of a bound value. Carried by nulls so the driver can type the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Text.
    Text,
    /// Boolean.
    Bool,
    /// Double precision float.
    Double,
}

/// A typed value bound to a named parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Double precision float.
    Double(f64),
    /// SQL NULL of the given type.
    Null(SqlType),
}

impl SqlValue {
    /// The SQL type of this value.
    pub fn sql_type(&self) -> SqlType {
        match self {
            SqlValue::Int(_) => SqlType::Int,
            SqlValue::Long(_) => SqlType::Long,
            SqlValue::Text(_) => SqlType::Text,
            SqlValue::Bool(_) => SqlType::Bool,
            SqlValue::Double(_) => SqlType::Double,
            SqlValue::Null(ty) => *ty,
        }
    }

    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    pub(crate) fn bind_to<'q>(
        &self,
        query: Query<'q, Any, AnyArguments<'q>>,
    ) -> Query<'q, Any, AnyArguments<'q>> {
        match self {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Long(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Double(v) => query.bind(*v),
            SqlValue::Null(SqlType::Int) => query.bind(None::<i32>),
            SqlValue::Null(SqlType::Long) => query.bind(None::<i64>),
            SqlValue::Null(SqlType::Text) => query.bind(None::<String>),
            SqlValue::Null(SqlType::Bool) => query.bind(None::<bool>),
            SqlValue::Null(SqlType::Double) => query.bind(None::<f64>),
        }
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Long(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}
