// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Decoding of request values from query parameters and headers.
//!
//! A [`ParamSchema`] lists the fields of the request type in declaration order together
//! with the key each field is read from. [`ParamDecoder`] walks that table, reads each raw
//! value once, coerces it, and produces a JSON value that serde then turns into the
//! request type.
//!
//! ```ignore
//! let schema = ParamSchema::new()
//!     .field(ParamField::new("path", FieldKind::String))
//!     .field(ParamField::new("itemsPerPage", FieldKind::Int).nullable())
//!     .field(ParamField::new("page", FieldKind::Int).nullable());
//! ```

use std::collections::{HashMap, HashSet};

use axum::http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Coercion applied to a raw string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Enum with the given declared variant names.
    Enum(&'static [&'static str]),
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Byte => "byte",
            FieldKind::Short => "short",
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::String => "string",
            FieldKind::Enum(_) => "enum",
        }
    }
}

/// One field of a request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamField {
    /// Property name in the request type.
    pub name: String,
    /// Query parameter or header the value is read from.
    pub source_key: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Property of the request type this field is nested inside.
    pub nested_in: Option<String>,
}

impl ParamField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            source_key: name.clone(),
            name,
            kind,
            nullable: false,
            nested_in: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Read the value from `key` instead of the property name.
    pub fn source(mut self, key: impl Into<String>) -> Self {
        self.source_key = key.into();
        self
    }

    pub fn nested_in(mut self, group: impl Into<String>) -> Self {
        self.nested_in = Some(group.into());
        self
    }
}

/// Declarative field-to-source table for a request type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: ParamField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }
}

/// Errors raised while decoding parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("Missing value for '{field}'")]
    Missing { field: String },

    #[error("Value '{value}' for '{field}' is not a valid {kind}")]
    Invalid {
        field: String,
        kind: &'static str,
        value: String,
    },

    #[error("Decoded parameters do not match the request type: {0}")]
    Shape(String),
}

/// Flat key-value transport data.
pub trait ParamSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Query string parameters. The first occurrence of a key wins.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(HashMap<String, String>);

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        let mut params = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self(params)
    }
}

impl ParamSource for QueryParams {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

impl ParamSource for HeaderMap {
    fn get(&self, key: &str) -> Option<String> {
        HeaderMap::get(self, key)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl ParamSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Walks a [`ParamSchema`] against a [`ParamSource`].
pub struct ParamDecoder<'a, S: ParamSource + ?Sized> {
    schema: &'a ParamSchema,
    source: &'a S,
    /// Index of the element being decoded and its raw value, fetched once.
    current: Option<(usize, Option<String>)>,
    next_index: usize,
    emitted_groups: HashSet<String>,
}

impl<'a, S: ParamSource + ?Sized> ParamDecoder<'a, S> {
    pub fn new(schema: &'a ParamSchema, source: &'a S) -> Self {
        Self {
            schema,
            source,
            current: None,
            next_index: 0,
            emitted_groups: HashSet::new(),
        }
    }

    /// Advance to the next element, fetching its raw value.
    fn decode_element_index(&mut self) -> Option<usize> {
        let index = self.next_index;
        let field = self.schema.fields.get(index)?;
        self.next_index += 1;
        self.current = Some((index, self.source.get(&field.source_key)));
        Some(index)
    }

    fn field(&self, index: usize) -> &'a ParamField {
        &self.schema.fields[index]
    }

    fn raw(&self) -> Option<&str> {
        self.current.as_ref().and_then(|(_, raw)| raw.as_deref())
    }

    /// Whether the current element has a value.
    fn decode_not_null_mark(&self) -> bool {
        self.raw().is_some()
    }

    fn decode_value(&self, field: &ParamField) -> Result<Value, DecodeError> {
        let invalid = |value: &str| DecodeError::Invalid {
            field: field.name.clone(),
            kind: field.kind.name(),
            value: value.to_string(),
        };

        let raw = match (field.kind, self.raw()) {
            (FieldKind::Bool, raw) => return Ok(Value::Bool(raw == Some("true"))),
            (_, Some(raw)) => raw,
            (_, None) => {
                return Err(DecodeError::Missing {
                    field: field.name.clone(),
                });
            }
        };

        let value = match field.kind {
            FieldKind::Bool => Value::Bool(raw == "true"),
            FieldKind::Byte => raw.parse::<i8>().map(Value::from).map_err(|_| invalid(raw))?,
            FieldKind::Short => raw.parse::<i16>().map(Value::from).map_err(|_| invalid(raw))?,
            FieldKind::Int => raw.parse::<i32>().map(Value::from).map_err(|_| invalid(raw))?,
            FieldKind::Long => raw.parse::<i64>().map(Value::from).map_err(|_| invalid(raw))?,
            FieldKind::Float | FieldKind::Double => {
                let parsed = if field.kind == FieldKind::Float {
                    raw.parse::<f32>().map(f64::from).map_err(|_| invalid(raw))?
                } else {
                    raw.parse::<f64>().map_err(|_| invalid(raw))?
                };
                Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(raw))?
            }
            FieldKind::String => Value::String(raw.to_string()),
            FieldKind::Enum(names) => names
                .iter()
                .find(|n| **n == raw)
                .or_else(|| names.iter().find(|n| n.eq_ignore_ascii_case(raw)))
                .map(|n| Value::String((*n).to_string()))
                .ok_or_else(|| invalid(raw))?,
        };
        Ok(value)
    }

    /// Decode every element of the schema into a JSON object.
    pub fn decode_structure(&mut self) -> Result<Value, DecodeError> {
        let mut root = Map::new();

        while let Some(index) = self.decode_element_index() {
            let field = self.field(index);

            let value = if field.nullable && !self.decode_not_null_mark() {
                Value::Null
            } else {
                self.decode_value(field)?
            };

            let target = match &field.nested_in {
                None => &mut root,
                Some(group) => {
                    if self.emitted_groups.insert(group.clone()) {
                        root.insert(group.clone(), Value::Object(Map::new()));
                    }
                    match root.get_mut(group) {
                        Some(Value::Object(inner)) => inner,
                        _ => {
                            return Err(DecodeError::Shape(format!(
                                "'{group}' is both a field and a group"
                            )));
                        }
                    }
                }
            };
            target.insert(field.name.clone(), value);
        }

        self.current = None;
        Ok(Value::Object(root))
    }
}

/// Decode `source` against `schema` as a JSON value.
pub fn decode_params<S: ParamSource + ?Sized>(
    schema: &ParamSchema,
    source: &S,
) -> Result<Value, DecodeError> {
    ParamDecoder::new(schema, source).decode_structure()
}

/// Decode `source` against `schema` straight into `T`.
pub fn decode_params_as<T: DeserializeOwned, S: ParamSource + ?Sized>(
    schema: &ParamSchema,
    source: &S,
) -> Result<T, DecodeError> {
    let value = decode_params(schema, source)?;
    serde_json::from_value(value).map_err(|e| DecodeError::Shape(e.to_string()))
}
