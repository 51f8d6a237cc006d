//! What a linear model can hold
//!
//! Plain values (characters, strings, integers) are opaque: they can be
//! inserted, deleted and replaced. Entities additionally expose named fields
//! so that concurrent partial updates can be merged field by field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::OtError;
use crate::operation::Value;

/// An element stored in a [`LinearModel`](crate::model::LinearModel).
pub trait Element: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Entity type name. Opaque values have none.
    fn type_tag(&self) -> &str {
        ""
    }

    /// Read a named field
    fn get_field(&self, _field: &str) -> Option<Value> {
        None
    }

    /// Overwrite a named field that already exists
    fn set_field(&mut self, field: &str, _value: Value) -> Result<(), OtError> {
        Err(OtError::UnknownField {
            type_tag: self.type_tag().to_string(),
            field: field.to_string(),
        })
    }
}

impl Element for char {}
impl Element for String {}
impl Element for i64 {}
impl Element for Value {}

/// A typed entity with a fixed set of named fields.
///
/// The field set is fixed at construction; updates may only touch fields
/// that already exist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    type_tag: String,
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field declaration
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn field(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl Element for Record {
    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn get_field(&self, field: &str) -> Option<Value> {
        self.fields.get(field).cloned()
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<(), OtError> {
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(OtError::UnknownField {
                type_tag: self.type_tag.clone(),
                field: field.to_string(),
            }),
        }
    }
}
