//! Positional operations over a linear model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::OtError;
use crate::state::State;

/// Globally unique identifier of a participating site
pub type SiteId = Uuid;

/// Field name to value map carried by entity updates
pub type FieldDelta = BTreeMap<String, Value>;

/// A value that can be stored in an entity field
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write!(f, "<list of {}>", items.len()),
            Value::Map(map) => write!(f, "<map of {}>", map.len()),
        }
    }
}

/// Who created an operation and what they had seen when they did
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub creator: SiteId,
    pub state: State,
}

impl Metadata {
    pub fn new(creator: SiteId, state: State) -> Self {
        Self { creator, state }
    }
}

/// The operation variants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpKind<T> {
    /// Does nothing; result of a transformation that cancelled an operation
    NoOp,

    /// Insert `value` so that it ends up at `position`
    Insert { position: usize, value: T },

    /// Remove the element at `position`
    Delete { position: usize },

    /// Swap the element at `position` for `value`
    Replace { position: usize, value: T },

    /// Overwrite a subset of the named fields of the entity at `position`
    UpdateEntity {
        position: usize,
        type_tag: String,
        delta: FieldDelta,
    },
}

/// An operation plus the metadata attached when it was generated.
///
/// `Clone` is a plain value copy, so relaying one operation to several
/// peers never shares metadata between the copies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation<T> {
    pub kind: OpKind<T>,
    pub metadata: Option<Metadata>,
}

impl<T> Operation<T> {
    fn unstamped(kind: OpKind<T>) -> Self {
        Self {
            kind,
            metadata: None,
        }
    }

    /// Create an Insert operation
    pub fn insert(position: usize, value: T) -> Self {
        Self::unstamped(OpKind::Insert { position, value })
    }

    /// Create a Delete operation
    pub fn delete(position: usize) -> Self {
        Self::unstamped(OpKind::Delete { position })
    }

    /// Create a Replace operation
    pub fn replace(position: usize, value: T) -> Self {
        Self::unstamped(OpKind::Replace { position, value })
    }

    /// Create an UpdateEntity operation. The type tag and the delta must not be empty.
    pub fn update_entity(
        position: usize,
        type_tag: impl Into<String>,
        delta: FieldDelta,
    ) -> Result<Self, OtError> {
        let type_tag = type_tag.into();
        if type_tag.is_empty() {
            return Err(OtError::InvalidArgument(
                "entity update without a type tag".into(),
            ));
        }
        if delta.is_empty() {
            return Err(OtError::InvalidArgument(
                "entity update without any field".into(),
            ));
        }
        Ok(Self::unstamped(OpKind::UpdateEntity {
            position,
            type_tag,
            delta,
        }))
    }

    /// Create a NoOp
    pub fn noop() -> Self {
        Self::unstamped(OpKind::NoOp)
    }

    /// Target position, `None` for NoOp
    pub fn position(&self) -> Option<usize> {
        match &self.kind {
            OpKind::NoOp => None,
            OpKind::Insert { position, .. }
            | OpKind::Delete { position }
            | OpKind::Replace { position, .. }
            | OpKind::UpdateEntity { position, .. } => Some(*position),
        }
    }

    /// Short variant name used in logs and errors
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            OpKind::NoOp => "noop",
            OpKind::Insert { .. } => "insert",
            OpKind::Delete { .. } => "delete",
            OpKind::Replace { .. } => "replace",
            OpKind::UpdateEntity { .. } => "update-entity",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, OpKind::NoOp)
    }

    /// Replace and UpdateEntity both modify an element in place
    pub fn is_update(&self) -> bool {
        matches!(
            self.kind,
            OpKind::Replace { .. } | OpKind::UpdateEntity { .. }
        )
    }

    /// Metadata, or `MissingMetadata` if the operation was never stamped
    pub fn meta(&self) -> Result<&Metadata, OtError> {
        self.metadata.as_ref().ok_or(OtError::MissingMetadata)
    }

    pub fn creator(&self) -> Option<SiteId> {
        self.metadata.as_ref().map(|m| m.creator)
    }

    /// Attach creator and state
    pub fn stamped(mut self, creator: SiteId, state: State) -> Self {
        self.metadata = Some(Metadata::new(creator, state));
        self
    }

    /// Replace the state of the metadata, keeping the creator
    pub fn retag(&mut self, state: State) -> Result<(), OtError> {
        let meta = self.metadata.as_mut().ok_or(OtError::MissingMetadata)?;
        meta.state = state;
        Ok(())
    }

    /// Same operation moved to another position. NoOp is returned unchanged.
    pub fn with_position(mut self, new_position: usize) -> Self {
        match &mut self.kind {
            OpKind::NoOp => {}
            OpKind::Insert { position, .. }
            | OpKind::Delete { position }
            | OpKind::Replace { position, .. }
            | OpKind::UpdateEntity { position, .. } => *position = new_position,
        }
        self
    }

    /// Turn into a NoOp. Metadata is kept so queues can still reason about it.
    pub fn collapsed(self) -> Self {
        Self {
            kind: OpKind::NoOp,
            metadata: self.metadata,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OpKind::NoOp => write!(f, "[nop()]"),
            OpKind::Insert { position, value } => write!(f, "[ins({}, {:?})]", position, value),
            OpKind::Delete { position } => write!(f, "[del({})]", position),
            OpKind::Replace { position, value } => write!(f, "[rep({}, {:?})]", position, value),
            OpKind::UpdateEntity {
                position,
                type_tag,
                delta,
            } => {
                write!(f, "[upd({}, {}", position, type_tag)?;
                for (field, value) in delta {
                    write!(f, ", {}={}", field, value)?;
                }
                write!(f, ")]")
            }
        }
    }
}
