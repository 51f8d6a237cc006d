//! Append-only log of applied operations

use serde::{Deserialize, Serialize};

use crate::error::OtError;
use crate::operation::Operation;

/// Operations in the order they were applied at one site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationHistory<T> {
    ops: Vec<Operation<T>>,
}

impl<T> Default for OperationHistory<T> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<T> OperationHistory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation<T>) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operation<T>> {
        self.ops.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation<T>> {
        self.ops.iter()
    }

    /// Every entry recorded at or after `revision`.
    ///
    /// A revision beyond the end of the log means the sender claims to have
    /// seen operations that were never applied here.
    pub fn concurrent_since(&self, revision: usize) -> Result<&[Operation<T>], OtError> {
        if revision > self.ops.len() {
            return Err(OtError::ProtocolViolation(format!(
                "revision {} is ahead of history length {}",
                revision,
                self.ops.len()
            )));
        }
        Ok(&self.ops[revision..])
    }

}

impl<T> From<Vec<Operation<T>>> for OperationHistory<T> {
    fn from(ops: Vec<Operation<T>>) -> Self {
        Self { ops }
    }
}
