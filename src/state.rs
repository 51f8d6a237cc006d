//! State vectors
//!
//! A `State` counts events per axis. What an axis means is up to the owning
//! control algorithm: Wave keeps one component (server operations seen),
//! Jupiter keeps two (local operations generated, remote operations integrated).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::OtError;

/// A vector of monotonically non-decreasing event counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    components: Vec<u64>,
}

impl State {
    /// Create a state with `axes` zeroed components.
    pub fn zeroed(axes: usize) -> Self {
        Self {
            components: vec![0; axes],
        }
    }

    /// Create a state from explicit component values.
    pub fn from_components(components: impl Into<Vec<u64>>) -> Self {
        Self {
            components: components.into(),
        }
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Value of a component (0 if the axis does not exist).
    pub fn get(&self, axis: usize) -> u64 {
        self.components.get(axis).copied().unwrap_or(0)
    }

    /// Advance one axis by one event.
    ///
    /// # Panics
    ///
    /// Panics if `axis` is not a component of this state.
    pub fn increment(&mut self, axis: usize) {
        self.components[axis] += 1;
    }

    /// Overwrite one component.
    ///
    /// # Panics
    ///
    /// Panics if `axis` is not a component of this state.
    pub fn set(&mut self, axis: usize, value: u64) {
        self.components[axis] = value;
    }

    /// Copy every component from `other`, which must have the same shape.
    pub fn copy_from(&mut self, other: &State) -> Result<(), OtError> {
        if other.len() != self.len() {
            return Err(OtError::StateMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        self.components.copy_from_slice(&other.components);
        Ok(())
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (axis, value) in self.components.iter().enumerate() {
            if axis > 0 {
                write!(f, ",")?;
            }
            write!(f, "({}:{})", axis, value)?;
        }
        write!(f, "]")
    }
}
