//! Linear data model
//!
//! An index-addressed sequence of elements. Every element carries its own
//! delta history: each entity update records the pre-image of the fields it
//! overwrote, stamped with the state of the operation that did it.

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::OtError;
use crate::operation::{FieldDelta, OpKind, Operation};
use crate::state::State;

/// Lifecycle tag of a replicated document.
///
/// Carried by every model but not consulted by the control algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeState {
    #[default]
    Uninitialized,
    Operative,
    Locked,
    ExclusiveWrite,
}

/// Pre-image of one entity update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub state: State,
    pub rollback: FieldDelta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Slot<T> {
    value: T,
    deltas: Vec<DeltaRecord>,
}

impl<T> Slot<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            deltas: Vec::new(),
        }
    }
}

/// Ordered sequence of `(element, delta history)` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel<T> {
    slots: Vec<Slot<T>>,
    type_state: TypeState,
}

impl<T> Default for LinearModel<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            type_state: TypeState::default(),
        }
    }
}

impl<T: Element> LinearModel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.slots.get(position).map(|s| &s.value)
    }

    /// Copy of the element sequence, without delta histories
    pub fn values(&self) -> Vec<T> {
        self.slots.iter().map(|s| s.value.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.slots.iter().map(|s| &s.value)
    }

    /// Delta history of one element, oldest first
    pub fn deltas(&self, position: usize) -> Option<&[DeltaRecord]> {
        self.slots.get(position).map(|s| s.deltas.as_slice())
    }

    pub fn type_state(&self) -> TypeState {
        self.type_state
    }

    pub fn set_type_state(&mut self, type_state: TypeState) {
        self.type_state = type_state;
    }

    /// Replace the whole content with `values` (state-based fill).
    pub fn fill(&mut self, values: Vec<T>) {
        self.slots = values.into_iter().map(Slot::fresh).collect();
    }

    fn check_bounds(&self, position: usize, inclusive: bool) -> Result<(), OtError> {
        let size = self.slots.len();
        let ok = if inclusive {
            position <= size
        } else {
            position < size
        };
        if ok {
            Ok(())
        } else {
            Err(OtError::PositionOutOfRange { position, size })
        }
    }

    /// Apply one operation. On error the model is left unchanged.
    pub fn apply(&mut self, op: &Operation<T>) -> Result<(), OtError> {
        match &op.kind {
            OpKind::NoOp => Ok(()),
            OpKind::Insert { position, value } => {
                self.check_bounds(*position, true)?;
                self.slots.insert(*position, Slot::fresh(value.clone()));
                Ok(())
            }
            OpKind::Delete { position } => {
                self.check_bounds(*position, false)?;
                self.slots.remove(*position);
                Ok(())
            }
            OpKind::Replace { position, value } => {
                self.check_bounds(*position, false)?;
                self.slots[*position] = Slot::fresh(value.clone());
                Ok(())
            }
            OpKind::UpdateEntity {
                position,
                type_tag,
                delta,
            } => {
                self.check_bounds(*position, false)?;
                let state = op.meta()?.state.clone();
                let slot = &mut self.slots[*position];

                if slot.value.type_tag() != type_tag {
                    return Err(OtError::TypeMismatch {
                        expected: slot.value.type_tag().to_string(),
                        found: type_tag.clone(),
                    });
                }

                // Capture every pre-image before touching anything
                let mut rollback = FieldDelta::new();
                for field in delta.keys() {
                    let old = slot
                        .value
                        .get_field(field)
                        .ok_or_else(|| OtError::UnknownField {
                            type_tag: type_tag.clone(),
                            field: field.clone(),
                        })?;
                    rollback.insert(field.clone(), old);
                }

                for (field, value) in delta {
                    slot.value.set_field(field, value.clone())?;
                }
                slot.deltas.push(DeltaRecord { state, rollback });
                Ok(())
            }
        }
    }

    /// Undo every entity update on `position` recorded after `since`
    /// (compared on component 0), newest first. Returns how many were undone.
    pub fn rollback_element(&mut self, position: usize, since: &State) -> Result<usize, OtError> {
        self.check_bounds(position, false)?;
        let slot = &mut self.slots[position];
        let cutoff = since.get(0);

        let mut undone = 0;
        while let Some(last) = slot.deltas.last() {
            if last.state.get(0) <= cutoff {
                break;
            }
            if let Some(record) = slot.deltas.pop() {
                for (field, value) in record.rollback {
                    slot.value.set_field(&field, value)?;
                }
                undone += 1;
            }
        }
        Ok(undone)
    }
}
