//! Cursors over a replicated linear model
//!
//! A [`LinearCursor`] is the position state kept inside the replica and
//! adjusted by every applied operation. A [`Cursor`] is the caller's handle
//! to it; edits made through the handle go through the same local
//! generation path as any other edit.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::element::Element;
use crate::error::OtError;
use crate::operation::{FieldDelta, Operation};
use crate::replica::ClientReplica;
use crate::transform::InclusionTransformer;

/// Identifier of a registered cursor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorId(Uuid);

impl CursorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CursorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to the element under a cursor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorStatus {
    Valid,
    /// The element was removed; the cursor now sits on its successor
    Deleted,
    /// The element was replaced or partially updated
    Updated,
}

/// Position state of one cursor.
///
/// The position may leave the model's bounds by one step in either
/// direction (before the head, past the tail).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearCursor {
    id: CursorId,
    position: isize,
    status: CursorStatus,
}

impl LinearCursor {
    pub fn new(position: isize) -> Self {
        Self {
            id: CursorId::new(),
            position,
            status: CursorStatus::Valid,
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn position(&self) -> isize {
        self.position
    }

    pub fn status(&self) -> CursorStatus {
        self.status
    }

    /// Explicit move by the owner; clears any Deleted/Updated mark.
    pub fn move_to(&mut self, position: isize) {
        self.position = position;
        self.status = CursorStatus::Valid;
    }

    /// Position adjustment caused by a concurrent operation
    pub(crate) fn shift(&mut self, delta: isize) {
        self.position += delta;
    }

    pub(crate) fn mark(&mut self, status: CursorStatus) {
        self.status = status;
    }
}

/// Cursors registered with one replica
#[derive(Debug, Default)]
pub struct CursorRegistry {
    cursors: HashMap<CursorId, LinearCursor>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, cursor: LinearCursor) -> Result<CursorId, OtError> {
        let id = cursor.id();
        if self.cursors.contains_key(&id) {
            return Err(OtError::CursorAlreadyRegistered(id));
        }
        self.cursors.insert(id, cursor);
        Ok(id)
    }

    pub fn deregister(&mut self, id: CursorId) -> Result<LinearCursor, OtError> {
        self.cursors.remove(&id).ok_or(OtError::UnknownCursor(id))
    }

    pub fn get(&self, id: CursorId) -> Result<&LinearCursor, OtError> {
        self.cursors.get(&id).ok_or(OtError::UnknownCursor(id))
    }

    pub fn get_mut(&mut self, id: CursorId) -> Result<&mut LinearCursor, OtError> {
        self.cursors.get_mut(&id).ok_or(OtError::UnknownCursor(id))
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Propagate an applied operation to every cursor
    pub fn transform_all<T>(&mut self, transformer: &dyn InclusionTransformer<T>, op: &Operation<T>) {
        for cursor in self.cursors.values_mut() {
            transformer.transform_cursor(cursor, op);
        }
    }
}

fn position_of(cursor: &LinearCursor, size: usize, inclusive: bool) -> Result<usize, OtError> {
    let out_of_range = || OtError::PositionOutOfRange {
        position: cursor.position().max(0) as usize,
        size,
    };
    let position = usize::try_from(cursor.position()).map_err(|_| out_of_range())?;
    if position > size || (!inclusive && position == size) {
        return Err(out_of_range());
    }
    Ok(position)
}

/// Caller-side handle of a registered cursor.
///
/// Must be released with [`Cursor::done`]; dropping the handle leaves the
/// cursor registered.
pub struct Cursor<T> {
    id: CursorId,
    replica: ClientReplica<T>,
}

impl<T: Element> Cursor<T> {
    pub(crate) fn new(id: CursorId, replica: ClientReplica<T>) -> Self {
        Self { id, replica }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn position(&self) -> Result<isize, OtError> {
        self.replica
            .locked(|alg| Ok(alg.core().cursors().get(self.id)?.position()))
    }

    pub fn status(&self) -> Result<CursorStatus, OtError> {
        self.replica
            .locked(|alg| Ok(alg.core().cursors().get(self.id)?.status()))
    }

    /// Element under the cursor, `None` outside the model
    pub fn element(&self) -> Result<Option<T>, OtError> {
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = core.cursors().get(self.id)?.position();
            Ok(usize::try_from(position)
                .ok()
                .and_then(|p| core.model().get(p).cloned()))
        })
    }

    fn move_with(&self, target: impl FnOnce(isize, usize) -> isize) -> Result<Option<T>, OtError> {
        self.replica.locked(|alg| {
            let core = alg.core_mut();
            let size = core.model().len();
            let cursor = core.cursors_mut().get_mut(self.id)?;
            let position = target(cursor.position(), size);
            cursor.move_to(position);
            Ok(usize::try_from(position)
                .ok()
                .and_then(|p| core.model().get(p).cloned()))
        })
    }

    /// Step forward; `None` once past the last element
    pub fn move_forward(&self) -> Result<Option<T>, OtError> {
        self.move_with(|p, _| p + 1)
    }

    /// Step back; `None` once before the first element
    pub fn move_backward(&self) -> Result<Option<T>, OtError> {
        self.move_with(|p, _| p - 1)
    }

    pub fn move_to_head(&self) -> Result<Option<T>, OtError> {
        self.move_with(|_, _| 0)
    }

    /// Park the cursor just past the last element and return that element.
    pub fn move_to_tail(&self) -> Result<Option<T>, OtError> {
        self.replica.locked(|alg| {
            let core = alg.core_mut();
            let size = core.model().len();
            core.cursors_mut().get_mut(self.id)?.move_to(size as isize);
            Ok(size.checked_sub(1).and_then(|p| core.model().get(p).cloned()))
        })
    }

    /// Move to an arbitrary position
    pub fn reset(&self, position: isize) -> Result<(), OtError> {
        self.move_with(|_, _| position).map(|_| ())
    }

    pub fn has_next(&self) -> Result<bool, OtError> {
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = core.cursors().get(self.id)?.position();
            Ok(position + 1 < core.model().len() as isize)
        })
    }

    pub fn has_previous(&self) -> Result<bool, OtError> {
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = core.cursors().get(self.id)?.position();
            Ok(!core.model().is_empty() && position > 0)
        })
    }

    /// Insert before the element under the cursor. The cursor ends up after
    /// the new element.
    pub async fn insert_element(&self, value: T) -> Result<(), OtError> {
        self.replica.wait_joined().await;
        self.replica.locked(|alg| {
            let position = position_of(
                alg.core().cursors().get(self.id)?,
                alg.core().model().len(),
                true,
            )?;
            alg.generate(Operation::insert(position, value)).map(|_| ())
        })
    }

    /// Delete the element under the cursor and return it
    pub async fn delete_element(&self) -> Result<T, OtError> {
        self.replica.wait_joined().await;
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = position_of(core.cursors().get(self.id)?, core.model().len(), false)?;
            let removed = core
                .model()
                .get(position)
                .cloned()
                .ok_or(OtError::PositionOutOfRange {
                    position,
                    size: core.model().len(),
                })?;
            alg.generate(Operation::delete(position))?;
            Ok(removed)
        })
    }

    /// Replace the element under the cursor and return the old one
    pub async fn replace_element(&self, value: T) -> Result<T, OtError> {
        self.replica.wait_joined().await;
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = position_of(core.cursors().get(self.id)?, core.model().len(), false)?;
            let previous = core
                .model()
                .get(position)
                .cloned()
                .ok_or(OtError::PositionOutOfRange {
                    position,
                    size: core.model().len(),
                })?;
            alg.generate(Operation::replace(position, value))?;
            Ok(previous)
        })
    }

    /// Overwrite some fields of the entity under the cursor
    pub async fn update_element(&self, delta: FieldDelta) -> Result<(), OtError> {
        self.replica.wait_joined().await;
        self.replica.locked(|alg| {
            let core = alg.core();
            let position = position_of(core.cursors().get(self.id)?, core.model().len(), false)?;
            let type_tag = core
                .model()
                .get(position)
                .map(|e| e.type_tag().to_string())
                .unwrap_or_default();
            alg.generate(Operation::update_entity(position, type_tag, delta)?)
                .map(|_| ())
        })
    }

    /// Deregister the cursor
    pub fn done(self) -> Result<(), OtError> {
        self.replica.deregister_cursor(self.id)
    }
}
