//! Inclusion transformation for linear operations
//!
//! `transform_operation(role, remote, local)` returns the pair adjusted so
//! that applying `remote'` after `local` gives the same sequence as applying
//! `local'` after `remote`.
//!
//! Positions compared as `r` (remote) and `l` (local):
//!
//! | remote \ local | Insert               | Update                 | Delete          |
//! |----------------|----------------------|------------------------|-----------------|
//! | Insert         | lower slot stays put; tie broken by role | `r <= l`: l+1, else unchanged | `r <= l`: l+1, else r-1 |
//! | Update         | `r < l`: unchanged, else r+1 | equal: conflict solver | `r < l`: unchanged, `r > l`: r-1, equal: r becomes NoOp |
//! | Delete         | `r < l`: l-1, else r+1 | `r < l`: l-1, `r > l`: unchanged, equal: l becomes NoOp | `r < l`: l-1, `r > l`: r-1, equal: both NoOp |
//!
//! NoOp on either side passes both operations through unchanged.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::conflict::ConflictSolver;
use crate::cursor::{CursorStatus, LinearCursor};
use crate::error::OtError;
use crate::operation::{OpKind, Operation};

/// Which side of the star topology is transforming.
///
/// The server-accepted operation keeps its position on an insert/insert tie,
/// so the server shifts the remote operation and a client shifts its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

/// Transforms operation pairs and cursors for one kind of data model.
pub trait InclusionTransformer<T>: Send + Sync {
    fn transform_operation(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError>;

    /// Adjust a cursor for an operation that was just applied.
    fn transform_cursor(&self, cursor: &mut LinearCursor, op: &Operation<T>);
}

#[derive(Clone, Copy)]
enum Class {
    Noop,
    Insert(usize),
    Update(usize),
    Delete(usize),
}

fn classify<T>(op: &Operation<T>) -> Class {
    match &op.kind {
        OpKind::NoOp => Class::Noop,
        OpKind::Insert { position, .. } => Class::Insert(*position),
        OpKind::Delete { position } => Class::Delete(*position),
        OpKind::Replace { position, .. } | OpKind::UpdateEntity { position, .. } => {
            Class::Update(*position)
        }
    }
}

fn shifted<T>(op: Operation<T>, position: usize, up: bool) -> Operation<T> {
    // A lower position is guaranteed positive whenever the table asks for -1
    let moved = if up { position + 1 } else { position.saturating_sub(1) };
    op.with_position(moved)
}

/// Transformer for index-addressed linear models.
pub struct LinearTransformer<T> {
    solver: Arc<dyn ConflictSolver<T>>,
}

impl<T> Clone for LinearTransformer<T> {
    fn clone(&self) -> Self {
        Self {
            solver: Arc::clone(&self.solver),
        }
    }
}

impl<T> LinearTransformer<T> {
    pub fn new(solver: Arc<dyn ConflictSolver<T>>) -> Self {
        Self { solver }
    }
}

impl<T: Send + Sync> InclusionTransformer<T> for LinearTransformer<T> {
    fn transform_operation(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError> {
        let (rc, lc) = (classify(&remote), classify(&local));
        log::debug!(
            "transform {:?}: remote {} vs local {}",
            role,
            remote.kind_name(),
            local.kind_name()
        );

        let pair = match (rc, lc) {
            (Class::Noop, _) | (_, Class::Noop) => (remote, local),

            (Class::Insert(r), Class::Insert(l)) => match r.cmp(&l) {
                Ordering::Less => (remote, shifted(local, l, true)),
                Ordering::Greater => (shifted(remote, r, true), local),
                Ordering::Equal => match role {
                    Role::Server => (shifted(remote, r, true), local),
                    Role::Client => (remote, shifted(local, l, true)),
                },
            },
            (Class::Insert(r), Class::Update(l)) => {
                if r <= l {
                    (remote, shifted(local, l, true))
                } else {
                    (remote, local)
                }
            }
            (Class::Insert(r), Class::Delete(l)) => {
                if r <= l {
                    (remote, shifted(local, l, true))
                } else {
                    (shifted(remote, r, false), local)
                }
            }

            (Class::Update(r), Class::Insert(l)) => {
                if r < l {
                    (remote, local)
                } else {
                    (shifted(remote, r, true), local)
                }
            }
            (Class::Update(r), Class::Update(l)) => {
                if r == l {
                    return self.solver.solve_update_conflict(role, remote, local);
                }
                (remote, local)
            }
            (Class::Update(r), Class::Delete(l)) => match r.cmp(&l) {
                Ordering::Less => (remote, local),
                Ordering::Greater => (shifted(remote, r, false), local),
                Ordering::Equal => (remote.collapsed(), local),
            },

            (Class::Delete(r), Class::Insert(l)) => {
                if r < l {
                    (remote, shifted(local, l, false))
                } else {
                    (shifted(remote, r, true), local)
                }
            }
            (Class::Delete(r), Class::Update(l)) => match r.cmp(&l) {
                Ordering::Less => (remote, shifted(local, l, false)),
                Ordering::Greater => (remote, local),
                Ordering::Equal => (remote, local.collapsed()),
            },
            (Class::Delete(r), Class::Delete(l)) => match r.cmp(&l) {
                Ordering::Less => (remote, shifted(local, l, false)),
                Ordering::Greater => (shifted(remote, r, false), local),
                Ordering::Equal => (remote.collapsed(), local.collapsed()),
            },
        };
        Ok(pair)
    }

    fn transform_cursor(&self, cursor: &mut LinearCursor, op: &Operation<T>) {
        let at = cursor.position();
        match classify(op) {
            Class::Noop => {}
            Class::Insert(p) => {
                if (p as isize) <= at {
                    cursor.shift(1);
                }
            }
            Class::Delete(p) => match (p as isize).cmp(&at) {
                Ordering::Less => cursor.shift(-1),
                Ordering::Equal => cursor.mark(CursorStatus::Deleted),
                Ordering::Greater => {}
            },
            Class::Update(p) => {
                if p as isize == at {
                    cursor.mark(CursorStatus::Updated);
                }
            }
        }
    }
}
