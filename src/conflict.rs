//! Update/update conflict resolution
//!
//! Consulted by the transformer only when two update-class operations
//! (Replace or UpdateEntity) hit the same element.

use crate::error::OtError;
use crate::operation::{FieldDelta, OpKind, Operation};
use crate::transform::Role;

/// Resolves two concurrent updates of the same element.
pub trait ConflictSolver<T>: Send + Sync {
    fn solve_update_conflict(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError>;
}

/// The operation the authority saw first keeps its effect.
///
/// On the server the local (already accepted) operation wins; on a client the
/// remote operation, which the server accepted first, wins. Concurrent entity
/// updates keep the loser's non-overlapping fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstWriterWins;

/// The operation the authority saw last keeps its effect.
///
/// Overlapping entity fields take the later value while non-overlapping
/// fields from both sides survive.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastWriterWins;

fn unsupported<T>(remote: &Operation<T>, local: &Operation<T>) -> OtError {
    OtError::UnsupportedPair {
        remote: remote.kind_name().to_string(),
        local: local.kind_name().to_string(),
    }
}

/// Drop from `loser` every field also written by `winner`.
/// Collapses to NoOp if nothing is left.
fn without_fields_of<T>(loser: Operation<T>, winner: &FieldDelta) -> Operation<T> {
    let Operation { kind, metadata } = loser;
    match kind {
        OpKind::UpdateEntity {
            position,
            type_tag,
            delta,
        } => {
            let remaining: FieldDelta = delta
                .into_iter()
                .filter(|(field, _)| !winner.contains_key(field))
                .collect();
            let kind = if remaining.is_empty() {
                OpKind::NoOp
            } else {
                OpKind::UpdateEntity {
                    position,
                    type_tag,
                    delta: remaining,
                }
            };
            Operation { kind, metadata }
        }
        kind => Operation { kind, metadata },
    }
}

enum UpdatePair<T> {
    /// Already settled: a full replace always subsumes a partial entity update.
    Settled(Operation<T>, Operation<T>),
    Replaces(Operation<T>, Operation<T>),
    Entities(Operation<T>, Operation<T>),
}

fn classify<T>(remote: Operation<T>, local: Operation<T>) -> Result<UpdatePair<T>, OtError> {
    match (&remote.kind, &local.kind) {
        (OpKind::Replace { .. }, OpKind::Replace { .. }) => Ok(UpdatePair::Replaces(remote, local)),
        (OpKind::UpdateEntity { .. }, OpKind::UpdateEntity { .. }) => {
            Ok(UpdatePair::Entities(remote, local))
        }
        (OpKind::Replace { .. }, OpKind::UpdateEntity { .. }) => {
            Ok(UpdatePair::Settled(remote, local.collapsed()))
        }
        (OpKind::UpdateEntity { .. }, OpKind::Replace { .. }) => {
            Ok(UpdatePair::Settled(remote.collapsed(), local))
        }
        _ => Err(unsupported(&remote, &local)),
    }
}

/// Keep `winner` whole and strip the overlap from `loser`.
fn merge_entities<T>(winner: Operation<T>, loser: Operation<T>) -> (Operation<T>, Operation<T>) {
    let winning_fields = match &winner.kind {
        OpKind::UpdateEntity { delta, .. } => delta.clone(),
        _ => FieldDelta::new(),
    };
    (winner, without_fields_of(loser, &winning_fields))
}

impl<T> ConflictSolver<T> for FirstWriterWins {
    fn solve_update_conflict(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError> {
        Ok(match (role, classify(remote, local)?) {
            (_, UpdatePair::Settled(remote, local)) => (remote, local),
            (Role::Server, UpdatePair::Replaces(remote, local)) => (remote.collapsed(), local),
            (Role::Client, UpdatePair::Replaces(remote, local)) => (remote, local.collapsed()),
            (Role::Server, UpdatePair::Entities(remote, local)) => {
                let (local, remote) = merge_entities(local, remote);
                (remote, local)
            }
            (Role::Client, UpdatePair::Entities(remote, local)) => merge_entities(remote, local),
        })
    }
}

impl<T> ConflictSolver<T> for LastWriterWins {
    fn solve_update_conflict(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError> {
        Ok(match (role, classify(remote, local)?) {
            (_, UpdatePair::Settled(remote, local)) => (remote, local),
            (Role::Server, UpdatePair::Replaces(remote, local)) => (remote, local.collapsed()),
            (Role::Client, UpdatePair::Replaces(remote, local)) => (remote.collapsed(), local),
            (Role::Server, UpdatePair::Entities(remote, local)) => merge_entities(remote, local),
            (Role::Client, UpdatePair::Entities(remote, local)) => {
                let (local, remote) = merge_entities(local, remote);
                (remote, local)
            }
        })
    }
}
