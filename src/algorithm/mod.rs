//! Control algorithms
//!
//! A control algorithm decides which operations a remote operation has to be
//! transformed against before it can be applied. Two are provided:
//!
//! - [`wave`]: one unacknowledged operation at a time, the rest buffered.
//! - [`jupiter`]: any number of unacknowledged operations, indexed by a
//!   two-component state, mirrored on the server by one proxy per site.
//!
//! Both share a [`ReplicaCore`]: the linear model, its history, the
//! registered cursors and the transformer.

pub mod jupiter;
pub mod wave;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::FillMode;
use crate::cursor::{CursorId, CursorRegistry, LinearCursor};
use crate::element::Element;
use crate::error::OtError;
use crate::history::OperationHistory;
use crate::model::LinearModel;
use crate::operation::{Operation, SiteId};
use crate::state::State;
use crate::transform::{InclusionTransformer, Role};

pub use jupiter::{JupiterClient, JupiterServer, ServerSideProxy};
pub use wave::{WaveClient, WaveServer};

// ---------------------------------------------------------------------------
// Network seam
// ---------------------------------------------------------------------------

/// Where an outgoing operation should go
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    Server,
    Site(SiteId),
}

/// Hands operations to the network layer.
///
/// Fire-and-forget: sending never blocks and ordering per destination must
/// be preserved by the implementation.
pub trait OperationSender<T>: Send + Sync {
    fn send_operation(&self, destination: Destination, op: Operation<T>);
}

/// Initial synchronization payload for a joining site
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FillData<T> {
    /// Element snapshot. Compact, cannot be replayed.
    StateBased { model: Vec<T>, state: State },
    /// Every operation the server applied, in order.
    OperationBased {
        history: OperationHistory<T>,
        state: State,
    },
}

impl<T: Element> FillData<T> {
    pub fn capture(
        mode: FillMode,
        model: &LinearModel<T>,
        history: &OperationHistory<T>,
        state: State,
    ) -> Self {
        match mode {
            FillMode::StateBased => FillData::StateBased {
                model: model.values(),
                state,
            },
            FillMode::OperationBased => FillData::OperationBased {
                history: history.clone(),
                state,
            },
        }
    }

    pub fn state(&self) -> &State {
        match self {
            FillData::StateBased { state, .. } | FillData::OperationBased { state, .. } => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Turns local edits into stamped, applied and sent operations
pub trait Generator<T> {
    /// Apply `op` locally and hand it to the network. Returns the stamped operation.
    fn generate(&mut self, op: Operation<T>) -> Result<Operation<T>, OtError>;
}

/// Accepts operations from the network
pub trait Integrator<T> {
    /// Transform, apply and return the locally applied form of `op`.
    fn integrate(&mut self, op: Operation<T>) -> Result<Operation<T>, OtError>;
}

/// Owns cursors that follow the model
pub trait CursorHost {
    fn register_cursor(&mut self, cursor: LinearCursor) -> Result<CursorId, OtError>;
    fn deregister_cursor(&mut self, id: CursorId) -> Result<LinearCursor, OtError>;
}

/// A client-side control algorithm
pub trait ClientAlgorithm<T: Element>: Generator<T> + Integrator<T> + Send {
    fn site(&self) -> SiteId;

    fn core(&self) -> &ReplicaCore<T>;

    fn core_mut(&mut self) -> &mut ReplicaCore<T>;

    fn state(&self) -> &State;

    /// Overwrite the state; the component count must match.
    fn set_state(&mut self, state: &State) -> Result<(), OtError>;

    /// Load the initial synchronization payload.
    fn fill(&mut self, data: FillData<T>) -> Result<(), OtError> {
        if data.state().len() != self.state().len() {
            return Err(OtError::StateMismatch {
                expected: self.state().len(),
                found: data.state().len(),
            });
        }
        let state = self.core_mut().fill(data)?;
        self.set_state(&state)
    }

    /// Snapshot of the applied operations
    fn history(&self) -> OperationHistory<T> {
        self.core().history().clone()
    }
}

/// The server-side control algorithm: the serialization point for one document
pub trait ServerAlgorithm<T: Element>: Integrator<T> + Send {
    /// Capture a fill payload for `site` and start relaying to it, atomically.
    fn add_site(&mut self, site: SiteId, mode: FillMode) -> Result<FillData<T>, OtError>;

    fn remove_site(&mut self, site: SiteId) -> Result<(), OtError>;

    fn sites(&self) -> Vec<SiteId>;

    fn state(&self) -> State;

    fn core(&self) -> &ReplicaCore<T>;

    fn history(&self) -> OperationHistory<T> {
        self.core().history().clone()
    }
}

// ---------------------------------------------------------------------------
// Shared core
// ---------------------------------------------------------------------------

/// Model, history, cursors and transformer of one replica
pub struct ReplicaCore<T> {
    model: LinearModel<T>,
    history: OperationHistory<T>,
    cursors: CursorRegistry,
    transformer: Arc<dyn InclusionTransformer<T>>,
}

impl<T: Element> ReplicaCore<T> {
    pub fn new(transformer: Arc<dyn InclusionTransformer<T>>) -> Self {
        Self {
            model: LinearModel::new(),
            history: OperationHistory::new(),
            cursors: CursorRegistry::new(),
            transformer,
        }
    }

    pub fn model(&self) -> &LinearModel<T> {
        &self.model
    }

    pub fn history(&self) -> &OperationHistory<T> {
        &self.history
    }

    pub fn cursors(&self) -> &CursorRegistry {
        &self.cursors
    }

    pub fn cursors_mut(&mut self) -> &mut CursorRegistry {
        &mut self.cursors
    }

    pub fn transformer(&self) -> &dyn InclusionTransformer<T> {
        self.transformer.as_ref()
    }

    /// Transform `remote` against `local`
    pub fn transform(
        &self,
        role: Role,
        remote: Operation<T>,
        local: Operation<T>,
    ) -> Result<(Operation<T>, Operation<T>), OtError> {
        self.transformer.transform_operation(role, remote, local)
    }

    /// Apply to the model, log it and move the cursors.
    /// Nothing is recorded if the model rejects the operation.
    pub fn apply(&mut self, op: &Operation<T>) -> Result<(), OtError> {
        self.model.apply(op)?;
        self.history.push(op.clone());
        self.cursors.transform_all(self.transformer.as_ref(), op);
        Ok(())
    }

    /// Load a fill payload into an empty replica and return its state.
    pub fn fill(&mut self, data: FillData<T>) -> Result<State, OtError> {
        match data {
            FillData::StateBased { model, state } => {
                self.model.fill(model);
                self.history = OperationHistory::new();
                Ok(state)
            }
            FillData::OperationBased { history, state } => {
                let mut model = LinearModel::new();
                for op in history.iter() {
                    model.apply(op)?;
                }
                self.model = model;
                self.history = history;
                Ok(state)
            }
        }
    }
}

impl<T: Element> CursorHost for ReplicaCore<T> {
    fn register_cursor(&mut self, cursor: LinearCursor) -> Result<CursorId, OtError> {
        self.cursors.register(cursor)
    }

    fn deregister_cursor(&mut self, id: CursorId) -> Result<LinearCursor, OtError> {
        self.cursors.deregister(id)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::transformer;
    use super::*;

    #[test]
    fn test_core_apply_records_and_moves_cursors() {
        let mut core: ReplicaCore<char> = ReplicaCore::new(transformer());
        let id = core.register_cursor(LinearCursor::new(0)).unwrap();

        core.apply(&Operation::insert(0, 'a')).unwrap();
        assert_eq!(core.history().len(), 1);
        assert_eq!(core.cursors().get(id).unwrap().position(), 1);

        // Rejected operations leave no trace
        assert!(core.apply(&Operation::delete(5)).is_err());
        assert_eq!(core.history().len(), 1);

        core.deregister_cursor(id).unwrap();
        assert!(core.deregister_cursor(id).is_err());
    }

    #[test]
    fn test_fill_modes_agree() {
        let mut source: ReplicaCore<char> = ReplicaCore::new(transformer());
        for (i, c) in "hello".chars().enumerate() {
            source.apply(&Operation::insert(i, c)).unwrap();
        }
        source.apply(&Operation::delete(0)).unwrap();

        for mode in [FillMode::StateBased, FillMode::OperationBased] {
            let data = FillData::capture(
                mode,
                source.model(),
                source.history(),
                State::from_components(vec![6]),
            );
            let mut target: ReplicaCore<char> = ReplicaCore::new(transformer());
            let state = target.fill(data).unwrap();

            assert_eq!(state.get(0), 6);
            assert_eq!(target.model().values(), source.model().values());
        }
    }
}
