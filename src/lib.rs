// Tandem - Operational transformation for replicated linear documents

pub mod algorithm;
pub mod config;
pub mod conflict;
pub mod cursor;
pub mod element;
pub mod error;
pub mod history;
pub mod message;
pub mod model;
pub mod operation;
pub mod replica;
pub mod state;
pub mod transform;

pub use algorithm::{Destination, FillData, OperationSender};
pub use config::{AlgorithmKind, ConflictPolicy, FillMode, ReplicaConfig};
pub use cursor::{Cursor, CursorStatus};
pub use element::{Element, Record};
pub use error::OtError;
pub use message::{QueueSender, SyncMessage};
pub use operation::{FieldDelta, Metadata, OpKind, Operation, SiteId, Value};
pub use replica::{
    ClientReplica, ReplicatedEntities, ReplicatedList, ReplicatedText, ServerEvent, ServerReplica,
};
pub use state::State;
