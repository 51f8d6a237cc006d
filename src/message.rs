//! Messages exchanged with the network layer

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::algorithm::{Destination, FillData, OperationSender};
use crate::error::OtError;
use crate::operation::Operation;

/// Payload the network layer carries for one document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage<T> {
    /// An operation to integrate
    Operation(Operation<T>),
    /// Initial synchronization for a joining site
    Fill(FillData<T>),
}

impl<T: Serialize + DeserializeOwned> SyncMessage<T> {
    /// Serialize to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>, OtError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| OtError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_cbor(data: &[u8]) -> Result<Self, OtError> {
        ciborium::from_reader(data).map_err(|e| OtError::SerializationError(e.to_string()))
    }
}

/// Outgoing operation queue backed by a tokio channel.
///
/// The receiving half belongs to whatever drives the network connections.
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<(Destination, Operation<T>)>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    pub fn new(tx: mpsc::UnboundedSender<(Destination, Operation<T>)>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(Destination, Operation<T>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<T: Send> OperationSender<T> for QueueSender<T> {
    fn send_operation(&self, destination: Destination, op: Operation<T>) {
        if self.tx.send((destination, op)).is_err() {
            log::warn!("outgoing queue closed, dropping operation for {:?}", destination);
        }
    }
}
