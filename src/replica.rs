//! Replicated documents
//!
//! A replica owns one control algorithm behind a single lock, which makes
//! every mutating entry point (local edits, network input, fill, cursor
//! registration, site membership) one critical section per document.
//! Documents never share a lock, so they proceed independently.
//!
//! Clients gate local edits on a fill flag: edits made before the first
//! synchronization wait for it, while network operations arriving before it
//! are rejected.

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::algorithm::{ClientAlgorithm, CursorHost, FillData, OperationSender, ServerAlgorithm};
use crate::config::{FillMode, ReplicaConfig};
use crate::cursor::{Cursor, CursorId, LinearCursor};
use crate::element::{Element, Record};
use crate::error::OtError;
use crate::history::OperationHistory;
use crate::message::SyncMessage;
use crate::operation::{FieldDelta, Operation, SiteId};
use crate::state::State;

// ---------------------------------------------------------------------------
// Client replica
// ---------------------------------------------------------------------------

struct ClientInner<T> {
    site: SiteId,
    algorithm: Mutex<Box<dyn ClientAlgorithm<T>>>,
    joined_tx: watch::Sender<bool>,
    joined_rx: watch::Receiver<bool>,
}

/// Client side of one replicated document. Cheap to clone; clones share state.
pub struct ClientReplica<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for ClientReplica<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> ClientReplica<T> {
    pub fn new(config: &ReplicaConfig, site: SiteId, sender: Arc<dyn OperationSender<T>>) -> Self {
        Self::from_algorithm(config.client_algorithm(site, sender))
    }

    pub fn from_algorithm(algorithm: Box<dyn ClientAlgorithm<T>>) -> Self {
        let (joined_tx, joined_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ClientInner {
                site: algorithm.site(),
                algorithm: Mutex::new(algorithm),
                joined_tx,
                joined_rx,
            }),
        }
    }

    pub fn site(&self) -> SiteId {
        self.inner.site
    }

    pub fn is_joined(&self) -> bool {
        *self.inner.joined_rx.borrow()
    }

    /// Resolves once the initial fill has been applied
    pub async fn wait_joined(&self) {
        let mut rx = self.inner.joined_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run `f` inside the document's critical section
    pub(crate) fn locked<R>(
        &self,
        f: impl FnOnce(&mut (dyn ClientAlgorithm<T> + 'static)) -> Result<R, OtError>,
    ) -> Result<R, OtError> {
        let mut algorithm = self
            .inner
            .algorithm
            .lock()
            .map_err(|e| OtError::LockPoisoned(e.to_string()))?;
        f(&mut **algorithm)
    }

    /// Apply a local edit and send it. Waits for the initial fill first.
    pub async fn generate(&self, op: Operation<T>) -> Result<Operation<T>, OtError> {
        self.wait_joined().await;
        self.locked(|alg| alg.generate(op))
    }

    /// Integrate an operation from the network.
    pub fn integrate(&self, op: Operation<T>) -> Result<Operation<T>, OtError> {
        self.locked(|alg| {
            if !*self.inner.joined_rx.borrow() {
                return Err(OtError::NotJoined);
            }
            alg.integrate(op)
        })
    }

    /// Apply the initial synchronization payload and open the fill gate.
    pub fn fill(&self, data: FillData<T>) -> Result<(), OtError> {
        self.locked(|alg| {
            if *self.inner.joined_rx.borrow() {
                return Err(OtError::AlreadyJoined);
            }
            alg.fill(data)?;
            self.inner.joined_tx.send_replace(true);
            log::info!("site {} joined at {}", alg.site(), alg.state());
            Ok(())
        })
    }

    /// Dispatch one message from the network
    pub fn receive(&self, msg: SyncMessage<T>) -> Result<(), OtError> {
        match msg {
            SyncMessage::Operation(op) => self.integrate(op).map(|_| ()),
            SyncMessage::Fill(data) => self.fill(data),
        }
    }

    /// Drain `rx` on a dedicated task until the queue closes or an error
    /// ends the session.
    pub fn spawn_receiver(
        &self,
        mut rx: mpsc::UnboundedReceiver<SyncMessage<T>>,
    ) -> JoinHandle<Result<(), OtError>> {
        let replica = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = replica.receive(msg) {
                    log::error!("site {}: document session aborted: {}", replica.site(), e);
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    /// Register a cursor at `position`
    pub fn cursor(&self, position: isize) -> Result<Cursor<T>, OtError> {
        let id = self.locked(|alg| alg.core_mut().register_cursor(LinearCursor::new(position)))?;
        Ok(Cursor::new(id, self.clone()))
    }

    pub(crate) fn deregister_cursor(&self, id: CursorId) -> Result<(), OtError> {
        self.locked(|alg| alg.core_mut().deregister_cursor(id).map(|_| ()))
    }

    pub fn values(&self) -> Result<Vec<T>, OtError> {
        self.locked(|alg| Ok(alg.core().model().values()))
    }

    pub fn get(&self, position: usize) -> Result<Option<T>, OtError> {
        self.locked(|alg| Ok(alg.core().model().get(position).cloned()))
    }

    pub fn len(&self) -> Result<usize, OtError> {
        self.locked(|alg| Ok(alg.core().model().len()))
    }

    pub fn history(&self) -> Result<OperationHistory<T>, OtError> {
        self.locked(|alg| Ok(alg.history()))
    }

    pub fn state(&self) -> Result<State, OtError> {
        self.locked(|alg| Ok(alg.state().clone()))
    }

    pub fn set_state(&self, state: &State) -> Result<(), OtError> {
        self.locked(|alg| alg.set_state(state))
    }
}

// ---------------------------------------------------------------------------
// Server replica
// ---------------------------------------------------------------------------

/// Input to a server replica's receive task
pub enum ServerEvent<T> {
    /// Operation from a connected site
    Operation(Operation<T>),
    /// A site connected; the fill payload is sent back on `reply`
    SiteJoined {
        site: SiteId,
        reply: oneshot::Sender<Result<FillData<T>, OtError>>,
    },
    /// The delivery layer lost a site
    SiteRemoved(SiteId),
}

struct ServerInner<T> {
    algorithm: Mutex<Box<dyn ServerAlgorithm<T>>>,
    fill: FillMode,
}

/// Server side of one replicated document
pub struct ServerReplica<T> {
    inner: Arc<ServerInner<T>>,
}

impl<T> Clone for ServerReplica<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> ServerReplica<T> {
    pub fn new(config: &ReplicaConfig, sender: Arc<dyn OperationSender<T>>) -> Self {
        Self::from_algorithm(config.server_algorithm(sender), config.fill)
    }

    pub fn from_algorithm(algorithm: Box<dyn ServerAlgorithm<T>>, fill: FillMode) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                algorithm: Mutex::new(algorithm),
                fill,
            }),
        }
    }

    fn locked<R>(
        &self,
        f: impl FnOnce(&mut (dyn ServerAlgorithm<T> + 'static)) -> Result<R, OtError>,
    ) -> Result<R, OtError> {
        let mut algorithm = self
            .inner
            .algorithm
            .lock()
            .map_err(|e| OtError::LockPoisoned(e.to_string()))?;
        f(&mut **algorithm)
    }

    pub fn integrate(&self, op: Operation<T>) -> Result<Operation<T>, OtError> {
        self.locked(|alg| alg.integrate(op))
    }

    /// Snapshot the document for `site` and register it in one step, so no
    /// operation can slip in between.
    pub fn join_site(&self, site: SiteId) -> Result<FillData<T>, OtError> {
        let mode = self.inner.fill;
        self.locked(|alg| alg.add_site(site, mode))
    }

    pub fn remove_site(&self, site: SiteId) -> Result<(), OtError> {
        self.locked(|alg| alg.remove_site(site))
    }

    pub fn sites(&self) -> Result<Vec<SiteId>, OtError> {
        self.locked(|alg| Ok(alg.sites()))
    }

    pub fn values(&self) -> Result<Vec<T>, OtError> {
        self.locked(|alg| Ok(alg.core().model().values()))
    }

    pub fn history(&self) -> Result<OperationHistory<T>, OtError> {
        self.locked(|alg| Ok(alg.history()))
    }

    pub fn state(&self) -> Result<State, OtError> {
        self.locked(|alg| Ok(alg.state()))
    }

    /// Drain server events on a dedicated task. An operation that fails to
    /// integrate ends the session. Membership errors, and operations from
    /// sites that are not (or no longer) registered, are reported and skipped.
    pub fn spawn_receiver(
        &self,
        mut rx: mpsc::UnboundedReceiver<ServerEvent<T>>,
    ) -> JoinHandle<Result<(), OtError>> {
        let replica = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ServerEvent::Operation(op) => match replica.integrate(op) {
                        Ok(_) => {}
                        Err(OtError::UnknownSite(site)) => {
                            log::warn!("server: dropping operation from unregistered site {}", site);
                        }
                        Err(e) => {
                            log::error!("server: document session aborted: {}", e);
                            return Err(e);
                        }
                    },
                    ServerEvent::SiteJoined { site, reply } => {
                        let fill = replica.join_site(site);
                        if reply.send(fill).is_err() {
                            log::warn!("server: site {} left before receiving its fill", site);
                        }
                    }
                    ServerEvent::SiteRemoved(site) => {
                        if let Err(e) = replica.remove_site(site) {
                            log::warn!("server: removing site {}: {}", site, e);
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Document kinds
// ---------------------------------------------------------------------------

/// Ordered list of elements addressed by index.
///
/// Each edit waits for the initial fill and then resolves its index and
/// generates its operations inside one critical section, so concurrent
/// callers and incoming remote operations never observe a half-done edit.
pub struct ReplicatedList<T> {
    replica: ClientReplica<T>,
}

fn element_at<T: Element>(
    alg: &(dyn ClientAlgorithm<T> + 'static),
    index: usize,
) -> Result<T, OtError> {
    let model = alg.core().model();
    model.get(index).cloned().ok_or(OtError::PositionOutOfRange {
        position: index,
        size: model.len(),
    })
}

impl<T: Element> ReplicatedList<T> {
    pub fn new(replica: ClientReplica<T>) -> Self {
        Self { replica }
    }

    pub fn replica(&self) -> &ClientReplica<T> {
        &self.replica
    }

    async fn edit<R>(
        &self,
        f: impl FnOnce(&mut (dyn ClientAlgorithm<T> + 'static)) -> Result<R, OtError>,
    ) -> Result<R, OtError> {
        self.replica.wait_joined().await;
        self.replica.locked(f)
    }

    pub async fn push(&self, value: T) -> Result<(), OtError> {
        self.edit(|alg| {
            let end = alg.core().model().len();
            alg.generate(Operation::insert(end, value)).map(|_| ())
        })
        .await
    }

    pub async fn insert(&self, index: usize, value: T) -> Result<(), OtError> {
        self.edit(|alg| alg.generate(Operation::insert(index, value)).map(|_| ()))
            .await
    }

    /// Insert `values` in order starting at `index`
    pub async fn insert_all(
        &self,
        index: usize,
        values: impl IntoIterator<Item = T>,
    ) -> Result<(), OtError> {
        let values: Vec<T> = values.into_iter().collect();
        self.edit(|alg| {
            for (offset, value) in values.into_iter().enumerate() {
                alg.generate(Operation::insert(index + offset, value))?;
            }
            Ok(())
        })
        .await
    }

    /// Replace the element at `index`, returning the previous one
    pub async fn set(&self, index: usize, value: T) -> Result<T, OtError> {
        self.edit(|alg| {
            let previous = element_at(alg, index)?;
            alg.generate(Operation::replace(index, value))?;
            Ok(previous)
        })
        .await
    }

    pub async fn remove(&self, index: usize) -> Result<T, OtError> {
        self.edit(|alg| {
            let removed = element_at(alg, index)?;
            alg.generate(Operation::delete(index))?;
            Ok(removed)
        })
        .await
    }

    /// Remove the first element equal to `value`
    pub async fn remove_value(&self, value: &T) -> Result<bool, OtError> {
        self.edit(|alg| {
            let found = alg.core().model().iter().position(|v| v == value);
            match found {
                Some(index) => alg.generate(Operation::delete(index)).map(|_| true),
                None => Ok(false),
            }
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), OtError> {
        self.edit(|alg| {
            while !alg.core().model().is_empty() {
                alg.generate(Operation::delete(0))?;
            }
            Ok(())
        })
        .await
    }

    pub fn get(&self, index: usize) -> Result<Option<T>, OtError> {
        self.replica.get(index)
    }

    pub fn len(&self) -> Result<usize, OtError> {
        self.replica.len()
    }

    pub fn is_empty(&self) -> Result<bool, OtError> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, value: &T) -> Result<bool, OtError> {
        Ok(self.index_of(value)?.is_some())
    }

    pub fn index_of(&self, value: &T) -> Result<Option<usize>, OtError> {
        Ok(self.to_vec()?.iter().position(|v| v == value))
    }

    pub fn to_vec(&self) -> Result<Vec<T>, OtError> {
        self.replica.values()
    }
}

/// Character sequence
pub struct ReplicatedText {
    list: ReplicatedList<char>,
}

impl ReplicatedText {
    pub fn new(replica: ClientReplica<char>) -> Self {
        Self {
            list: ReplicatedList::new(replica),
        }
    }

    pub fn replica(&self) -> &ClientReplica<char> {
        self.list.replica()
    }

    pub async fn insert_char(&self, position: usize, c: char) -> Result<(), OtError> {
        self.list.insert(position, c).await
    }

    pub async fn insert_str(&self, position: usize, s: &str) -> Result<(), OtError> {
        self.list.insert_all(position, s.chars()).await
    }

    pub async fn delete_char(&self, position: usize) -> Result<char, OtError> {
        self.list.remove(position).await
    }

    pub fn char_at(&self, position: usize) -> Result<Option<char>, OtError> {
        self.list.get(position)
    }

    pub fn len(&self) -> Result<usize, OtError> {
        self.list.len()
    }

    pub fn is_empty(&self) -> Result<bool, OtError> {
        self.list.is_empty()
    }

    pub fn text(&self) -> Result<String, OtError> {
        Ok(self.list.to_vec()?.into_iter().collect())
    }
}

impl fmt::Display for ReplicatedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.text().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Sequence of typed entities with field-level updates
pub struct ReplicatedEntities {
    list: ReplicatedList<Record>,
}

impl ReplicatedEntities {
    pub fn new(replica: ClientReplica<Record>) -> Self {
        Self {
            list: ReplicatedList::new(replica),
        }
    }

    pub fn replica(&self) -> &ClientReplica<Record> {
        self.list.replica()
    }

    pub async fn push(&self, record: Record) -> Result<(), OtError> {
        self.list.push(record).await
    }

    /// Overwrite some fields of the entity at `position`
    pub async fn update(&self, position: usize, delta: FieldDelta) -> Result<(), OtError> {
        self.list
            .edit(|alg| {
                let type_tag = element_at(alg, position)?.type_tag().to_string();
                alg.generate(Operation::update_entity(position, type_tag, delta)?)
                    .map(|_| ())
            })
            .await
    }

    pub fn get(&self, position: usize) -> Result<Option<Record>, OtError> {
        self.list.get(position)
    }

    pub fn len(&self) -> Result<usize, OtError> {
        self.list.len()
    }

    pub fn is_empty(&self) -> Result<bool, OtError> {
        self.list.is_empty()
    }

    pub fn to_vec(&self) -> Result<Vec<Record>, OtError> {
        self.list.to_vec()
    }
}
