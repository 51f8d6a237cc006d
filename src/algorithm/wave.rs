//! Wave control algorithm
//!
//! A client keeps at most one operation in flight. Further local operations
//! wait in a buffer until the server echoes the in-flight one back, which is
//! the acknowledgement. The server transforms every incoming operation
//! against the history entries its sender had not yet seen, applies it and
//! relays it to every site, the sender included.
//!
//! State has a single component: the number of server operations a site has
//! seen (for the server, the length of its history).

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::FillMode;
use crate::element::Element;
use crate::error::OtError;
use crate::operation::{Operation, SiteId};
use crate::state::State;
use crate::transform::{InclusionTransformer, Role};

use super::{
    ClientAlgorithm, Destination, FillData, Generator, Integrator, OperationSender, ReplicaCore,
    ServerAlgorithm,
};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WaveClient<T> {
    site: SiteId,
    state: State,
    core: ReplicaCore<T>,
    in_flight: Option<Operation<T>>,
    buffer: VecDeque<Operation<T>>,
    sender: Arc<dyn OperationSender<T>>,
}

impl<T: Element> WaveClient<T> {
    pub fn new(
        site: SiteId,
        transformer: Arc<dyn InclusionTransformer<T>>,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Self {
        Self {
            site,
            state: State::zeroed(1),
            core: ReplicaCore::new(transformer),
            in_flight: None,
            buffer: VecDeque::new(),
            sender,
        }
    }

    pub fn in_flight(&self) -> Option<&Operation<T>> {
        self.in_flight.as_ref()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn send(&self, op: Operation<T>) {
        log::info!("wave client {}: sending {} at {}", self.site, op.kind_name(), self.state);
        self.sender.send_operation(Destination::Server, op);
    }

    /// Server echoed our in-flight operation back
    fn acknowledge(&mut self) -> Result<(), OtError> {
        if self.in_flight.take().is_none() {
            return Err(OtError::ProtocolViolation(format!(
                "site {} got an acknowledgement with nothing in flight",
                self.site
            )));
        }
        log::info!("wave client {}: acknowledged at {}", self.site, self.state);

        if let Some(mut next) = self.buffer.pop_front() {
            next.retag(self.state.clone())?;
            self.in_flight = Some(next.clone());
            self.send(next);
        }
        Ok(())
    }
}

impl<T: Element> Generator<T> for WaveClient<T> {
    fn generate(&mut self, op: Operation<T>) -> Result<Operation<T>, OtError> {
        let op = op.stamped(self.site, self.state.clone());
        self.core.apply(&op)?;

        if self.in_flight.is_none() && self.buffer.is_empty() {
            self.in_flight = Some(op.clone());
            self.send(op.clone());
        } else {
            self.buffer.push_back(op.clone());
        }
        Ok(op)
    }
}

impl<T: Element> Integrator<T> for WaveClient<T> {
    fn integrate(&mut self, remote: Operation<T>) -> Result<Operation<T>, OtError> {
        let creator = remote.meta()?.creator;

        if creator == self.site {
            self.state.increment(0);
            self.acknowledge()?;
            return Ok(remote);
        }

        if self.in_flight.is_none() && !self.buffer.is_empty() {
            return Err(OtError::ProtocolViolation(format!(
                "site {} has {} buffered operations but none in flight",
                self.site,
                self.buffer.len()
            )));
        }
        self.state.increment(0);

        let mut remote = remote;
        if let Some(in_flight) = self.in_flight.take() {
            let (r, l) = self.core.transform(Role::Client, remote, in_flight)?;
            remote = r;
            self.in_flight = Some(l);
        }
        for slot in self.buffer.iter_mut() {
            let local = std::mem::replace(slot, Operation::noop());
            let (r, l) = self.core.transform(Role::Client, remote, local)?;
            remote = r;
            *slot = l;
        }

        self.core.apply(&remote)?;
        Ok(remote)
    }
}

impl<T: Element> ClientAlgorithm<T> for WaveClient<T> {
    fn site(&self) -> SiteId {
        self.site
    }

    fn core(&self) -> &ReplicaCore<T> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ReplicaCore<T> {
        &mut self.core
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn set_state(&mut self, state: &State) -> Result<(), OtError> {
        self.state.copy_from(state)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct WaveServer<T> {
    core: ReplicaCore<T>,
    sites: Vec<SiteId>,
    sender: Arc<dyn OperationSender<T>>,
}

impl<T: Element> WaveServer<T> {
    pub fn new(
        transformer: Arc<dyn InclusionTransformer<T>>,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Self {
        Self {
            core: ReplicaCore::new(transformer),
            sites: Vec::new(),
            sender,
        }
    }
}

impl<T: Element> Integrator<T> for WaveServer<T> {
    fn integrate(&mut self, remote: Operation<T>) -> Result<Operation<T>, OtError> {
        let meta = remote.meta()?;
        if !self.sites.contains(&meta.creator) {
            return Err(OtError::UnknownSite(meta.creator));
        }
        let revision = meta.state.get(0) as usize;

        let mut op = remote;
        for local in self.core.history().concurrent_since(revision)? {
            let (r, _) = self.core.transform(Role::Server, op, local.clone())?;
            op = r;
        }
        self.core.apply(&op)?;

        log::info!(
            "wave server: applied {} from {}, history at {}",
            op,
            op.creator().unwrap_or_default(),
            self.core.history().len()
        );
        for site in &self.sites {
            self.sender.send_operation(Destination::Site(*site), op.clone());
        }
        Ok(op)
    }
}

impl<T: Element> ServerAlgorithm<T> for WaveServer<T> {
    fn add_site(&mut self, site: SiteId, mode: FillMode) -> Result<FillData<T>, OtError> {
        if self.sites.contains(&site) {
            return Err(OtError::SiteAlreadyRegistered(site));
        }
        let fill = FillData::capture(mode, self.core.model(), self.core.history(), self.state());
        self.sites.push(site);
        log::info!("wave server: site {} joined at {}", site, fill.state());
        Ok(fill)
    }

    fn remove_site(&mut self, site: SiteId) -> Result<(), OtError> {
        let index = self
            .sites
            .iter()
            .position(|s| *s == site)
            .ok_or(OtError::UnknownSite(site))?;
        self.sites.remove(index);
        log::info!("wave server: site {} removed", site);
        Ok(())
    }

    fn sites(&self) -> Vec<SiteId> {
        self.sites.clone()
    }

    fn state(&self) -> State {
        State::from_components(vec![self.core.history().len() as u64])
    }

    fn core(&self) -> &ReplicaCore<T> {
        &self.core
    }
}
