//! Jupiter control algorithm
//!
//! Every participant pair (client, server-side proxy) keeps a two-component
//! state `[local operations generated, remote operations integrated]` and a
//! queue of local operations the other side may not have seen yet. An
//! incoming operation reports how many of our operations its sender had
//! integrated; everything older is dropped from the queue and the incoming
//! operation is transformed against the rest.

use std::collections::{HashMap, VecDeque};
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

const LOCAL: usize = 0;
const REMOTE: usize = 1;

/// Drop queued operations the peer had already integrated, then transform
/// `remote` against the rest, replacing each with its transformed form.
fn integrate_against_queue<T>(
    transformer: &dyn InclusionTransformer<T>,
    role: Role,
    outgoing: &mut VecDeque<Operation<T>>,
    remote: Operation<T>,
) -> Result<Operation<T>, OtError> {
    let seen_by_peer = remote.meta()?.state.get(REMOTE);
    outgoing.retain(|queued| {
        queued
            .metadata
            .as_ref()
            .map_or(false, |m| m.state.get(LOCAL) >= seen_by_peer)
    });

    let mut remote = remote;
    for slot in outgoing.iter_mut() {
        let local = std::mem::replace(slot, Operation::noop());
        let (r, l) = transformer.transform_operation(role, remote, local)?;
        remote = r;
        *slot = l;
    }
    Ok(remote)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct JupiterClient<T> {
    site: SiteId,
    state: State,
    core: ReplicaCore<T>,
    outgoing: VecDeque<Operation<T>>,
    sender: Arc<dyn OperationSender<T>>,
}

impl<T: Element> JupiterClient<T> {
    pub fn new(
        site: SiteId,
        transformer: Arc<dyn InclusionTransformer<T>>,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Self {
        Self {
            site,
            state: State::zeroed(2),
            core: ReplicaCore::new(transformer),
            outgoing: VecDeque::new(),
            sender,
        }
    }

    /// Operations not yet known to be integrated by the server
    pub fn unacknowledged(&self) -> usize {
        self.outgoing.len()
    }
}

impl<T: Element> Generator<T> for JupiterClient<T> {
    fn generate(&mut self, op: Operation<T>) -> Result<Operation<T>, OtError> {
        let op = op.stamped(self.site, self.state.clone());
        self.core.apply(&op)?;

        log::info!("jupiter client {}: sending {} at {}", self.site, op.kind_name(), self.state);
        self.sender.send_operation(Destination::Server, op.clone());
        self.outgoing.push_back(op.clone());
        self.state.increment(LOCAL);
        Ok(op)
    }
}

impl<T: Element> Integrator<T> for JupiterClient<T> {
    fn integrate(&mut self, remote: Operation<T>) -> Result<Operation<T>, OtError> {
        let remote = integrate_against_queue(
            self.core.transformer(),
            Role::Client,
            &mut self.outgoing,
            remote,
        )?;
        self.core.apply(&remote)?;
        self.state.increment(REMOTE);
        Ok(remote)
    }
}

impl<T: Element> ClientAlgorithm<T> for JupiterClient<T> {
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
// Server-side proxy
// ---------------------------------------------------------------------------

/// The server's mirror of one client
pub struct ServerSideProxy<T> {
    site: SiteId,
    state: State,
    outgoing: VecDeque<Operation<T>>,
}

impl<T: Element> ServerSideProxy<T> {
    /// Proxy for a client that was filled with `history_len` operations
    pub fn new(site: SiteId, history_len: usize) -> Self {
        Self {
            site,
            state: State::from_components(vec![history_len as u64, 0]),
            outgoing: VecDeque::new(),
        }
    }

    pub fn site(&self) -> SiteId {
        self.site
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Transform an operation from this proxy's client into server context
    pub fn proxy_integrate(
        &mut self,
        transformer: &dyn InclusionTransformer<T>,
        remote: Operation<T>,
    ) -> Result<Operation<T>, OtError> {
        let remote = integrate_against_queue(transformer, Role::Server, &mut self.outgoing, remote)?;
        self.state.increment(REMOTE);
        Ok(remote)
    }

    /// Relay an operation to this proxy's client, stamped from the proxy's point of view
    pub fn proxy_generate(
        &mut self,
        op: &Operation<T>,
        sender: &dyn OperationSender<T>,
    ) -> Result<(), OtError> {
        let creator = op.meta()?.creator;
        let relayed = op.clone().stamped(creator, self.state.clone());
        sender.send_operation(Destination::Site(self.site), relayed.clone());
        self.outgoing.push_back(relayed);
        self.state.increment(LOCAL);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct JupiterServer<T> {
    core: ReplicaCore<T>,
    proxies: HashMap<SiteId, ServerSideProxy<T>>,
    sender: Arc<dyn OperationSender<T>>,
}

impl<T: Element> JupiterServer<T> {
    pub fn new(
        transformer: Arc<dyn InclusionTransformer<T>>,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Self {
        Self {
            core: ReplicaCore::new(transformer),
            proxies: HashMap::new(),
            sender,
        }
    }

    /// Current state of the proxy that mirrors `site`
    pub fn proxy_state(&self, site: SiteId) -> Result<State, OtError> {
        self.proxies
            .get(&site)
            .map(|p| p.state().clone())
            .ok_or(OtError::UnknownSite(site))
    }
}

impl<T: Element> Integrator<T> for JupiterServer<T> {
    fn integrate(&mut self, remote: Operation<T>) -> Result<Operation<T>, OtError> {
        let creator = remote.meta()?.creator;
        let proxy = self
            .proxies
            .get_mut(&creator)
            .ok_or(OtError::UnknownSite(creator))?;

        let op = proxy.proxy_integrate(self.core.transformer(), remote)?;
        self.core.apply(&op)?;
        log::info!(
            "jupiter server: applied {} from {}, history at {}",
            op,
            creator,
            self.core.history().len()
        );

        for (site, proxy) in self.proxies.iter_mut() {
            if *site != creator {
                proxy.proxy_generate(&op, self.sender.as_ref())?;
            }
        }
        Ok(op)
    }
}

impl<T: Element> ServerAlgorithm<T> for JupiterServer<T> {
    fn add_site(&mut self, site: SiteId, mode: FillMode) -> Result<FillData<T>, OtError> {
        if self.proxies.contains_key(&site) {
            return Err(OtError::SiteAlreadyRegistered(site));
        }
        let history_len = self.core.history().len();
        let fill = FillData::capture(mode, self.core.model(), self.core.history(), self.state());
        self.proxies.insert(site, ServerSideProxy::new(site, history_len));
        log::info!("jupiter server: site {} joined at {}", site, fill.state());
        Ok(fill)
    }

    fn remove_site(&mut self, site: SiteId) -> Result<(), OtError> {
        self.proxies
            .remove(&site)
            .map(|_| log::info!("jupiter server: site {} removed", site))
            .ok_or(OtError::UnknownSite(site))
    }

    fn sites(&self) -> Vec<SiteId> {
        self.proxies.keys().copied().collect()
    }

    fn state(&self) -> State {
        State::from_components(vec![0, self.core.history().len() as u64])
    }

    fn core(&self) -> &ReplicaCore<T> {
        &self.core
    }
}
