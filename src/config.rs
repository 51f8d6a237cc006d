//! Replica configuration
//!
//! Selects the control algorithm, the conflict policy and the fill mode of a
//! document, and builds the matching components.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::algorithm::{
    ClientAlgorithm, JupiterClient, JupiterServer, OperationSender, ServerAlgorithm, WaveClient,
    WaveServer,
};
use crate::conflict::{ConflictSolver, FirstWriterWins, LastWriterWins};
use crate::element::Element;
use crate::error::OtError;
use crate::operation::SiteId;
use crate::transform::{InclusionTransformer, LinearTransformer};

// ---------------------------------------------------------------------------
// Policy types
// ---------------------------------------------------------------------------

/// Which control algorithm a document runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Single in-flight operation, server echo as acknowledgement
    #[default]
    Wave,
    /// Two-component state per client/proxy pair
    Jupiter,
}

/// How concurrent updates of the same element are resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    FirstWriterWins,
    /// Entity updates are merged field by field
    #[default]
    LastWriterWins,
}

/// What a joining site receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    /// Element snapshot plus state
    #[default]
    StateBased,
    /// Full operation history plus state; replayable
    OperationBased,
}

/// Configuration shared by every replica of one document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    pub algorithm: AlgorithmKind,
    pub conflict: ConflictPolicy,
    pub fill: FillMode,
}

impl ReplicaConfig {
    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, OtError> {
        serde_json::from_str(json).map_err(|e| OtError::SerializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, OtError> {
        serde_json::to_string_pretty(self).map_err(|e| OtError::SerializationError(e.to_string()))
    }

    pub fn solver<T: Element>(&self) -> Arc<dyn ConflictSolver<T>> {
        match self.conflict {
            ConflictPolicy::FirstWriterWins => Arc::new(FirstWriterWins),
            ConflictPolicy::LastWriterWins => Arc::new(LastWriterWins),
        }
    }

    pub fn transformer<T: Element>(&self) -> Arc<dyn InclusionTransformer<T>> {
        Arc::new(LinearTransformer::new(self.solver()))
    }

    /// Client algorithm for `site` that sends through `sender`
    pub fn client_algorithm<T: Element>(
        &self,
        site: SiteId,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Box<dyn ClientAlgorithm<T>> {
        let transformer = self.transformer();
        match self.algorithm {
            AlgorithmKind::Wave => Box::new(WaveClient::new(site, transformer, sender)),
            AlgorithmKind::Jupiter => Box::new(JupiterClient::new(site, transformer, sender)),
        }
    }

    pub fn server_algorithm<T: Element>(
        &self,
        sender: Arc<dyn OperationSender<T>>,
    ) -> Box<dyn ServerAlgorithm<T>> {
        let transformer = self.transformer();
        match self.algorithm {
            AlgorithmKind::Wave => Box::new(WaveServer::new(transformer, sender)),
            AlgorithmKind::Jupiter => Box::new(JupiterServer::new(transformer, sender)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReplicaConfig::default();
        assert_eq!(config.algorithm, AlgorithmKind::Wave);
        assert_eq!(config.conflict, ConflictPolicy::LastWriterWins);
        assert_eq!(config.fill, FillMode::StateBased);
    }

    #[test]
    fn test_from_json() {
        let config = ReplicaConfig::from_json(
            r#"{ "algorithm": "Jupiter", "conflict": "FirstWriterWins", "fill": "OperationBased" }"#,
        )
        .unwrap();
        assert_eq!(config.algorithm, AlgorithmKind::Jupiter);
        assert_eq!(config.conflict, ConflictPolicy::FirstWriterWins);
        assert_eq!(config.fill, FillMode::OperationBased);

        let partial = ReplicaConfig::from_json(r#"{ "algorithm": "Jupiter" }"#).unwrap();
        assert_eq!(partial.fill, FillMode::StateBased);

        let back = ReplicaConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            ReplicaConfig::from_json(r#"{ "algorithm": "Paxos" }"#),
            Err(OtError::SerializationError(_))
        ));
    }
}
