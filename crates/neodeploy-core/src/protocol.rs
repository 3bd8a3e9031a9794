//! Client connection scheme and port plan per topology.

use crate::error::{CoreError, Result};
use crate::model::{CLUSTER_MAX_NODES, CLUSTER_MIN_NODES, Edition};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HTTP_PORT: u16 = 7474;
pub const BOLT_PORT: u16 = 7687;
pub const ROUTING_PORT: u16 = 7688;
pub const DISCOVERY_PORT: u16 = 5000;
pub const TRANSACTION_PORT: u16 = 6000;
pub const RAFT_PORT: u16 = 7000;

/// Ports every topology exposes publicly.
pub const BASE_PUBLIC_PORTS: [u16; 2] = [HTTP_PORT, BOLT_PORT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionScheme {
    /// Single server, `bolt://`.
    Direct,
    /// Cluster with server-side routing, `neo4j://`.
    RoutingAware,
}

impl ConnectionScheme {
    pub fn uri_scheme(&self) -> &'static str {
        match self {
            ConnectionScheme::Direct => "bolt",
            ConnectionScheme::RoutingAware => "neo4j",
        }
    }

    /// `bolt://host:7687` or `neo4j://host:7687`.
    pub fn uri_for(&self, host: &str) -> String {
        format!("{}://{}:{}", self.uri_scheme(), host, BOLT_PORT)
    }
}

impl fmt::Display for ConnectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionScheme::Direct => write!(f, "direct"),
            ConnectionScheme::RoutingAware => write!(f, "routing-aware"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSelection {
    pub scheme: ConnectionScheme,
    /// Public ports beyond [`BASE_PUBLIC_PORTS`].
    pub additional_public_ports: Vec<u16>,
}

/// Public/private port split for the network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlan {
    pub public_ports: Vec<u16>,
    pub cluster_ports: Vec<u16>,
}

fn check_topology(edition: Edition, node_count: u8) -> Result<bool> {
    let cluster = match (edition, node_count) {
        (Edition::Community, 1) | (Edition::EnterpriseStandalone, 1) => false,
        (Edition::EnterpriseCluster, n) if (CLUSTER_MIN_NODES..=CLUSTER_MAX_NODES).contains(&n) => {
            true
        }
        _ => {
            return Err(CoreError::UnsupportedTopology {
                edition: edition.to_string(),
                node_count,
            });
        }
    };
    Ok(cluster)
}

pub fn select(edition: Edition, node_count: u8) -> Result<ProtocolSelection> {
    if check_topology(edition, node_count)? {
        Ok(ProtocolSelection {
            scheme: ConnectionScheme::RoutingAware,
            additional_public_ports: vec![ROUTING_PORT],
        })
    } else {
        Ok(ProtocolSelection {
            scheme: ConnectionScheme::Direct,
            additional_public_ports: Vec::new(),
        })
    }
}

pub fn network_plan(edition: Edition, node_count: u8) -> Result<NetworkPlan> {
    let selection = select(edition, node_count)?;
    let mut public_ports = BASE_PUBLIC_PORTS.to_vec();
    public_ports.extend(&selection.additional_public_ports);

    let cluster_ports = match selection.scheme {
        ConnectionScheme::RoutingAware => vec![DISCOVERY_PORT, TRANSACTION_PORT, RAFT_PORT],
        ConnectionScheme::Direct => Vec::new(),
    };

    Ok(NetworkPlan {
        public_ports,
        cluster_ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_table_is_exhaustive() {
        for edition in [
            Edition::Community,
            Edition::EnterpriseStandalone,
            Edition::EnterpriseCluster,
        ] {
            for n in 0..=12u8 {
                let result = select(edition, n);
                match (edition, n) {
                    (Edition::Community | Edition::EnterpriseStandalone, 1) => {
                        let s = result.unwrap();
                        assert_eq!(s.scheme, ConnectionScheme::Direct);
                        assert!(s.additional_public_ports.is_empty());
                    }
                    (Edition::EnterpriseCluster, 3..=10) => {
                        let s = result.unwrap();
                        assert_eq!(s.scheme, ConnectionScheme::RoutingAware);
                        assert_eq!(s.additional_public_ports, vec![ROUTING_PORT]);
                    }
                    _ => assert!(
                        matches!(result, Err(CoreError::UnsupportedTopology { .. })),
                        "{edition} with {n} nodes should be rejected"
                    ),
                }
            }
        }
    }

    #[test]
    fn test_cluster_ports_stay_private() {
        let plan = network_plan(Edition::EnterpriseCluster, 3).unwrap();
        assert_eq!(plan.public_ports, vec![7474, 7687, 7688]);
        assert_eq!(plan.cluster_ports, vec![5000, 6000, 7000]);

        let selection = select(Edition::EnterpriseCluster, 3).unwrap();
        for port in &plan.cluster_ports {
            assert!(!selection.additional_public_ports.contains(port));
        }

        let single = network_plan(Edition::Community, 1).unwrap();
        assert_eq!(single.public_ports, vec![7474, 7687]);
        assert!(single.cluster_ports.is_empty());
    }

    #[test]
    fn test_uri_scheme() {
        assert_eq!(
            ConnectionScheme::Direct.uri_for("db.example"),
            "bolt://db.example:7687"
        );
        assert_eq!(
            ConnectionScheme::RoutingAware.uri_for("db.example"),
            "neo4j://db.example:7687"
        );
    }
}
