//! Cluster membership view and join/leave planning.
//!
//! The authoritative membership lives in the state machine as openraft's
//! [`StoredMembership`]; everything here is derived from it. Planning is pure
//! so the rules (identity is immutable, the last voter cannot leave) are
//! testable without a running cluster.

use crate::cluster::types::{NodeId, StoredMembership};
use crate::error::CoordinatorError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Whether a node votes in elections and counts toward commit quorums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Voter,
    /// Receives replication but never votes (an openraft learner).
    Nonvoter,
}

/// A cluster member: stable id, RPC address, role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: String,
    #[serde(default)]
    pub role: NodeRole,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id,
            addr: addr.into(),
            role,
        }
    }

    /// Checks that the id is non-zero and the address looks like `host:port`.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.id == 0 {
            return Err(CoordinatorError::InvalidArgument(
                "node id must be non-zero".into(),
            ));
        }
        validate_addr(&self.addr)
    }
}

/// Validates a `host:port` peer address.
pub fn validate_addr(addr: &str) -> Result<(), CoordinatorError> {
    let invalid = || CoordinatorError::InvalidArgument(format!("invalid node address '{addr}'"));
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(invalid()),
    }
}

/// Snapshot of cluster membership as known by the local node. May be stale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterView {
    pub nodes: BTreeMap<NodeId, NodeInfo>,
    pub leader: Option<NodeId>,
    /// Log index of the membership entry this view was built from.
    pub membership_log_index: Option<u64>,
}

impl ClusterView {
    /// Builds a view from voter ids and the full `id -> addr` node table.
    /// Nodes not in `voters` are nonvoters.
    pub fn from_parts(
        voters: &BTreeSet<NodeId>,
        nodes: impl IntoIterator<Item = (NodeId, String)>,
        leader: Option<NodeId>,
        membership_log_index: Option<u64>,
    ) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(id, addr)| {
                let role = if voters.contains(&id) {
                    NodeRole::Voter
                } else {
                    NodeRole::Nonvoter
                };
                (id, NodeInfo::new(id, addr, role))
            })
            .collect();
        Self {
            nodes,
            leader,
            membership_log_index,
        }
    }

    /// Builds a view from the applied membership.
    pub fn from_membership(stored: &StoredMembership, leader: Option<NodeId>) -> Self {
        let membership = stored.membership();
        let voters: BTreeSet<NodeId> = membership.voter_ids().collect();
        let nodes = membership
            .nodes()
            .map(|(id, node)| (*id, node.addr.clone()));
        Self::from_parts(
            &voters,
            nodes,
            leader,
            stored.log_id().as_ref().map(|id| id.index),
        )
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    pub fn voter_ids(&self) -> BTreeSet<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Voter)
            .map(|n| n.id)
            .collect()
    }

    pub fn voter_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.role == NodeRole::Voter)
            .count()
    }
}

/// What a join request turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPlan {
    /// Same id, address and role are already in the cluster.
    AlreadyMember,
    /// New node: add as learner, then promote when `promote` is set.
    AddLearner { promote: bool },
    /// Existing nonvoter becomes a voter.
    Promote,
    /// Existing voter becomes a nonvoter.
    Demote,
}

/// What a leave request turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeavePlan {
    RemoveVoter,
    RemoveNonvoter,
}

/// Decides how to apply a join against the current view.
pub fn plan_join(view: &ClusterView, node: &NodeInfo) -> Result<JoinPlan, CoordinatorError> {
    node.validate()?;
    let Some(existing) = view.get(node.id) else {
        return Ok(JoinPlan::AddLearner {
            promote: node.role == NodeRole::Voter,
        });
    };
    if existing.addr != node.addr {
        return Err(CoordinatorError::InvalidArgument(format!(
            "node {} is already a member at {}; leave and rejoin to change its address",
            node.id, existing.addr
        )));
    }
    match (existing.role, node.role) {
        (a, b) if a == b => Ok(JoinPlan::AlreadyMember),
        (NodeRole::Nonvoter, NodeRole::Voter) => Ok(JoinPlan::Promote),
        _ => {
            if view.voter_count() <= 1 {
                return Err(CoordinatorError::InvalidArgument(
                    "cannot demote the last voter".into(),
                ));
            }
            Ok(JoinPlan::Demote)
        }
    }
}

/// Decides how to remove `id`.
pub fn plan_leave(view: &ClusterView, id: NodeId) -> Result<LeavePlan, CoordinatorError> {
    let node = view
        .get(id)
        .ok_or_else(|| CoordinatorError::NotFound(format!("node {id} is not a cluster member")))?;
    match node.role {
        NodeRole::Nonvoter => Ok(LeavePlan::RemoveNonvoter),
        NodeRole::Voter if view.voter_count() <= 1 => Err(CoordinatorError::InvalidArgument(
            "cannot remove the last voter; the cluster would lose quorum".into(),
        )),
        NodeRole::Voter => Ok(LeavePlan::RemoveVoter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(voters: &[NodeId], nonvoters: &[NodeId]) -> ClusterView {
        let voter_set: BTreeSet<NodeId> = voters.iter().copied().collect();
        let nodes = voters
            .iter()
            .chain(nonvoters)
            .map(|id| (*id, format!("127.0.0.1:{}", 7000 + id)));
        ClusterView::from_parts(&voter_set, nodes, voters.first().copied(), Some(1))
    }

    #[test]
    fn test_node_validation() {
        assert!(NodeInfo::new(1, "127.0.0.1:7070", NodeRole::Voter).validate().is_ok());
        assert!(NodeInfo::new(1, "node-a:80", NodeRole::Voter).validate().is_ok());
        assert!(NodeInfo::new(0, "127.0.0.1:7070", NodeRole::Voter).validate().is_err());
        assert!(NodeInfo::new(1, "", NodeRole::Voter).validate().is_err());
        assert!(NodeInfo::new(1, "localhost", NodeRole::Voter).validate().is_err());
        assert!(NodeInfo::new(1, ":7070", NodeRole::Voter).validate().is_err());
        assert!(NodeInfo::new(1, "host:0", NodeRole::Voter).validate().is_err());
        assert!(NodeInfo::new(1, "host:99999", NodeRole::Voter).validate().is_err());
    }

    #[test]
    fn test_role_serde() {
        let n: NodeInfo = serde_json::from_str(r#"{"id":2,"addr":"h:1"}"#).unwrap();
        assert_eq!(n.role, NodeRole::Voter);
        let n: NodeInfo = serde_json::from_str(r#"{"id":2,"addr":"h:1","role":"nonvoter"}"#).unwrap();
        assert_eq!(n.role, NodeRole::Nonvoter);
    }

    #[test]
    fn test_view_roles() {
        let v = view(&[1, 2], &[3]);
        assert_eq!(v.voter_count(), 2);
        assert_eq!(v.get(3).map(|n| n.role), Some(NodeRole::Nonvoter));
        assert_eq!(v.voter_ids(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_join_new_voter() {
        let v = view(&[1], &[]);
        let plan = plan_join(&v, &NodeInfo::new(2, "127.0.0.1:7002", NodeRole::Voter)).unwrap();
        assert_eq!(plan, JoinPlan::AddLearner { promote: true });
        let plan = plan_join(&v, &NodeInfo::new(2, "127.0.0.1:7002", NodeRole::Nonvoter)).unwrap();
        assert_eq!(plan, JoinPlan::AddLearner { promote: false });
    }

    #[test]
    fn test_join_existing_is_noop() {
        let v = view(&[1, 2], &[]);
        let plan = plan_join(&v, &NodeInfo::new(2, "127.0.0.1:7002", NodeRole::Voter)).unwrap();
        assert_eq!(plan, JoinPlan::AlreadyMember);
    }

    #[test]
    fn test_join_address_change_rejected() {
        let v = view(&[1, 2], &[]);
        let err = plan_join(&v, &NodeInfo::new(2, "10.1.1.1:9000", NodeRole::Voter)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    }

    #[test]
    fn test_join_role_changes() {
        let v = view(&[1, 2], &[3]);
        assert_eq!(
            plan_join(&v, &NodeInfo::new(3, "127.0.0.1:7003", NodeRole::Voter)).unwrap(),
            JoinPlan::Promote
        );
        assert_eq!(
            plan_join(&v, &NodeInfo::new(2, "127.0.0.1:7002", NodeRole::Nonvoter)).unwrap(),
            JoinPlan::Demote
        );
        let single = view(&[1], &[]);
        assert!(plan_join(&single, &NodeInfo::new(1, "127.0.0.1:7001", NodeRole::Nonvoter)).is_err());
    }

    #[test]
    fn test_leave() {
        let v = view(&[1, 2, 3], &[4]);
        assert_eq!(plan_leave(&v, 2).unwrap(), LeavePlan::RemoveVoter);
        assert_eq!(plan_leave(&v, 4).unwrap(), LeavePlan::RemoveNonvoter);
        assert!(matches!(plan_leave(&v, 9), Err(CoordinatorError::NotFound(_))));
    }

    #[test]
    fn test_leave_last_voter_rejected() {
        let v = view(&[1], &[2]);
        assert!(matches!(
            plan_leave(&v, 1),
            Err(CoordinatorError::InvalidArgument(_))
        ));
        assert_eq!(plan_leave(&v, 2).unwrap(), LeavePlan::RemoveNonvoter);
    }
}
