//! Pre-capture gate over the raw transaction delta.
//!
//! The Judge runs before the serializer and decides whether a committed
//! transaction is eligible for capture at all. It prevents two failure
//! modes:
//!
//! 1. **Replication loops**: the replay engine stamps entities it writes
//!    with the replicated marker label. If a transaction touches a marked
//!    entity, capturing it would replay the remote's own writes back out.
//! 2. **Incomplete captures**: a created node with no label or no property
//!    has no natural key and cannot be resolved on the target store.
//!
//! The gate is a plain conjunction of named predicates. All must pass;
//! a single failure rejects the whole transaction, which then produces no
//! Transaction Record. Rejection is silent by design - it is the expected
//! fate of every replay-side bookkeeping write, not an error.

use crate::config::ReplicationConfig;
use crate::delta::{EndpointRef, NodeState, TransactionDelta};

/// Evaluate the gate. `true` means the transaction may be captured.
pub fn approves(delta: &TransactionDelta, config: &ReplicationConfig) -> bool {
    no_marked_creations(delta, config)
        && created_nodes_are_labeled(delta, config)
        && created_nodes_have_properties(delta)
        && deleted_anchors_are_unmarked(delta, config)
        && marked_assignments_are_key_only(delta, config)
}

fn is_marked(node: &NodeState, config: &ReplicationConfig) -> bool {
    node.labels.contains(&config.replicated_label)
        || node.labels.contains(&config.excluded_label)
}

/// No created node carries a marker label, and no label event assigns one.
/// Both happen exactly when the replay engine (or an operator opt-out) wrote
/// the entity; capturing them would loop the change back to its origin.
fn no_marked_creations(delta: &TransactionDelta, config: &ReplicationConfig) -> bool {
    let created_clean = delta.created_nodes.iter().all(|n| !is_marked(n, config));
    let labels_clean = delta.assigned_labels.iter().all(|ev| {
        ev.label != config.replicated_label
            && ev.label != config.excluded_label
            && !is_marked(&ev.node, config)
    });
    created_clean && labels_clean
}

/// Every created node has at least one label. An unlabeled node cannot be
/// resolved by (label, key) on the target store.
fn created_nodes_are_labeled(delta: &TransactionDelta, _config: &ReplicationConfig) -> bool {
    delta.created_nodes.iter().all(|n| !n.labels.is_empty())
}

/// Every created node has at least one assigned property; a bare node has no
/// natural key and is not replayable.
fn created_nodes_have_properties(delta: &TransactionDelta) -> bool {
    delta.created_nodes.iter().all(|n| !n.properties.is_empty())
}

/// No deleted node - and no deleted relationship's anchor (start) node -
/// carries the replicated marker.
fn deleted_anchors_are_unmarked(delta: &TransactionDelta, config: &ReplicationConfig) -> bool {
    let nodes_clean = delta
        .deleted_nodes
        .iter()
        .all(|n| !n.labels.contains(&config.replicated_label));
    let rels_clean = delta.deleted_relationships.iter().all(|r| match &r.start {
        EndpointRef::Live(node) => !node.labels.contains(&config.replicated_label),
        // Deleted anchors are judged through deleted_nodes above.
        EndpointRef::Deleted(_) => true,
    });
    nodes_clean && rels_clean
}

/// A property assigned to a marked entity must be the natural-key property.
/// The replay engine sets exactly that one field on entities it stamps; any
/// other assignment on a marked entity is a remote write leaking back out.
fn marked_assignments_are_key_only(delta: &TransactionDelta, config: &ReplicationConfig) -> bool {
    delta.assigned_node_properties.iter().all(|ev| {
        !is_marked(&ev.node, config) || ev.property == config.natural_key
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{LabelEvent, NodePropertyAssigned, RelationshipState};
    use serde_json::json;

    fn config() -> ReplicationConfig {
        ReplicationConfig::default()
    }

    fn keyed_node(id: u64, label: &str) -> NodeState {
        NodeState::new(id)
            .with_label(label)
            .with_property("uuid", json!(format!("uuid-{}", id)))
    }

    #[test]
    fn test_approves_plain_creation() {
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(keyed_node(1, "Person"));
        assert!(approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_created_node_with_replicated_marker() {
        let mut delta = TransactionDelta::new();
        delta
            .created_nodes
            .push(keyed_node(1, "Person").with_label("Replicated"));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_created_node_with_exclusion_marker() {
        let mut delta = TransactionDelta::new();
        delta
            .created_nodes
            .push(keyed_node(1, "Person").with_label("NoReplication"));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_marker_label_assignment() {
        // The replay engine stamping "Replicated" on a node must not be
        // captured and shipped back.
        let mut delta = TransactionDelta::new();
        delta.assigned_labels.push(LabelEvent {
            node: keyed_node(1, "Person"),
            label: "Replicated".to_string(),
        });
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_unlabeled_created_node() {
        let mut delta = TransactionDelta::new();
        delta
            .created_nodes
            .push(NodeState::new(1).with_property("uuid", json!("u-1")));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_propertyless_created_node() {
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(NodeState::new(1).with_label("Person"));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_deletion_of_replicated_node() {
        let mut delta = TransactionDelta::new();
        delta
            .deleted_nodes
            .push(keyed_node(1, "Person").with_label("Replicated"));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_deleted_relationship_with_marked_anchor() {
        let mut delta = TransactionDelta::new();
        delta.deleted_relationships.push(RelationshipState {
            id: crate::delta::EntityId(10),
            relationship_type: "KNOWS".to_string(),
            start: EndpointRef::Live(keyed_node(1, "Person").with_label("Replicated")),
            end: EndpointRef::Live(keyed_node(2, "Person")),
            properties: Default::default(),
        });
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_allows_natural_key_assignment_on_marked_node() {
        let mut delta = TransactionDelta::new();
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node: keyed_node(1, "Person").with_label("Replicated"),
            property: "uuid".to_string(),
            previous: None,
        });
        assert!(approves(&delta, &config()));
    }

    #[test]
    fn test_rejects_other_assignment_on_marked_node() {
        let mut delta = TransactionDelta::new();
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node: keyed_node(1, "Person").with_label("Replicated"),
            property: "name".to_string(),
            previous: None,
        });
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_single_failure_rejects_whole_transaction() {
        // One clean creation plus one marked creation: whole delta rejected.
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(keyed_node(1, "Person"));
        delta
            .created_nodes
            .push(keyed_node(2, "Person").with_label("Replicated"));
        assert!(!approves(&delta, &config()));
    }

    #[test]
    fn test_approves_empty_delta() {
        assert!(approves(&TransactionDelta::new(), &config()));
    }
}
