//! Transaction delta: the raw change set handed over by the host graph
//! engine after a commit.
//!
//! This is the input boundary of the capture pipeline. The host engine owns
//! transaction execution; it hands us one [`TransactionDelta`] per committed
//! transaction, containing snapshots of everything the transaction touched.
//! Deleted entities come as snapshots taken at deletion time, since the live
//! entity is gone post-commit and cannot be read back.
//!
//! [`EntityId`]s are store-internal identifiers. They are only meaningful
//! within one delta (the capture accumulator keys on them) and never cross
//! the wire - replicated records identify entities by natural key alone.

use crate::audit::PropertyMap;
use serde_json::Value;
use std::collections::BTreeSet;

/// Store-internal entity identifier, valid only within one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

/// Snapshot of a node's labels and properties at a point in the transaction.
///
/// For created and updated nodes this is the live post-commit state; for
/// deleted nodes it is the state captured by the deletion event.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub id: EntityId,
    pub labels: BTreeSet<String>,
    pub properties: PropertyMap,
}

impl NodeState {
    pub fn new(id: u64) -> Self {
        Self {
            id: EntityId(id),
            labels: BTreeSet::new(),
            properties: PropertyMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A relationship endpoint as seen at capture time.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointRef {
    /// Endpoint is alive after the transaction; full snapshot available.
    Live(NodeState),
    /// Endpoint was deleted within the same transaction. Only the store id
    /// survives; label and key must come from the delete audit built for it.
    Deleted(EntityId),
}

impl EndpointRef {
    pub fn entity_id(&self) -> EntityId {
        match self {
            EndpointRef::Live(node) => node.id,
            EndpointRef::Deleted(id) => *id,
        }
    }
}

/// Snapshot of a relationship and its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipState {
    pub id: EntityId,
    pub relationship_type: String,
    pub start: EndpointRef,
    pub end: EndpointRef,
    pub properties: PropertyMap,
}

/// One assigned-property event on a node. `previous` is the value before the
/// transaction (`None` for a newly added property); the current value lives
/// in the node snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePropertyAssigned {
    pub node: NodeState,
    pub property: String,
    pub previous: Option<Value>,
}

/// One removed-property event on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePropertyRemoved {
    pub node: NodeState,
    pub property: String,
    pub old_value: Value,
}

/// One assigned-property event on a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPropertyAssigned {
    pub relationship: RelationshipState,
    pub property: String,
    pub previous: Option<Value>,
}

/// One removed-property event on a relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPropertyRemoved {
    pub relationship: RelationshipState,
    pub property: String,
    pub old_value: Value,
}

/// One label assigned to or removed from a node.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEvent {
    pub node: NodeState,
    pub label: String,
}

/// The complete delta of one committed transaction.
///
/// Vectors carry host-engine iteration order; capture imposes its own fixed
/// phase order, so callers need not sort anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionDelta {
    pub created_nodes: Vec<NodeState>,
    pub deleted_nodes: Vec<NodeState>,
    pub assigned_node_properties: Vec<NodePropertyAssigned>,
    pub removed_node_properties: Vec<NodePropertyRemoved>,
    pub created_relationships: Vec<RelationshipState>,
    pub deleted_relationships: Vec<RelationshipState>,
    pub assigned_relationship_properties: Vec<RelationshipPropertyAssigned>,
    pub removed_relationship_properties: Vec<RelationshipPropertyRemoved>,
    pub assigned_labels: Vec<LabelEvent>,
    pub removed_labels: Vec<LabelEvent>,
}

impl TransactionDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the transaction touched nothing capture cares about.
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.assigned_node_properties.is_empty()
            && self.removed_node_properties.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned_relationship_properties.is_empty()
            && self.removed_relationship_properties.is_empty()
    }
}
