//! Host graph store boundary.
//!
//! The replication engine never executes queries itself; it drives the host
//! graph engine through [`GraphStore`]/[`GraphTransaction`]. The daemon
//! embedding this crate provides an implementation; [`MemoryGraph`] is a
//! complete in-crate implementation used by tests and embedded deployments.
//!
//! All replay-side lookups go through `find_node(label, property, value)` -
//! resolution is by natural key, never by internal identity, because
//! identifiers are not shared between independent stores.

use crate::audit::PropertyMap;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use thiserror::Error;

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Errors surfaced by a graph store implementation.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("node not found by ({label} {{{property}: {value}}})")]
    NodeNotFound {
        label: String,
        property: String,
        value: Value,
    },

    #[error("relationship {relationship_type} not found between resolved endpoints")]
    RelationshipNotFound { relationship_type: String },

    #[error("entity no longer exists in this transaction")]
    EntityGone,

    /// Backend-specific failure (I/O, constraint violation, ...).
    #[error("graph backend error: {0}")]
    Backend(String),
}

/// Node handle, only valid within the transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Relationship handle, only valid within the transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationshipId(pub u64);

/// Mutation surface of one open graph transaction.
pub trait GraphTransaction {
    /// Create a node with all listed labels and properties set verbatim.
    fn create_node(
        &mut self,
        labels: &BTreeSet<String>,
        properties: &PropertyMap,
    ) -> GraphResult<NodeId>;

    /// Resolve a node by (label, property, value). `None` when absent.
    fn find_node(
        &mut self,
        label: &str,
        property: &str,
        value: &Value,
    ) -> GraphResult<Option<NodeId>>;

    /// Delete a node and any relationships attached to it.
    fn delete_node(&mut self, node: NodeId) -> GraphResult<()>;

    fn set_node_property(&mut self, node: NodeId, name: &str, value: &Value) -> GraphResult<()>;

    fn remove_node_property(&mut self, node: NodeId, name: &str) -> GraphResult<()>;

    /// Create a typed relationship from `start` to `end`.
    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        relationship_type: &str,
        properties: &PropertyMap,
    ) -> GraphResult<RelationshipId>;

    /// Outgoing relationships of one type from a node, with their end nodes.
    fn outgoing_relationships(
        &mut self,
        node: NodeId,
        relationship_type: &str,
    ) -> GraphResult<Vec<(RelationshipId, NodeId)>>;

    fn delete_relationship(&mut self, relationship: RelationshipId) -> GraphResult<()>;

    fn set_relationship_property(
        &mut self,
        relationship: RelationshipId,
        name: &str,
        value: &Value,
    ) -> GraphResult<()>;

    fn remove_relationship_property(
        &mut self,
        relationship: RelationshipId,
        name: &str,
    ) -> GraphResult<()>;
}

/// A graph store that can run closures inside one local atomic transaction.
///
/// The closure's `Err` rolls the transaction back; `Ok` commits. This is the
/// atomicity boundary of replay: all audits of one Transaction Record apply
/// inside one call.
pub trait GraphStore: Send + Sync + 'static {
    fn with_transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn GraphTransaction) -> GraphResult<()>,
    ) -> GraphResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct NodeData {
    labels: BTreeSet<String>,
    properties: PropertyMap,
}

#[derive(Debug, Clone)]
struct RelationshipData {
    relationship_type: String,
    start: u64,
    end: u64,
    properties: PropertyMap,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    nodes: HashMap<u64, NodeData>,
    relationships: HashMap<u64, RelationshipData>,
    next_id: u64,
}

/// In-memory graph store with copy-on-write transactions: the closure runs
/// against a scratch copy that replaces the live state only on commit.
#[derive(Default)]
pub struct MemoryGraph {
    inner: Mutex<GraphData>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GraphData> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of nodes currently in the store.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of relationships currently in the store.
    pub fn relationship_count(&self) -> usize {
        self.lock().relationships.len()
    }

    /// Properties of the node matching (label, property, value), if any.
    pub fn node_properties(&self, label: &str, property: &str, value: &Value) -> Option<PropertyMap> {
        let data = self.lock();
        data.nodes
            .values()
            .find(|n| n.labels.contains(label) && n.properties.get(property) == Some(value))
            .map(|n| n.properties.clone())
    }

    /// Labels of the node matching (label, property, value), if any.
    pub fn node_labels(&self, label: &str, property: &str, value: &Value) -> Option<BTreeSet<String>> {
        let data = self.lock();
        data.nodes
            .values()
            .find(|n| n.labels.contains(label) && n.properties.get(property) == Some(value))
            .map(|n| n.labels.clone())
    }

    /// Property maps of all `relationship_type` relationships whose start and
    /// end nodes match the given natural keys.
    pub fn relationships_between(
        &self,
        relationship_type: &str,
        property: &str,
        start_value: &Value,
        end_value: &Value,
    ) -> Vec<PropertyMap> {
        let data = self.lock();
        data.relationships
            .values()
            .filter(|r| {
                r.relationship_type == relationship_type
                    && data
                        .nodes
                        .get(&r.start)
                        .is_some_and(|n| n.properties.get(property) == Some(start_value))
                    && data
                        .nodes
                        .get(&r.end)
                        .is_some_and(|n| n.properties.get(property) == Some(end_value))
            })
            .map(|r| r.properties.clone())
            .collect()
    }
}

impl GraphStore for MemoryGraph {
    fn with_transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn GraphTransaction) -> GraphResult<()>,
    ) -> GraphResult<()> {
        let mut guard = self.lock();
        let mut scratch = guard.clone();
        let mut tx = MemoryTransaction { data: &mut scratch };
        match f(&mut tx) {
            Ok(()) => {
                *guard = scratch;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

struct MemoryTransaction<'a> {
    data: &'a mut GraphData,
}

impl MemoryTransaction<'_> {
    fn next_id(&mut self) -> u64 {
        self.data.next_id += 1;
        self.data.next_id
    }

    fn node_mut(&mut self, node: NodeId) -> GraphResult<&mut NodeData> {
        self.data.nodes.get_mut(&node.0).ok_or(GraphError::EntityGone)
    }

    fn relationship_mut(&mut self, rel: RelationshipId) -> GraphResult<&mut RelationshipData> {
        self.data
            .relationships
            .get_mut(&rel.0)
            .ok_or(GraphError::EntityGone)
    }
}

impl GraphTransaction for MemoryTransaction<'_> {
    fn create_node(
        &mut self,
        labels: &BTreeSet<String>,
        properties: &PropertyMap,
    ) -> GraphResult<NodeId> {
        let id = self.next_id();
        self.data.nodes.insert(
            id,
            NodeData {
                labels: labels.clone(),
                properties: properties.clone(),
            },
        );
        Ok(NodeId(id))
    }

    fn find_node(
        &mut self,
        label: &str,
        property: &str,
        value: &Value,
    ) -> GraphResult<Option<NodeId>> {
        Ok(self
            .data
            .nodes
            .iter()
            .find(|(_, n)| n.labels.contains(label) && n.properties.get(property) == Some(value))
            .map(|(id, _)| NodeId(*id)))
    }

    fn delete_node(&mut self, node: NodeId) -> GraphResult<()> {
        if self.data.nodes.remove(&node.0).is_none() {
            return Err(GraphError::EntityGone);
        }
        // Detach-delete semantics
        self.data
            .relationships
            .retain(|_, r| r.start != node.0 && r.end != node.0);
        Ok(())
    }

    fn set_node_property(&mut self, node: NodeId, name: &str, value: &Value) -> GraphResult<()> {
        self.node_mut(node)?
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove_node_property(&mut self, node: NodeId, name: &str) -> GraphResult<()> {
        self.node_mut(node)?.properties.remove(name);
        Ok(())
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        relationship_type: &str,
        properties: &PropertyMap,
    ) -> GraphResult<RelationshipId> {
        if !self.data.nodes.contains_key(&start.0) || !self.data.nodes.contains_key(&end.0) {
            return Err(GraphError::EntityGone);
        }
        let id = self.next_id();
        self.data.relationships.insert(
            id,
            RelationshipData {
                relationship_type: relationship_type.to_string(),
                start: start.0,
                end: end.0,
                properties: properties.clone(),
            },
        );
        Ok(RelationshipId(id))
    }

    fn outgoing_relationships(
        &mut self,
        node: NodeId,
        relationship_type: &str,
    ) -> GraphResult<Vec<(RelationshipId, NodeId)>> {
        let mut out: Vec<(RelationshipId, NodeId)> = self
            .data
            .relationships
            .iter()
            .filter(|(_, r)| r.start == node.0 && r.relationship_type == relationship_type)
            .map(|(id, r)| (RelationshipId(*id), NodeId(r.end)))
            .collect();
        // Deterministic order for scan-and-delete
        out.sort_by_key(|(id, _)| id.0);
        Ok(out)
    }

    fn delete_relationship(&mut self, relationship: RelationshipId) -> GraphResult<()> {
        if self.data.relationships.remove(&relationship.0).is_none() {
            return Err(GraphError::EntityGone);
        }
        Ok(())
    }

    fn set_relationship_property(
        &mut self,
        relationship: RelationshipId,
        name: &str,
        value: &Value,
    ) -> GraphResult<()> {
        self.relationship_mut(relationship)?
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove_relationship_property(
        &mut self,
        relationship: RelationshipId,
        name: &str,
    ) -> GraphResult<()> {
        self.relationship_mut(relationship)?.properties.remove(name);
        Ok(())
    }
}
