// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replay engine: applies fetched Transaction Records to the local graph.
//!
//! One record replays inside one local graph transaction, preserving the
//! source transaction's atomicity boundary. Within that transaction each
//! audit applies independently, best-effort: a failed audit is logged and
//! counted but does not abort its siblings. Only a backend failure of the
//! transaction itself (or an undeserializable payload) surfaces as an error
//! to the scheduler.
//!
//! # Idempotency
//!
//! Delivery is at-least-once, so replay must tolerate records it has already
//! applied. Deleting an entity that is not there is treated as success - the
//! intent (entity gone) already holds. Re-creating a node produces a
//! duplicate under the natural key; stores that enforce a uniqueness
//! constraint on the key reject it, which surfaces as a failed audit.
//!
//! # Resolution
//!
//! Entities resolve by natural key only: `(first label, key property, key
//! value)`. Internal store identifiers never cross between stores.

use crate::audit::{Audit, ChangeType, PropertyMap, TransactionRecord};
use crate::error::{ReplicationError, Result};
use crate::graph::{GraphError, GraphResult, GraphStore, GraphTransaction, NodeId, RelationshipId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-record replay summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Audits in the record.
    pub total: usize,
    /// Audits applied (including already-applied deletes).
    pub applied: usize,
    /// Audits skipped after an error.
    pub failed: usize,
}

/// Applies Transaction Records to a [`GraphStore`].
pub struct ApplyEngine<G: GraphStore> {
    graph: Arc<G>,
    natural_key: String,
}

impl<G: GraphStore> Clone for ApplyEngine<G> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            natural_key: self.natural_key.clone(),
        }
    }
}

impl<G: GraphStore> ApplyEngine<G> {
    pub fn new(graph: Arc<G>, natural_key: impl Into<String>) -> Self {
        Self {
            graph,
            natural_key: natural_key.into(),
        }
    }

    /// Replay one record inside one local transaction.
    ///
    /// Per-audit failures are warned and counted in the report; the record
    /// as a whole still commits. An error return means nothing committed.
    pub fn apply_record(&self, record: &TransactionRecord) -> Result<ApplyReport> {
        let audits = record.audits()?;
        let total = audits.len();
        let mut applied = 0usize;
        let mut failed = 0usize;

        let transaction_uuid = &record.transaction_uuid;
        self.graph
            .with_transaction(&mut |tx| {
                for audit in &audits {
                    match self.apply_audit(tx, audit) {
                        Ok(()) => applied += 1,
                        Err(e) => {
                            failed += 1;
                            warn!(
                                transaction = %transaction_uuid,
                                audit = %audit.uuid,
                                change_type = %audit.change_type,
                                error = %e,
                                "audit failed to replay, continuing with record"
                            );
                        }
                    }
                }
                Ok(())
            })
            .map_err(|e| ReplicationError::Replay {
                transaction_uuid: transaction_uuid.clone(),
                message: e.to_string(),
            })?;

        debug!(
            transaction = %transaction_uuid,
            total,
            applied,
            failed,
            "record replayed"
        );
        Ok(ApplyReport {
            total,
            applied,
            failed,
        })
    }

    fn apply_audit(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<()> {
        match audit.change_type {
            ChangeType::AddNode => self.apply_add_node(tx, audit),
            ChangeType::DeleteNode => self.apply_delete_node(tx, audit),
            ChangeType::NodePropertyChange => self.apply_node_properties(tx, audit),
            ChangeType::AddRelation => self.apply_add_relation(tx, audit),
            ChangeType::DeleteRelation => self.apply_delete_relation(tx, audit),
            ChangeType::RelationPropertyChange => self.apply_relation_properties(tx, audit),
        }
    }

    fn apply_add_node(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<()> {
        let empty = PropertyMap::new();
        let properties = audit.all_properties.as_ref().unwrap_or(&empty);
        tx.create_node(&audit.node_labels, properties)?;
        Ok(())
    }

    fn apply_delete_node(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<()> {
        let (label, key, value) = anchor_key(audit, &self.natural_key)?;
        match tx.find_node(label, key, value)? {
            Some(node) => tx.delete_node(node),
            None => {
                // Already gone, the intent holds.
                debug!(label, key, "delete target absent, treating as applied");
                Ok(())
            }
        }
    }

    fn apply_node_properties(
        &self,
        tx: &mut dyn GraphTransaction,
        audit: &Audit,
    ) -> GraphResult<()> {
        let (label, key, value) = anchor_key(audit, &self.natural_key)?;
        let node = tx
            .find_node(label, key, value)?
            .ok_or_else(|| GraphError::NodeNotFound {
                label: label.to_string(),
                property: key.to_string(),
                value: value.clone(),
            })?;
        self.overwrite_node_properties(tx, node, audit)
    }

    /// Apply the changed set: removals delete the property, everything else
    /// takes its value from the full snapshot (last write wins).
    fn overwrite_node_properties(
        &self,
        tx: &mut dyn GraphTransaction,
        node: NodeId,
        audit: &Audit,
    ) -> GraphResult<()> {
        let snapshot = audit.all_properties.as_ref();
        for change in audit.properties.iter().flatten() {
            if change.is_removal() {
                tx.remove_node_property(node, &change.property_name)?;
            } else if let Some(value) = snapshot.and_then(|s| s.get(&change.property_name)) {
                tx.set_node_property(node, &change.property_name, value)?;
            }
        }
        Ok(())
    }

    fn apply_add_relation(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<()> {
        let start = self.resolve_anchor(tx, audit)?;
        let end = self.resolve_target(tx, audit)?;
        let relationship_type = relationship_type_of(audit)?;
        let empty = PropertyMap::new();
        let properties = audit.all_properties.as_ref().unwrap_or(&empty);
        tx.create_relationship(start, end, relationship_type, properties)?;
        Ok(())
    }

    fn apply_delete_relation(
        &self,
        tx: &mut dyn GraphTransaction,
        audit: &Audit,
    ) -> GraphResult<()> {
        let relationship_type = relationship_type_of(audit)?;
        let Some((start, end)) = self.resolve_endpoints_if_present(tx, audit)? else {
            debug!(relationship_type, "endpoint absent, treating delete as applied");
            return Ok(());
        };
        match find_relationship(tx, start, end, relationship_type)? {
            Some(rel) => tx.delete_relationship(rel),
            None => {
                debug!(relationship_type, "relationship absent, treating delete as applied");
                Ok(())
            }
        }
    }

    fn apply_relation_properties(
        &self,
        tx: &mut dyn GraphTransaction,
        audit: &Audit,
    ) -> GraphResult<()> {
        let start = self.resolve_anchor(tx, audit)?;
        let end = self.resolve_target(tx, audit)?;
        let relationship_type = relationship_type_of(audit)?;
        let rel = find_relationship(tx, start, end, relationship_type)?.ok_or_else(|| {
            GraphError::RelationshipNotFound {
                relationship_type: relationship_type.to_string(),
            }
        })?;
        self.overwrite_relationship_properties(tx, rel, audit)
    }

    fn overwrite_relationship_properties(
        &self,
        tx: &mut dyn GraphTransaction,
        rel: RelationshipId,
        audit: &Audit,
    ) -> GraphResult<()> {
        let snapshot = audit.all_properties.as_ref();
        for change in audit.properties.iter().flatten() {
            if change.is_removal() {
                tx.remove_relationship_property(rel, &change.property_name)?;
            } else if let Some(value) = snapshot.and_then(|s| s.get(&change.property_name)) {
                tx.set_relationship_property(rel, &change.property_name, value)?;
            }
        }
        Ok(())
    }

    /// Resolve the anchor (start) node; absence is an error.
    fn resolve_anchor(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<NodeId> {
        let (label, key, value) = anchor_key(audit, &self.natural_key)?;
        tx.find_node(label, key, value)?
            .ok_or_else(|| GraphError::NodeNotFound {
                label: label.to_string(),
                property: key.to_string(),
                value: value.clone(),
            })
    }

    /// Resolve the target (end) node; absence is an error.
    fn resolve_target(&self, tx: &mut dyn GraphTransaction, audit: &Audit) -> GraphResult<NodeId> {
        let (label, key, value) = target_key(audit, &self.natural_key)?;
        tx.find_node(label, key, value)?
            .ok_or_else(|| GraphError::NodeNotFound {
                label: label.to_string(),
                property: key.to_string(),
                value: value.clone(),
            })
    }

    /// Resolve both endpoints, yielding `None` if either is absent.
    fn resolve_endpoints_if_present(
        &self,
        tx: &mut dyn GraphTransaction,
        audit: &Audit,
    ) -> GraphResult<Option<(NodeId, NodeId)>> {
        let (label, key, value) = anchor_key(audit, &self.natural_key)?;
        let Some(start) = tx.find_node(label, key, value)? else {
            return Ok(None);
        };
        let (label, key, value) = target_key(audit, &self.natural_key)?;
        let Some(end) = tx.find_node(label, key, value)? else {
            return Ok(None);
        };
        Ok(Some((start, end)))
    }
}

/// Scan outgoing relationships of one type and pick the first ending at
/// `end`. Sufficient because capture emits at most one audit per
/// relationship per transaction.
fn find_relationship(
    tx: &mut dyn GraphTransaction,
    start: NodeId,
    end: NodeId,
    relationship_type: &str,
) -> GraphResult<Option<RelationshipId>> {
    let outgoing = tx.outgoing_relationships(start, relationship_type)?;
    Ok(outgoing
        .into_iter()
        .find(|(_, other)| *other == end)
        .map(|(rel, _)| rel))
}

/// The (label, key property, key value) triple identifying the anchor node.
/// Prefers the configured natural key in the primary-key map, falling back
/// to its first entry.
fn anchor_key<'a>(
    audit: &'a Audit,
    natural_key: &'a str,
) -> GraphResult<(&'a str, &'a str, &'a Value)> {
    let label = audit
        .node_labels
        .iter()
        .next()
        .ok_or_else(|| GraphError::Backend("audit carries no node label".to_string()))?;
    let (key, value) = pick_key(&audit.primary_key, natural_key)
        .ok_or_else(|| GraphError::Backend("audit carries no primary key".to_string()))?;
    Ok((label, key, value))
}

/// Same as [`anchor_key`] for the relation target side.
fn target_key<'a>(
    audit: &'a Audit,
    natural_key: &'a str,
) -> GraphResult<(&'a str, &'a str, &'a Value)> {
    let label = audit
        .target_node_labels
        .as_ref()
        .and_then(|labels| labels.iter().next())
        .ok_or_else(|| GraphError::Backend("relation audit carries no target label".to_string()))?;
    let (key, value) = audit
        .target_primary_key
        .as_ref()
        .and_then(|pk| pick_key(pk, natural_key))
        .ok_or_else(|| GraphError::Backend("relation audit carries no target key".to_string()))?;
    Ok((label, key, value))
}

fn pick_key<'a>(pk: &'a PropertyMap, natural_key: &str) -> Option<(&'a str, &'a Value)> {
    pk.get_key_value(natural_key)
        .or_else(|| pk.iter().next())
        .map(|(k, v)| (k.as_str(), v))
}

fn relationship_type_of(audit: &Audit) -> GraphResult<&str> {
    audit
        .relationship_label
        .as_deref()
        .ok_or_else(|| GraphError::Backend("relation audit carries no relationship type".to_string()))
}
