// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change capture: converts one transaction's delta into an ordered audit
//! list wrapped in a Transaction Record.
//!
//! # Processing Order
//!
//! Capture walks the delta in a fixed, deterministic phase order regardless
//! of how the host engine ordered its event vectors:
//!
//! 1. created nodes
//! 2. deleted nodes
//! 3. assigned node properties
//! 4. removed node properties
//! 5. created relationships
//! 6. deleted relationships
//! 7. assigned relationship properties
//! 8. removed relationship properties
//!
//! An accumulator keyed by `(entity, change type)` merges multiple events on
//! the same entity into one audit; the first write per key wins. Property
//! events on an entity that already has an Add or Delete audit in this
//! transaction are shadowed by it - an AddNode audit already carries the full
//! property snapshot.
//!
//! # Dropped Entities
//!
//! An entity whose natural key cannot be resolved is dropped from the audit
//! set (it cannot be replayed safely); the rest of the capture continues. A
//! relation audit whose endpoint resolves neither to a live snapshot nor to a
//! same-transaction delete audit is dropped the same way.

use crate::audit::{Audit, ChangeType, PropertyChange, PropertyMap, TransactionRecord};
use crate::config::ReplicationConfig;
use crate::delta::{EndpointRef, EntityId, NodeState, RelationshipState, TransactionDelta};
use crate::error::Result;
use crate::judge;
use crate::metrics;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

/// Outcome of capturing one committed transaction.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The transaction qualified; one record was produced.
    Record(TransactionRecord),

    /// The Judge rejected the transaction. Not an error; no record exists.
    Rejected,

    /// A created entity carried the sentinel label. Capture for the entire
    /// transaction was aborted; the host should remove the listed sentinel
    /// entities, which are internal bookkeeping.
    SentinelSkipped { sentinels: Vec<EntityId> },

    /// Nothing auditable survived (empty delta or every entity dropped).
    Empty,
}

impl CaptureOutcome {
    /// The record, if one was produced.
    pub fn into_record(self) -> Option<TransactionRecord> {
        match self {
            CaptureOutcome::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// The capture serializer. One instance per source store; stateless between
/// transactions.
#[derive(Debug, Clone)]
pub struct ChangeCapture {
    config: ReplicationConfig,
}

impl ChangeCapture {
    pub fn new(config: ReplicationConfig) -> Self {
        Self { config }
    }

    /// Run the full source-side pipeline for one committed transaction:
    /// Judge gate, sentinel check, then serialization.
    pub fn capture(&self, delta: &TransactionDelta) -> Result<CaptureOutcome> {
        if !judge::approves(delta, &self.config) {
            trace!("transaction rejected by gate");
            metrics::record_gate_rejection();
            return Ok(CaptureOutcome::Rejected);
        }

        let sentinels: Vec<EntityId> = delta
            .created_nodes
            .iter()
            .filter(|n| n.labels.contains(&self.config.sentinel_label))
            .map(|n| n.id)
            .collect();
        if !sentinels.is_empty() {
            debug!(count = sentinels.len(), "sentinel entities present, skipping capture");
            metrics::record_sentinel_skip();
            return Ok(CaptureOutcome::SentinelSkipped { sentinels });
        }

        let audits = self.serialize(delta);
        if audits.is_empty() {
            return Ok(CaptureOutcome::Empty);
        }

        let count = audits.len();
        let record = TransactionRecord::seal(audits)?;
        metrics::record_capture(count);
        debug!(
            transaction = %record.transaction_uuid,
            audits = count,
            "captured transaction"
        );
        Ok(CaptureOutcome::Record(record))
    }

    /// Walk the delta in fixed phase order and build the audit list.
    fn serialize(&self, delta: &TransactionDelta) -> Vec<Audit> {
        let mut acc = Accumulator::default();

        for node in &delta.created_nodes {
            let Some(primary_key) = self.primary_key_of(node) else {
                self.drop_entity(node.id, "created node without natural key");
                continue;
            };
            let mut audit = Audit::new(ChangeType::AddNode);
            audit.node_labels = node.labels.clone();
            audit.primary_key = primary_key;
            audit.all_properties = Some(node.properties.clone());
            acc.insert_first_wins(node.id, ChangeType::AddNode, audit);
        }

        for node in &delta.deleted_nodes {
            // Labels and key come from the deletion snapshot; the live
            // entity is gone post-commit.
            let Some(primary_key) = self.primary_key_of(node) else {
                self.drop_entity(node.id, "deleted node without natural key");
                continue;
            };
            let mut audit = Audit::new(ChangeType::DeleteNode);
            audit.node_labels = node.labels.clone();
            audit.primary_key = primary_key;
            acc.insert_first_wins(node.id, ChangeType::DeleteNode, audit);
        }

        for ev in &delta.assigned_node_properties {
            let current = ev.node.properties.get(&ev.property).cloned();
            self.node_property_change(&mut acc, &ev.node, &ev.property, ev.previous.clone(), current);
        }

        for ev in &delta.removed_node_properties {
            self.node_property_change(
                &mut acc,
                &ev.node,
                &ev.property,
                Some(ev.old_value.clone()),
                None,
            );
        }

        for rel in &delta.created_relationships {
            self.relationship_audit(&mut acc, rel, ChangeType::AddRelation, true);
        }

        for rel in &delta.deleted_relationships {
            self.relationship_audit(&mut acc, rel, ChangeType::DeleteRelation, false);
        }

        for ev in &delta.assigned_relationship_properties {
            let current = ev.relationship.properties.get(&ev.property).cloned();
            self.relationship_property_change(
                &mut acc,
                &ev.relationship,
                &ev.property,
                ev.previous.clone(),
                current,
            );
        }

        for ev in &delta.removed_relationship_properties {
            self.relationship_property_change(
                &mut acc,
                &ev.relationship,
                &ev.property,
                Some(ev.old_value.clone()),
                None,
            );
        }

        acc.into_ordered_audits()
    }

    fn node_property_change(
        &self,
        acc: &mut Accumulator,
        node: &NodeState,
        property: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        // Shadowed by an Add/Delete audit built for the same node.
        if acc.contains(node.id, ChangeType::AddNode) || acc.contains(node.id, ChangeType::DeleteNode)
        {
            return;
        }
        let Some(change) = PropertyChange::changed(property, old_value, new_value) else {
            return; // no-op transition
        };
        let Some(primary_key) = self.primary_key_of(node) else {
            self.drop_entity(node.id, "updated node without natural key");
            return;
        };

        let audit = acc.entry(node.id, ChangeType::NodePropertyChange, || {
            let mut audit = Audit::new(ChangeType::NodePropertyChange);
            audit.node_labels = node.labels.clone();
            audit.primary_key = primary_key;
            audit.all_properties = Some(node.properties.clone());
            audit.properties = Some(Vec::new());
            audit
        });
        audit.push_property_change(change);
    }

    fn relationship_audit(
        &self,
        acc: &mut Accumulator,
        rel: &RelationshipState,
        change_type: ChangeType,
        with_properties: bool,
    ) {
        let Some((start_labels, start_key)) = self.resolve_endpoint(acc, &rel.start) else {
            self.drop_entity(rel.id, "relationship with unresolvable start endpoint");
            return;
        };
        let Some((end_labels, end_key)) = self.resolve_endpoint(acc, &rel.end) else {
            self.drop_entity(rel.id, "relationship with unresolvable end endpoint");
            return;
        };

        let mut audit = Audit::new(change_type);
        audit.node_labels = start_labels;
        audit.primary_key = start_key;
        audit.relationship_label = Some(rel.relationship_type.clone());
        audit.target_node_labels = Some(end_labels);
        audit.target_primary_key = Some(end_key);
        if with_properties {
            audit.all_properties = Some(rel.properties.clone());
        }
        acc.insert_first_wins(rel.id, change_type, audit);
    }

    fn relationship_property_change(
        &self,
        acc: &mut Accumulator,
        rel: &RelationshipState,
        property: &str,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        if acc.contains(rel.id, ChangeType::AddRelation)
            || acc.contains(rel.id, ChangeType::DeleteRelation)
        {
            return;
        }
        let Some(change) = PropertyChange::changed(property, old_value, new_value) else {
            return;
        };
        let Some((start_labels, start_key)) = self.resolve_endpoint(acc, &rel.start) else {
            self.drop_entity(rel.id, "relationship with unresolvable start endpoint");
            return;
        };
        let Some((end_labels, end_key)) = self.resolve_endpoint(acc, &rel.end) else {
            self.drop_entity(rel.id, "relationship with unresolvable end endpoint");
            return;
        };

        let relationship_type = rel.relationship_type.clone();
        let all_properties = rel.properties.clone();
        let audit = acc.entry(rel.id, ChangeType::RelationPropertyChange, move || {
            let mut audit = Audit::new(ChangeType::RelationPropertyChange);
            audit.node_labels = start_labels;
            audit.primary_key = start_key;
            audit.relationship_label = Some(relationship_type);
            audit.target_node_labels = Some(end_labels);
            audit.target_primary_key = Some(end_key);
            audit.all_properties = Some(all_properties);
            audit.properties = Some(Vec::new());
            audit
        });
        audit.push_property_change(change);
    }

    /// Resolve an endpoint to (labels, primary key). A live endpoint reads
    /// from its snapshot; an endpoint deleted in the same transaction reads
    /// from the DeleteNode audit already built for it.
    fn resolve_endpoint(
        &self,
        acc: &Accumulator,
        endpoint: &EndpointRef,
    ) -> Option<(BTreeSet<String>, PropertyMap)> {
        match endpoint {
            EndpointRef::Live(node) => {
                let key = self.primary_key_of(node)?;
                Some((node.labels.clone(), key))
            }
            EndpointRef::Deleted(id) => {
                let audit = acc.get(*id, ChangeType::DeleteNode)?;
                Some((audit.node_labels.clone(), audit.primary_key.clone()))
            }
        }
    }

    /// Read the canonical natural-key property off a node snapshot.
    fn primary_key_of(&self, node: &NodeState) -> Option<PropertyMap> {
        let value = node.properties.get(&self.config.natural_key)?;
        Some(PropertyMap::from([(
            self.config.natural_key.clone(),
            value.clone(),
        )]))
    }

    fn drop_entity(&self, id: EntityId, reason: &str) {
        debug!(entity = id.0, reason, "entity dropped from capture");
        metrics::record_capture_dropped();
    }
}

/// Insertion-ordered audit accumulator keyed by `(entity, change type)`.
#[derive(Default)]
struct Accumulator {
    order: Vec<(EntityId, ChangeType)>,
    audits: HashMap<(EntityId, ChangeType), Audit>,
}

impl Accumulator {
    fn contains(&self, id: EntityId, change_type: ChangeType) -> bool {
        self.audits.contains_key(&(id, change_type))
    }

    fn get(&self, id: EntityId, change_type: ChangeType) -> Option<&Audit> {
        self.audits.get(&(id, change_type))
    }

    /// Insert unless the key already exists (first write wins).
    fn insert_first_wins(&mut self, id: EntityId, change_type: ChangeType, audit: Audit) {
        let key = (id, change_type);
        if self.audits.contains_key(&key) {
            return;
        }
        self.order.push(key);
        self.audits.insert(key, audit);
    }

    /// Get the audit for a key, creating it on first access.
    fn entry(
        &mut self,
        id: EntityId,
        change_type: ChangeType,
        create: impl FnOnce() -> Audit,
    ) -> &mut Audit {
        let key = (id, change_type);
        if !self.audits.contains_key(&key) {
            self.order.push(key);
        }
        self.audits.entry(key).or_insert_with(create)
    }

    /// Drain in insertion order, which capture's fixed phase walk makes the
    /// canonical audit order.
    fn into_ordered_audits(mut self) -> Vec<Audit> {
        self.order
            .iter()
            .filter_map(|key| self.audits.remove(key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{
        NodePropertyAssigned, NodePropertyRemoved, RelationshipPropertyAssigned,
    };
    use serde_json::json;

    fn capture() -> ChangeCapture {
        ChangeCapture::new(ReplicationConfig::default())
    }

    fn keyed_node(id: u64, label: &str, uuid: &str) -> NodeState {
        NodeState::new(id)
            .with_label(label)
            .with_property("uuid", json!(uuid))
    }

    fn audits_of(outcome: CaptureOutcome) -> Vec<Audit> {
        outcome.into_record().expect("expected a record").audits().unwrap()
    }

    #[test]
    fn test_add_node_audit() {
        let mut delta = TransactionDelta::new();
        delta
            .created_nodes
            .push(keyed_node(1, "Test", "123XYZ").with_property("name", json!("x")));

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].change_type, ChangeType::AddNode);
        assert!(audits[0].node_labels.contains("Test"));
        assert_eq!(audits[0].primary_key.get("uuid"), Some(&json!("123XYZ")));
        let all = audits[0].all_properties.as_ref().unwrap();
        assert_eq!(all.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_fixed_phase_order() {
        // Build a delta whose vectors arrive in "wrong" order; audits still
        // come out phase-ordered.
        let mut delta = TransactionDelta::new();
        delta.deleted_nodes.push(keyed_node(2, "Person", "dead"));
        delta.created_nodes.push(keyed_node(1, "Person", "alive"));
        delta.created_relationships.push(RelationshipState {
            id: EntityId(5),
            relationship_type: "KNOWS".to_string(),
            start: EndpointRef::Live(keyed_node(1, "Person", "alive")),
            end: EndpointRef::Deleted(EntityId(2)),
            properties: Default::default(),
        });

        let audits = audits_of(capture().capture(&delta).unwrap());
        let kinds: Vec<ChangeType> = audits.iter().map(|a| a.change_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::AddNode, ChangeType::DeleteNode, ChangeType::AddRelation]
        );
    }

    #[test]
    fn test_deleted_endpoint_resolved_from_delete_audit() {
        let mut delta = TransactionDelta::new();
        delta.deleted_nodes.push(keyed_node(2, "Person", "gone"));
        delta.deleted_relationships.push(RelationshipState {
            id: EntityId(5),
            relationship_type: "KNOWS".to_string(),
            start: EndpointRef::Live(keyed_node(1, "Person", "stays")),
            end: EndpointRef::Deleted(EntityId(2)),
            properties: Default::default(),
        });

        let audits = audits_of(capture().capture(&delta).unwrap());
        let rel = audits
            .iter()
            .find(|a| a.change_type == ChangeType::DeleteRelation)
            .unwrap();
        assert_eq!(
            rel.target_primary_key.as_ref().unwrap().get("uuid"),
            Some(&json!("gone"))
        );
        assert!(rel.target_node_labels.as_ref().unwrap().contains("Person"));
    }

    #[test]
    fn test_unresolvable_endpoint_drops_relation_audit() {
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(keyed_node(1, "Person", "a"));
        // Endpoint 9 was deleted but no delete event exists for it.
        delta.created_relationships.push(RelationshipState {
            id: EntityId(5),
            relationship_type: "KNOWS".to_string(),
            start: EndpointRef::Live(keyed_node(1, "Person", "a")),
            end: EndpointRef::Deleted(EntityId(9)),
            properties: Default::default(),
        });

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].change_type, ChangeType::AddNode);
    }

    #[test]
    fn test_node_without_natural_key_dropped() {
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(keyed_node(1, "Person", "keyed"));
        delta
            .created_nodes
            .push(NodeState::new(2).with_label("Person").with_property("name", json!("x")));

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].primary_key.get("uuid"), Some(&json!("keyed")));
    }

    #[test]
    fn test_property_events_merge_into_one_audit() {
        let node = keyed_node(1, "Person", "u-1")
            .with_property("name", json!("new-name"))
            .with_property("age", json!(40));
        let mut delta = TransactionDelta::new();
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node: node.clone(),
            property: "name".to_string(),
            previous: Some(json!("old-name")),
        });
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node: node.clone(),
            property: "age".to_string(),
            previous: None,
        });
        delta.removed_node_properties.push(NodePropertyRemoved {
            node,
            property: "nickname".to_string(),
            old_value: json!("shorty"),
        });

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].change_type, ChangeType::NodePropertyChange);
        let changes = audits[0].properties.as_ref().unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().any(|c| c.property_name == "nickname" && c.is_removal()));
    }

    #[test]
    fn test_equal_old_new_not_emitted() {
        let node = keyed_node(1, "Person", "u-1").with_property("name", json!("foo"));
        let mut delta = TransactionDelta::new();
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node,
            property: "name".to_string(),
            previous: Some(json!("foo")),
        });

        // The only change was a no-op, so no audit and no record.
        let outcome = capture().capture(&delta).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Empty));
    }

    #[test]
    fn test_property_event_shadowed_by_add_audit() {
        let node = keyed_node(1, "Person", "u-1").with_property("name", json!("x"));
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(node.clone());
        delta.assigned_node_properties.push(NodePropertyAssigned {
            node,
            property: "name".to_string(),
            previous: None,
        });

        let audits = audits_of(capture().capture(&delta).unwrap());
        // The AddNode audit carries the snapshot; no separate update audit.
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].change_type, ChangeType::AddNode);
    }

    #[test]
    fn test_relationship_property_change_audit() {
        let rel = RelationshipState {
            id: EntityId(7),
            relationship_type: "KNOWS".to_string(),
            start: EndpointRef::Live(keyed_node(1, "Person", "a")),
            end: EndpointRef::Live(keyed_node(2, "Person", "b")),
            properties: PropertyMap::from([("weight".to_string(), json!(2))]),
        };
        let mut delta = TransactionDelta::new();
        delta
            .assigned_relationship_properties
            .push(RelationshipPropertyAssigned {
                relationship: rel,
                property: "weight".to_string(),
                previous: Some(json!(1)),
            });

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
        let audit = &audits[0];
        assert_eq!(audit.change_type, ChangeType::RelationPropertyChange);
        assert_eq!(audit.relationship_label.as_deref(), Some("KNOWS"));
        let changes = audit.properties.as_ref().unwrap();
        assert_eq!(changes[0].old_value, Some(json!(1)));
        assert_eq!(changes[0].new_value, Some(json!(2)));
        assert_eq!(
            audit.all_properties.as_ref().unwrap().get("weight"),
            Some(&json!(2))
        );
    }

    #[test]
    fn test_sentinel_aborts_whole_capture() {
        let mut delta = TransactionDelta::new();
        delta.created_nodes.push(keyed_node(1, "Person", "u-1"));
        delta.created_nodes.push(
            keyed_node(2, "ReplicationSentinel", "s-1"),
        );

        let outcome = capture().capture(&delta).unwrap();
        match outcome {
            CaptureOutcome::SentinelSkipped { sentinels } => {
                assert_eq!(sentinels, vec![EntityId(2)]);
            }
            other => panic!("expected sentinel skip, got {:?}", other),
        }
    }

    #[test]
    fn test_rejected_transaction_produces_no_record() {
        let mut delta = TransactionDelta::new();
        delta
            .created_nodes
            .push(keyed_node(1, "Person", "u-1").with_label("Replicated"));

        let outcome = capture().capture(&delta).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Rejected));
        assert!(outcome.into_record().is_none());
    }

    #[test]
    fn test_empty_delta_produces_no_record() {
        let outcome = capture().capture(&TransactionDelta::new()).unwrap();
        assert!(matches!(outcome, CaptureOutcome::Empty));
    }

    #[test]
    fn test_duplicate_creation_events_merge() {
        let mut delta = TransactionDelta::new();
        let node = keyed_node(1, "Person", "u-1");
        delta.created_nodes.push(node.clone());
        delta.created_nodes.push(node);

        let audits = audits_of(capture().capture(&delta).unwrap());
        assert_eq!(audits.len(), 1);
    }
}
