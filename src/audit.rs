// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Audit and Transaction Record data model.
//!
//! An [`Audit`] is one captured change unit for a node or relationship; a
//! [`TransactionRecord`] bundles the ordered audits of one committed source
//! transaction into the durable unit of replication.
//!
//! # Wire Format
//!
//! Audits serialize with a fixed camelCase field set:
//! `changeType, nodeLabels, primaryKey, relationshipLabel, targetNodeLabels,
//! targetPrimaryKey, properties, allProperties, uuid, timestamp,
//! transactionId`. Most fields are legitimately absent depending on the
//! change type, so every conditionally-present field is an explicit `Option`
//! rather than a dynamically-traversed JSON blob.
//!
//! Audits are transient: they exist between capture and serialization, and
//! again between deserialization and replay. Only the Transaction Record is
//! persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A property map snapshot. `BTreeMap` keeps iteration deterministic.
pub type PropertyMap = BTreeMap<String, Value>;

/// The kind of change one audit describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    AddNode,
    DeleteNode,
    AddRelation,
    DeleteRelation,
    NodePropertyChange,
    RelationPropertyChange,
}

impl ChangeType {
    /// True for the relationship-anchored change types.
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            ChangeType::AddRelation
                | ChangeType::DeleteRelation
                | ChangeType::RelationPropertyChange
        )
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeType::AddNode => "AddNode",
            ChangeType::DeleteNode => "DeleteNode",
            ChangeType::AddRelation => "AddRelation",
            ChangeType::DeleteRelation => "DeleteRelation",
            ChangeType::NodePropertyChange => "NodePropertyChange",
            ChangeType::RelationPropertyChange => "RelationPropertyChange",
        };
        write!(f, "{}", s)
    }
}

/// One property transition on an update audit.
///
/// Either side may be absent: `old_value: None` means the property was added,
/// `new_value: None` means it was removed. A change where both sides are
/// equal is never emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub property_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl PropertyChange {
    /// Build a change, returning `None` when old and new are equal
    /// (no-op transitions are never recorded).
    pub fn changed(
        property_name: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Option<Self> {
        if old_value == new_value {
            return None;
        }
        Some(Self {
            property_name: property_name.into(),
            old_value,
            new_value,
        })
    }

    /// True when this change removes the property.
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}

/// One captured change unit.
///
/// For relation audits, `node_labels`/`primary_key` identify the start node
/// and `target_node_labels`/`target_primary_key` the end node. Resolution on
/// replay is always by natural key; internal store identifiers never cross
/// the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub change_type: ChangeType,

    /// Type tags of the (start) node at capture time.
    pub node_labels: BTreeSet<String>,

    /// Natural-key property map, canonically `{uuid: value}`.
    pub primary_key: PropertyMap,

    /// Relationship type, relation audits only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_label: Option<String>,

    /// End-node labels, relation audits only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node_labels: Option<BTreeSet<String>>,

    /// End-node natural key, relation audits only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_primary_key: Option<PropertyMap>,

    /// Ordered property transitions, update audits only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<PropertyChange>>,

    /// Full property snapshot. Used verbatim for adds; the source of truth
    /// for property updates (last-write-wins full overwrite).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_properties: Option<PropertyMap>,

    /// This audit's own id, stamped when the record is sealed.
    pub uuid: String,

    /// Capture timestamp (epoch ms), shared by all audits of one record.
    pub timestamp: i64,

    /// The owning transaction's uuid.
    pub transaction_id: String,
}

impl Audit {
    /// Start a bare audit of the given type. Identity fields are stamped by
    /// [`TransactionRecord::seal`].
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            node_labels: BTreeSet::new(),
            primary_key: PropertyMap::new(),
            relationship_label: None,
            target_node_labels: None,
            target_primary_key: None,
            properties: None,
            all_properties: None,
            uuid: String::new(),
            timestamp: 0,
            transaction_id: String::new(),
        }
    }

    /// Append a property transition, keeping the first entry per property
    /// name (first write wins within one transaction).
    pub fn push_property_change(&mut self, change: PropertyChange) {
        let list = self.properties.get_or_insert_with(Vec::new);
        if list
            .iter()
            .any(|c| c.property_name == change.property_name)
        {
            return;
        }
        list.push(change);
    }
}

/// Replication stream a record belongs to.
///
/// Streams are fully independent: separate worker, watermark, and record
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Regular graph data mutations.
    Data,
    /// Schema/metadata mutations.
    Schema,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Data, StreamKind::Schema];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Data => "data",
            StreamKind::Schema => "schema",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a Transaction Record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    /// Captured from a committed source transaction.
    Committed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Committed => "COMMITTED",
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "COMMITTED" => Ok(RecordStatus::Committed),
            other => Err(format!("unknown record status: {}", other)),
        }
    }
}

/// The durable unit of replication: all audits of one committed source
/// transaction, in capture order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Freshly generated UUIDv4 identifying the source transaction.
    pub transaction_uuid: String,

    /// Capture timestamp, epoch milliseconds. Records replicate in ascending
    /// order of this field.
    pub timestamp_created: i64,

    pub status: RecordStatus,

    /// JSON array of [`Audit`]s, preserving capture order.
    pub serialized_audits: String,

    /// Optional raw statement that produced the transaction, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_statement: Option<String>,
}

impl TransactionRecord {
    /// Seal an ordered audit list into a record: generates the transaction
    /// uuid and capture timestamp, stamps every audit with its own uuid and
    /// the shared identity, and serializes the list.
    pub fn seal(mut audits: Vec<Audit>) -> serde_json::Result<Self> {
        let transaction_uuid = uuid::Uuid::new_v4().to_string();
        let timestamp_created = chrono::Utc::now().timestamp_millis();

        for audit in &mut audits {
            audit.uuid = uuid::Uuid::new_v4().to_string();
            audit.timestamp = timestamp_created;
            audit.transaction_id = transaction_uuid.clone();
        }

        Ok(Self {
            transaction_uuid,
            timestamp_created,
            status: RecordStatus::Committed,
            serialized_audits: serde_json::to_string(&audits)?,
            raw_statement: None,
        })
    }

    /// Deserialize the audit list, preserving capture order.
    pub fn audits(&self) -> serde_json::Result<Vec<Audit>> {
        serde_json::from_str(&self.serialized_audits)
    }
}
