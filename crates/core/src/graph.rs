//! Schema model moved by the DDL pipeline
//!
//! The coordinator does not interpret schemas deeply; it computes new schema
//! values by applying DDL batches, moves the visible schema reference
//! atomically, and fetches an authoritative copy from a shard during
//! reconciliation. The model here is therefore small: labels with typed
//! properties, versioned by the snapshot id at which the schema became
//! effective.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a label describes vertices or edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelKind {
    /// A vertex type.
    Vertex,
    /// An edge type.
    Edge,
}

/// A typed property on a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name, unique within its label.
    pub name: String,
    /// Data type name as understood by the storage engine.
    pub data_type: String,
}

/// A vertex or edge type in the graph schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDef {
    /// Label name, unique across the schema.
    pub name: String,
    /// Vertex or edge.
    pub kind: LabelKind,
    /// Properties carried by elements of this label.
    pub properties: Vec<PropertyDef>,
}

/// The graph schema visible at some snapshot.
///
/// `schema_version` is the snapshot id the schema was bound to when its last
/// DDL batch was appended to the write pipeline; a freshly bootstrapped
/// coordinator starts from version 0 with no labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
    /// Snapshot id at which this schema became effective.
    pub schema_version: u64,
    /// Labels keyed by name.
    pub labels: BTreeMap<String, LabelDef>,
}

impl GraphDef {
    /// The empty schema at version 0.
    pub fn empty() -> Self {
        GraphDef {
            schema_version: 0,
            labels: BTreeMap::new(),
        }
    }

    /// Apply a DDL batch, producing the successor schema value.
    ///
    /// The receiver is not mutated. The result carries the receiver's
    /// `schema_version`; the caller stamps the bound snapshot id after the
    /// batch has been appended to the write pipeline.
    pub fn apply_batch(&self, batch: &DdlRequestBatch) -> Result<GraphDef> {
        if batch.requests.is_empty() {
            return Err(Error::InvalidArgument("empty ddl batch".to_string()));
        }
        let mut next = self.clone();
        for request in &batch.requests {
            next.apply_one(request)?;
        }
        Ok(next)
    }

    fn apply_one(&mut self, request: &DdlRequest) -> Result<()> {
        match request {
            DdlRequest::CreateVertexType(def) | DdlRequest::CreateEdgeType(def) => {
                if self.labels.contains_key(&def.name) {
                    return Err(Error::Ddl(format!("label already exists: {}", def.name)));
                }
                let mut seen = std::collections::BTreeSet::new();
                for prop in &def.properties {
                    if !seen.insert(&prop.name) {
                        return Err(Error::Ddl(format!(
                            "duplicate property {} on label {}",
                            prop.name, def.name
                        )));
                    }
                }
                self.labels.insert(def.name.clone(), def.clone());
            }
            DdlRequest::DropType { label } => {
                if self.labels.remove(label).is_none() {
                    return Err(Error::Ddl(format!("label does not exist: {}", label)));
                }
            }
            DdlRequest::AddProperty { label, property } => {
                let def = self
                    .labels
                    .get_mut(label)
                    .ok_or_else(|| Error::Ddl(format!("label does not exist: {}", label)))?;
                if def.properties.iter().any(|p| p.name == property.name) {
                    return Err(Error::Ddl(format!(
                        "property already exists: {}.{}",
                        label, property.name
                    )));
                }
                def.properties.push(property.clone());
            }
        }
        Ok(())
    }
}

/// A single schema-mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DdlRequest {
    /// Create a vertex type.
    CreateVertexType(LabelDef),
    /// Create an edge type.
    CreateEdgeType(LabelDef),
    /// Drop a vertex or edge type by name.
    DropType {
        /// Name of the label to drop.
        label: String,
    },
    /// Add a property to an existing label.
    AddProperty {
        /// Label to extend.
        label: String,
        /// Property to add.
        property: PropertyDef,
    },
}

/// An ordered batch of DDL operations submitted as one unit.
///
/// The whole batch binds to a single write snapshot id and applies
/// atomically: either every request applies or the batch is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlRequestBatch {
    /// Operations in submission order.
    pub requests: Vec<DdlRequest>,
}

impl DdlRequestBatch {
    /// Wrap a list of requests as a batch.
    pub fn new(requests: Vec<DdlRequest>) -> Self {
        DdlRequestBatch { requests }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(name: &str) -> LabelDef {
        LabelDef {
            name: name.to_string(),
            kind: LabelKind::Vertex,
            properties: vec![PropertyDef {
                name: "id".to_string(),
                data_type: "long".to_string(),
            }],
        }
    }

    #[test]
    fn create_then_drop() {
        let schema = GraphDef::empty();
        let created = schema
            .apply_batch(&DdlRequestBatch::new(vec![DdlRequest::CreateVertexType(
                vertex("person"),
            )]))
            .unwrap();
        assert!(created.labels.contains_key("person"));

        let dropped = created
            .apply_batch(&DdlRequestBatch::new(vec![DdlRequest::DropType {
                label: "person".to_string(),
            }]))
            .unwrap();
        assert!(dropped.labels.is_empty());
        // original untouched
        assert!(created.labels.contains_key("person"));
    }

    #[test]
    fn duplicate_label_is_rejected_without_partial_effects() {
        let schema = GraphDef::empty();
        let batch = DdlRequestBatch::new(vec![
            DdlRequest::CreateVertexType(vertex("person")),
            DdlRequest::CreateVertexType(vertex("person")),
        ]);
        assert!(schema.apply_batch(&batch).is_err());
        assert!(schema.labels.is_empty());
    }

    #[test]
    fn add_property_to_missing_label_fails() {
        let schema = GraphDef::empty();
        let batch = DdlRequestBatch::new(vec![DdlRequest::AddProperty {
            label: "person".to_string(),
            property: PropertyDef {
                name: "age".to_string(),
                data_type: "int".to_string(),
            },
        }]);
        assert!(matches!(schema.apply_batch(&batch), Err(Error::Ddl(_))));
    }

    #[test]
    fn empty_batch_is_invalid() {
        let schema = GraphDef::empty();
        let err = schema.apply_batch(&DdlRequestBatch::new(vec![])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
