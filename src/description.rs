//! The declarative graph: plain node and edge records supplied by the editor.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::params::Params;
use crate::router::RESERVED_TOPICS;

/// Identifier of a node in the graph description.
///
/// Node ids double as topic namespaces (`{id}.{port}.{verb}`), so they may not
/// contain `.` and may not shadow a reserved unscoped topic.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a node id.
    pub fn new(id: impl Into<String>) -> Result<Self, GraphError> {
        let id = id.into();
        if id.is_empty() || id.contains('.') || RESERVED_TOPICS.contains(&id.as_str()) {
            return Err(GraphError::InvalidNodeId(id));
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Identifier of an edge. Edges carry no meaning beyond routing, so any string
/// will do.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    /// Wrap an edge id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node: which unit to instantiate and with what parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique id, also the node's topic namespace.
    pub id: NodeId,
    /// Selects the unit variant from the catalog.
    #[serde(alias = "type")]
    pub kind: String,
    /// Parameter bag.
    #[serde(default, alias = "data")]
    pub parameters: Params,
}

impl NodeDescriptor {
    /// Describe a node with a validated id.
    pub fn new(id: &str, kind: &str, parameters: Params) -> Result<Self, GraphError> {
        Ok(Self {
            id: NodeId::new(id)?,
            kind: kind.to_owned(),
            parameters,
        })
    }
}

/// One edge between two named ports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDescriptor {
    /// Unique id.
    pub id: EdgeId,
    /// Node the edge leaves.
    #[serde(alias = "source")]
    pub source_node_id: NodeId,
    /// Port on the source node.
    #[serde(alias = "sourceHandle")]
    pub source_port: String,
    /// Node the edge enters.
    #[serde(alias = "target")]
    pub target_node_id: NodeId,
    /// Port on the target node.
    #[serde(alias = "targetHandle")]
    pub target_port: String,
}

impl EdgeDescriptor {
    /// Describe an edge with validated endpoints.
    pub fn new(
        id: &str,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            id: EdgeId::new(id),
            source_node_id: NodeId::new(source)?,
            source_port: source_port.to_owned(),
            target_node_id: NodeId::new(target)?,
            target_port: target_port.to_owned(),
        })
    }

    /// True if either endpoint is `node`.
    #[inline]
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source_node_id == node || &self.target_node_id == node
    }
}

/// A complete graph: the only shape the orchestrator accepts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// All nodes.
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    /// All edges.
    #[serde(default)]
    pub edges: Vec<EdgeDescriptor>,
}

impl GraphDescription {
    /// Parse a description from JSON.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_reject_topic_separators() {
        assert!(NodeId::new("osc-1").is_ok());
        assert!(NodeId::new("osc.1").is_err());
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("graphStarted").is_err());
    }

    #[test]
    fn parses_editor_json() {
        let json = r#"{
            "nodes": [
                { "id": "osc", "type": "oscillator", "data": { "frequency": 220 } },
                { "id": "out", "kind": "output" }
            ],
            "edges": [
                { "id": "e1", "source": "osc", "sourceHandle": "output",
                  "target": "out", "targetHandle": "main-input" }
            ]
        }"#;
        let desc = GraphDescription::from_json(json).unwrap();
        assert_eq!(desc.nodes.len(), 2);
        assert_eq!(desc.nodes[0].kind, "oscillator");
        assert_eq!(desc.edges[0].target_port, "main-input");
        assert!(desc.node(&NodeId::new("out").unwrap()).unwrap().parameters.is_empty());
    }

    #[test]
    fn malformed_ids_fail_to_parse() {
        let json = r#"{ "nodes": [ { "id": "a.b", "kind": "gain" } ] }"#;
        assert!(matches!(
            GraphDescription::from_json(json),
            Err(GraphError::Description(_))
        ));
    }
}
