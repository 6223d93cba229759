//! Id → key lookup used to replay deltas against another forest.

use crate::error::{ApplyError, Result};
use arbor_core::{Forest, NodeId, NodeKey};
use std::collections::HashMap;

/// Maps node ids to the keys of one target forest.
#[derive(Clone, Debug, Default)]
pub struct IdMapping {
    nodes: HashMap<NodeId, NodeKey>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole table with every node beneath `roots`. The table is
    /// left as it was when a root cannot be walked.
    pub fn reinitialize_with(&mut self, forest: &Forest, roots: &[NodeKey]) -> Result<()> {
        let mut nodes = HashMap::new();
        for root in roots {
            for key in forest.descendants(*root)? {
                nodes.insert(forest.id_of(key)?.clone(), key);
            }
        }
        self.nodes = nodes;
        Ok(())
    }

    /// Register one node of `forest`.
    pub fn update_with(&mut self, forest: &Forest, key: NodeKey) -> Result<()> {
        let id = forest.id_of(key)?.clone();
        self.nodes.insert(id, key);
        Ok(())
    }

    pub fn register(&mut self, id: NodeId, key: NodeKey) {
        self.nodes.insert(id, key);
    }

    pub fn from_id(&self, id: &NodeId) -> Result<NodeKey> {
        self.try_from_id(id)
            .ok_or_else(|| ApplyError::UnknownNode(id.clone()))
    }

    pub fn try_from_id(&self, id: &NodeId) -> Option<NodeKey> {
        self.nodes.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Take over every entry of `staged`, replacing entries for the same ids.
    pub fn merge(&mut self, staged: IdMapping) {
        self.nodes.extend(staged.nodes);
    }

    pub fn forget(&mut self, id: &NodeId) -> Option<NodeKey> {
        self.nodes.remove(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
