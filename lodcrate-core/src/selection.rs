//! Selection sets: named groups of scene nodes

use crate::scene::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named set of node ids used to scope processing or mark roles such as
/// cameras and occluders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSet {
    pub name: String,
    pub nodes: BTreeSet<NodeId>,
}

impl SelectionSet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: BTreeSet::new(),
        }
    }

    pub fn add(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    pub fn remove(&mut self, node: &NodeId) -> bool {
        self.nodes.remove(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// All selection sets of a scene
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSetTable {
    sets: Vec<SelectionSet>,
}

impl SelectionSetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set and return its id. A set with the same name is replaced.
    pub fn add(&mut self, set: SelectionSet) -> usize {
        if let Some(id) = self.index_of(&set.name) {
            self.sets[id] = set;
            return id;
        }
        self.sets.push(set);
        self.sets.len() - 1
    }

    pub fn get(&self, id: usize) -> Option<&SelectionSet> {
        self.sets.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SelectionSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut SelectionSet> {
        self.sets.iter_mut().find(|s| s.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.sets.iter().position(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SelectionSet> {
        self.sets.iter()
    }

    /// Drop a node from every set
    pub fn forget_node(&mut self, node: &NodeId) {
        for set in &mut self.sets {
            set.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut table = SelectionSetTable::new();
        let mut set = SelectionSet::new("ReductionTarget");
        let node = NodeId::new();
        assert!(set.add(node));
        assert!(!set.add(node));
        let id = table.add(set);
        assert_eq!(table.index_of("ReductionTarget"), Some(id));
        assert!(table.find_by_name("ReductionTarget").unwrap().contains(&node));
        assert!(table.find_by_name("Camera").is_none());

        table.forget_node(&node);
        assert!(table.get(id).unwrap().is_empty());
    }

    #[test]
    fn test_same_name_replaces() {
        let mut table = SelectionSetTable::new();
        table.add(SelectionSet::new("Camera"));
        let mut replacement = SelectionSet::new("Camera");
        replacement.add(NodeId::new());
        table.add(replacement);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().len(), 1);
    }
}
