//! Index-based graph arena
//!
//! Nodes live in one contiguous vector and refer to each other by position.
//! The same structure carries both the package dependency graph and the step
//! pipeline, and is rebuilt wholesale every flow rather than mutated.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A node in a [`Graph`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node<T> {
    /// Position of this node in the graph
    pub index: usize,
    /// Node payload
    pub data: T,
    /// Nodes that must come before this one
    pub parents_indexes: Vec<usize>,
    /// Nodes that come after this one
    pub children_indexes: Vec<usize>,
}

/// Directed acyclic graph stored as a flat array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Graph<T> {
    /// An empty graph
    pub fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Build a chain where every node depends on the previous one
    pub fn linear(items: Vec<T>) -> Self {
        let len = items.len();
        let nodes = items
            .into_iter()
            .enumerate()
            .map(|(index, data)| Node {
                index,
                data,
                parents_indexes: if index == 0 { vec![] } else { vec![index - 1] },
                children_indexes: if index + 1 < len { vec![index + 1] } else { vec![] },
            })
            .collect();
        Self { nodes }
    }

    /// Build a graph from node payloads and the parent indexes of each node.
    ///
    /// Children are derived from the parent lists. Fails on out-of-range
    /// indexes, self references and cycles.
    pub fn from_parents(items: Vec<T>, parents: Vec<Vec<usize>>) -> Result<Self, GraphError> {
        if items.len() != parents.len() {
            return Err(GraphError::LengthMismatch {
                nodes: items.len(),
                parents: parents.len(),
            });
        }

        let len = items.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); len];
        let mut normalized: Vec<Vec<usize>> = Vec::with_capacity(len);

        for (index, mut node_parents) in parents.into_iter().enumerate() {
            node_parents.sort_unstable();
            node_parents.dedup();
            for &parent in &node_parents {
                if parent >= len {
                    return Err(GraphError::IndexOutOfBounds { node: index, parent });
                }
                if parent == index {
                    return Err(GraphError::SelfLoop(index));
                }
                children[parent].push(index);
            }
            normalized.push(node_parents);
        }

        let nodes = items
            .into_iter()
            .zip(normalized.into_iter().zip(children))
            .enumerate()
            .map(|(index, (data, (parents_indexes, children_indexes)))| Node {
                index,
                data,
                parents_indexes,
                children_indexes,
            })
            .collect();

        let graph = Self { nodes };
        let order = graph.kahn();
        if order.len() != graph.len() {
            let cyclic = (0..graph.len()).filter(|i| !order.contains(i)).collect();
            return Err(GraphError::Cycle(cyclic));
        }
        Ok(graph)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in index order
    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }

    /// Iterate over nodes in index order
    pub fn iter(&self) -> std::slice::Iter<'_, Node<T>> {
        self.nodes.iter()
    }

    /// Get a node by index
    pub fn get(&self, index: usize) -> Option<&Node<T>> {
        self.nodes.get(index)
    }

    /// Build a graph with the same shape and new payloads
    pub fn map<U>(&self, mut f: impl FnMut(&Node<T>) -> U) -> Graph<U> {
        Graph {
            nodes: self
                .nodes
                .iter()
                .map(|node| Node {
                    index: node.index,
                    data: f(node),
                    parents_indexes: node.parents_indexes.clone(),
                    children_indexes: node.children_indexes.clone(),
                })
                .collect(),
        }
    }

    /// Indexes in topological order (parents before children, ties by index)
    pub fn topological_order(&self) -> Vec<usize> {
        self.kahn()
    }

    /// Kahn's algorithm; returns fewer indexes than nodes when a cycle exists
    fn kahn(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.parents_indexes.len()).collect();
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut sorted = Vec::with_capacity(self.nodes.len());

        while let Some(index) = queue.pop_front() {
            sorted.push(index);
            for &child in &self.nodes[index].children_indexes {
                in_degree[child] = in_degree[child].saturating_sub(1);
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        sorted
    }
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, T> IntoIterator for &'a Graph<T> {
    type Item = &'a Node<T>;
    type IntoIter = std::slice::Iter<'a, Node<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Errors during graph construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Parent lists do not line up with nodes
    #[error("Graph has {nodes} nodes but {parents} parent lists")]
    LengthMismatch { nodes: usize, parents: usize },

    /// A parent index points outside the graph
    #[error("Node {node} refers to missing parent {parent}")]
    IndexOutOfBounds { node: usize, parent: usize },

    /// A node lists itself as a parent
    #[error("Node {0} is its own parent")]
    SelfLoop(usize),

    /// Cyclic dependency detected
    #[error("Cyclic dependency detected among nodes: {0:?}")]
    Cycle(Vec<usize>),
}
