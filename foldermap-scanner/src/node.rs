use serde::{Deserialize, Serialize};

/// One folder (or the organization at the top) of the discovered hierarchy.
///
/// Children are owned by their parent, so a `Node` is always a plain tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub display_name: String,
    /// Empty only for the root of a fetch.
    pub parent_id: String,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            parent_id: parent_id.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Node::node_count).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Options for a single fetch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// How many levels below the root to expand. 0 yields the root alone.
    pub max_depth: usize,
    /// Emit per-node diagnostics while fetching.
    pub verbose: bool,
    /// Upper bound on listing requests in flight at once.
    pub fan_out: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            verbose: false,
            fan_out: 8,
        }
    }
}

impl FetchConfig {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out.max(1);
        self
    }
}
