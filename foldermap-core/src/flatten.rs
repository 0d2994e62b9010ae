use foldermap_scanner::Node;
use serde::{Deserialize, Serialize};

/// One row of the flattened hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub id: String,
    pub display_name: String,
    pub parent_id: String,
    /// Hops from the root of the fetch.
    pub depth: usize,
}

/// Flatten a tree into records, pre-order, children in the order they were
/// listed. The tree is consumed.
pub fn flatten(root: Node) -> Vec<FlatRecord> {
    let mut records = Vec::with_capacity(root.node_count());
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        let Node {
            id,
            display_name,
            parent_id,
            children,
        } = node;

        records.push(FlatRecord {
            id,
            display_name,
            parent_id,
            depth,
        });

        // Reversed so the first child is popped next.
        stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
    }

    records
}
