use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{FormatError, Result};
use crate::format::read_unsigned_i64;
use crate::reference::GenomicRange;

/// One bin of an interval search tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTreeNode {
    /// Serialization order of the node
    pub index: usize,
    /// Genomic sub-range the node is responsible for
    pub bin: GenomicRange,
    /// Number of intervals stored at this node
    pub size: u64,
    /// Number of intervals stored in this node's whole subtree
    pub subtree_size: u64,
    /// Offset of the node's first record within the reference segment
    pub start_byte: Option<u64>,
    /// Indices of the child nodes
    pub children: Vec<usize>,
}

/// Augmented search tree over the bins of one reference.
///
/// Nodes live in an arena in pre-order, so the root is node 0 and every child
/// index is greater than its parent's. An interval is stored at the deepest node
/// whose bin fully contains it; every interval overlapping a query therefore
/// lives in a node whose bin intersects the query. [`IntervalSource`] rejects a
/// decoded record that spills out of its node's bin.
///
/// [`IntervalSource`]: super::IntervalSource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSearchTree {
    nodes: Vec<IntervalTreeNode>,
}
impl IntervalSearchTree {
    /// Builds a tree from an arena of nodes, validating its invariants
    pub fn new(reference: &str, nodes: Vec<IntervalTreeNode>) -> Result<Self> {
        let tree = Self { nodes };
        tree.validate(reference)?;
        Ok(tree)
    }

    /// Reads the serialized tree of one reference
    pub fn read_from<R: Read>(reader: &mut R, reference: &str) -> Result<Self> {
        let invalid = |reason: String| FormatError::InvalidTree {
            reference: reference.to_string(),
            reason,
        };

        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut nodes = Vec::with_capacity(count.min(1 << 16));
        for position in 0..count {
            let index = reader.read_i32::<LittleEndian>()?;
            if usize::try_from(index).ok() != Some(position) {
                return Err(invalid(format!("node {position} is labelled {index}")).into());
            }
            let start = read_unsigned_i64(reader)?
                .ok_or_else(|| invalid(format!("node {position} has a negative bin start")))?;
            let end = read_unsigned_i64(reader)?
                .ok_or_else(|| invalid(format!("node {position} has a negative bin end")))?;
            let bin = GenomicRange::new(start, end)
                .map_err(|_| invalid(format!("node {position} has bin {start}-{end}")))?;
            let size = read_unsigned_i64(reader)?
                .ok_or_else(|| invalid(format!("node {position} has a negative size")))?;
            let subtree_size = read_unsigned_i64(reader)?
                .ok_or_else(|| invalid(format!("node {position} has a negative subtree size")))?;
            let start_byte = match reader.read_i64::<LittleEndian>()? {
                -1 => None,
                offset => Some(u64::try_from(offset).map_err(|_| {
                    invalid(format!("node {position} starts at byte {offset}"))
                })?),
            };

            let child_count = reader.read_u32::<LittleEndian>()? as usize;
            let mut children = Vec::with_capacity(child_count.min(1 << 8));
            for _ in 0..child_count {
                let child = reader.read_i32::<LittleEndian>()?;
                let child = usize::try_from(child)
                    .map_err(|_| invalid(format!("node {position} has child {child}")))?;
                children.push(child);
            }

            nodes.push(IntervalTreeNode {
                index: position,
                bin,
                size,
                subtree_size,
                start_byte,
                children,
            });
        }
        Self::new(reference, nodes)
    }

    fn validate(&self, reference: &str) -> Result<()> {
        let invalid = |reason: String| FormatError::InvalidTree {
            reference: reference.to_string(),
            reason,
        };

        let mut has_parent = vec![false; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if node.size > 0 && node.start_byte.is_none() {
                return Err(invalid(format!("node {i} holds records but has no start byte")).into());
            }

            let mut child_sum = 0u64;
            let mut bins = Vec::with_capacity(node.children.len());
            for &child in &node.children {
                if child <= i || child >= self.nodes.len() {
                    return Err(invalid(format!("node {i} has child {child}")).into());
                }
                if std::mem::replace(&mut has_parent[child], true) {
                    return Err(invalid(format!("node {child} has two parents")).into());
                }
                let child = &self.nodes[child];
                if !node.bin.contains(&child.bin) {
                    return Err(invalid(format!(
                        "bin {} of node {} lies outside parent bin {}",
                        child.bin, child.index, node.bin
                    ))
                    .into());
                }
                child_sum += child.subtree_size;
                bins.push(child.bin);
            }

            bins.sort_unstable();
            if bins.windows(2).any(|pair| pair[0].intersects(&pair[1])) {
                return Err(invalid(format!("children of node {i} overlap")).into());
            }
            if node.subtree_size != node.size + child_sum {
                return Err(invalid(format!(
                    "node {i} has subtree size {} but holds {}",
                    node.subtree_size,
                    node.size + child_sum
                ))
                .into());
            }
        }

        if let Some(orphan) = has_parent.iter().skip(1).position(|&p| !p) {
            return Err(invalid(format!("node {} is unreachable", orphan + 1)).into());
        }
        Ok(())
    }

    #[must_use]
    pub fn root(&self) -> Option<&IntervalTreeNode> {
        self.nodes.first()
    }

    #[must_use]
    pub fn nodes(&self) -> &[IntervalTreeNode] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of intervals stored in the whole tree
    #[must_use]
    pub fn total_intervals(&self) -> u64 {
        self.root().map_or(0, |root| root.subtree_size)
    }

    /// Nodes whose bin intersects `range`, in pre-order.
    ///
    /// Subtrees holding no intervals are skipped.
    fn intersecting<'a>(
        &'a self,
        range: &GenomicRange,
    ) -> impl Iterator<Item = &'a IntervalTreeNode> {
        let range = *range;
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push(0);
        }
        std::iter::from_fn(move || {
            while let Some(i) = stack.pop() {
                let node = &self.nodes[i];
                if node.subtree_size == 0 || !node.bin.intersects(&range) {
                    continue;
                }
                stack.extend(node.children.iter().rev());
                return Some(node);
            }
            None
        })
    }

    /// Calls `visit` on every node whose bin intersects `range`, in pre-order,
    /// stopping at the first error.
    pub fn visit<'a, F>(&'a self, range: &GenomicRange, visit: F) -> Result<()>
    where
        F: FnMut(&'a IntervalTreeNode) -> Result<()>,
    {
        self.intersecting(range).try_for_each(visit)
    }

    /// Nodes holding records whose bin intersects `range`
    #[must_use]
    pub fn overlapping(&self, range: &GenomicRange) -> Vec<&IntervalTreeNode> {
        self.intersecting(range).filter(|node| node.size > 0).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testing::{generic, interval_reference};
    use crate::Error;

    fn range(from: u64, to: u64) -> GenomicRange {
        GenomicRange::new(from, to).unwrap()
    }

    fn node(
        index: usize,
        bin: (u64, u64),
        size: u64,
        subtree: u64,
        children: Vec<usize>,
    ) -> IntervalTreeNode {
        IntervalTreeNode {
            index,
            bin: range(bin.0, bin.1),
            size,
            subtree_size: subtree,
            start_byte: (size > 0).then_some(0),
            children,
        }
    }

    fn sample_tree() -> IntervalSearchTree {
        IntervalSearchTree::new(
            "chr1",
            vec![
                node(0, (1, 100), 1, 3, vec![1, 2]),
                node(1, (1, 50), 2, 2, vec![]),
                node(2, (51, 100), 0, 0, vec![]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_overlapping_prunes_by_bin() {
        let tree = sample_tree();
        let hits: Vec<usize> = tree.overlapping(&range(10, 20)).iter().map(|n| n.index).collect();
        assert_eq!(hits, vec![0, 1]);
        let hits: Vec<usize> = tree.overlapping(&range(60, 70)).iter().map(|n| n.index).collect();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn test_empty_subtrees_are_not_visited() {
        let tree = sample_tree();
        let mut visited = Vec::new();
        tree.visit(&range(60, 70), |node| {
            visited.push(node.index);
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, vec![0]);
    }

    #[test]
    fn test_visited_nodes_outlive_callback() {
        let tree = sample_tree();
        let mut held: Vec<&IntervalTreeNode> = Vec::new();
        tree.visit(&range(10, 20), |node| {
            held.push(node);
            Ok(())
        })
        .unwrap();
        assert_eq!(held.iter().map(|n| n.index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_visit_stops_at_first_error() {
        let tree = sample_tree();
        let mut calls = 0;
        let result = tree.visit(&range(1, 100), |_| {
            calls += 1;
            Err(FormatError::InvalidRecord("stop".to_string()).into())
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_total_intervals() {
        assert_eq!(sample_tree().total_intervals(), 3);
        assert_eq!(IntervalSearchTree::default().total_intervals(), 0);
    }

    #[test]
    fn test_subtree_size_invariant_enforced() {
        let result = IntervalSearchTree::new(
            "chr1",
            vec![node(0, (1, 100), 1, 5, vec![1]), node(1, (1, 50), 2, 2, vec![])],
        );
        assert!(matches!(
            result,
            Err(Error::FormatError(FormatError::InvalidTree { .. }))
        ));
    }

    #[test]
    fn test_child_bin_outside_parent_rejected() {
        let result = IntervalSearchTree::new(
            "chr1",
            vec![node(0, (1, 100), 0, 0, vec![1]), node(1, (90, 150), 0, 0, vec![])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_overlapping_children_rejected() {
        let result = IntervalSearchTree::new(
            "chr1",
            vec![
                node(0, (1, 100), 0, 0, vec![1, 2]),
                node(1, (1, 60), 0, 0, vec![]),
                node(2, (50, 100), 0, 0, vec![]),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backward_child_rejected() {
        let result = IntervalSearchTree::new(
            "chr1",
            vec![node(0, (1, 100), 0, 0, vec![1]), node(1, (1, 50), 0, 0, vec![0])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let result = IntervalSearchTree::new(
            "chr1",
            vec![node(0, (1, 100), 0, 0, vec![]), node(1, (1, 50), 0, 0, vec![])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_read_serialized_tree() -> Result<()> {
        let records = vec![generic(5, 10, "a"), generic(40, 60, "b"), generic(70, 80, "c")];
        let (index, _) = interval_reference(100, 2, &records);
        let tree = IntervalSearchTree::read_from(&mut Cursor::new(index), "chr1")?;
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.total_intervals(), 3);
        // [40, 60] straddles the midpoint and stays at the root
        assert_eq!(tree.root().unwrap().size, 1);
        assert_eq!(tree.root().unwrap().start_byte, Some(0));
        Ok(())
    }

    #[test]
    fn test_truncated_tree_is_io_error() {
        let (mut index, _) = interval_reference(100, 2, &[generic(5, 10, "a")]);
        index.truncate(index.len() - 3);
        let err = IntervalSearchTree::read_from(&mut Cursor::new(index), "chr1").unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }
}
