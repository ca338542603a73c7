use core::fmt;

use super::node::{maximum, minimum, Color, Link, NodePtr};
use super::*;

/// A broken structural invariant, as reported by
/// [`RbTree::check_invariants`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    /// The root is red.
    RedRoot,
    /// The root has a parent link.
    RootHasParent,
    /// A child's parent link does not point back at its parent.
    BrokenParentLink,
    /// A red node has a red child.
    RedRed,
    /// Two paths from the same node to a leaf cross different numbers of
    /// black nodes.
    BlackHeight,
    /// An in-order successor compares less than its predecessor.
    OutOfOrder,
    /// The cached minimum is not the leftmost node.
    StaleLeftmost,
    /// The cached maximum is not the rightmost node.
    StaleRightmost,
    /// The element count does not match the number of linked nodes.
    Length {
        /// The tree's recorded length.
        expected: usize,
        /// The number of nodes actually reachable from the root.
        actual: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::RedRoot => f.write_str("root node is red"),
            Violation::RootHasParent => f.write_str("root node has a parent"),
            Violation::BrokenParentLink => f.write_str("child does not link back to its parent"),
            Violation::RedRed => f.write_str("red node has a red child"),
            Violation::BlackHeight => f.write_str("black height is not uniform"),
            Violation::OutOfOrder => f.write_str("in-order traversal is not sorted"),
            Violation::StaleLeftmost => f.write_str("cached minimum is stale"),
            Violation::StaleRightmost => f.write_str("cached maximum is stale"),
            Violation::Length { expected, actual } => {
                write!(f, "length is {expected} but {actual} nodes are linked")
            }
        }
    }
}

/// Check the subtree rooted at `node`, returning its black height and node
/// count.
unsafe fn check_subtree<V>(node: Link<V>) -> Result<(usize, usize), Violation> {
    let Some(node) = node else {
        return Ok((1, 0));
    };
    let n: NodePtr<V> = node;

    for child in [(*n.as_ptr()).left, (*n.as_ptr()).right].into_iter().flatten() {
        if (*child.as_ptr()).parent != Some(n) {
            return Err(Violation::BrokenParentLink);
        }
        if (*n.as_ptr()).color == Color::Red && (*child.as_ptr()).color == Color::Red {
            return Err(Violation::RedRed);
        }
    }

    let (left_height, left_count) = check_subtree((*n.as_ptr()).left)?;
    let (right_height, right_count) = check_subtree((*n.as_ptr()).right)?;
    if left_height != right_height {
        return Err(Violation::BlackHeight);
    }

    let own = usize::from((*n.as_ptr()).color == Color::Black);
    Ok((left_height + own, left_count + right_count + 1))
}

impl<V, X, C, A> RbTree<V, X, C, A>
where
    X: KeyOfValue<V>,
    C: Compare<X::Key>,
    A: Allocator,
{
    /// Verify every structural invariant of the tree, returning its black
    /// height (counting the empty leaves) on success.
    ///
    /// This walks the whole tree and is intended for tests and debugging.
    pub fn check_invariants(&self) -> Result<usize, Violation> {
        // Safety: all links reachable from the header are live nodes of this
        // tree, which we borrow.
        unsafe {
            if let Some(root) = self.header.root {
                if (*root.as_ptr()).parent.is_some() {
                    return Err(Violation::RootHasParent);
                }
                if (*root.as_ptr()).color == Color::Red {
                    return Err(Violation::RedRoot);
                }
            }

            let (height, count) = check_subtree(self.header.root)?;
            if count != self.len {
                return Err(Violation::Length {
                    expected: self.len,
                    actual: count,
                });
            }

            if self.header.leftmost != self.header.root.map(|root| minimum(root)) {
                return Err(Violation::StaleLeftmost);
            }
            if self.header.rightmost != self.header.root.map(|root| maximum(root)) {
                return Err(Violation::StaleRightmost);
            }

            let mut iter = self.iter();
            if let Some(mut prev) = iter.next() {
                for value in iter {
                    if self.compare.less(X::key(value), X::key(prev)) {
                        return Err(Violation::OutOfOrder);
                    }
                    prev = value;
                }
            }

            Ok(height)
        }
    }
}
