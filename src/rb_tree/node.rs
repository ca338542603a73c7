//! Nodes, links, and the rotation and rebalancing algorithms.
//!
//! Everything here operates on raw node pointers and the tree's [`Header`].
//! The functions are `unsafe` because they trust that every link they follow
//! points to a live node of the same tree.

use core::ptr::NonNull;

pub(crate) type NodePtr<V> = NonNull<Node<V>>;
pub(crate) type Link<V> = Option<NodePtr<V>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

/// A tree node. The value is written once at construction and never mutated
/// while the node is linked into a tree.
pub(crate) struct Node<V> {
    pub(crate) parent: Link<V>,
    pub(crate) left: Link<V>,
    pub(crate) right: Link<V>,
    pub(crate) color: Color,
    pub(crate) value: V,
}

impl<V> Node<V> {
    /// A detached red node.
    pub(crate) fn new(value: V) -> Self {
        Node {
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
            value,
        }
    }
}

/// The tree's sentinel: the root and cached extremes.
///
/// The header is not a node. The end position is represented by the absence of
/// a node, so "stepping off either end" lands on the header without any
/// color-based tricks. The root's parent link is always `None`.
pub(crate) struct Header<V> {
    pub(crate) root: Link<V>,
    /// The minimum node, or `None` if the tree is empty.
    pub(crate) leftmost: Link<V>,
    /// The maximum node, or `None` if the tree is empty.
    pub(crate) rightmost: Link<V>,
}

impl<V> Header<V> {
    pub(crate) const fn new() -> Self {
        Header {
            root: None,
            leftmost: None,
            rightmost: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Header::new();
    }
}

macro_rules! field {
    ($node:expr, $field:ident) => {
        (*$node.as_ptr()).$field
    };
}

#[inline]
unsafe fn is_red<V>(link: Link<V>) -> bool {
    matches!(link, Some(n) if field!(n, color) == Color::Red)
}

#[inline]
unsafe fn is_black<V>(link: Link<V>) -> bool {
    !is_red(link)
}

pub(crate) unsafe fn minimum<V>(mut x: NodePtr<V>) -> NodePtr<V> {
    while let Some(left) = field!(x, left) {
        x = left;
    }
    x
}

pub(crate) unsafe fn maximum<V>(mut x: NodePtr<V>) -> NodePtr<V> {
    while let Some(right) = field!(x, right) {
        x = right;
    }
    x
}

/// The in-order successor of `x`, or `None` if `x` is the maximum.
pub(crate) unsafe fn successor<V>(mut x: NodePtr<V>) -> Link<V> {
    if let Some(right) = field!(x, right) {
        return Some(minimum(right));
    }
    while let Some(parent) = field!(x, parent) {
        if field!(parent, left) == Some(x) {
            return Some(parent);
        }
        x = parent;
    }
    None
}

/// The in-order predecessor of `x`, or `None` if `x` is the minimum.
pub(crate) unsafe fn predecessor<V>(mut x: NodePtr<V>) -> Link<V> {
    if let Some(left) = field!(x, left) {
        return Some(maximum(left));
    }
    while let Some(parent) = field!(x, parent) {
        if field!(parent, right) == Some(x) {
            return Some(parent);
        }
        x = parent;
    }
    None
}

/// Point whichever link referenced `old` (a child link of `old`'s parent, or
/// the root) at `new`.
#[inline]
unsafe fn replace_child<V>(header: &mut Header<V>, old: NodePtr<V>, new: Link<V>) {
    match field!(old, parent) {
        None => header.root = new,
        Some(parent) if field!(parent, left) == Some(old) => field!(parent, left) = new,
        Some(parent) => field!(parent, right) = new,
    }
}

unsafe fn rotate_left<V>(x: NodePtr<V>, header: &mut Header<V>) {
    let y = field!(x, right).expect("rotate_left requires a right child");
    field!(x, right) = field!(y, left);
    if let Some(yl) = field!(y, left) {
        field!(yl, parent) = Some(x);
    }
    field!(y, parent) = field!(x, parent);
    replace_child(header, x, Some(y));
    field!(y, left) = Some(x);
    field!(x, parent) = Some(y);
}

unsafe fn rotate_right<V>(x: NodePtr<V>, header: &mut Header<V>) {
    let y = field!(x, left).expect("rotate_right requires a left child");
    field!(x, left) = field!(y, right);
    if let Some(yr) = field!(y, right) {
        field!(yr, parent) = Some(x);
    }
    field!(y, parent) = field!(x, parent);
    replace_child(header, x, Some(y));
    field!(y, right) = Some(x);
    field!(x, parent) = Some(y);
}

/// Link the detached node `z` as a child of `parent` (or as the root when
/// `parent` is `None`), update the cached extremes, and restore the red-black
/// properties.
pub(crate) unsafe fn insert_and_rebalance<V>(
    z: NodePtr<V>,
    parent: Link<V>,
    insert_left: bool,
    header: &mut Header<V>,
) {
    field!(z, parent) = parent;
    field!(z, left) = None;
    field!(z, right) = None;
    field!(z, color) = Color::Red;

    match parent {
        None => {
            header.root = Some(z);
            header.leftmost = Some(z);
            header.rightmost = Some(z);
        }
        Some(p) if insert_left => {
            field!(p, left) = Some(z);
            if header.leftmost == Some(p) {
                header.leftmost = Some(z);
            }
        }
        Some(p) => {
            field!(p, right) = Some(z);
            if header.rightmost == Some(p) {
                header.rightmost = Some(z);
            }
        }
    }

    let mut x = z;
    while let Some(p) = field!(x, parent) {
        if field!(p, color) == Color::Black {
            break;
        }
        // A red parent is never the root, so the grandparent exists.
        let g = field!(p, parent).expect("red node must have a parent");

        if field!(g, left) == Some(p) {
            let uncle = field!(g, right);
            if is_red(uncle) {
                field!(p, color) = Color::Black;
                field!(uncle.unwrap_unchecked(), color) = Color::Black;
                field!(g, color) = Color::Red;
                x = g;
            } else {
                let mut p = p;
                if field!(p, right) == Some(x) {
                    x = p;
                    rotate_left(x, header);
                    p = field!(x, parent).unwrap_unchecked();
                }
                field!(p, color) = Color::Black;
                field!(g, color) = Color::Red;
                rotate_right(g, header);
                break;
            }
        } else {
            let uncle = field!(g, left);
            if is_red(uncle) {
                field!(p, color) = Color::Black;
                field!(uncle.unwrap_unchecked(), color) = Color::Black;
                field!(g, color) = Color::Red;
                x = g;
            } else {
                let mut p = p;
                if field!(p, left) == Some(x) {
                    x = p;
                    rotate_right(x, header);
                    p = field!(x, parent).unwrap_unchecked();
                }
                field!(p, color) = Color::Black;
                field!(g, color) = Color::Red;
                rotate_left(g, header);
                break;
            }
        }
    }

    if let Some(root) = header.root {
        field!(root, color) = Color::Black;
    }
}

/// Unlink `z` from the tree, update the cached extremes, and restore the
/// red-black properties. The node's memory and value are left untouched.
pub(crate) unsafe fn erase_and_rebalance<V>(z: NodePtr<V>, header: &mut Header<V>) {
    // `y` is the node that physically leaves its position: `z` itself if it
    // has at most one child, otherwise its in-order successor, which then takes
    // over `z`'s position and color.
    let mut y = z;
    let x: Link<V>;
    let x_parent: Link<V>;

    match (field!(z, left), field!(z, right)) {
        (None, right) => x = right,
        (left, None) => x = left,
        (Some(_), Some(right)) => {
            y = minimum(right);
            x = field!(y, right);
        }
    }

    let removed_color;
    if y != z {
        let z_left = field!(z, left).unwrap_unchecked();
        let z_right = field!(z, right).unwrap_unchecked();

        field!(z_left, parent) = Some(y);
        field!(y, left) = Some(z_left);

        if y != z_right {
            x_parent = field!(y, parent);
            if let Some(x) = x {
                field!(x, parent) = x_parent;
            }
            // `y` is the minimum of `z`'s right subtree and not its root, so
            // it is a left child.
            field!(x_parent.unwrap_unchecked(), left) = x;
            field!(y, right) = Some(z_right);
            field!(z_right, parent) = Some(y);
        } else {
            x_parent = Some(y);
        }

        replace_child(header, z, Some(y));
        field!(y, parent) = field!(z, parent);

        removed_color = field!(y, color);
        field!(y, color) = field!(z, color);
    } else {
        x_parent = field!(z, parent);
        if let Some(x) = x {
            field!(x, parent) = x_parent;
        }
        replace_child(header, z, x);

        if header.leftmost == Some(z) {
            header.leftmost = match x {
                None => x_parent,
                Some(x) => Some(minimum(x)),
            };
        }
        if header.rightmost == Some(z) {
            header.rightmost = match x {
                None => x_parent,
                Some(x) => Some(maximum(x)),
            };
        }

        removed_color = field!(z, color);
    }

    if removed_color == Color::Black {
        erase_fixup(x, x_parent, header);
    }
}

/// Repair the black-height deficiency at `x` (whose parent is `x_parent`)
/// left behind by removing a black node.
unsafe fn erase_fixup<V>(mut x: Link<V>, mut x_parent: Link<V>, header: &mut Header<V>) {
    while x != header.root && is_black(x) {
        // `x` is not the root, so it has a parent, and since `x` carries an
        // extra black, its sibling subtree has black height at least one and
        // so the sibling exists.
        let parent = x_parent.unwrap_unchecked();

        if x == field!(parent, left) {
            let mut w = field!(parent, right).unwrap_unchecked();
            if field!(w, color) == Color::Red {
                field!(w, color) = Color::Black;
                field!(parent, color) = Color::Red;
                rotate_left(parent, header);
                w = field!(parent, right).unwrap_unchecked();
            }
            if is_black(field!(w, left)) && is_black(field!(w, right)) {
                field!(w, color) = Color::Red;
                x = Some(parent);
                x_parent = field!(parent, parent);
            } else {
                if is_black(field!(w, right)) {
                    if let Some(wl) = field!(w, left) {
                        field!(wl, color) = Color::Black;
                    }
                    field!(w, color) = Color::Red;
                    rotate_right(w, header);
                    w = field!(parent, right).unwrap_unchecked();
                }
                field!(w, color) = field!(parent, color);
                field!(parent, color) = Color::Black;
                if let Some(wr) = field!(w, right) {
                    field!(wr, color) = Color::Black;
                }
                rotate_left(parent, header);
                break;
            }
        } else {
            let mut w = field!(parent, left).unwrap_unchecked();
            if field!(w, color) == Color::Red {
                field!(w, color) = Color::Black;
                field!(parent, color) = Color::Red;
                rotate_right(parent, header);
                w = field!(parent, left).unwrap_unchecked();
            }
            if is_black(field!(w, right)) && is_black(field!(w, left)) {
                field!(w, color) = Color::Red;
                x = Some(parent);
                x_parent = field!(parent, parent);
            } else {
                if is_black(field!(w, left)) {
                    if let Some(wr) = field!(w, right) {
                        field!(wr, color) = Color::Black;
                    }
                    field!(w, color) = Color::Red;
                    rotate_left(w, header);
                    w = field!(parent, left).unwrap_unchecked();
                }
                field!(w, color) = field!(parent, color);
                field!(parent, color) = Color::Black;
                if let Some(wl) = field!(w, left) {
                    field!(wl, color) = Color::Black;
                }
                rotate_right(parent, header);
                break;
            }
        }
    }

    if let Some(x) = x {
        field!(x, color) = Color::Black;
    }
}
