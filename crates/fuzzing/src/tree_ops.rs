//! Op-sequence testing for `RbTree`, checked against a `BTreeMap` model.

use super::CountingAllocator;
use bincode::{Decode, Encode};
use mutatis::{mutators as m, DefaultMutate, Generate, Mutate};
use rbpool::{
    rb_tree::{Less, SelectFirst},
    PoolAllocator, RbTree, SingleThreadedLock,
};
use std::collections::{BTreeMap, VecDeque};

/// Keys are drawn from a small range so that duplicates are common.
const NUM_GENERATED_KEYS: usize = 32;

type ModelTree<'a> =
    RbTree<(u8, u32), SelectFirst, Less, &'a PoolAllocator<&'a CountingAllocator, SingleThreadedLock>>;

/// Every value inserted under each key, in insertion order. Keys with no
/// values are removed.
type Model = BTreeMap<u8, VecDeque<u32>>;

/// A tree test operation.
#[derive(Clone, Debug, Mutate, Encode, Decode)]
pub enum TreeOp {
    InsertUnique { key: u8 },
    InsertEqual { key: u8 },
    InsertOutOfMemory { key: u8 },
    Erase { key: u8 },
    EraseFirst { key: u8 },
    EraseRange { from: u8, to: u8 },
    Pop { back: bool },
    Clear,
    CloneTree,
}

impl TreeOp {
    fn key_mut(&mut self) -> Option<&mut u8> {
        match self {
            TreeOp::InsertUnique { key }
            | TreeOp::InsertEqual { key }
            | TreeOp::InsertOutOfMemory { key }
            | TreeOp::Erase { key }
            | TreeOp::EraseFirst { key }
            | TreeOp::EraseRange { from: key, .. } => Some(key),
            TreeOp::Pop { .. } | TreeOp::Clear | TreeOp::CloneTree => None,
        }
    }
}

fn gen_key(ctx: &mut mutatis::Context) -> u8 {
    ctx.rng().gen_index(NUM_GENERATED_KEYS).unwrap() as u8
}

impl Generate<TreeOp> for TreeOpMutator {
    fn generate(&mut self, ctx: &mut mutatis::Context) -> mutatis::Result<TreeOp> {
        // Insertions are listed twice so that trees get a chance to grow.
        let choices: &[fn(&mut mutatis::Context) -> mutatis::Result<TreeOp>] = &[
            |ctx| Ok(TreeOp::InsertUnique { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::InsertUnique { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::InsertEqual { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::InsertEqual { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::InsertOutOfMemory { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::Erase { key: gen_key(ctx) }),
            |ctx| Ok(TreeOp::EraseFirst { key: gen_key(ctx) }),
            |ctx| {
                Ok(TreeOp::EraseRange {
                    from: gen_key(ctx),
                    to: gen_key(ctx),
                })
            },
            |ctx| {
                Ok(TreeOp::Pop {
                    back: ctx.rng().gen_bool(),
                })
            },
            |_| Ok(TreeOp::Clear),
            |_| Ok(TreeOp::CloneTree),
        ];

        let f = ctx.rng().choose(choices).unwrap();
        f(ctx)
    }
}

/// A sequence of tree test operations to perform.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct TreeOps {
    ops: Vec<TreeOp>,
}

impl DefaultMutate for TreeOps {
    type DefaultMutate = TreeOpsMutator;
}

#[derive(Default)]
pub struct TreeOpsMutator;

impl Mutate<TreeOps> for TreeOpsMutator {
    fn mutate(
        &mut self,
        c: &mut mutatis::Candidates<'_>,
        ops: &mut TreeOps,
    ) -> mutatis::Result<()> {
        m::default::<Vec<TreeOp>>().mutate(c, &mut ops.ops)?;

        // Retarget an operation to a key that some other operation uses.
        c.mutation(|ctx| {
            let keys: Vec<u8> = ops
                .ops
                .iter_mut()
                .filter_map(|op| op.key_mut().map(|k| *k))
                .collect();
            if let Some(i) = ctx.rng().gen_index(keys.len()) {
                let op_index = ctx.rng().gen_index(ops.ops.len()).unwrap();
                if let Some(key) = ops.ops[op_index].key_mut() {
                    *key = keys[i];
                }
            }
            Ok(())
        })?;

        // Insert a run of equal keys.
        if !c.shrink() {
            c.mutation(|ctx| {
                let key = gen_key(ctx);
                let n = 1 + ctx.rng().gen_index(8).unwrap();
                let at = ctx.rng().gen_index(ops.ops.len() + 1).unwrap();
                for _ in 0..n {
                    ops.ops.insert(at, TreeOp::InsertEqual { key });
                }
                Ok(())
            })?;
        }

        Ok(())
    }
}

impl TreeOps {
    /// Create a new `TreeOps` from the given test operations.
    pub fn new(ops: impl IntoIterator<Item = TreeOp>) -> Self {
        let ops = ops.into_iter().collect();
        TreeOps { ops }
    }

    /// Remove the last op, returning whether there was one.
    pub fn pop(&mut self) -> bool {
        self.ops.pop().is_some()
    }

    /// Run these test operations against a fresh tree allocating from a fresh
    /// pool, checking the tree against a model after every operation.
    pub fn run(&self) -> Result<(), String> {
        log::debug!("========== Running tree operations ==========");

        let system = CountingAllocator::new();
        {
            let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
            let mut tree: ModelTree<'_> = RbTree::new_in(&pool);
            let mut model = Model::new();
            let mut next_value = 0u32;

            for op in &self.ops {
                log::debug!("Running {op:?}");
                self.run_one(op, &system, &mut tree, &mut model, &mut next_value)?;
                check_against_model(&tree, &model)?;
            }

            drop(tree);
            log::debug!("pool stats after run: {:?}", pool.stats());
        }

        ensure!(
            system.live_bytes() == 0,
            "dropping the tree and pool leaked {} bytes",
            system.live_bytes()
        );
        Ok(())
    }

    fn run_one<'a>(
        &self,
        op: &TreeOp,
        system: &CountingAllocator,
        tree: &mut ModelTree<'a>,
        model: &mut Model,
        next_value: &mut u32,
    ) -> Result<(), String> {
        match *op {
            TreeOp::InsertUnique { key } => {
                let value = (key, *next_value);
                *next_value += 1;
                let (at, inserted) = {
                    let (cursor, inserted) = tree
                        .insert_unique(value)
                        .map_err(|_| format!("inserting {value:?} failed"))?;
                    (cursor.get().copied(), inserted)
                };
                match model.get(&key) {
                    Some(values) => {
                        ensure!(!inserted, "inserted duplicate key {key}");
                        // With equal keys present, the last of them is the
                        // one reported.
                        let last = values.back().map(|value| (key, *value));
                        ensure!(
                            at == last,
                            "duplicate insert returned {at:?}, not the existing element"
                        );
                    }
                    None => {
                        ensure!(inserted, "refused to insert new key {key}");
                        ensure!(at == Some(value), "insert returned {at:?}");
                        model.entry(key).or_default().push_back(value.1);
                    }
                }
            }

            TreeOp::InsertEqual { key } => {
                let value = (key, *next_value);
                *next_value += 1;
                let at = tree
                    .insert_equal(value)
                    .map_err(|_| format!("inserting {value:?} failed"))?
                    .get()
                    .copied();
                ensure!(at == Some(value), "insert returned {at:?}");
                model.entry(key).or_default().push_back(value.1);
            }

            TreeOp::InsertOutOfMemory { key } => {
                let value = (key, *next_value);
                *next_value += 1;
                system.set_failing(true);
                let result = tree.insert_equal(value).map(|cursor| cursor.get().copied());
                system.set_failing(false);
                match result {
                    // The pool still had a free block for the node.
                    Ok(at) => {
                        ensure!(at == Some(value), "insert returned {at:?}");
                        model.entry(key).or_default().push_back(value.1);
                    }
                    Err(_) => log::debug!("insert of {value:?} failed as expected"),
                }
            }

            TreeOp::Erase { key } => {
                let erased = tree.erase(&key);
                let expected = model.remove(&key).map_or(0, |values| values.len());
                ensure!(
                    erased == expected,
                    "erased {erased} elements with key {key}, expected {expected}"
                );
            }

            TreeOp::EraseFirst { key } => {
                let (removed, landed) = {
                    let mut cursor = tree.find_mut(&key);
                    let removed = cursor.remove_current();
                    (removed, cursor.get().copied())
                };
                let expected = pop_front(model, key);
                ensure!(
                    removed == expected,
                    "removed {removed:?}, expected {expected:?}"
                );
                if removed.is_some() {
                    let next = model.range(key..).next().map(|(k, values)| (*k, values[0]));
                    ensure!(
                        landed == next,
                        "cursor landed on {landed:?} after removal, expected {next:?}"
                    );
                }
            }

            TreeOp::EraseRange { from, to } => {
                // In order, erase through positions; reversed, erase the same
                // span by key.
                let (lo, hi) = (from.min(to), from.max(to));
                let erased = if from <= to {
                    let first = tree.lower_bound(&lo).position();
                    let last = tree.lower_bound(&hi).position();
                    // Safety: both positions were just taken from this tree,
                    // and the lower bound of `lo` never follows that of `hi`.
                    unsafe { tree.erase_range(first, last) }
                } else {
                    tree.erase_key_range(&lo, &hi)
                };
                let keys: Vec<u8> = model.range(lo..hi).map(|(key, _)| *key).collect();
                let expected: usize = keys
                    .iter()
                    .filter_map(|key| model.remove(key))
                    .map(|values| values.len())
                    .sum();
                ensure!(
                    erased == expected,
                    "erased {erased} elements in [{lo}, {hi}), expected {expected}"
                );
            }

            TreeOp::Pop { back } => {
                let (removed, expected) = if back {
                    let removed = tree.cursor_back_mut().remove_current();
                    let key = model.keys().next_back().copied();
                    let expected = key.and_then(|key| {
                        let values = model.get_mut(&key)?;
                        let value = values.pop_back()?;
                        if values.is_empty() {
                            model.remove(&key);
                        }
                        Some((key, value))
                    });
                    (removed, expected)
                } else {
                    let removed = tree.cursor_front_mut().remove_current();
                    let key = model.keys().next().copied();
                    (removed, key.and_then(|key| pop_front(model, key)))
                };
                ensure!(
                    removed == expected,
                    "popped {removed:?}, expected {expected:?}"
                );
            }

            TreeOp::Clear => {
                tree.clear();
                model.clear();
                ensure!(tree.cursor_front().is_end(), "cleared tree has a first element");
            }

            TreeOp::CloneTree => {
                let clone = tree
                    .try_clone()
                    .map_err(|_| "cloning the tree failed".to_string())?;
                ensure!(clone == *tree, "clone differs from the original");
                let original_height = tree.check_invariants().map_err(|v| v.to_string())?;
                let clone_height = clone.check_invariants().map_err(|v| v.to_string())?;
                ensure!(
                    original_height == clone_height,
                    "clone has black height {clone_height}, original {original_height}"
                );
                *tree = clone;
            }
        }
        Ok(())
    }
}

/// Remove and return the oldest value under `key`.
fn pop_front(model: &mut Model, key: u8) -> Option<(u8, u32)> {
    let values = model.get_mut(&key)?;
    let value = values.pop_front()?;
    if values.is_empty() {
        model.remove(&key);
    }
    Some((key, value))
}

fn check_against_model(tree: &ModelTree<'_>, model: &Model) -> Result<(), String> {
    if let Err(violation) = tree.check_invariants() {
        return Err(format!("invariant violated: {violation}"));
    }

    let expected_len: usize = model.values().map(|values| values.len()).sum();
    ensure!(
        tree.len() == expected_len,
        "tree has {} elements, model has {expected_len}",
        tree.len()
    );

    let expected = model
        .iter()
        .flat_map(|(key, values)| values.iter().map(move |value| (*key, *value)));
    ensure!(
        tree.iter().copied().eq(expected.clone()),
        "tree contents {tree:?} differ from model {model:?}"
    );
    ensure!(
        tree.iter().rev().copied().eq(expected.rev()),
        "reverse iteration differs from model"
    );

    for (key, values) in model {
        ensure!(
            tree.count(key) == values.len(),
            "count({key}) is {}, expected {}",
            tree.count(key),
            values.len()
        );
        let found = tree.find(key).get().copied();
        ensure!(
            found == Some((*key, values[0])),
            "find({key}) returned {found:?}"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XorShift;
    use mutatis::check::{Check, CheckError, CheckFailure};
    use rbpool::{
        rb_tree::{Greater, Identity, Position},
        AllocError,
    };

    #[test]
    fn run_tree_ops() {
        let _ = env_logger::try_init();

        let seed_corpus = [
            TreeOps::default(),
            TreeOps::new([5, 3, 8, 1, 4, 7, 9].map(|key| TreeOp::InsertUnique { key })),
            TreeOps::new([
                TreeOp::InsertEqual { key: 2 },
                TreeOp::InsertEqual { key: 2 },
                TreeOp::InsertEqual { key: 1 },
                TreeOp::InsertUnique { key: 2 },
                TreeOp::EraseFirst { key: 2 },
                TreeOp::CloneTree,
                TreeOp::Erase { key: 2 },
                TreeOp::Pop { back: false },
            ]),
            TreeOps::new([
                TreeOp::InsertEqual { key: 1 },
                TreeOp::InsertEqual { key: 4 },
                TreeOp::InsertEqual { key: 4 },
                TreeOp::InsertEqual { key: 6 },
                TreeOp::EraseRange { from: 2, to: 5 },
                TreeOp::EraseRange { from: 9, to: 0 },
            ]),
            TreeOps::new([
                TreeOp::InsertEqual { key: 9 },
                TreeOp::InsertOutOfMemory { key: 3 },
                TreeOp::Pop { back: true },
                TreeOp::Clear,
                TreeOp::InsertEqual { key: 0 },
            ]),
        ];

        match Check::new().iters(10_000).shrink_iters(1).run_with(
            m::default::<TreeOps>(),
            seed_corpus,
            |ops| ops.run(),
        ) {
            Ok(()) => {}
            Err(CheckError::Failed(CheckFailure { value, message, .. })) => {
                panic!("test failure: {message}: {value:#?}")
            }
            Err(e) => panic!("check error: {e}"),
        }
    }

    #[test]
    fn long_random_op_sequences() {
        let _ = env_logger::try_init();
        let mut rng = XorShift::new(0x5eed);
        for _ in 0..4 {
            let ops = (0..3000).map(|_| {
                let key = rng.below(NUM_GENERATED_KEYS as u64) as u8;
                match rng.below(100) {
                    0..=29 => TreeOp::InsertUnique { key },
                    30..=64 => TreeOp::InsertEqual { key },
                    65..=69 => TreeOp::InsertOutOfMemory { key },
                    70..=79 => TreeOp::EraseFirst { key },
                    80..=82 => TreeOp::Erase { key },
                    83..=84 => TreeOp::EraseRange {
                        from: key,
                        to: rng.below(NUM_GENERATED_KEYS as u64) as u8,
                    },
                    85..=94 => TreeOp::Pop {
                        back: rng.below(2) == 0,
                    },
                    95..=98 => TreeOp::CloneTree,
                    _ => TreeOp::Clear,
                }
            });
            let ops = TreeOps::new(ops.collect::<Vec<_>>());
            if let Err(message) = ops.run() {
                panic!("test failure: {message}");
            }
        }
    }

    #[test]
    fn erase_from_balanced_tree() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let mut tree = RbTree::<u32, Identity, Less, _>::new_in(&pool);

        for key in [5, 3, 8, 1, 4, 7, 9] {
            let (cursor, inserted) = tree.insert_unique(key).unwrap();
            assert!(inserted);
            assert_eq!(cursor.get(), Some(&key));
        }
        tree.check_invariants().unwrap();
        assert!(tree.iter().copied().eq([1, 3, 4, 5, 7, 8, 9]));

        assert_eq!(tree.erase(&5), 1);
        assert_eq!(tree.erase(&5), 0);
        tree.check_invariants().unwrap();
        assert!(tree.iter().copied().eq([1, 3, 4, 7, 8, 9]));
        assert_eq!(tree.first(), Some(&1));
        assert_eq!(tree.last(), Some(&9));
        assert_eq!(format!("{tree:?}"), "{1, 3, 4, 7, 8, 9}");
    }

    #[test]
    fn insert_unique_keeps_the_existing_element() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<(u32, &str), SelectFirst, Less, _>::new_in(&system);

        assert!(tree.insert_unique((7, "first")).unwrap().1);
        let (cursor, inserted) = tree.insert_unique((7, "second")).unwrap();
        assert!(!inserted);
        assert_eq!(cursor.get(), Some(&(7, "first")));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&7), Some(&(7, "first")));
        assert_eq!(system.allocations(), 1);

        assert_eq!(
            tree.insert_unique_iter([(1, "a"), (7, "b"), (9, "c"), (1, "d")]),
            Ok(2)
        );
        assert!(tree
            .iter()
            .copied()
            .eq([(1, "a"), (7, "first"), (9, "c")]));
    }

    #[test]
    fn bounds_and_ranges_with_duplicate_keys() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<(u32, char), SelectFirst, Less, _>::new_in(&system);
        tree.insert_equal_iter([(2, 'a'), (1, 'b'), (2, 'c'), (3, 'd'), (2, 'e')])
            .unwrap();
        tree.check_invariants().unwrap();

        assert_eq!(tree.count(&2), 3);
        assert_eq!(tree.count(&4), 0);
        assert!(tree.contains_key(&3));
        assert!(!tree.contains_key(&0));

        // Equal keys keep their insertion order.
        assert!(tree
            .equal_range_iter(&2)
            .copied()
            .eq([(2, 'a'), (2, 'c'), (2, 'e')]));

        let (mut lower, upper) = tree.equal_range(&2);
        assert_eq!(lower.get(), Some(&(2, 'a')));
        assert_eq!(upper.get(), Some(&(3, 'd')));
        assert_eq!(lower.peek_prev(), Some(&(1, 'b')));
        let mut seen = 0;
        while lower != upper {
            seen += 1;
            lower.move_next();
        }
        assert_eq!(seen, 3);

        assert_eq!(tree.find(&2).get(), Some(&(2, 'a')));
        assert_eq!(tree.lower_bound(&0).get(), Some(&(1, 'b')));
        assert_eq!(tree.upper_bound(&1).get(), Some(&(2, 'a')));
        assert!(tree.upper_bound(&3).is_end());
        assert!(tree.lower_bound(&4).is_end());
        assert!(tree.find(&4).is_end());
        assert_eq!(tree.find(&4), tree.cursor_end());

        // An empty range sits where the key would go.
        let (lower, upper) = tree.equal_range(&0);
        assert_eq!(lower, upper);
        assert_eq!(lower.get(), Some(&(1, 'b')));

        assert_eq!(tree.erase(&2), 3);
        assert!(tree.iter().copied().eq([(1, 'b'), (3, 'd')]));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn cursors_wrap_around_through_the_end() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<u32, Identity, Less, _>::new_in(&system);
        assert!(tree.cursor_front().is_end());
        assert_eq!(tree.cursor_front(), tree.cursor_end());

        tree.insert_equal_iter([1, 2, 3]).unwrap();

        let mut cursor = tree.cursor_back();
        assert_eq!(cursor.get(), Some(&3));
        assert_eq!(cursor.peek_next(), None);
        cursor.move_next();
        assert!(cursor.is_end());
        assert_eq!(cursor.peek_next(), Some(&1));
        assert_eq!(cursor.peek_prev(), Some(&3));
        cursor.move_next();
        assert_eq!(cursor.get(), Some(&1));

        let mut cursor = tree.cursor_front();
        cursor.move_prev();
        assert!(cursor.is_end());
        cursor.move_prev();
        assert_eq!(cursor.get(), Some(&3));
        cursor.move_prev();
        assert_eq!(cursor.get(), Some(&2));

        let mut cursor = tree.find_mut(&2);
        assert_eq!(cursor.remove_current(), Some(2));
        assert_eq!(cursor.get(), Some(&3));
        assert_eq!(cursor.remove_current(), Some(3));
        assert!(cursor.is_end());
        assert_eq!(cursor.remove_current(), None);
        assert_eq!(cursor.peek_prev(), Some(&1));
        assert!(tree.iter().copied().eq([1]));
    }

    #[test]
    fn positions_survive_other_erasures() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let mut tree = RbTree::<u32, Identity, Less, _>::new_in(&pool);

        let positions: Vec<Position<u32>> = (0..64)
            .map(|key| tree.insert_equal(key).unwrap().position())
            .collect();

        for key in (0..64).step_by(2) {
            assert_eq!(tree.erase(&key), 1);
        }
        tree.check_invariants().unwrap();

        for key in (1..64).step_by(2) {
            let pos = positions[key as usize];
            assert_eq!(unsafe { tree.get_at(pos) }, Some(&key));
        }

        let pos = positions[31];
        assert_eq!(unsafe { tree.erase_at(pos) }, Some(31));
        assert_eq!(unsafe { tree.get_at(positions[33]) }, Some(&33));
        assert_eq!(unsafe { tree.cursor_at(positions[29]) }.peek_next(), Some(&33));
        assert_eq!(unsafe { tree.erase_at(Position::end()) }, None);
        assert_eq!(tree.len(), 31);
        tree.check_invariants().unwrap();

        assert!(tree.cursor_end().position().is_end());
        assert_eq!(tree.cursor_end().position(), Position::end());
    }

    #[test]
    fn erase_ranges_between_positions_and_keys() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let mut tree = RbTree::<u32, Identity, Less, _>::new_in(&pool);
        tree.insert_equal_iter((0..40).map(|i| i / 2)).unwrap();

        // Keys 3 through 6, both copies of each.
        let first = tree.lower_bound(&3).position();
        let last = tree.lower_bound(&7).position();
        let kept = tree.find(&7).position();
        assert_eq!(unsafe { tree.erase_range(first, last) }, 8);
        tree.check_invariants().unwrap();
        assert_eq!(tree.len(), 32);
        assert_eq!(unsafe { tree.get_at(kept) }, Some(&7));
        assert_eq!(tree.upper_bound(&2).get(), Some(&7));

        // Empty spans erase nothing.
        assert_eq!(unsafe { tree.erase_range(kept, kept) }, 0);
        assert_eq!(
            unsafe { tree.erase_range(Position::end(), Position::end()) },
            0
        );
        assert_eq!(tree.erase_key_range(&12, &8), 0);
        assert_eq!(tree.erase_key_range(&4, &5), 0);

        assert_eq!(tree.erase_key_range(&0, &2), 4);
        assert_eq!(tree.erase_key_range(&15, &100), 10);
        assert!(tree.iter().copied().eq((2..3).chain(7..15).flat_map(|k| [k, k])));
        tree.check_invariants().unwrap();

        // Everything from the first element to the end.
        let first = tree.cursor_front().position();
        assert_eq!(unsafe { tree.erase_range(first, Position::end()) }, 18);
        assert!(tree.is_empty());
        tree.check_invariants().unwrap();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "position does not belong to this tree")]
    fn erasing_another_trees_position_panics() {
        let system = CountingAllocator::new();
        let mut a = RbTree::<u32, Identity, Less, _>::new_in(&system);
        let mut b = RbTree::<u32, Identity, Less, _>::new_in(&system);
        a.insert_unique(1).unwrap();
        let pos = b.insert_unique(2).unwrap().0.position();
        unsafe { a.erase_at(pos) };
    }

    #[test]
    fn try_clone_copies_shape_and_values() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let mut tree = RbTree::<u32, Identity, Less, _>::new_in(&pool);
        let mut rng = XorShift::new(7);
        for _ in 0..200 {
            tree.insert_equal(rng.below(50) as u32).unwrap();
        }

        let mut clone = tree.try_clone().unwrap();
        assert_eq!(clone, tree);
        assert_eq!(
            clone.check_invariants().unwrap(),
            tree.check_invariants().unwrap()
        );

        let len = tree.len();
        let removed = clone.erase(&10);
        assert_eq!(clone.len(), len - removed);
        assert_eq!(tree.len(), len);
        assert_eq!(tree.count(&10), removed);

        let empty = RbTree::<u32, Identity, Less, _>::new_in(&pool);
        assert!(empty.try_clone().unwrap().is_empty());
    }

    #[test]
    fn descending_and_custom_orderings() {
        let system = CountingAllocator::new();

        let mut tree = RbTree::<u32, Identity, Greater, _>::new_in(&system);
        tree.insert_unique_iter([3, 1, 2]).unwrap();
        assert!(tree.iter().copied().eq([3, 2, 1]));
        assert_eq!(tree.lower_bound(&2).get(), Some(&2));
        assert_eq!(tree.upper_bound(&2).get(), Some(&1));
        tree.check_invariants().unwrap();

        // Keys are equivalent when they share a last digit.
        let by_last_digit = |a: &u32, b: &u32| a % 10 < b % 10;
        let mut tree: RbTree<u32, Identity, _, _> = RbTree::with_compare_in(by_last_digit, &system);
        tree.insert_equal_iter([13, 2, 21, 5, 31]).unwrap();
        assert!(tree.iter().copied().eq([21, 31, 2, 13, 5]));
        assert_eq!(tree.count(&1), 2);
        // The existing element reported is the last equivalent one.
        assert_eq!(tree.insert_unique(41).unwrap().0.get(), Some(&31));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn failed_insert_leaves_tree_unchanged() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<(u32, u32), SelectFirst, Less, _>::new_in(&system);
        tree.insert_equal_iter([(1, 0), (2, 0), (3, 0)]).unwrap();

        system.set_failing(true);
        assert!(matches!(tree.insert_equal((2, 1)), Err(AllocError)));
        assert!(matches!(tree.insert_unique((4, 0)), Err(AllocError)));
        assert_eq!(tree.insert_equal_iter([(0, 0)]), Err(AllocError));
        assert!(tree.try_clone().is_err());

        // Finding an existing key needs no allocation.
        assert!(!tree.insert_unique((2, 1)).unwrap().1);

        assert!(tree.iter().copied().eq([(1, 0), (2, 0), (3, 0)]));
        tree.check_invariants().unwrap();
        system.set_failing(false);

        drop(tree);
        assert_eq!(system.live_bytes(), 0);
        assert_eq!(system.allocations(), system.deallocations());
    }

    #[test]
    fn into_iter_moves_values_out() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<(u32, String), SelectFirst, Less, _>::new_in(&system);
        for key in [4, 2, 6, 1, 3, 5, 7] {
            tree.insert_unique((key, key.to_string())).unwrap();
        }

        let mut iter = tree.into_iter();
        assert_eq!(iter.len(), 7);
        assert_eq!(iter.next_back(), Some((7, "7".to_string())));
        assert_eq!(iter.next(), Some((1, "1".to_string())));
        let middle: Vec<u32> = iter.by_ref().take(3).map(|(key, _)| key).collect();
        assert_eq!(middle, [2, 3, 4]);

        // Dropping a half-consumed iterator drops the rest.
        drop(iter);
        assert_eq!(system.live_bytes(), 0);
    }

    #[test]
    fn dropping_or_clearing_releases_every_node() {
        let system = CountingAllocator::new();
        let mut tree = RbTree::<String, Identity, Less, _>::new_in(&system);
        for i in 0..100 {
            tree.insert_equal(format!("{:03}", i % 37)).unwrap();
        }
        assert_eq!(system.allocations(), 100);

        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(system.deallocations(), 100);
        tree.check_invariants().unwrap();

        tree.insert_unique("again".to_string()).unwrap();
        drop(tree);
        assert_eq!(system.live_bytes(), 0);
        assert_eq!(system.allocations(), system.deallocations());
    }
}
