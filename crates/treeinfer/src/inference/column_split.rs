//! Column-split traversal.
//!
//! Each worker holds the columns it owns (`feature % world_size == rank`).
//! Trees are walked level by level over a whole batch: every worker decides
//! the rows paused at nodes whose feature it owns, the decisions are merged
//! with a bitwise-OR allreduce, and every worker advances every row with the
//! merged result. Positions are identical on all workers after each round,
//! so every worker issues the same sequence of collectives.

use crate::collective::{CollectiveError, Communicator};
use crate::data::{DataSplit, RowBuffer, RowSource};
use crate::error::PredictError;
use crate::repr::gbdt::{Direction, NodeId, Tree, TreeView};

use super::traversal::{BlockPlan, LeafSink};

/// Decision bits exchanged per row and round.
mod bits {
    pub const LEFT: u8 = 1;
    pub const RIGHT: u8 = 2;
    pub const INVALID: u8 = 4;
}

/// Check that the dataset partition matches the communicator.
pub(crate) fn check_partition(split: DataSplit, comm: &dyn Communicator) -> Result<(), CollectiveError> {
    let (rank, world_size) = match split {
        DataSplit::Row => (0, 1),
        DataSplit::Column { rank, world_size } => (rank, world_size),
    };
    if world_size != comm.world_size() {
        return Err(CollectiveError::WorldSizeMismatch {
            data: world_size,
            communicator: comm.world_size(),
        });
    }
    if rank != comm.rank() {
        return Err(CollectiveError::RankMismatch {
            data: rank,
            communicator: comm.rank(),
        });
    }
    Ok(())
}

/// Column-split counterpart of [`visit_rows`](super::traversal::visit_rows).
///
/// Every worker of `comm` must call this with the same rows, forest and
/// tree range. The per-row output is the same on every worker.
pub(crate) fn visit_rows_column_split<V, D>(
    data: &D,
    comm: &dyn Communicator,
    visitor: &V,
    plan: BlockPlan,
    output: &mut [V::Out],
) -> Result<(), PredictError>
where
    V: LeafSink,
    D: RowSource + ?Sized,
{
    let info = data.info();
    check_partition(info.data_split, comm)?;

    let stride = visitor.stride();
    let expected = info.n_rows * stride;
    if output.len() != expected {
        return Err(PredictError::OutputShape {
            expected,
            actual: output.len(),
        });
    }
    if stride == 0 {
        return Ok(());
    }

    let split = info.data_split;
    let width = split.owned_features(plan.n_features).count().max(1);
    let block_size = plan.block_size;
    let parallelism = plan.parallelism;

    data.for_each_batch(&mut |first_row, batch| {
        let n_rows = batch.n_rows();
        let batch_out = &mut output[first_row * stride..(first_row + n_rows) * stride];

        // Pages are consumed once, so the owned columns are packed up front,
        // feature `f` at `split.local_index(f)`.
        let mut owned = vec![f32::NAN; n_rows * width];
        parallelism.maybe_par_chunks_try_for_each_init(
            &mut owned,
            width,
            || RowBuffer::new(plan.n_features),
            |buffer: &mut RowBuffer, (row, dst): (usize, &mut [f32])| {
                let src = batch.row(row, buffer);
                for (slot, feature) in dst.iter_mut().zip(split.owned_features(plan.n_features)) {
                    *slot = src.get(feature).copied().unwrap_or(f32::NAN);
                }
                Ok::<(), PredictError>(())
            },
        )?;

        for (row, row_out) in batch_out.chunks_mut(stride).enumerate() {
            visitor.init_row(first_row + row, row_out);
        }

        let mut positions: Vec<NodeId> = vec![0; n_rows];
        let mut decisions = vec![0u8; n_rows];

        for tree_idx in plan.range.iter() {
            let tree = visitor.forest().tree(tree_idx);
            positions.fill(0);

            let mut round = 0usize;
            while positions.iter().any(|&node| !tree.is_leaf(node)) {
                parallelism.maybe_par_chunks_try_for_each_init(
                    &mut decisions,
                    block_size,
                    || (),
                    |_: &mut (), (block_idx, chunk): (usize, &mut [u8])| {
                        let start = block_idx * block_size;
                        for (i, slot) in chunk.iter_mut().enumerate() {
                            let row = start + i;
                            *slot = local_decision(tree, split, positions[row], &owned[row * width..(row + 1) * width]);
                        }
                        Ok::<(), PredictError>(())
                    },
                )?;

                comm.allreduce_bitor(&mut decisions)?;
                log::trace!("tree {tree_idx}: column-split round {round} over {n_rows} rows");
                round += 1;

                for (row, (node, &decision)) in positions.iter_mut().zip(&decisions).enumerate() {
                    if tree.is_leaf(*node) {
                        continue;
                    }
                    let current = *node;
                    *node = advance(tree, current, decision).map_err(|err| match err {
                        Stuck::Conflict => PredictError::Collective(CollectiveError::ConflictingDecision {
                            tree_idx,
                            row: first_row + row,
                        }),
                        Stuck::Invalid => {
                            let feature = tree.split_index(current);
                            let value = owned_value(split, &owned[row * width..(row + 1) * width], feature as usize);
                            PredictError::UnknownCategory {
                                tree_idx,
                                node: current,
                                feature,
                                value,
                            }
                        }
                    })?;
                }
            }

            for (row_out, &leaf) in batch_out.chunks_mut(stride).zip(&positions) {
                visitor.on_leaf(tree_idx, leaf, row_out);
            }
        }

        log::debug!("column-split batch at row {first_row}: {n_rows} rows, {} trees", plan.range.len());
        Ok(())
    })
}

/// Value of `feature` in a packed row of owned columns; `NaN` if not owned.
#[inline]
fn owned_value(split: DataSplit, row: &[f32], feature: usize) -> f32 {
    if !split.owns(feature) {
        return f32::NAN;
    }
    row.get(split.local_index(feature)).copied().unwrap_or(f32::NAN)
}

/// This worker's decision bits for one row paused at `node`.
#[inline]
fn local_decision<T: TreeView>(tree: &T, split: DataSplit, node: NodeId, row: &[f32]) -> u8 {
    if tree.is_leaf(node) {
        return 0;
    }
    let feature = tree.split_index(node) as usize;
    if !split.owns(feature) {
        return 0;
    }
    let value = owned_value(split, row, feature);
    match tree.decide(node, value) {
        Ok(Direction::Left) => bits::LEFT,
        Ok(Direction::Right) => bits::RIGHT,
        Err(_) => bits::INVALID,
    }
}

enum Stuck {
    Conflict,
    Invalid,
}

#[inline]
fn advance<L: crate::repr::gbdt::LeafValue>(tree: &Tree<L>, node: NodeId, decision: u8) -> Result<NodeId, Stuck> {
    if decision & bits::INVALID != 0 {
        return Err(Stuck::Invalid);
    }
    match decision {
        0 => Ok(tree.default_child(node)),
        bits::LEFT => Ok(tree.left_child(node)),
        bits::RIGHT => Ok(tree.right_child(node)),
        _ => Err(Stuck::Conflict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::LocalCommunicator;
    use crate::data::Dataset;
    use crate::inference::traversal::{visit_rows, LeafWalk, MarginInit, ScoreVisitor};
    use crate::repr::gbdt::{Forest, ScalarLeaf, TreeRange};
    use crate::testing::run_with_communicators;
    use crate::utils::Parallelism;
    use ndarray::array;

    fn forest() -> Forest<ScalarLeaf> {
        let mut forest = Forest::for_regression().with_base_score(vec![0.0]);
        forest.push_tree(
            crate::scalar_tree! {
                0 => num(0, 0.5, L) -> 1, 2,
                1 => num(1, 0.5, R) -> 3, 4,
                2 => leaf(3.0),
                3 => leaf(1.0),
                4 => leaf(2.0),
            },
            0,
        );
        forest
    }

    fn plan(n_features: usize) -> BlockPlan {
        BlockPlan {
            range: TreeRange::new(0, 1),
            n_features,
            block_size: 2,
            parallelism: Parallelism::Sequential,
        }
    }

    #[test]
    fn partition_must_match_communicator() {
        let err = check_partition(DataSplit::Column { rank: 0, world_size: 2 }, &LocalCommunicator).unwrap_err();
        assert_eq!(
            err,
            CollectiveError::WorldSizeMismatch {
                data: 2,
                communicator: 1
            }
        );
        assert!(check_partition(DataSplit::Row, &LocalCommunicator).is_ok());
    }

    #[test]
    fn merged_decisions() {
        let tree = forest().tree(0).clone();
        assert_eq!(advance(&tree, 0, 0).ok(), Some(1));
        assert_eq!(advance(&tree, 0, bits::RIGHT).ok(), Some(2));
        assert!(matches!(advance(&tree, 0, bits::LEFT | bits::RIGHT), Err(Stuck::Conflict)));
        assert!(matches!(advance(&tree, 0, bits::INVALID | bits::LEFT), Err(Stuck::Invalid)));
    }

    #[test]
    fn workers_keep_only_owned_columns() {
        let split = DataSplit::Column { rank: 1, world_size: 3 };
        // features 1 and 4 of a 6-feature row
        let packed = [0.25f32, f32::NAN];
        assert_eq!(owned_value(split, &packed, 1), 0.25);
        assert!(owned_value(split, &packed, 4).is_nan());
        assert!(owned_value(split, &packed, 2).is_nan());

        let tree = forest().tree(0).clone();
        let split = DataSplit::Column { rank: 1, world_size: 2 };
        assert_eq!(local_decision(&tree, split, 0, &[0.9]), 0);
        assert_eq!(local_decision(&tree, split, 1, &[0.9]), bits::RIGHT);
        assert_eq!(local_decision(&tree, split, 1, &[0.1]), bits::LEFT);
    }

    #[test]
    fn two_workers_match_single_worker() {
        let forest = forest();
        let full = Dataset::from_dense(array![[0.2f32, 0.7], [0.9, 0.1], [f32::NAN, 0.2], [0.1, f32::NAN]]);
        let visitor = ScoreVisitor::new(&forest, MarginInit::BaseScore);

        let mut expected = vec![0.0; 4];
        visit_rows(&full, &LeafWalk(&visitor), plan(2), &mut expected).unwrap();
        assert_eq!(expected, vec![2.0, 3.0, 1.0, 2.0]);

        let results = run_with_communicators(2, |comm| {
            let local = full.slice_columns(2, comm.rank()).unwrap();
            let mut out = vec![0.0; 4];
            visit_rows_column_split(&local, &comm, &visitor, plan(2), &mut out).map(|_| out)
        });

        for result in results {
            assert_eq!(result.unwrap(), expected);
        }
    }
}
