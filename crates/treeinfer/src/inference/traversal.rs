//! Row-parallel tree walking shared by every prediction mode.
//!
//! A single driver streams batches, splits each batch into blocks of rows,
//! and hands every (row, tree) pair to a [`TreeVisitor`]. Visitors decide what
//! a tree contributes to a row's output:
//!
//! - [`ScoreVisitor`]: add the (weighted) leaf value to the row's margins
//! - [`LeafIndexVisitor`]: record the leaf id
//! - SHAP visitors in [`crate::explainability::shap`]: distribute the leaf
//!   value over the features on the path
//!
//! Visitors that only need the reached leaf implement [`LeafSink`]; wrapped
//! in a [`LeafWalk`] they run here, and the column-split coordinator drives
//! them directly after reaching leaves through collective rounds.

use std::borrow::Cow;

use crate::data::{RowBuffer, RowSource};
use crate::error::PredictError;
use crate::repr::gbdt::{Forest, LeafValue, NodeId, TreeRange, TreeView};
use crate::utils::Parallelism;

// =============================================================================
// Visitor traits
// =============================================================================

/// What one tree contributes to one row's output.
pub(crate) trait TreeVisitor: Sync {
    /// Output element type.
    type Out: Copy + Send + Sync;
    /// Per-thread scratch space.
    type Scratch: Send;

    /// Output elements per row.
    fn stride(&self) -> usize;

    fn new_scratch(&self) -> Self::Scratch;

    /// Prepare a row's output before any tree is visited.
    fn init_row(&self, _row: usize, _out: &mut [Self::Out]) {}

    fn visit_tree(
        &self,
        tree_idx: usize,
        sample: &[f32],
        scratch: &mut Self::Scratch,
        out: &mut [Self::Out],
    ) -> Result<(), PredictError>;
}

/// A visitor that only cares about the leaf each row reaches.
pub(crate) trait LeafSink: Sync {
    type Leaf: LeafValue;
    type Out: Copy + Send + Sync;

    fn forest(&self) -> &Forest<Self::Leaf>;

    fn stride(&self) -> usize;

    fn init_row(&self, _row: usize, _out: &mut [Self::Out]) {}

    fn on_leaf(&self, tree_idx: usize, leaf: NodeId, out: &mut [Self::Out]);
}

/// Drives a [`LeafSink`] by walking each tree down to its leaf.
#[derive(Debug)]
pub(crate) struct LeafWalk<'v, S>(pub &'v S);

impl<S: LeafSink> TreeVisitor for LeafWalk<'_, S> {
    type Out = S::Out;
    type Scratch = ();

    #[inline]
    fn stride(&self) -> usize {
        self.0.stride()
    }

    fn new_scratch(&self) {}

    #[inline]
    fn init_row(&self, row: usize, out: &mut [S::Out]) {
        self.0.init_row(row, out)
    }

    #[inline]
    fn visit_tree(
        &self,
        tree_idx: usize,
        sample: &[f32],
        _scratch: &mut (),
        out: &mut [S::Out],
    ) -> Result<(), PredictError> {
        let leaf = self
            .0
            .forest()
            .tree(tree_idx)
            .traverse_to_leaf(sample)
            .map_err(|e| e.in_tree(tree_idx))?;
        self.0.on_leaf(tree_idx, leaf, out);
        Ok(())
    }
}

// =============================================================================
// Score and leaf-index visitors
// =============================================================================

/// Initial margins written before the first tree.
#[derive(Debug, Clone)]
pub(crate) enum MarginInit<'a> {
    /// Leave the output untouched (incremental cache updates).
    Keep,
    /// Every row starts from the forest's base score.
    BaseScore,
    /// Row-major `n_rows x n_groups` per-row margins.
    PerRow(Cow<'a, [f32]>),
}

impl MarginInit<'_> {
    /// Initial margin of one row and group; zero when kept.
    #[inline]
    pub(crate) fn value(&self, base_score: &[f32], row: usize, group: usize) -> f32 {
        match self {
            MarginInit::Keep => 0.0,
            MarginInit::BaseScore => base_score[group],
            MarginInit::PerRow(margins) => margins[row * base_score.len() + group],
        }
    }

    /// Write the initial margins of `row` into `out`.
    #[inline]
    pub(crate) fn apply(&self, base_score: &[f32], row: usize, out: &mut [f32]) {
        match self {
            MarginInit::Keep => {}
            MarginInit::BaseScore => out.copy_from_slice(base_score),
            MarginInit::PerRow(margins) => {
                let n_groups = out.len();
                out.copy_from_slice(&margins[row * n_groups..(row + 1) * n_groups]);
            }
        }
    }
}

/// Accumulates weighted leaf values into per-group margins.
#[derive(Debug)]
pub(crate) struct ScoreVisitor<'a, L: LeafValue> {
    forest: &'a Forest<L>,
    init: MarginInit<'a>,
}

impl<'a, L: LeafValue> ScoreVisitor<'a, L> {
    pub(crate) fn new(forest: &'a Forest<L>, init: MarginInit<'a>) -> Self {
        Self { forest, init }
    }
}

impl<L: LeafValue> LeafSink for ScoreVisitor<'_, L> {
    type Leaf = L;
    type Out = f32;

    #[inline]
    fn forest(&self) -> &Forest<L> {
        self.forest
    }

    #[inline]
    fn stride(&self) -> usize {
        self.forest.n_groups() as usize
    }

    #[inline]
    fn init_row(&self, row: usize, out: &mut [f32]) {
        self.init.apply(self.forest.base_score(), row, out);
    }

    #[inline]
    fn on_leaf(&self, tree_idx: usize, leaf: NodeId, out: &mut [f32]) {
        let weight = self.forest.tree_weight(tree_idx);
        let offset = self.forest.output_offset(tree_idx);
        let values = self.forest.tree(tree_idx).leaf_value(leaf).values();
        for (slot, &v) in out[offset..offset + values.len()].iter_mut().zip(values) {
            *slot += weight * v;
        }
    }
}

/// Records the leaf id reached in every tree of a range.
#[derive(Debug)]
pub(crate) struct LeafIndexVisitor<'a, L: LeafValue> {
    forest: &'a Forest<L>,
    range: TreeRange,
}

impl<'a, L: LeafValue> LeafIndexVisitor<'a, L> {
    pub(crate) fn new(forest: &'a Forest<L>, range: TreeRange) -> Self {
        Self { forest, range }
    }
}

impl<L: LeafValue> LeafSink for LeafIndexVisitor<'_, L> {
    type Leaf = L;
    type Out = u32;

    #[inline]
    fn forest(&self) -> &Forest<L> {
        self.forest
    }

    #[inline]
    fn stride(&self) -> usize {
        self.range.len()
    }

    #[inline]
    fn on_leaf(&self, tree_idx: usize, leaf: NodeId, out: &mut [u32]) {
        out[tree_idx - self.range.begin] = leaf;
    }
}

// =============================================================================
// Block driver
// =============================================================================

/// Shared settings of one driver run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockPlan {
    pub range: TreeRange,
    /// Width of the dense row buffer (max of data and model features).
    pub n_features: usize,
    pub block_size: usize,
    pub parallelism: Parallelism,
}

/// Visit every row of `data` with every tree of `plan.range`.
///
/// `output` holds `visitor.stride()` elements per row, rows in dataset order.
/// Blocks of rows are processed in parallel; within a row, trees are visited
/// in ensemble order so results do not depend on the thread count.
pub(crate) fn visit_rows<V, D>(
    data: &D,
    visitor: &V,
    plan: BlockPlan,
    output: &mut [V::Out],
) -> Result<(), PredictError>
where
    V: TreeVisitor,
    D: RowSource + ?Sized,
{
    let stride = visitor.stride();
    let expected = data.info().n_rows * stride;
    if output.len() != expected {
        return Err(PredictError::OutputShape {
            expected,
            actual: output.len(),
        });
    }
    if stride == 0 {
        return Ok(());
    }

    data.for_each_batch(&mut |first_row, batch| {
        let n_rows = batch.n_rows();
        let batch_out = &mut output[first_row * stride..(first_row + n_rows) * stride];

        plan.parallelism.maybe_par_chunks_try_for_each_init(
            batch_out,
            plan.block_size * stride,
            || (RowBuffer::new(plan.n_features), visitor.new_scratch()),
            |state: &mut (RowBuffer, V::Scratch), (block_idx, block_out): (usize, &mut [V::Out])| {
                let (buffer, scratch) = state;
                let block_start = block_idx * plan.block_size;
                for (i, row_out) in block_out.chunks_mut(stride).enumerate() {
                    let row = block_start + i;
                    visitor.init_row(first_row + row, row_out);
                    let sample = batch.row(row, buffer);
                    for tree_idx in plan.range.iter() {
                        visitor.visit_tree(tree_idx, sample, scratch, row_out)?;
                    }
                }
                Ok(())
            },
        )
    })
}
