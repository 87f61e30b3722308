//! Categorical split storage for tree nodes.
//!
//! Each categorical node stores two packed bitsets: the categories routed
//! left and the categories routed right. A category found in neither set is
//! unknown to the split and cannot be routed.

use super::node::Direction;
use super::NodeId;

/// Largest category index that survives a round trip through `f32`.
const MAX_CATEGORY: f32 = (1u32 << 24) as f32;

/// `(start, size)` of one bitset inside the flat word array.
type Segment = (u32, u32);

// =============================================================================
// CategoriesStorage
// =============================================================================

/// Storage for categorical split bitsets in a tree.
///
/// # Format
///
/// - `words`: flat array of u32 bitset words for all nodes and both sides
/// - `segments`: per-node `[left, right]` segments into `words`
///
/// # Decision Rule
///
/// For a categorical split on a node with category `c`:
/// - bit `c` set in the right bitset → go RIGHT
/// - bit `c` set in the left bitset → go LEFT
/// - neither → unknown category (see [`CategoriesStorage::route`])
/// - feature value is NaN → default direction, decided before this lookup
#[derive(Debug, Clone, Default)]
pub struct CategoriesStorage {
    words: Box<[u32]>,
    segments: Box<[[Segment; 2]]>,
}

impl CategoriesStorage {
    /// Create empty categories storage.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Route a category at a node.
    ///
    /// Returns `None` when the category belongs to neither side.
    #[inline]
    pub fn route(&self, node: NodeId, category: u32) -> Option<Direction> {
        let [left, right] = *self.segments.get(node as usize)?;
        if self.contains(right, category) {
            Some(Direction::Right)
        } else if self.contains(left, category) {
            Some(Direction::Left)
        } else {
            None
        }
    }

    #[inline]
    fn contains(&self, (start, size): Segment, category: u32) -> bool {
        let word_idx = category >> 5;
        if word_idx >= size {
            return false;
        }
        let word = self.words[(start + word_idx) as usize];
        (word >> (category & 31)) & 1 != 0
    }

    /// Whether this storage has any categorical data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of per-node segments (equals the node count when non-empty).
    #[inline]
    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    /// Bitset words of the left set at a node.
    pub fn left_bitset(&self, node: NodeId) -> &[u32] {
        self.bitset(node, 0)
    }

    /// Bitset words of the right set at a node.
    pub fn right_bitset(&self, node: NodeId) -> &[u32] {
        self.bitset(node, 1)
    }

    fn bitset(&self, node: NodeId, side: usize) -> &[u32] {
        match self.segments.get(node as usize) {
            Some(segments) => {
                let (start, size) = segments[side];
                &self.words[start as usize..(start + size) as usize]
            }
            None => &[],
        }
    }
}

// =============================================================================
// CategoriesBuilder
// =============================================================================

/// Incremental builder for [`CategoriesStorage`].
#[derive(Debug, Clone, Default)]
pub struct CategoriesBuilder {
    words: Vec<u32>,
    nodes: Vec<(NodeId, [Segment; 2])>,
}

impl CategoriesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the left and right category sets of a node.
    pub fn push(&mut self, node: NodeId, left: &[u32], right: &[u32]) {
        let left = self.append(&categories_to_bitset(left));
        let right = self.append(&categories_to_bitset(right));
        self.nodes.push((node, [left, right]));
    }

    fn append(&mut self, bitset: &[u32]) -> Segment {
        let start = self.words.len() as u32;
        self.words.extend_from_slice(bitset);
        (start, bitset.len() as u32)
    }

    /// Finish into storage indexed by node for a tree of `n_nodes` nodes.
    ///
    /// Returns empty storage when no categorical node was registered.
    pub fn build(self, n_nodes: usize) -> CategoriesStorage {
        if self.nodes.is_empty() {
            return CategoriesStorage::empty();
        }
        let mut segments = vec![[(0, 0); 2]; n_nodes];
        for (node, segment) in self.nodes {
            if let Some(slot) = segments.get_mut(node as usize) {
                *slot = segment;
            }
        }
        CategoriesStorage {
            words: self.words.into_boxed_slice(),
            segments: segments.into_boxed_slice(),
        }
    }
}

// =============================================================================
// Bitset Utilities
// =============================================================================

/// Convert a feature value to a category index.
///
/// Categorical features are stored as floats holding integer category
/// indices; fractional parts are truncated. Returns `None` for negative,
/// non-finite, or too large values.
#[inline]
pub fn float_to_category(value: f32) -> Option<u32> {
    if !value.is_finite() || value < 0.0 || value >= MAX_CATEGORY {
        return None;
    }
    Some(value as u32)
}

/// Build a packed u32 bitset from a list of category values.
///
/// Categories 0-31 land in word 0, 32-63 in word 1, and so on; within each
/// word bit `i` stands for category `word_index * 32 + i`.
pub fn categories_to_bitset(categories: &[u32]) -> Vec<u32> {
    let Some(max_cat) = categories.iter().copied().max() else {
        return vec![];
    };

    let mut bitset = vec![0u32; ((max_cat >> 5) + 1) as usize];
    for &cat in categories {
        bitset[(cat >> 5) as usize] |= 1u32 << (cat & 31);
    }
    bitset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> CategoriesStorage {
        let mut builder = CategoriesBuilder::new();
        builder.push(0, &[0, 2], &[1, 3, 40]);
        builder.build(3)
    }

    #[test]
    fn empty_builder_yields_empty_storage() {
        let storage = CategoriesBuilder::new().build(5);
        assert!(storage.is_empty());
        assert_eq!(storage.route(0, 1), None);
    }

    #[test]
    fn routes_known_categories() {
        let storage = storage();
        assert_eq!(storage.route(0, 0), Some(Direction::Left));
        assert_eq!(storage.route(0, 2), Some(Direction::Left));
        assert_eq!(storage.route(0, 1), Some(Direction::Right));
        assert_eq!(storage.route(0, 40), Some(Direction::Right));
    }

    #[test]
    fn unknown_category_has_no_route() {
        let storage = storage();
        assert_eq!(storage.route(0, 4), None);
        assert_eq!(storage.route(0, 1000), None);
        // Nodes without categorical data route nothing.
        assert_eq!(storage.route(1, 0), None);
    }

    #[test]
    fn bitsets_per_side() {
        let storage = storage();
        assert_eq!(storage.left_bitset(0), &[0b101]);
        assert_eq!(storage.right_bitset(0), &[0b1010, 1 << 8]);
        assert!(storage.left_bitset(2).is_empty());
    }

    #[test]
    fn float_to_category_rules() {
        assert_eq!(float_to_category(3.0), Some(3));
        assert_eq!(float_to_category(3.7), Some(3));
        assert_eq!(float_to_category(-1.0), None);
        assert_eq!(float_to_category(f32::INFINITY), None);
        assert_eq!(float_to_category(1e9), None);
    }

    #[test]
    fn bitset_spans_words() {
        assert_eq!(categories_to_bitset(&[]), Vec::<u32>::new());
        assert_eq!(categories_to_bitset(&[1, 3, 5]), vec![0b101010]);
        assert_eq!(categories_to_bitset(&[0, 33]), vec![1, 2]);
    }
}
