//! Collective communication between column-split workers.
//!
//! Column-split prediction needs a single primitive: an element-wise
//! bitwise-OR allreduce over a byte buffer. Every worker contributes a
//! buffer of the same length and every worker receives the merged result.

use std::fmt;

mod memory;

pub use memory::InMemoryCommunicator;

/// Errors raised by collective operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectiveError {
    /// The dataset was partitioned for a different number of workers.
    #[error("data is split across {data} workers but the communicator has {communicator}")]
    WorldSizeMismatch { data: usize, communicator: usize },
    #[error("data belongs to rank {data} but the communicator is rank {communicator}")]
    RankMismatch { data: usize, communicator: usize },
    /// Workers contributed buffers of different lengths.
    #[error("payload length mismatch: {expected} bytes here, {actual} bytes on another worker")]
    PayloadLengthMismatch { expected: usize, actual: usize },
    /// Two workers claimed different branches for the same row and node.
    #[error("conflicting branch decisions in tree {tree_idx} for row {row}")]
    ConflictingDecision { tree_idx: usize, row: usize },
    #[error("communicator disconnected")]
    Disconnected,
}

/// A group of workers that can run collective operations.
///
/// All workers of a group must call the same collectives in the same order
/// with buffers of the same length. A worker that stops participating stalls
/// the others.
pub trait Communicator: fmt::Debug + Send + Sync {
    fn world_size(&self) -> usize;

    fn rank(&self) -> usize;

    /// In-place element-wise bitwise OR across all workers.
    fn allreduce_bitor(&self, buffer: &mut [u8]) -> Result<(), CollectiveError>;
}

/// Single-worker communicator; every collective is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn allreduce_bitor(&self, _buffer: &mut [u8]) -> Result<(), CollectiveError> {
        Ok(())
    }
}
