//! Shared-memory communicator for running several workers as threads.

use std::sync::{Arc, Barrier, Mutex};

use super::{CollectiveError, Communicator};

#[derive(Debug)]
struct Shared {
    slots: Mutex<Vec<Vec<u8>>>,
    barrier: Barrier,
}

/// One worker's handle into a group of in-process workers.
///
/// Each handle is meant to be moved to its own thread. A collective
/// publishes the local buffer, waits for every worker, merges all
/// contributions, and waits again so no worker overwrites its slot while
/// another is still reading.
///
/// ```
/// use treeinfer::{Communicator, InMemoryCommunicator};
///
/// let group = InMemoryCommunicator::group(2);
/// let results: Vec<Vec<u8>> = std::thread::scope(|scope| {
///     let handles: Vec<_> = group
///         .into_iter()
///         .map(|comm| {
///             scope.spawn(move || {
///                 let mut buffer = vec![1u8 << comm.rank()];
///                 comm.allreduce_bitor(&mut buffer).unwrap();
///                 buffer
///             })
///         })
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).collect()
/// });
/// assert_eq!(results, vec![vec![0b11], vec![0b11]]);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCommunicator {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl InMemoryCommunicator {
    /// Create handles for a group of `world_size` workers, ordered by rank.
    pub fn group(world_size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(vec![Vec::new(); world_size]),
            barrier: Barrier::new(world_size),
        });
        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn merge(&self, buffer: &mut [u8]) -> Result<(), CollectiveError> {
        let slots = self
            .shared
            .slots
            .lock()
            .map_err(|_| CollectiveError::Disconnected)?;
        if let Some(other) = slots.iter().find(|slot| slot.len() != buffer.len()) {
            return Err(CollectiveError::PayloadLengthMismatch {
                expected: buffer.len(),
                actual: other.len(),
            });
        }
        buffer.fill(0);
        for slot in slots.iter() {
            for (out, &byte) in buffer.iter_mut().zip(slot) {
                *out |= byte;
            }
        }
        Ok(())
    }
}

impl Communicator for InMemoryCommunicator {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn allreduce_bitor(&self, buffer: &mut [u8]) -> Result<(), CollectiveError> {
        let published = match self.shared.slots.lock() {
            Ok(mut slots) => {
                slots[self.rank].clear();
                slots[self.rank].extend_from_slice(buffer);
                true
            }
            Err(_) => false,
        };
        // Every worker passes both barriers, even after a failed publish.
        self.shared.barrier.wait();
        let result = if published {
            self.merge(buffer)
        } else {
            Err(CollectiveError::Disconnected)
        };
        self.shared.barrier.wait();
        result
    }
}
