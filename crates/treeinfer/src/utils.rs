//! Common utilities used across the crate.
//!
//! Parallelism configuration and the thread pool setup used by every
//! prediction entry point.

use rayon::prelude::*;

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
///
/// Passed down from the predictor into the block driver and the explainers.
/// When `Parallel`, components may use `rayon` parallel iterators; when
/// `Sequential`, they must iterate on the calling thread.
///
/// The actual thread pool is set up at the predictor level via `n_threads`.
/// Components don't manage thread pools - they just respect this flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Create from thread count semantics.
    ///
    /// - 0 = auto (parallel if rayon pool has multiple threads, sequential otherwise)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Fallible for_each over disjoint mutable chunks with per-thread state.
    ///
    /// `f` receives the chunk index and the chunk. The `init` closure is called
    /// once per rayon job split (in parallel mode) or once total (in sequential
    /// mode), so scratch buffers are reused across chunks on the same thread.
    ///
    /// Stops at the first error in sequential mode; in parallel mode one of the
    /// errors is returned and the remaining chunks may or may not have run.
    #[inline]
    pub fn maybe_par_chunks_try_for_each_init<T, INIT, S, F, E>(
        self,
        data: &mut [T],
        chunk_size: usize,
        init: INIT,
        f: F,
    ) -> Result<(), E>
    where
        T: Send,
        INIT: Fn() -> S + Sync + Send,
        F: Fn(&mut S, (usize, &mut [T])) -> Result<(), E> + Sync + Send,
        E: Send,
    {
        debug_assert!(chunk_size > 0);
        if self.is_parallel() {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .try_for_each_init(init, f)
        } else {
            let mut state = init();
            data.chunks_mut(chunk_size)
                .enumerate()
                .try_for_each(|item| f(&mut state, item))
        }
    }
}

// =============================================================================
// Thread Pool Setup
// =============================================================================

/// Run a closure with the appropriate thread pool.
///
/// Thread count semantics:
/// - `0` = auto (use the current rayon pool)
/// - `1` = sequential (no thread pool)
/// - `n > 1` = use exactly `n` threads
///
/// If a dedicated pool cannot be created the closure runs on the current
/// pool instead.
///
/// # Example
///
/// ```
/// use treeinfer::{run_with_threads, Parallelism};
///
/// let result = run_with_threads(1, |parallelism| {
///     assert_eq!(parallelism, Parallelism::Sequential);
///     21 * 2
/// });
/// assert_eq!(result, 42);
/// ```
#[inline]
pub fn run_with_threads<T: Send>(n_threads: usize, f: impl FnOnce(Parallelism) -> T + Send) -> T {
    let parallelism = Parallelism::from_threads(n_threads);

    match parallelism {
        Parallelism::Sequential => f(Parallelism::Sequential),
        Parallelism::Parallel if n_threads == 0 => f(Parallelism::Parallel),
        Parallelism::Parallel => {
            match rayon::ThreadPoolBuilder::new().num_threads(n_threads).build() {
                Ok(pool) => pool.install(|| f(Parallelism::Parallel)),
                Err(err) => {
                    log::warn!("failed to build a {n_threads}-thread pool, using the global pool: {err}");
                    f(Parallelism::Parallel)
                }
            }
        }
    }
}
