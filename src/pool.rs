//! Bounded worker pool used by the parallel analysis stages.
//!
//! Every stage follows the same shape: preallocate the output, let the pool's
//! workers pull indices and write into disjoint slots, then return once all
//! of them have joined. Work items are pure functions of their index, so the
//! order in which workers pick them up never changes the result.

use std::num::NonZeroUsize;

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::error::{AnalysisError, AnalysisResult};

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    /// Builds a pool with `threads` workers; `0` means available parallelism.
    pub fn new(threads: usize) -> AnalysisResult<Self> {
        let threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            threads
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("wavetrace-worker-{}", i))
            .build()
            .map_err(|e| AnalysisError::InvalidParameters(format!("worker pool: {}", e)))?;

        log::debug!("Worker pool ready with {} threads", threads);
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `f(scratch, index, slot)` for every slot of `out`, with
    /// per-worker scratch state built by `init`.
    ///
    /// The cancel token is checked before each item; the first error (or
    /// cancellation) stops the remaining items and is returned after the join.
    pub fn fill_with<T, S, I, F>(
        &self,
        out: &mut [T],
        cancel: &CancelToken,
        init: I,
        f: F,
    ) -> AnalysisResult<()>
    where
        T: Send,
        I: Fn() -> S + Sync + Send,
        F: Fn(&mut S, usize, &mut T) -> AnalysisResult<()> + Sync + Send,
    {
        self.pool.install(|| {
            out.par_iter_mut()
                .enumerate()
                .try_for_each_init(init, |scratch, (i, slot)| {
                    cancel.check()?;
                    f(scratch, i, slot)
                })
        })
    }

    /// Splits `out` into one contiguous chunk per worker and runs
    /// `f(chunk_start, chunk)` on each.
    pub fn fill_chunks<T, F>(&self, out: &mut [T], cancel: &CancelToken, f: F) -> AnalysisResult<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> AnalysisResult<()> + Sync,
    {
        if out.is_empty() {
            return Ok(());
        }
        let chunk_len = self.chunk_len(out.len());
        self.fill_chunks_of(out, chunk_len, cancel, f)
    }

    /// Like [`fill_chunks`](Self::fill_chunks) with an explicit chunk length.
    pub fn fill_chunks_of<T, F>(
        &self,
        out: &mut [T],
        chunk_len: usize,
        cancel: &CancelToken,
        f: F,
    ) -> AnalysisResult<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> AnalysisResult<()> + Sync,
    {
        let chunk_len = chunk_len.max(1);
        self.pool.install(|| {
            out.par_chunks_mut(chunk_len)
                .enumerate()
                .try_for_each(|(ci, chunk)| {
                    cancel.check()?;
                    f(ci * chunk_len, chunk)
                })
        })
    }

    /// Chunk length that gives each worker one contiguous share of `len` items.
    pub fn chunk_len(&self, len: usize) -> usize {
        ((len + self.threads - 1) / self.threads).max(1)
    }
}
