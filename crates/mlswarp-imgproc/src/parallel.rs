use rayon::prelude::*;
use thiserror::Error;

/// Errors that can occur during parallel execution.
#[derive(Error, Debug, PartialEq)]
pub enum ParallelError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),

    /// The row stride must be valid.
    #[error("row stride must be > 0, got {0}")]
    InvalidRowStride(usize),
}

/// Controls how row-parallel operations are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Use the global Rayon thread pool to process rows in parallel.
    #[default]
    ParallelRows,

    /// Run sequentially on the current thread.
    ///
    /// Useful for small images, debugging, or when the overhead of parallelization
    /// outweighs the benefits.
    Serial,

    /// Run on a local thread pool with `n` threads.
    ///
    /// # Warning
    /// Creates a new thread pool on every call, which has significant overhead.
    Fixed(usize),
}

/// Apply a fallible function to every row of an interleaved buffer.
///
/// Rows are independent: `f` receives the row index and the mutable row slice.
/// The first error returned by `f` aborts the remaining work and is propagated.
///
/// # Arguments
///
/// * `data` - The buffer, a whole number of rows long.
/// * `row_stride` - Number of elements in a row (width * channels).
/// * `strategy` - The execution strategy.
/// * `f` - The operation to run on each row.
///
/// # Example
///
/// ```
/// use mlswarp_imgproc::parallel::{par_try_for_each_row, ExecutionStrategy, ParallelError};
///
/// let mut data = vec![0usize; 6];
/// par_try_for_each_row(&mut data, 3, ExecutionStrategy::ParallelRows, |row, values| {
///     values.iter_mut().for_each(|v| *v = row);
///     Ok::<(), ParallelError>(())
/// })
/// .unwrap();
/// assert_eq!(data, vec![0, 0, 0, 1, 1, 1]);
/// ```
pub fn par_try_for_each_row<T, E, F>(
    data: &mut [T],
    row_stride: usize,
    strategy: ExecutionStrategy,
    f: F,
) -> Result<(), E>
where
    T: Send,
    E: Send + From<ParallelError>,
    F: Fn(usize, &mut [T]) -> Result<(), E> + Send + Sync,
{
    if row_stride == 0 {
        return Err(ParallelError::InvalidRowStride(row_stride).into());
    }

    match strategy {
        ExecutionStrategy::Serial => data
            .chunks_exact_mut(row_stride)
            .enumerate()
            .try_for_each(|(row, values)| f(row, values)),
        ExecutionStrategy::ParallelRows => data
            .par_chunks_exact_mut(row_stride)
            .enumerate()
            .try_for_each(|(row, values)| f(row, values)),
        ExecutionStrategy::Fixed(n) => {
            if n == 0 {
                return Err(ParallelError::InvalidThreadCount(n).into());
            }
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ParallelError::BuildError(e.to_string()))?;

            pool.install(|| {
                data.par_chunks_exact_mut(row_stride)
                    .enumerate()
                    .try_for_each(|(row, values)| f(row, values))
            })
        }
    }
}
