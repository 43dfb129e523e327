//! Per-element map helpers that run on the rayon pool when the `rayon`
//! feature is enabled and serially otherwise.
//!
//! Results are always returned in element order, so downstream ordering (and
//! therefore every numbering and assembled matrix) is the same with and
//! without the feature.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// `f(e)` for `e in 0..n`, collected in order.
pub fn map_elements<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    #[cfg(feature = "rayon")]
    {
        (0..n).into_par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        (0..n).map(f).collect()
    }
}

/// Fallible [`map_elements`]; returns the error of the lowest failing element.
pub fn try_map_elements<T, E, F>(n: usize, f: F) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send,
    F: Fn(usize) -> Result<T, E> + Send + Sync,
{
    map_elements(n, f).into_iter().collect()
}
