//! Worker-pool helpers shared by the assembly context pool and node visitors.

/// Number of workers in the current pool (1 without the `rayon` feature).
pub fn n_threads() -> usize {
    #[cfg(feature = "rayon")]
    {
        rayon::current_num_threads()
    }
    #[cfg(not(feature = "rayon"))]
    {
        1
    }
}
