/// Concurrency management for screentrace.
/// Sizes the parse worker pool; per-file parsing is embarrassingly parallel.

use log::debug;

/// Initialize the global rayon thread pool. Defaults to the CPU count;
/// a later call (tests, embedding hosts) leaves the existing pool in place.
pub fn init_worker_pool(workers: Option<usize>) -> usize {
    let cores = num_cpus::get();
    let count = workers.unwrap_or(cores).max(1);

    match rayon::ThreadPoolBuilder::new().num_threads(count).build_global() {
        Ok(()) => debug!("worker pool initialized: {count} workers ({cores} cores)"),
        Err(_) => debug!("worker pool already initialized"),
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_worker_pool_is_reentrant() {
        let first = init_worker_pool(Some(2));
        let second = init_worker_pool(Some(4));
        assert!(first >= 1);
        assert!(second >= 1);
    }
}
