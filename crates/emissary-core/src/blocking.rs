//! Bounded bridge from async code to blocking work.
//!
//! All SQLite statements and other blocking calls go through `run_blocking`
//! so the single request event loop never stalls. The semaphore caps the
//! number of simultaneously occupied blocking threads.

use std::sync::{Arc, OnceLock};

use tokio::sync::Semaphore;

use crate::config::DEFAULT_BLOCKING_WORKERS;

fn permits() -> &'static Arc<Semaphore> {
    static PERMITS: OnceLock<Arc<Semaphore>> = OnceLock::new();
    PERMITS.get_or_init(|| Arc::new(Semaphore::new(DEFAULT_BLOCKING_WORKERS)))
}

/// Run `f` on the blocking thread pool, bounded by the shared worker cap.
pub async fn run_blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    // The semaphore is never closed, and a panic inside `f` is a bug in the
    // closure, not something callers can recover from.
    let _permit = permits()
        .clone()
        .acquire_owned()
        .await
        .expect("blocking pool semaphore closed");
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_closure_and_returns_value() {
        let v = run_blocking(|| 21 * 2).await;
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn many_concurrent_calls_complete() {
        let mut handles = Vec::new();
        for i in 0..100u32 {
            handles.push(tokio::spawn(async move { run_blocking(move || i + 1).await }));
        }
        let mut sum = 0;
        for h in handles {
            sum += h.await.unwrap();
        }
        assert_eq!(sum, (1..=100).sum::<u32>());
    }
}
