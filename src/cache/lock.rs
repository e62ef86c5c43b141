use std::sync::{LockResult, Mutex, MutexGuard};

use tracing::warn;

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// Only in-memory mirrors sit behind these locks, so a poisoned guard is served as-is.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op)
}

fn recover<G>(result: LockResult<G>, target: &'static str, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            result = "poisoned_recovered",
            "Recovered from poisoned hot layer lock"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = Arc::new(Mutex::new(1_u32));
        let shared = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().expect("lock");
            panic!("poison");
        })
        .join();

        assert!(lock.is_poisoned());
        let mut guard = mutex_lock(&lock, "cache::lock", "test");
        *guard += 1;
        assert_eq!(*guard, 2);
    }
}
