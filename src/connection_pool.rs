//! Bounded logical connection pool fronting the metadata store's primary.
//! The in-process `SqlLikeMetadataStore` needs no real connections, but the
//! pool still exists as the seam a real RDBMS-backed implementation plugs
//! into, and the engine acquires/releases a permit around every transaction
//! so connection exhaustion under load behaves the same regardless of
//! backend.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(pub usize);

struct PoolState {
    available: VecDeque<ConnectionId>,
    shutdown: bool,
}

/// A fixed-size pool of opaque connection permits. `acquire` blocks (with a
/// timeout) until a permit is free or the pool is shut down.
pub struct ConnectionPool {
    state: Mutex<PoolState>,
    cv: Condvar,
    pool_size: usize,
}

/// RAII guard returned by `acquire`; the permit is returned to the pool on
/// drop.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    id: Option<ConnectionId>,
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.pool.release(id);
        }
    }
}

impl ConnectionPool {
    pub fn new(pool_size: usize) -> Self {
        let available: VecDeque<ConnectionId> = (0..pool_size).map(ConnectionId).collect();
        ConnectionPool { state: Mutex::new(PoolState { available, shutdown: false }), cv: Condvar::new(), pool_size }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Block until a connection permit is available or `timeout` elapses.
    /// Returns `None` on timeout or after `shutdown`.
    pub fn acquire(&self, timeout: Duration) -> Option<PooledConnection<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("connection pool mutex poisoned");
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(id) = state.available.pop_front() {
                return Some(PooledConnection { pool: self, id: Some(id) });
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, timed_out) = self.cv.wait_timeout(state, deadline - now).expect("connection pool condvar poisoned");
            state = guard;
            if timed_out.timed_out() && state.available.is_empty() {
                return None;
            }
        }
    }

    fn release(&self, id: ConnectionId) {
        let mut state = self.state.lock().expect("connection pool mutex poisoned");
        state.available.push_back(id);
        drop(state);
        self.cv.notify_one();
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("connection pool mutex poisoned");
        state.shutdown = true;
        drop(state);
        self.cv.notify_all();
        log::info!("connection pool: shut down");
    }

    pub fn in_use(&self) -> usize {
        let state = self.state.lock().expect("connection pool mutex poisoned");
        self.pool_size - state.available.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_and_release_round_trips_a_permit() {
        let pool = ConnectionPool::new(2);
        assert_eq!(pool.in_use(), 0);
        let guard = pool.acquire(Duration::from_millis(100)).unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(guard);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn acquire_blocks_until_a_permit_is_released() {
        let pool = Arc::new(ConnectionPool::new(1));
        let first = pool.acquire(Duration::from_millis(100)).unwrap();

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.acquire(Duration::from_secs(2)).is_some());

        thread::sleep(Duration::from_millis(50));
        drop(first);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn acquire_times_out_when_pool_is_exhausted() {
        let pool = ConnectionPool::new(1);
        let _held = pool.acquire(Duration::from_millis(100)).unwrap();
        assert!(pool.acquire(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn shutdown_unblocks_waiters() {
        let pool = Arc::new(ConnectionPool::new(1));
        let _held = pool.acquire(Duration::from_millis(100)).unwrap();

        let pool2 = pool.clone();
        let handle = thread::spawn(move || pool2.acquire(Duration::from_secs(2)).is_none());

        thread::sleep(Duration::from_millis(50));
        pool.shutdown();
        assert!(handle.join().unwrap());
    }
}
