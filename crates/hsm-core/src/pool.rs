//! Bounded pool of leased HSM sessions.
//!
//! `size` is fixed for the pool's lifetime; `with` blocks (asynchronously)
//! until a session is free and never holds it past the callback's return,
//! including on cancellation — the only await point is acquiring the
//! semaphore permit, so a session is never mid-lease when a caller's
//! future is dropped.

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::{HsmError, HsmResult};
use crate::HsmSession;

pub struct HsmPool {
    sessions: Mutex<Vec<Box<dyn HsmSession>>>,
    semaphore: Semaphore,
    size: usize,
}

impl HsmPool {
    /// Open a pool of `size` sessions using `factory` to create and log
    /// in each one. Login failure on any session aborts pool creation.
    pub fn open<F>(size: usize, mut factory: F) -> HsmResult<Self>
    where
        F: FnMut(usize) -> HsmResult<Box<dyn HsmSession>>,
    {
        let mut sessions = Vec::with_capacity(size);
        for index in 0..size {
            sessions.push(factory(index)?);
        }
        Ok(Self {
            sessions: Mutex::new(sessions),
            semaphore: Semaphore::new(size),
            size,
        })
    }

    /// Number of sessions this pool was opened with. Constant across the
    /// server's lifetime.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Lease a session, run `f` on it, and return it to the pool. Blocks
    /// until a session is available.
    pub async fn with<F, T>(&self, f: F) -> HsmResult<T>
    where
        F: FnOnce(&mut dyn HsmSession) -> HsmResult<T>,
    {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| HsmError::Fatal("session pool closed".to_string()))?;

        let mut session = self
            .sessions
            .lock()
            .pop()
            .expect("a held permit guarantees a free session");

        let result = f(session.as_mut());

        self.sessions.lock().push(session);
        drop(permit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftHsmSession;

    #[tokio::test]
    async fn pool_size_matches_configuration() {
        let pool = HsmPool::open(3, |_| Ok(Box::new(SoftHsmSession::new()) as Box<dyn HsmSession>))
            .unwrap();
        assert_eq!(pool.size(), 3);
    }

    #[tokio::test]
    async fn with_never_shares_a_session_concurrently() {
        let pool = HsmPool::open(1, |_| Ok(Box::new(SoftHsmSession::new()) as Box<dyn HsmSession>))
            .unwrap();
        let a = pool.with(|s| s.generate_random(4));
        let b = pool.with(|s| s.generate_random(4));
        let (a, b) = tokio::join!(a, b);
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
