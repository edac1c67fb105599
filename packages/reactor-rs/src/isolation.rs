//! Multi-reader/single-writer isolation between top-level reactions.
//!
//! Any number of `Read` reactions may run at once; a `Write` reaction
//! excludes every other reaction for its duration. Nested raises never touch
//! the lock: they run under the isolation their top-level reaction acquired.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;

/// Isolation class declared by a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Isolation {
    /// Not declared; the engine decides from the event.
    #[default]
    Unknown,
    Read,
    Write,
}

impl Isolation {
    /// The isolation actually acquired for a reaction.
    ///
    /// `Unknown` becomes `Write` for cancellable events, since their reaction
    /// may need compensating, and `Read` otherwise.
    pub fn effective(declared: Isolation, cancellable: bool) -> Isolation {
        match declared {
            Isolation::Write => Isolation::Write,
            Isolation::Read => Isolation::Read,
            Isolation::Unknown if cancellable => Isolation::Write,
            Isolation::Unknown => Isolation::Read,
        }
    }
}

/// Process-wide reaction lock.
#[derive(Clone, Default)]
pub struct IsolationController {
    lock: Arc<RwLock<()>>,
}

impl IsolationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire shared (`Read`) or exclusive (`Write`) isolation.
    /// `Unknown` is treated as `Read`.
    pub async fn acquire(&self, isolation: Isolation) -> IsolationGuard {
        let held = match isolation {
            Isolation::Write => Held::Write(self.lock.clone().write_owned().await),
            Isolation::Read | Isolation::Unknown => {
                Held::Read(self.lock.clone().read_owned().await)
            }
        };
        IsolationGuard {
            lock: self.lock.clone(),
            held,
        }
    }
}

enum Held {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
    Released,
}

/// Held isolation; released on drop.
pub struct IsolationGuard {
    lock: Arc<RwLock<()>>,
    held: Held,
}

impl IsolationGuard {
    pub fn isolation(&self) -> Isolation {
        match self.held {
            Held::Read(_) => Isolation::Read,
            Held::Write(_) => Isolation::Write,
            Held::Released => Isolation::Unknown,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.held, Held::Write(_))
    }

    /// Trade shared isolation for exclusive isolation.
    ///
    /// Not atomic: the read lock is released before the write lock is
    /// acquired, so another writer may run in between.
    pub async fn upgrade(&mut self) {
        if self.is_write() {
            return;
        }
        warn!("upgrading reaction isolation from Read to Write");
        self.held = Held::Released;
        self.held = Held::Write(self.lock.clone().write_owned().await);
    }
}

impl std::fmt::Debug for IsolationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationGuard")
            .field("isolation", &self.isolation())
            .finish()
    }
}
