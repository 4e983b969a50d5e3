use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_OWNER: OwnerToken = OwnerToken::new();
}

/// Identity a connection is leased to.
///
/// The pool only hands a connection back to the token that acquired it, and only that token may
/// release it. [`OwnerToken::current`] gives every thread a stable token of its own; tasks that
/// hop between threads can mint one with [`OwnerToken::new`] and carry it along instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Mint a fresh token, distinct from every other token in the process.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    /// Token bound to the calling thread.
    #[must_use]
    pub fn current() -> Self {
        THREAD_OWNER.with(|token| *token)
    }

    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}
