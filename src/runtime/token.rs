//! The exclusive execution token.
//!
//! All managed-code execution is serialized behind one [`ExecutionToken`].
//! The token is reentrant for the thread that holds it, so a callback fired
//! synchronously from inside a scripting operation does not deadlock. A
//! holder can hand the token back while it blocks on foreign I/O with
//! [`ExecutionToken::allow_threads`]; during that window the thread is
//! "parked" and other threads may run managed code.

use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

static NEXT_THREAD_TAG: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TAG: usize = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
}

/// Small non-zero integer unique to the calling thread.
pub(crate) fn current_thread_tag() -> usize {
    THREAD_TAG.with(|tag| *tag)
}

#[derive(Default)]
struct TokenState {
    /// Tag of the holding thread, 0 when free.
    owner: usize,
    depth: usize,
    /// Threads inside `allow_threads`, with the depth they will restore.
    parked: FxHashMap<usize, usize>,
}

/// Process-wide mutual exclusion right for managed code.
pub struct ExecutionToken {
    state: Mutex<TokenState>,
    released: Condvar,
    owner: AtomicUsize,
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

impl ExecutionToken {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TokenState::default()),
            released: Condvar::new(),
            owner: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    /// Block until the calling thread holds the token.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn acquire(&self) -> TokenGuard<'_> {
        let me = current_thread_tag();
        let mut state = self.state.lock();
        if state.owner == me {
            state.depth += 1;
            return TokenGuard::new(self);
        }
        if state.owner != 0 {
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
        while state.owner != 0 {
            self.released.wait(&mut state);
        }
        state.owner = me;
        state.depth = 1;
        self.owner.store(me, Ordering::Release);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        TokenGuard::new(self)
    }

    /// Release the token around `f` and take it back afterwards.
    ///
    /// `f` must not touch managed state. The nesting depth is restored
    /// exactly, even if `f` panics.
    pub fn allow_threads<R>(&self, guard: &mut TokenGuard<'_>, f: impl FnOnce() -> R) -> R {
        debug_assert!(std::ptr::eq(guard.token, self));
        let me = current_thread_tag();
        let depth = {
            let mut state = self.state.lock();
            assert_eq!(state.owner, me, "allow_threads called without holding the token");
            let depth = state.depth;
            state.owner = 0;
            state.depth = 0;
            state.parked.insert(me, depth);
            self.owner.store(0, Ordering::Release);
            self.released.notify_one();
            depth
        };

        struct Reacquire<'t> {
            token: &'t ExecutionToken,
            me: usize,
            depth: usize,
        }

        impl Drop for Reacquire<'_> {
            fn drop(&mut self) {
                let mut state = self.token.state.lock();
                while state.owner != 0 {
                    self.token.released.wait(&mut state);
                }
                state.owner = self.me;
                state.depth = self.depth;
                state.parked.remove(&self.me);
                self.token.owner.store(self.me, Ordering::Release);
                self.token.acquisitions.fetch_add(1, Ordering::Relaxed);
            }
        }

        let _reacquire = Reacquire {
            token: self,
            me,
            depth,
        };
        f()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_tag()
    }

    /// True when the calling thread holds the token or has parked it.
    ///
    /// Code running here was started by scripting code that is waiting for
    /// a result.
    pub fn in_scripting_context(&self) -> bool {
        let me = current_thread_tag();
        let state = self.state.lock();
        state.owner == me || state.parked.contains_key(&me)
    }

    /// Number of times the token changed hands.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Number of acquisitions that had to wait for another holder.
    pub fn contended_acquisitions(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, current_thread_tag());
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = 0;
            self.owner.store(0, Ordering::Release);
            self.released.notify_one();
        }
    }
}

impl Default for ExecutionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionToken")
            .field("held", &(self.owner.load(Ordering::Relaxed) != 0))
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

/// Proof that the current thread holds the token. Not `Send`.
pub struct TokenGuard<'t> {
    token: &'t ExecutionToken,
    _not_send: PhantomData<*const ()>,
}

impl<'t> TokenGuard<'t> {
    fn new(token: &'t ExecutionToken) -> Self {
        Self {
            token,
            _not_send: PhantomData,
        }
    }

    pub fn token(&self) -> &'t ExecutionToken {
        self.token
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.token.release();
    }
}

/// Managed state reachable only while holding the token.
///
/// Borrows must not be held across [`ExecutionToken::allow_threads`] or
/// across a call into user code.
pub(crate) struct TokenCell<T> {
    value: RefCell<T>,
}

// Access requires a guard and a runtime ownership check, so at most one
// thread touches the RefCell at a time and hand-over goes through the
// token's mutex.
unsafe impl<T: Send> Sync for TokenCell<T> {}

impl<T> TokenCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    /// Exclusive access without the token, for owners being dropped.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub(crate) fn borrow<'a>(&'a self, guard: &'a TokenGuard<'_>) -> Ref<'a, T> {
        assert!(
            guard.token.is_held_by_current_thread(),
            "managed state accessed without the execution token"
        );
        self.value.borrow()
    }

    pub(crate) fn borrow_mut<'a>(&'a self, guard: &'a TokenGuard<'_>) -> RefMut<'a, T> {
        assert!(
            guard.token.is_held_by_current_thread(),
            "managed state accessed without the execution token"
        );
        self.value.borrow_mut()
    }
}
