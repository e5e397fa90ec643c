//! Mesa-style condition variables.

use super::{CondId, CondState, CondWaiter, Mutex, SemaId, SemaState};
use crate::kernel::Kernel;
use crate::list::{HookSel, ThreadList};
use crate::platform::Platform;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A condition variable with Mesa semantics: signaling and waking are not
/// atomic, so callers re-check their predicate in a loop after `wait`.
///
/// Each wait parks on a private semaphore tagged with the waiter's
/// effective priority at wait time; `signal` wakes the highest such
/// snapshot. The snapshot is deliberately never updated by later donation.
pub struct Condvar<P: Platform> {
    kernel: Arc<Kernel<P>>,
    id: CondId,
}

impl<P: Platform> Condvar<P> {
    /// Register a condition variable.
    pub fn new(kernel: &Arc<Kernel<P>>) -> Self {
        let id = kernel.state.lock().conds.insert(CondState { waiters: Vec::new() });
        Self { kernel: kernel.clone(), id: CondId(id) }
    }

    /// Atomically release `mutex` and wait to be signaled, then re-acquire
    /// `mutex` before returning. The caller must hold `mutex` and must not
    /// be in interrupt context.
    pub fn wait(&self, mutex: &Mutex<P>) {
        let kernel = &self.kernel;
        assert!(Arc::ptr_eq(kernel, &mutex.kernel), "condition variable and mutex belong to different kernels");
        assert!(!kernel.in_interrupt(), "condition wait from interrupt context");
        assert!(mutex.held_by_current(), "condition wait without holding the mutex");

        let sema = {
            let mut st = kernel.state.lock();
            let sema = SemaId(
                st.semas.insert(SemaState { value: 0, waiters: ThreadList::new(HookSel::Sched) }),
            );
            let priority = st.table[st.current].priority;
            let cond = st.conds.get_mut(self.id.0);
            let at = cond
                .waiters
                .iter()
                .position(|waiter| priority > waiter.priority)
                .unwrap_or(cond.waiters.len());
            cond.waiters.insert(at, CondWaiter { sema, priority });
            sema
        };

        mutex.release();
        kernel.sema_down(sema);
        kernel.state.lock().semas.remove(sema.0);
        mutex.acquire();
    }

    /// Wake the waiter with the highest snapshot priority, if any. The
    /// caller must hold `mutex`.
    pub fn signal(&self, mutex: &Mutex<P>) {
        assert!(mutex.held_by_current(), "condition signal without holding the mutex");
        let sema = self.pop_waiter();
        if let Some(sema) = sema {
            self.kernel.sema_up(sema);
        }
    }

    /// Wake every waiter, best snapshot first. The caller must hold `mutex`.
    pub fn broadcast(&self, mutex: &Mutex<P>) {
        assert!(mutex.held_by_current(), "condition broadcast without holding the mutex");
        while let Some(sema) = self.pop_waiter() {
            self.kernel.sema_up(sema);
        }
    }

    fn pop_waiter(&self) -> Option<SemaId> {
        let mut st = self.kernel.state.lock();
        let cond = st.conds.get_mut(self.id.0);
        if cond.waiters.is_empty() {
            None
        } else {
            Some(cond.waiters.remove(0).sema)
        }
    }
}

impl<P: Platform> Drop for Condvar<P> {
    fn drop(&mut self) {
        let mut st = self.kernel.state.lock();
        let cond = st.conds.remove(self.id.0);
        debug_assert!(cond.waiters.is_empty(), "condition variable dropped with waiters");
    }
}
