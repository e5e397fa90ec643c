//! Counting semaphores.

use super::{pick_max_priority, SemaId, SemaState};
use crate::kernel::{priority_before, Kernel, SchedState};
use crate::list::{HookSel, ThreadList};
use crate::platform::Platform;
use crate::thread::ThreadState;
use alloc::sync::Arc;

/// A counting semaphore: a nonnegative value with atomic `down` and `up`.
///
/// Waiters are served highest effective priority first, FIFO within a
/// level. `up` and `try_down` are safe in interrupt context; `down` may
/// sleep and is not.
pub struct Semaphore<P: Platform> {
    kernel: Arc<Kernel<P>>,
    id: SemaId,
}

impl<P: Platform> Semaphore<P> {
    /// Register a semaphore with the given initial value.
    pub fn new(kernel: &Arc<Kernel<P>>, value: u32) -> Self {
        let id = kernel
            .state
            .lock()
            .semas
            .insert(SemaState { value, waiters: ThreadList::new(HookSel::Sched) });
        Self { kernel: kernel.clone(), id: SemaId(id) }
    }

    /// Wait until the value is positive, then decrement it.
    pub fn down(&self) {
        self.kernel.sema_down(self.id);
    }

    /// Decrement the value if it is positive, without waiting. Returns
    /// whether the decrement happened.
    pub fn try_down(&self) -> bool {
        self.kernel.sema_try_down(self.id)
    }

    /// Increment the value, then wake the best waiter if there is one. The
    /// caller is preempted at once if the woken thread outranks it.
    pub fn up(&self) {
        self.kernel.sema_up(self.id);
    }
}

impl<P: Platform> Drop for Semaphore<P> {
    fn drop(&mut self) {
        let mut st = self.kernel.state.lock();
        let sema = st.semas.remove(self.id.0);
        debug_assert!(sema.waiters.is_empty(), "semaphore dropped with waiters");
    }
}

impl<P: Platform> Kernel<P> {
    pub(crate) fn sema_down(&self, id: SemaId) {
        assert!(!self.in_interrupt(), "semaphore down from interrupt context");
        let mut st = self.state.lock();
        loop {
            if st.semas.get(id.0).value > 0 {
                st.semas.get_mut(id.0).value -= 1;
                return;
            }
            let cur = st.current;
            {
                let SchedState { table, semas, .. } = &mut *st;
                semas.get_mut(id.0).waiters.insert_ordered(table, cur, priority_before);
            }
            st.table[cur].state = ThreadState::Blocked;
            self.schedule(st);
            // Woken by an `up`; the value may already have been taken by a
            // higher-priority thread, so check again.
            st = self.state.lock();
        }
    }

    pub(crate) fn sema_try_down(&self, id: SemaId) -> bool {
        let mut st = self.state.lock();
        let sema = st.semas.get_mut(id.0);
        if sema.value > 0 {
            sema.value -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn sema_up(&self, id: SemaId) {
        let mut st = self.state.lock();
        // The increment comes first so the woken thread finds it.
        st.semas.get_mut(id.0).value += 1;
        let best = pick_max_priority(&st.table, &st.semas.get(id.0).waiters);
        let preempt = match best {
            Some(waiter) => {
                {
                    let SchedState { table, semas, .. } = &mut *st;
                    semas.get_mut(id.0).waiters.remove(table, waiter);
                }
                self.unblock_slot(&mut st, waiter)
            }
            None => false,
        };
        self.finish_preempt(st, preempt);
    }
}
