//! Mutexes with priority donation.

use super::{pick_max_priority, LockId, LockState};
use crate::kernel::{priority_before, Kernel, SchedState};
use crate::list::{HookSel, ThreadList};
use crate::platform::Platform;
use crate::thread::{Slot, ThreadState};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;

/// A non-recursive mutex. The acquirer becomes the holder; only the holder
/// may release. Double acquisition and release by a non-holder panic.
///
/// Unless MLFQS is enabled, a blocked acquirer donates its effective
/// priority to the holder, transitively through any mutex the holder is
/// itself waiting for, so that a high-priority waiter is never stuck behind
/// a preempted low-priority holder. The donation is withdrawn, per mutex,
/// when the holder releases.
pub struct Mutex<P: Platform> {
    pub(crate) kernel: Arc<Kernel<P>>,
    id: LockId,
}

impl<P: Platform> Mutex<P> {
    /// Register a mutex, initially unheld.
    pub fn new(kernel: &Arc<Kernel<P>>) -> Self {
        let id = kernel
            .state
            .lock()
            .locks
            .insert(LockState { holder: None, waiters: ThreadList::new(HookSel::Sched) });
        Self { kernel: kernel.clone(), id: LockId(id) }
    }

    /// Acquire, sleeping until the mutex is free. Donates priority to the
    /// holding chain while waiting. Must not be called in interrupt context
    /// or while already holding this mutex.
    pub fn acquire(&self) {
        self.kernel.lock_acquire(self.id);
    }

    /// Acquire only if the mutex is free; no donation, no sleeping.
    /// Returns whether the mutex was acquired.
    pub fn try_acquire(&self) -> bool {
        self.kernel.lock_try_acquire(self.id)
    }

    /// Release, waking the highest-priority waiter. Panics if the caller
    /// does not hold the mutex.
    pub fn release(&self) {
        self.kernel.lock_release(self.id);
    }

    /// Whether the running thread holds this mutex.
    pub fn held_by_current(&self) -> bool {
        self.kernel.lock_held_by_current(self.id)
    }
}

impl<P: Platform> Drop for Mutex<P> {
    fn drop(&mut self) {
        let mut st = self.kernel.state.lock();
        let lock = st.locks.remove(self.id.0);
        debug_assert!(lock.holder.is_none(), "mutex dropped while held");
        debug_assert!(lock.waiters.is_empty(), "mutex dropped with waiters");
    }
}

impl<P: Platform> Kernel<P> {
    pub(crate) fn lock_acquire(&self, id: LockId) {
        assert!(!self.in_interrupt(), "mutex acquire from interrupt context");
        let mut st = self.state.lock();
        loop {
            let cur = st.current;
            let holder = st.locks.get(id.0).holder;
            match holder {
                None => {
                    st.locks.get_mut(id.0).holder = Some(cur);
                    st.table[cur].waiting_on = None;
                    if !st.mlfqs {
                        self.adopt_waiters(&mut st, id, cur);
                    }
                    return;
                }
                Some(holder) => {
                    assert_ne!(
                        holder, cur,
                        "mutex acquired twice by thread {}",
                        st.table[cur].id,
                    );
                    st.table[cur].waiting_on = Some(id);
                    if !st.mlfqs {
                        // Donate to the holder, then ripple the new priority
                        // down the chain of locks the holder is waiting on.
                        let mut donors =
                            mem::replace(&mut st.table[holder].donors, ThreadList::new(HookSel::Donor));
                        donors.insert_ordered(&mut st.table, cur, priority_before);
                        st.table[holder].donors = donors;
                        self.propagate_donation(&mut st, holder);
                    }
                    {
                        let SchedState { table, locks, .. } = &mut *st;
                        locks.get_mut(id.0).waiters.insert_ordered(table, cur, priority_before);
                    }
                    st.table[cur].state = ThreadState::Blocked;
                    self.schedule(st);
                    // Woken as the released mutex's chosen successor, but an
                    // intervening try_acquire may have taken it; loop.
                    st = self.state.lock();
                }
            }
        }
    }

    pub(crate) fn lock_try_acquire(&self, id: LockId) -> bool {
        let mut st = self.state.lock();
        let cur = st.current;
        let lock = st.locks.get_mut(id.0);
        assert_ne!(lock.holder, Some(cur), "mutex acquired twice by its holder");
        if lock.holder.is_none() {
            lock.holder = Some(cur);
            true
        } else {
            false
        }
    }

    pub(crate) fn lock_release(&self, id: LockId) {
        let mut st = self.state.lock();
        let cur = st.current;
        assert_eq!(
            st.locks.get(id.0).holder,
            Some(cur),
            "mutex released by a thread that does not hold it",
        );
        st.locks.get_mut(id.0).holder = None;
        if !st.mlfqs {
            // Withdraw exactly the donations made because of this mutex.
            let mut donors = mem::replace(&mut st.table[cur].donors, ThreadList::new(HookSel::Donor));
            let withdrawn: Vec<Slot> = donors
                .iter(&st.table)
                .filter(|&donor| st.table[donor].waiting_on == Some(id))
                .collect();
            for donor in withdrawn {
                donors.remove(&mut st.table, donor);
            }
            st.table[cur].donors = donors;
            self.recompute_priority(&mut st, cur);
        }
        let best = pick_max_priority(&st.table, &st.locks.get(id.0).waiters);
        let mut preempt = match best {
            Some(waiter) => {
                {
                    let SchedState { table, locks, .. } = &mut *st;
                    locks.get_mut(id.0).waiters.remove(table, waiter);
                }
                self.unblock_slot(&mut st, waiter)
            }
            None => false,
        };
        // Losing a donation can drop the releaser below other ready threads.
        preempt = preempt || self.ready_outranks_current(&st);
        self.finish_preempt(st, preempt);
    }

    pub(crate) fn lock_held_by_current(&self, id: LockId) -> bool {
        let st = self.state.lock();
        st.locks.get(id.0).holder == Some(st.current)
    }

    /// A freshly claimed mutex may still have queued waiters (they were
    /// stripped from the previous holder's donor list at release). Re-enter
    /// them as donors of the new holder so every waiter donates to whoever
    /// actually holds the mutex.
    fn adopt_waiters(&self, st: &mut SchedState<P>, id: LockId, holder: Slot) {
        let waiters: Vec<Slot> = st.locks.get(id.0).waiters.iter(&st.table).collect();
        if waiters.is_empty() {
            return;
        }
        for waiter in waiters {
            debug_assert_eq!(st.table[waiter].waiting_on, Some(id));
            if !st.table[waiter].donor_hook.is_linked() {
                let mut donors =
                    mem::replace(&mut st.table[holder].donors, ThreadList::new(HookSel::Donor));
                donors.insert_ordered(&mut st.table, waiter, priority_before);
                st.table[holder].donors = donors;
            }
        }
        self.recompute_priority(st, holder);
    }
}
