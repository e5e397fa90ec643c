//! Thread control blocks and the table that owns every live thread.

use crate::fixed::Fixed;
use crate::list::{Hook, HookSel, ThreadList};
use crate::platform::Platform;
use crate::sync::LockId;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::num::NonZeroU64;

/// Lowest priority.
pub const PRI_MIN: u8 = 0;
/// Default priority for new threads.
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority.
pub const PRI_MAX: u8 = 63;

/// Longest thread name kept, in bytes. Names are debug aids only.
pub(crate) const NAME_MAX: usize = 15;

/// Sentinel stamped into every control block; a clobbered value means the
/// thread overflowed its stack into the block.
pub(crate) const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Unique identifier of a thread. Never reused, even after the thread dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(NonZeroU64::new(raw).expect("thread ids start at 1"))
    }

    /// Raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Holding the CPU. At most one thread at a time.
    Running = 0,
    /// In the ready queue, waiting for the CPU.
    Ready = 1,
    /// Waiting for a wakeup: a sleep deadline, a semaphore, or a mutex.
    Blocked = 2,
    /// Exited; its page is reclaimed on a later reschedule.
    Dying = 3,
}

/// Table slot of a thread. Slots are reused after destruction, unlike
/// [`ThreadId`]s; nothing outside the scheduler sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot(u32);

/// One thread's control block.
pub(crate) struct Tcb<P: Platform> {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    /// Priority assigned by the programmer; the floor donation lifts from.
    /// Unused under MLFQS.
    pub(crate) base_priority: u8,
    /// Priority the scheduler actually compares.
    pub(crate) priority: u8,
    /// Absolute tick this thread sleeps until; 0 when not sleeping.
    pub(crate) wakeup_tick: i64,
    /// The mutex this thread is blocked acquiring, if any.
    pub(crate) waiting_on: Option<LockId>,
    /// Threads donating their priority to this one, linked through their
    /// donor hooks.
    pub(crate) donors: ThreadList,
    pub(crate) nice: i32,
    pub(crate) recent_cpu: Fixed,
    pub(crate) sched_hook: Hook,
    pub(crate) donor_hook: Hook,
    /// Saved flow of control, restored by `Platform::switch`.
    pub(crate) context: Arc<P::Context>,
    /// Page backing this thread's stack; `None` only for the bootstrap
    /// thread, which runs on the stack it was started with.
    pub(crate) page: Option<P::Page>,
    pub(crate) magic: u32,
}

impl<P: Platform> Tcb<P> {
    pub(crate) fn new(
        id: ThreadId,
        name: &str,
        priority: u8,
        context: Arc<P::Context>,
        page: Option<P::Page>,
    ) -> Self {
        Self {
            id,
            name: truncate_name(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            wakeup_tick: 0,
            waiting_on: None,
            donors: ThreadList::new(HookSel::Donor),
            nice: 0,
            recent_cpu: Fixed::ZERO,
            sched_hook: Hook::default(),
            donor_hook: Hook::default(),
            context,
            page,
            magic: THREAD_MAGIC,
        }
    }

    pub(crate) fn hook(&self, sel: HookSel) -> &Hook {
        match sel {
            HookSel::Sched => &self.sched_hook,
            HookSel::Donor => &self.donor_hook,
        }
    }

    pub(crate) fn hook_mut(&mut self, sel: HookSel) -> &mut Hook {
        match sel {
            HookSel::Sched => &mut self.sched_hook,
            HookSel::Donor => &mut self.donor_hook,
        }
    }
}

/// Truncate to [`NAME_MAX`] bytes without splitting a character.
fn truncate_name(name: &str) -> String {
    if name.len() <= NAME_MAX {
        return name.into();
    }
    let mut end = NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].into()
}

/// Owns every control block. Slots come from a free list; ids are a bare
/// counter and stay unique for the life of the kernel.
pub(crate) struct ThreadTable<P: Platform> {
    slots: Vec<Option<Tcb<P>>>,
    free: Vec<Slot>,
    by_id: BTreeMap<ThreadId, Slot>,
    next_id: u64,
}

impl<P: Platform> ThreadTable<P> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), by_id: BTreeMap::new(), next_id: 1 }
    }

    pub(crate) fn allocate_id(&mut self) -> ThreadId {
        let id = ThreadId::new(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, tcb: Tcb<P>) -> Slot {
        let id = tcb.id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot.0 as usize] = Some(tcb);
                slot
            }
            None => {
                self.slots.push(Some(tcb));
                Slot(self.slots.len() as u32 - 1)
            }
        };
        self.by_id.insert(id, slot);
        slot
    }

    pub(crate) fn remove(&mut self, slot: Slot) -> Tcb<P> {
        let tcb = self.slots[slot.0 as usize].take().expect("vacant thread slot");
        self.by_id.remove(&tcb.id);
        self.free.push(slot);
        tcb
    }

    pub(crate) fn slot_of(&self, id: ThreadId) -> Option<Slot> {
        self.by_id.get(&id).copied()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.by_id.len()
    }
}

impl<P: Platform> core::ops::Index<Slot> for ThreadTable<P> {
    type Output = Tcb<P>;

    fn index(&self, slot: Slot) -> &Tcb<P> {
        self.slots[slot.0 as usize].as_ref().expect("vacant thread slot")
    }
}

impl<P: Platform> core::ops::IndexMut<Slot> for ThreadTable<P> {
    fn index_mut(&mut self, slot: Slot) -> &mut Tcb<P> {
        self.slots[slot.0 as usize].as_mut().expect("vacant thread slot")
    }
}

#[cfg(all(test, feature = "std-shim"))]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;

    fn tcb(table: &mut ThreadTable<HostPlatform>, name: &str) -> Tcb<HostPlatform> {
        let platform = HostPlatform::new();
        let id = table.allocate_id();
        Tcb::new(id, name, PRI_DEFAULT, Arc::new(platform.bootstrap_context()), None)
    }

    #[test]
    fn test_name_truncation() {
        assert_eq!(truncate_name("main"), "main");
        assert_eq!(truncate_name("a-very-long-thread-name"), "a-very-long-thr");
        assert_eq!(truncate_name("").len(), 0);
    }

    #[test]
    fn test_slots_are_reused_but_ids_are_not() {
        let mut table: ThreadTable<HostPlatform> = ThreadTable::new();
        let a = tcb(&mut table, "a");
        let first_id = a.id;
        let slot_a = table.insert(a);
        table.remove(slot_a);

        let b = tcb(&mut table, "b");
        let second_id = b.id;
        let slot_b = table.insert(b);

        assert_eq!(slot_a, slot_b);
        assert_ne!(first_id, second_id);
        assert_eq!(table.slot_of(second_id), Some(slot_b));
        assert_eq!(table.slot_of(first_id), None);
        assert_eq!(table.live_count(), 1);
    }
}
