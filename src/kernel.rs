//! Scheduler core: thread lifecycle, the ready queue, and the reschedule
//! protocol.
//!
//! All scheduler-visible state sits behind one spin mutex. On this
//! single-CPU design the lock is the moral equivalent of disabling
//! interrupts: every mutation of the ready queue, the sleep queue, waiter
//! lists, donor lists, or per-thread fields happens while it is held, and
//! internal helpers that require it take `&mut SchedState` so the compiler
//! enforces the discipline.

use crate::errors::{SpawnError, SpawnResult};
use crate::fixed::Fixed;
use crate::list::{HookSel, ThreadList};
use crate::platform::Platform;
use crate::sync::{CondState, LockState, Registry, SemaState, Semaphore};
use crate::thread::{Slot, Tcb, ThreadId, ThreadState, ThreadTable, PRI_DEFAULT, PRI_MAX, PRI_MIN, THREAD_MAGIC};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use portable_atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard};

/// Timer ticks a thread may hold the CPU before the slice expires.
pub const TIME_SLICE: u32 = 4;

/// Scheduler configuration, fixed for the life of a [`Kernel`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Compute priorities with the multi-level feedback queue scheduler
    /// instead of static priorities with donation.
    pub mlfqs: bool,
    /// Timer interrupts per second. Must lie in `19..=1000`.
    pub timer_freq: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { mlfqs: false, timer_freq: 100 }
    }
}

/// Counters kept by the tick path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Ticks since the kernel started.
    pub ticks: i64,
    /// Ticks spent in the idle thread.
    pub idle_ticks: i64,
    /// Ticks spent in ordinary threads.
    pub kernel_ticks: i64,
}

pub(crate) struct SchedState<P: Platform> {
    pub(crate) table: ThreadTable<P>,
    /// Runnable threads, effective priority descending, FIFO within a level.
    pub(crate) ready: ThreadList,
    /// Sleeping threads, wakeup tick ascending.
    pub(crate) sleepers: ThreadList,
    /// Exited threads whose pages await reclamation.
    graveyard: ThreadList,
    pub(crate) current: Slot,
    pub(crate) idle: Option<Slot>,
    main: Slot,
    pub(crate) mlfqs: bool,
    pub(crate) timer_freq: u32,
    pub(crate) ticks: i64,
    thread_ticks: u32,
    pub(crate) load_avg: Fixed,
    /// Every live thread except idle. Maintained only under MLFQS.
    pub(crate) live: Vec<Slot>,
    pub(crate) semas: Registry<SemaState>,
    pub(crate) locks: Registry<LockState>,
    pub(crate) conds: Registry<CondState>,
    idle_ticks: i64,
    kernel_ticks: i64,
}

/// The scheduler. One instance models one single-CPU machine.
///
/// The calling flow of control of [`Kernel::start`] becomes the `main`
/// thread; everything else is created through [`Kernel::create`] and runs
/// under strict-priority preemptive scheduling until it exits.
pub struct Kernel<P: Platform> {
    pub(crate) platform: P,
    pub(crate) state: Mutex<SchedState<P>>,
    /// Set while the timer interrupt handler runs.
    in_handler: AtomicBool,
    /// Deferred preemption request, consumed on interrupt return.
    yield_pending: AtomicBool,
    weak: Weak<Kernel<P>>,
}

impl<P: Platform> Kernel<P> {
    /// Bring the scheduler up. The caller becomes the `main` thread at
    /// [`PRI_DEFAULT`]; the idle thread is created and has parked itself
    /// before this returns, and the platform's tick source is wired to the
    /// timer interrupt handler.
    ///
    /// Panics if `config.timer_freq` is outside `19..=1000`.
    pub fn start(platform: P, config: Config) -> Arc<Self> {
        assert!(
            (19..=1000).contains(&config.timer_freq),
            "timer frequency {} outside 19..=1000",
            config.timer_freq,
        );

        let mut table = ThreadTable::new();
        let main_id = table.allocate_id();
        let context = Arc::new(platform.bootstrap_context());
        let mut main = Tcb::new(main_id, "main", PRI_DEFAULT, context, None);
        main.state = ThreadState::Running;
        if config.mlfqs {
            main.priority = crate::mlfqs::priority_for(main.recent_cpu, main.nice);
        }
        let main_slot = table.insert(main);

        let mut state = SchedState {
            table,
            ready: ThreadList::new(HookSel::Sched),
            sleepers: ThreadList::new(HookSel::Sched),
            graveyard: ThreadList::new(HookSel::Sched),
            current: main_slot,
            idle: None,
            main: main_slot,
            mlfqs: config.mlfqs,
            timer_freq: config.timer_freq,
            ticks: 0,
            thread_ticks: 0,
            load_avg: Fixed::ZERO,
            live: Vec::new(),
            semas: Registry::new(),
            locks: Registry::new(),
            conds: Registry::new(),
            idle_ticks: 0,
            kernel_ticks: 0,
        };
        if config.mlfqs {
            state.live.push(main_slot);
        }

        let kernel = Arc::new_cyclic(|weak| Kernel {
            platform,
            state: Mutex::new(state),
            in_handler: AtomicBool::new(false),
            yield_pending: AtomicBool::new(false),
            weak: weak.clone(),
        });

        let weak = kernel.weak.clone();
        kernel.platform.register_tick_source(
            config.timer_freq,
            Box::new(move || {
                if let Some(kernel) = weak.upgrade() {
                    kernel.tick();
                }
            }),
        );

        kernel.spawn_idle();

        log::info!(
            "scheduler up: {} policy, {} Hz timer",
            if config.mlfqs { "mlfqs" } else { "priority" },
            config.timer_freq,
        );
        kernel
    }

    /// Create the idle thread and wait for it to park itself, so that it is
    /// never sitting in the ready queue during normal operation.
    fn spawn_idle(&self) {
        let this = self.weak.upgrade().expect("kernel arc is alive during start");
        let started = Arc::new(Semaphore::new(&this, 0));
        let handshake = started.clone();
        let weak = self.weak.clone();
        let id = self
            .spawn_inner(
                "idle",
                PRI_MIN,
                Box::new(move || {
                    handshake.up();
                    drop(handshake);
                    while let Some(kernel) = weak.upgrade() {
                        kernel.idle_pause();
                        kernel.platform.wait_for_interrupt();
                    }
                }),
                true,
            )
            .expect("cannot create the idle thread");
        {
            let mut st = self.state.lock();
            let slot = st.table.slot_of(id).expect("idle thread registered");
            st.idle = Some(slot);
        }
        started.down();
    }

    /// Idle thread body: give the CPU away until something is runnable.
    fn idle_pause(&self) {
        let mut st = self.state.lock();
        let cur = st.current;
        st.table[cur].state = ThreadState::Blocked;
        self.schedule(st);
    }

    /// Create a thread named `name` at `priority`, running `entry`.
    ///
    /// The thread starts immediately if it outranks the caller. Under MLFQS
    /// the priority argument is ignored; the thread inherits the creator's
    /// `nice` and `recent_cpu` and gets the computed priority.
    ///
    /// Panics if `priority` exceeds [`PRI_MAX`].
    pub fn create<F>(&self, name: &str, priority: u8, entry: F) -> SpawnResult<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(priority <= PRI_MAX, "priority {priority} outside 0..=63");
        let weak = self.weak.clone();
        self.spawn_inner(
            name,
            priority,
            Box::new(move || {
                entry();
                if let Some(kernel) = weak.upgrade() {
                    kernel.exit();
                }
            }),
            false,
        )
    }

    fn spawn_inner(
        &self,
        name: &str,
        priority: u8,
        entry: Box<dyn FnOnce() + Send>,
        idle: bool,
    ) -> SpawnResult<ThreadId> {
        let page = self.platform.alloc_page().ok_or(SpawnError::OutOfPages)?;
        let context = match self.platform.new_context(entry) {
            Some(context) => Arc::new(context),
            None => {
                self.platform.free_page(page);
                return Err(SpawnError::Platform);
            }
        };

        let mut st = self.state.lock();
        let id = st.table.allocate_id();
        let mut tcb = Tcb::new(id, name, priority, context, Some(page));
        if st.mlfqs && !idle {
            let parent = &st.table[st.current];
            tcb.nice = parent.nice;
            tcb.recent_cpu = parent.recent_cpu;
            tcb.priority = crate::mlfqs::priority_for(tcb.recent_cpu, tcb.nice);
            tcb.base_priority = PRI_MIN;
        }
        let slot = st.table.insert(tcb);
        if st.mlfqs && !idle {
            st.live.push(slot);
        }
        log::debug!("created thread {} '{}'", id, st.table[slot].name);
        let preempt = self.unblock_slot(&mut st, slot);
        self.finish_preempt(st, preempt);
        Ok(id)
    }

    /// Terminate the current thread. Its page is reclaimed on a later
    /// reschedule, never while its own stack is still in use.
    pub fn exit(&self) -> ! {
        assert!(!self.in_interrupt(), "exit from interrupt context");
        let mut st = self.state.lock();
        log::debug!("thread {} exiting", st.table[st.current].id);
        self.drain_graveyard(&mut st);
        let cur = st.current;
        st.table[cur].state = ThreadState::Dying;
        self.schedule(st);
        unreachable!("dying thread rescheduled");
    }

    /// Give up the CPU. The caller goes back into the ready queue in
    /// priority order, behind its equal-priority peers.
    pub fn yield_now(&self) {
        assert!(!self.in_interrupt(), "yield from interrupt context");
        let st = self.state.lock();
        self.yield_locked(st);
    }

    fn yield_locked(&self, mut st: MutexGuard<'_, SchedState<P>>) {
        let cur = st.current;
        self.drain_graveyard(&mut st);
        if Some(cur) != st.idle {
            let SchedState { table, ready, .. } = &mut *st;
            ready.insert_ordered(table, cur, priority_before);
        }
        st.table[cur].state = ThreadState::Ready;
        self.schedule(st);
    }

    /// Block the current thread. The caller must have linked it into
    /// whatever wait list will later wake it.
    pub fn block(&self) {
        assert!(!self.in_interrupt(), "block from interrupt context");
        let mut st = self.state.lock();
        let cur = st.current;
        st.table[cur].state = ThreadState::Blocked;
        self.schedule(st);
    }

    /// Make a blocked thread runnable. Preempts the caller at once if the
    /// thread outranks it; from the timer interrupt handler the preemption
    /// is deferred to interrupt return.
    ///
    /// Panics if the thread is not blocked.
    pub fn unblock(&self, id: ThreadId) {
        let mut st = self.state.lock();
        let slot = st.table.slot_of(id).expect("unblock of unknown thread");
        let preempt = self.unblock_slot(&mut st, slot);
        self.finish_preempt(st, preempt);
    }

    /// Ready a blocked thread; returns whether it outranks the running one.
    pub(crate) fn unblock_slot(&self, st: &mut SchedState<P>, slot: Slot) -> bool {
        assert_eq!(
            st.table[slot].state,
            ThreadState::Blocked,
            "unblock of a thread that is not blocked",
        );
        {
            let SchedState { table, ready, .. } = &mut *st;
            ready.insert_ordered(table, slot, priority_before);
        }
        st.table[slot].state = ThreadState::Ready;
        let cur = st.current;
        Some(cur) != st.idle && st.table[slot].priority > st.table[cur].priority
    }

    /// Act on a preemption request: yield now in thread context, set the
    /// deferred flag in interrupt context.
    pub(crate) fn finish_preempt(&self, st: MutexGuard<'_, SchedState<P>>, preempt: bool) {
        if !preempt {
            return;
        }
        if self.in_interrupt() {
            self.yield_pending.store(true, Ordering::Release);
        } else {
            self.yield_locked(st);
        }
    }

    /// Whether the ready queue head outranks the running thread.
    pub(crate) fn ready_outranks_current(&self, st: &SchedState<P>) -> bool {
        match st.ready.front() {
            Some(head) => st.table[head].priority > st.table[st.current].priority,
            None => false,
        }
    }

    /// Id of the running thread. Also checks the stack sentinel.
    pub fn current(&self) -> ThreadId {
        let st = self.state.lock();
        let tcb = &st.table[st.current];
        assert_eq!(tcb.magic, THREAD_MAGIC, "stack overflow clobbered a thread control block");
        debug_assert_eq!(tcb.state, ThreadState::Running);
        tcb.id
    }

    /// Effective priority of the running thread.
    pub fn get_priority(&self) -> u8 {
        let st = self.state.lock();
        st.table[st.current].priority
    }

    /// Effective priority of any live thread, for diagnostics and tests.
    pub fn thread_priority(&self, id: ThreadId) -> Option<u8> {
        let st = self.state.lock();
        st.table.slot_of(id).map(|slot| st.table[slot].priority)
    }

    /// Set the running thread's base priority. A no-op under MLFQS. Yields
    /// at once if the thread no longer outranks the ready queue head.
    ///
    /// Panics if `priority` exceeds [`PRI_MAX`].
    pub fn set_priority(&self, priority: u8) {
        assert!(priority <= PRI_MAX, "priority {priority} outside 0..=63");
        let mut st = self.state.lock();
        if st.mlfqs {
            return;
        }
        let cur = st.current;
        st.table[cur].base_priority = priority;
        self.recompute_priority(&mut st, cur);
        let preempt = self.ready_outranks_current(&st);
        self.finish_preempt(st, preempt);
    }

    /// Recompute a thread's effective priority from its base and the
    /// current priorities of its donors. If that moves a thread sitting in
    /// the ready queue, its position is fixed on the spot.
    pub(crate) fn recompute_priority(&self, st: &mut SchedState<P>, slot: Slot) {
        let mut priority = st.table[slot].base_priority;
        for donor in st.table[slot].donors.iter(&st.table) {
            priority = priority.max(st.table[donor].priority);
        }
        if priority == st.table[slot].priority {
            return;
        }
        st.table[slot].priority = priority;
        if st.table[slot].state == ThreadState::Ready && st.table[slot].sched_hook.is_linked() {
            let SchedState { table, ready, .. } = &mut *st;
            ready.remove(table, slot);
            ready.insert_ordered(table, slot, priority_before);
        }
    }

    /// Walk the chain of lock holders starting at `slot`, recomputing each
    /// donee. Chain length is bounded by lock nesting depth; callers must
    /// not construct cycles.
    pub(crate) fn propagate_donation(&self, st: &mut SchedState<P>, mut slot: Slot) {
        loop {
            self.recompute_priority(st, slot);
            match st.table[slot].waiting_on.and_then(|lock| st.locks.get(lock.0).holder) {
                Some(holder) => slot = holder,
                None => break,
            }
        }
    }

    fn next_thread(&self, st: &mut SchedState<P>) -> Slot {
        let SchedState { table, ready, idle, .. } = &mut *st;
        match ready.pop_front(table) {
            Some(slot) => slot,
            None => idle.expect("no runnable threads and no idle thread"),
        }
    }

    /// Hand the CPU to the next thread. The caller has already moved the
    /// current thread out of the Running state and onto whatever list it
    /// belongs on; this consumes the state guard across the switch.
    pub(crate) fn schedule(&self, mut st: MutexGuard<'_, SchedState<P>>) {
        let prev = st.current;
        debug_assert_ne!(st.table[prev].state, ThreadState::Running);
        let next = self.next_thread(&mut st);
        st.table[next].state = ThreadState::Running;
        st.thread_ticks = 0;
        st.current = next;
        if prev == next {
            return;
        }
        if st.table[prev].state == ThreadState::Dying && prev != st.main {
            let SchedState { table, graveyard, .. } = &mut *st;
            graveyard.push_back(table, prev);
        }
        let prev_context = st.table[prev].context.clone();
        let next_context = st.table[next].context.clone();
        drop(st);
        self.platform.switch(&prev_context, &next_context);
    }

    /// Free the pages of threads that exited since the last pass. Runs at
    /// reschedule points, when the exited stacks are no longer in use.
    fn drain_graveyard(&self, st: &mut SchedState<P>) {
        loop {
            let slot = {
                let SchedState { table, graveyard, .. } = &mut *st;
                match graveyard.pop_front(table) {
                    Some(slot) => slot,
                    None => break,
                }
            };
            if st.mlfqs {
                st.live.retain(|&live| live != slot);
            }
            let tcb = st.table.remove(slot);
            log::debug!("reclaimed thread {}", tcb.id);
            if let Some(page) = tcb.page {
                self.platform.free_page(page);
            }
        }
    }

    /// Deliver one timer interrupt: advance time, charge the running
    /// thread's slice, run the MLFQS recomputations, wake expired sleepers,
    /// then honor any pending preemption exactly as the interrupt-return
    /// path of a real port would.
    pub fn tick(&self) {
        assert!(!self.in_interrupt(), "nested timer interrupt");
        self.in_handler.store(true, Ordering::Release);
        {
            let mut st = self.state.lock();
            st.ticks += 1;
            let now = st.ticks;
            if Some(st.current) == st.idle {
                st.idle_ticks += 1;
            } else {
                st.kernel_ticks += 1;
            }
            if st.mlfqs {
                self.mlfqs_tick(&mut st, now);
            }
            st.thread_ticks += 1;
            if st.thread_ticks >= TIME_SLICE {
                self.yield_pending.store(true, Ordering::Release);
            }
            self.wake_sleepers(&mut st, now);
        }
        self.in_handler.store(false, Ordering::Release);
        if self.yield_pending.swap(false, Ordering::AcqRel) {
            let st = self.state.lock();
            self.yield_locked(st);
        }
    }

    /// True while the timer interrupt handler is running.
    pub fn in_interrupt(&self) -> bool {
        self.in_handler.load(Ordering::Acquire)
    }

    /// Request a reschedule when the current interrupt returns.
    pub(crate) fn request_yield_on_return(&self) {
        debug_assert!(self.in_interrupt());
        self.yield_pending.store(true, Ordering::Release);
    }

    /// Tick counters.
    pub fn stats(&self) -> Stats {
        let st = self.state.lock();
        Stats { ticks: st.ticks, idle_ticks: st.idle_ticks, kernel_ticks: st.kernel_ticks }
    }
}

/// Ready-queue ordering: effective priority descending; the strict
/// comparison keeps equal-priority threads FIFO.
pub(crate) fn priority_before<P: Platform>(table: &ThreadTable<P>, a: Slot, b: Slot) -> bool {
    table[a].priority > table[b].priority
}
