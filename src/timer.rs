//! Tick accounting and timed sleep.
//!
//! Sleeping threads sit in a queue ordered by absolute wakeup tick; the
//! timer interrupt walks it from the front and stops at the first thread
//! whose deadline has not arrived. Durations shorter than one tick never
//! reach the queue and busy-wait instead.

use crate::kernel::{Kernel, SchedState};
use crate::platform::Platform;
use crate::thread::{Slot, ThreadState, ThreadTable};
use spin::MutexGuard;

/// Spin iterations roughly equivalent to one timer tick, for sub-tick
/// delays. Ports with a calibrated delay loop will want to tune this.
const LOOPS_PER_TICK: i64 = 1 << 10;

impl<P: Platform> Kernel<P> {
    /// Timer ticks since the kernel started.
    pub fn ticks(&self) -> i64 {
        self.state.lock().ticks
    }

    /// Ticks elapsed since `then`, a value previously returned by
    /// [`Kernel::ticks`].
    pub fn elapsed(&self, then: i64) -> i64 {
        self.ticks() - then
    }

    /// Suspend the current thread for about `n` ticks. Non-positive `n`
    /// returns immediately.
    pub fn sleep_ticks(&self, n: i64) {
        assert!(!self.in_interrupt(), "sleep from interrupt context");
        if n <= 0 {
            return;
        }
        let st = self.state.lock();
        let deadline = st.ticks + n;
        self.sleep_until(st, deadline);
    }

    /// Suspend the current thread until the given absolute tick.
    fn sleep_until(&self, mut st: MutexGuard<'_, SchedState<P>>, deadline: i64) {
        let cur = st.current;
        debug_assert_ne!(Some(cur), st.idle, "the idle thread cannot sleep");
        st.table[cur].wakeup_tick = deadline;
        {
            let SchedState { table, sleepers, .. } = &mut *st;
            sleepers.insert_ordered(table, cur, wakeup_before);
        }
        st.table[cur].state = ThreadState::Blocked;
        self.schedule(st);
    }

    /// Wake every sleeper whose deadline has arrived, in deadline order.
    /// Runs on the tick path, in interrupt context.
    pub(crate) fn wake_sleepers(&self, st: &mut SchedState<P>, now: i64) {
        while let Some(head) = st.sleepers.front() {
            if st.table[head].wakeup_tick > now {
                break;
            }
            {
                let SchedState { table, sleepers, .. } = &mut *st;
                sleepers.remove(table, head);
            }
            st.table[head].wakeup_tick = 0;
            if self.unblock_slot(st, head) {
                self.request_yield_on_return();
            }
        }
    }

    /// Suspend for about `ms` milliseconds.
    pub fn sleep_ms(&self, ms: i64) {
        self.real_time_sleep(ms, 1000);
    }

    /// Suspend for about `us` microseconds.
    pub fn sleep_us(&self, us: i64) {
        self.real_time_sleep(us, 1_000_000);
    }

    /// Suspend for about `ns` nanoseconds.
    pub fn sleep_ns(&self, ns: i64) {
        self.real_time_sleep(ns, 1_000_000_000);
    }

    /// Sleep for `num`/`denom` seconds: at least one full tick goes through
    /// the sleep queue, anything shorter busy-waits for precision.
    fn real_time_sleep(&self, num: i64, denom: i64) {
        let freq = self.state.lock().timer_freq as i64;
        let ticks = num * freq / denom;
        if ticks > 0 {
            self.sleep_ticks(ticks);
        } else if num > 0 {
            busy_wait(LOOPS_PER_TICK * num * freq / denom);
        }
    }
}

/// Sleep-queue ordering: wakeup tick ascending, FIFO on equal deadlines.
fn wakeup_before<P: Platform>(table: &ThreadTable<P>, a: Slot, b: Slot) -> bool {
    table[a].wakeup_tick < table[b].wakeup_tick
}

fn busy_wait(loops: i64) {
    for _ in 0..loops {
        core::hint::spin_loop();
    }
}
