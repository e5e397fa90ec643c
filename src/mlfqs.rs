//! Multi-level feedback queue scheduling.
//!
//! Priorities derive from how much CPU a thread has used recently and how
//! "nice" it is to its peers, following the 4.4BSD scheduler: every second
//! the system load average is folded into each thread's `recent_cpu`, and
//! every four ticks priorities are recomputed as
//! `PRI_MAX - recent_cpu/4 - nice*2`, clamped to the priority range.
//!
//! MLFQS and priority donation are mutually exclusive: with this engine
//! enabled, `set_priority` is ignored and mutexes never donate.

use crate::fixed::Fixed;
use crate::kernel::{Kernel, SchedState};
use crate::platform::Platform;
use crate::thread::{PRI_MAX, PRI_MIN};

/// Most favorable niceness.
pub const NICE_MIN: i32 = -20;
/// Least favorable niceness.
pub const NICE_MAX: i32 = 20;

/// Ticks between whole-system priority recomputations.
const PRIORITY_INTERVAL: i64 = 4;

/// `PRI_MAX - recent_cpu/4 - nice*2`, clamped to the priority range.
pub(crate) fn priority_for(recent_cpu: Fixed, nice: i32) -> u8 {
    let priority = PRI_MAX as i32 - recent_cpu.div_int(4).to_int_trunc() - nice * 2;
    priority.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

impl<P: Platform> Kernel<P> {
    /// Per-tick MLFQS work; runs in the timer interrupt handler.
    pub(crate) fn mlfqs_tick(&self, st: &mut SchedState<P>, now: i64) {
        let cur = st.current;
        if Some(cur) != st.idle {
            st.table[cur].recent_cpu = st.table[cur].recent_cpu.add_int(1);
        }
        if now % (st.timer_freq as i64) == 0 {
            self.update_load_avg(st);
            self.decay_recent_cpu(st);
        }
        if now % PRIORITY_INTERVAL == 0 {
            for i in 0..st.live.len() {
                let slot = st.live[i];
                let tcb = &mut st.table[slot];
                tcb.priority = priority_for(tcb.recent_cpu, tcb.nice);
            }
            // The ready queue may be stale now; the next insertion
            // restores the order.
        }
    }

    /// `load_avg := (59/60)·load_avg + (1/60)·ready_threads`, where
    /// `ready_threads` counts runnable threads, idle excluded.
    fn update_load_avg(&self, st: &mut SchedState<P>) {
        let running = if Some(st.current) == st.idle { 0 } else { 1 };
        let ready_threads = st.ready.len() as i32 + running;
        let decay = Fixed::from_int(59).div_int(60);
        let weight = Fixed::from_int(1).div_int(60);
        st.load_avg = decay.mul(st.load_avg) + weight.mul_int(ready_threads);
    }

    /// `recent_cpu := (2·load_avg)/(2·load_avg + 1) · recent_cpu + nice`
    /// for every live thread.
    fn decay_recent_cpu(&self, st: &mut SchedState<P>) {
        let twice_load = st.load_avg.mul_int(2);
        let coefficient = twice_load.div(twice_load.add_int(1));
        for i in 0..st.live.len() {
            let slot = st.live[i];
            let tcb = &mut st.table[slot];
            tcb.recent_cpu = coefficient.mul(tcb.recent_cpu).add_int(tcb.nice);
        }
    }

    /// Set the running thread's niceness, clamped to
    /// [`NICE_MIN`]..=[`NICE_MAX`], and recompute its priority, yielding if
    /// it no longer outranks the ready queue head. Ignored unless MLFQS is
    /// enabled; must not be called from interrupt context.
    pub fn set_nice(&self, nice: i32) {
        assert!(!self.in_interrupt(), "set_nice from interrupt context");
        let mut st = self.state.lock();
        if !st.mlfqs {
            return;
        }
        let cur = st.current;
        let tcb = &mut st.table[cur];
        tcb.nice = nice.clamp(NICE_MIN, NICE_MAX);
        tcb.priority = priority_for(tcb.recent_cpu, tcb.nice);
        let preempt = self.ready_outranks_current(&st);
        self.finish_preempt(st, preempt);
    }

    /// The running thread's niceness; 0 unless MLFQS is enabled.
    pub fn get_nice(&self) -> i32 {
        let st = self.state.lock();
        if st.mlfqs {
            st.table[st.current].nice
        } else {
            0
        }
    }

    /// 100 times the system load average, rounded to the nearest integer.
    pub fn get_load_avg(&self) -> i32 {
        let st = self.state.lock();
        if st.mlfqs {
            st.load_avg.mul_int(100).to_int_round()
        } else {
            0
        }
    }

    /// 100 times the running thread's `recent_cpu`, rounded to nearest.
    pub fn get_recent_cpu(&self) -> i32 {
        let st = self.state.lock();
        if st.mlfqs {
            st.table[st.current].recent_cpu.mul_int(100).to_int_round()
        } else {
            0
        }
    }
}
