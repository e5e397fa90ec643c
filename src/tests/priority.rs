//! Strict-priority scheduling, round robin, and wakeup ordering.

use super::helpers::{boot, Journal};
use crate::sync::{Condvar, Mutex, Semaphore};
use crate::thread::{PRI_MAX, PRI_MIN};
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;

#[test]
fn test_highest_priority_thread_runs_first() {
    let kernel = boot();
    let journal = Journal::new();

    kernel.set_priority(PRI_MAX);
    for (name, priority) in [("a", 30u8), ("b", 40), ("c", 50)] {
        let j = journal.clone();
        kernel.create(name, priority, move || j.push(name)).unwrap();
    }
    assert!(journal.entries().is_empty());

    // Dropping below the creations hands the CPU over, highest first.
    kernel.set_priority(PRI_MIN);
    assert_eq!(journal.entries(), ["c", "b", "a"]);
}

#[test]
fn test_equal_priorities_round_robin_fifo() {
    let kernel = boot();
    let journal = Journal::new();

    kernel.set_priority(PRI_MAX);
    for name in ["x", "y"] {
        let k = kernel.clone();
        let j = journal.clone();
        kernel
            .create(name, 40, move || {
                for _ in 0..3 {
                    j.push(name);
                    // Burn one full time slice; the expiry preempts us in
                    // favor of our equal-priority peer.
                    for _ in 0..crate::TIME_SLICE {
                        k.tick();
                    }
                }
            })
            .unwrap();
    }
    kernel.set_priority(PRI_MIN);
    assert_eq!(journal.entries(), ["x", "y", "x", "y", "x", "y"]);
}

#[test]
fn test_low_priority_thread_runs_within_bounded_delay() {
    let kernel = boot();
    let journal = Journal::new();

    kernel.set_priority(PRI_MAX);

    // A low thread that records the tick of its first run.
    let k = kernel.clone();
    let j = journal.clone();
    kernel
        .create("low", 10, move || {
            j.push(format!("{}", k.ticks()));
        })
        .unwrap();

    // N strictly-higher-priority peers, each burning one full time slice of
    // CPU before exiting.
    const HOGS: i64 = 3;
    for _ in 0..HOGS {
        let k = kernel.clone();
        kernel
            .create("hog", 40, move || {
                for _ in 0..crate::TIME_SLICE {
                    k.tick();
                }
            })
            .unwrap();
    }

    let start = kernel.ticks();
    kernel.set_priority(PRI_MIN);

    // A higher-priority thread can hold the CPU for at most one slice before
    // the expiry preempts it, so the low thread was delayed by no more than
    // HOGS * TIME_SLICE ticks from the moment it became runnable.
    let entries = journal.entries();
    assert_eq!(entries.len(), 1, "the low thread ran exactly once");
    let ran_at: i64 = entries[0].parse().unwrap();
    assert!(
        ran_at <= start + HOGS * crate::TIME_SLICE as i64,
        "low thread first ran at tick {ran_at}, window started at tick {start}",
    );
}

#[test]
fn test_sema_up_preempts_before_returning() {
    let kernel = boot();
    let journal = Journal::new();
    let sema = Arc::new(Semaphore::new(&kernel, 0));

    let waiter_sema = sema.clone();
    let waiter_journal = journal.clone();
    kernel
        .create("high", 60, move || {
            waiter_sema.down();
            waiter_journal.push("high");
        })
        .unwrap();

    journal.push("low-before-up");
    sema.up();
    // The waiter outranks us, so it ran before up() returned.
    journal.push("low-after-up");
    assert_eq!(journal.entries(), ["low-before-up", "high", "low-after-up"]);
}

#[test]
fn test_semaphore_wakes_waiters_by_priority() {
    let kernel = boot();
    let journal = Journal::new();
    let sema = Arc::new(Semaphore::new(&kernel, 0));

    kernel.set_priority(PRI_MAX);
    for (name, priority) in [("p30", 30u8), ("p50", 50), ("p40", 40)] {
        let s = sema.clone();
        let j = journal.clone();
        kernel
            .create(name, priority, move || {
                s.down();
                j.push(name);
            })
            .unwrap();
    }
    // Let all three park on the semaphore.
    kernel.set_priority(20);
    assert!(journal.entries().is_empty());

    for _ in 0..3 {
        sema.up();
    }
    assert_eq!(journal.entries(), ["p50", "p40", "p30"]);
}

#[test]
fn test_condvar_signals_by_snapshot_priority() {
    let kernel = boot();
    let journal = Journal::new();
    let mutex = Arc::new(Mutex::new(&kernel));
    let cond = Arc::new(Condvar::new(&kernel));

    kernel.set_priority(PRI_MAX);
    for (name, priority) in [("p35", 35u8), ("p55", 55), ("p45", 45)] {
        let m = mutex.clone();
        let c = cond.clone();
        let j = journal.clone();
        kernel
            .create(name, priority, move || {
                m.acquire();
                c.wait(&m);
                j.push(name);
                m.release();
            })
            .unwrap();
    }
    kernel.set_priority(20);

    for _ in 0..3 {
        mutex.acquire();
        cond.signal(&mutex);
        mutex.release();
    }
    assert_eq!(journal.entries(), ["p55", "p45", "p35"]);
}

#[test]
fn test_condvar_broadcast_wakes_everyone() {
    let kernel = boot();
    let journal = Journal::new();
    let mutex = Arc::new(Mutex::new(&kernel));
    let cond = Arc::new(Condvar::new(&kernel));

    kernel.set_priority(PRI_MAX);
    for (name, priority) in [("a", 40u8), ("b", 50)] {
        let m = mutex.clone();
        let c = cond.clone();
        let j = journal.clone();
        kernel
            .create(name, priority, move || {
                m.acquire();
                c.wait(&m);
                j.push(name);
                m.release();
            })
            .unwrap();
    }
    kernel.set_priority(20);

    mutex.acquire();
    cond.broadcast(&mutex);
    mutex.release();
    assert_eq!(journal.entries(), ["b", "a"]);
}

#[test]
fn test_block_and_unblock_round_trip() {
    let kernel = boot();
    let journal = Journal::new();

    let k = kernel.clone();
    let j = journal.clone();
    let id = kernel
        .create("parked", 40, move || {
            j.push("blocking");
            k.block();
            j.push("resumed");
        })
        .unwrap();

    assert_eq!(journal.entries(), ["blocking"]);
    kernel.unblock(id);
    assert_eq!(journal.entries(), ["blocking", "resumed"]);
}

#[test]
fn test_create_reports_distinct_ids_and_priorities() {
    let kernel = boot();
    kernel.set_priority(PRI_MAX);

    let ids: Vec<_> = (0u8..3)
        .map(|i| {
            let k = kernel.clone();
            kernel.create("worker", 30 + i, move || k.sleep_ticks(1000)).unwrap()
        })
        .collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);

    // All three sit in the ready queue below us with their assigned
    // priorities.
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(kernel.thread_priority(*id), Some(30 + i as u8));
    }
    assert_eq!(kernel.get_priority(), PRI_MAX);
}

#[test]
fn test_try_down_never_blocks() {
    let kernel = boot();
    let sema = Semaphore::new(&kernel, 1);
    assert!(sema.try_down());
    assert!(!sema.try_down());
    sema.up();
    assert!(sema.try_down());
    sema.up();
}
