//! Priority donation through mutexes: single, nested, and multi-donor.

use super::helpers::{boot, Journal};
use crate::sync::Mutex;
use alloc::format;
use alloc::sync::Arc;

#[test]
fn test_single_donation_raises_and_release_restores() {
    let kernel = boot();
    let mutex = Arc::new(Mutex::new(&kernel));

    mutex.acquire();
    assert_eq!(kernel.get_priority(), 31);

    let m = mutex.clone();
    kernel.create("high", 50, move || {
        m.acquire();
        m.release();
    }).unwrap();

    // The waiter donated to us the moment it blocked.
    assert_eq!(kernel.get_priority(), 50);
    mutex.release();
    assert_eq!(kernel.get_priority(), 31);
}

#[test]
fn test_nested_donation_follows_the_holder_chain() {
    let kernel = boot();
    let journal = Journal::new();
    let m1 = Arc::new(Mutex::new(&kernel));
    let m2 = Arc::new(Mutex::new(&kernel));

    m1.acquire();

    let mid_id = {
        let k = kernel.clone();
        let j = journal.clone();
        let m1 = m1.clone();
        let m2 = m2.clone();
        kernel
            .create("mid", 40, move || {
                m2.acquire();
                m1.acquire();
                j.push(format!("mid-acquired-m1@{}", k.get_priority()));
                m2.release();
                j.push(format!("mid-released-m2@{}", k.get_priority()));
                m1.release();
                j.push(format!("mid-released-m1@{}", k.get_priority()));
            })
            .unwrap()
    };
    // Mid ran (it outranks us), took m2, and now donates 40 to us via m1.
    assert_eq!(kernel.get_priority(), 40);

    {
        let m2 = m2.clone();
        kernel.create("high", 50, move || {
            m2.acquire();
            m2.release();
        }).unwrap();
    }
    // High donates 50 to mid through m2, and the chain lifts us too.
    assert_eq!(kernel.get_priority(), 50);
    assert_eq!(kernel.thread_priority(mid_id), Some(50));

    m1.release();
    assert_eq!(kernel.get_priority(), 31);
    assert_eq!(
        journal.entries(),
        ["mid-acquired-m1@50", "mid-released-m2@40", "mid-released-m1@40"],
    );
}

#[test]
fn test_two_donors_peel_off_one_mutex_at_a_time() {
    let kernel = boot();
    let m1 = Arc::new(Mutex::new(&kernel));
    let m2 = Arc::new(Mutex::new(&kernel));

    m1.acquire();
    m2.acquire();

    {
        let m1 = m1.clone();
        kernel.create("mid", 40, move || {
            m1.acquire();
            m1.release();
        }).unwrap();
    }
    {
        let m2 = m2.clone();
        kernel.create("high", 50, move || {
            m2.acquire();
            m2.release();
        }).unwrap();
    }
    assert_eq!(kernel.get_priority(), 50);

    // Dropping m2 withdraws only m2's donation.
    m2.release();
    assert_eq!(kernel.get_priority(), 40);
    m1.release();
    assert_eq!(kernel.get_priority(), 31);
}

#[test]
fn test_donation_tracks_base_priority_changes() {
    let kernel = boot();
    let mutex = Arc::new(Mutex::new(&kernel));

    mutex.acquire();
    let m = mutex.clone();
    kernel.create("high", 50, move || {
        m.acquire();
        m.release();
    }).unwrap();
    assert_eq!(kernel.get_priority(), 50);

    // A lower base stays masked by the donation...
    kernel.set_priority(10);
    assert_eq!(kernel.get_priority(), 50);
    // ...and a higher base wins over it.
    kernel.set_priority(55);
    assert_eq!(kernel.get_priority(), 55);

    kernel.set_priority(10);
    mutex.release();
    assert_eq!(kernel.get_priority(), 10);
    kernel.set_priority(31);
}

#[test]
fn test_try_acquire_never_donates() {
    let kernel = boot();
    let journal = Journal::new();
    let mutex = Arc::new(Mutex::new(&kernel));

    mutex.acquire();
    {
        let m = mutex.clone();
        let j = journal.clone();
        kernel.create("prober", 50, move || {
            j.push(format!("try={}", m.try_acquire()));
        }).unwrap();
    }
    assert_eq!(journal.entries(), ["try=false"]);
    assert_eq!(kernel.get_priority(), 31);
    mutex.release();

    assert!(mutex.try_acquire());
    assert!(mutex.held_by_current());
    mutex.release();
    assert!(!mutex.held_by_current());
}

#[test]
fn test_released_mutex_goes_to_the_highest_waiter() {
    let kernel = boot();
    let journal = Journal::new();
    let mutex = Arc::new(Mutex::new(&kernel));

    kernel.set_priority(63);
    mutex.acquire();
    for (name, priority) in [("low", 35u8), ("high", 55), ("mid", 45)] {
        let m = mutex.clone();
        let j = journal.clone();
        kernel
            .create(name, priority, move || {
                m.acquire();
                j.push(name);
                m.release();
            })
            .unwrap();
    }
    kernel.set_priority(20);
    assert!(journal.entries().is_empty());

    mutex.release();
    assert_eq!(journal.entries(), ["high", "mid", "low"]);
}
