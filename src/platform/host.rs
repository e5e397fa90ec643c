//! Host platform: the scheduler on OS threads, for development and testing.
//!
//! Each simulated thread is backed by a parked OS thread; `switch` hands the
//! single virtual CPU over by unparking the target and parking the caller,
//! so exactly one simulated thread runs at any instant. Timer interrupts are
//! delivered synchronously: the idle thread's `wait_for_interrupt` invokes
//! the registered handler once, standing in for the timer raising an
//! interrupt while the CPU is halted, and tests may deliver ticks themselves
//! through `Kernel::tick`. The result is a fully deterministic single-CPU
//! machine.

use crate::platform::Platform;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

/// Bytes in one thread page.
pub const PAGE_SIZE: usize = 4096;

/// Pages the default pool will hand out before reporting exhaustion.
pub const DEFAULT_PAGE_BUDGET: usize = 256;

pub struct HostPlatform {
    pages_left: AtomicUsize,
    tick_handler: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self::with_page_budget(DEFAULT_PAGE_BUDGET)
    }

    /// A platform that refuses allocation once `budget` pages are live.
    pub fn with_page_budget(budget: usize) -> Self {
        Self {
            pages_left: AtomicUsize::new(budget),
            tick_handler: Mutex::new(None),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// A parked OS thread's gate: a one-slot runnable flag plus condvar.
pub struct HostContext {
    gate: Arc<Gate>,
}

struct Gate {
    runnable: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Arc<Gate> {
        Arc::new(Gate { runnable: Mutex::new(false), cv: Condvar::new() })
    }

    fn resume(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        *runnable = true;
        self.cv.notify_one();
    }

    fn suspend(&self) {
        let mut runnable = self.runnable.lock().unwrap();
        while !*runnable {
            runnable = self.cv.wait(runnable).unwrap();
        }
        *runnable = false;
    }
}

impl Platform for HostPlatform {
    type Context = HostContext;
    type Page = Box<[u8]>;

    fn alloc_page(&self) -> Option<Box<[u8]>> {
        self.pages_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()?;
        Some(vec![0u8; PAGE_SIZE].into_boxed_slice())
    }

    fn free_page(&self, page: Box<[u8]>) {
        drop(page);
        self.pages_left.fetch_add(1, Ordering::AcqRel);
    }

    fn bootstrap_context(&self) -> HostContext {
        HostContext { gate: Gate::new() }
    }

    fn new_context(&self, entry: Box<dyn FnOnce() + Send>) -> Option<HostContext> {
        let gate = Gate::new();
        let thread_gate = gate.clone();
        thread::Builder::new()
            .name("priority-threads".into())
            .spawn(move || {
                // Stay off the virtual CPU until first scheduled.
                thread_gate.suspend();
                entry();
            })
            .ok()?;
        Some(HostContext { gate })
    }

    fn switch(&self, prev: &HostContext, next: &HostContext) {
        next.gate.resume();
        prev.gate.suspend();
    }

    fn register_tick_source(&self, _freq: u32, handler: Box<dyn Fn() + Send + Sync>) {
        *self.tick_handler.lock().unwrap() = Some(handler);
    }

    fn wait_for_interrupt(&self) {
        let handler = self.tick_handler.lock().unwrap();
        if let Some(handler) = handler.as_ref() {
            handler();
        }
    }
}
