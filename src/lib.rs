#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(unreachable_pub)]

//! Preemptive thread scheduling for a single-CPU teaching kernel.
//!
//! One strict-priority ready queue is driven by two mutually exclusive
//! policies: static priorities in `0..=63` with priority donation through
//! mutexes, or a 4.4BSD-style multi-level feedback queue (MLFQS) deriving
//! priorities from `recent_cpu`, `nice`, and a system load average. Timed
//! sleep goes through a deadline-ordered queue serviced by the timer
//! interrupt; counting semaphores, donation-aware mutexes, and Mesa
//! condition variables provide blocking synchronization on top.
//!
//! Everything architecture-specific (context switching, the timer chip,
//! thread-page allocation, halting) sits behind the [`Platform`] trait.
//! With the default `std-shim` feature the crate ships [`HostPlatform`],
//! which runs the whole scheduler on parked OS threads with exactly one
//! runnable at a time and ticks injected synchronously, so the scheduler is
//! fully exercisable on a development machine.
//!
//! # Quick start
//!
//! ```ignore
//! use priority_threads::{Config, HostKernel, HostPlatform};
//!
//! let kernel = HostKernel::start(HostPlatform::new(), Config::default());
//! let worker = kernel.clone();
//! kernel.create("worker", 40, move || {
//!     worker.sleep_ticks(10);
//! }).unwrap();
//! ```

extern crate alloc;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

pub mod errors;
pub mod fixed;
pub mod kernel;
mod list;
pub mod mlfqs;
pub mod platform;
pub mod sync;
pub mod thread;
mod timer;

#[cfg(test)]
mod tests;

// Panic handler for bare-metal builds without the host shim.
#[cfg(all(not(test), not(feature = "std-shim")))]
use core::panic::PanicInfo;

#[cfg(all(not(test), not(feature = "std-shim")))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Public API
// ============================================================================

// Scheduler
pub use kernel::{Config, Kernel, Stats, TIME_SLICE};

// Threads
pub use thread::{ThreadId, ThreadState, PRI_DEFAULT, PRI_MAX, PRI_MIN};

// Synchronization
pub use sync::{Condvar, Mutex, Semaphore};

// Platform abstraction
pub use platform::Platform;
#[cfg(feature = "std-shim")]
pub use platform::HostPlatform;

// Errors
pub use errors::{SpawnError, SpawnResult};

/// A kernel running on the host platform.
#[cfg(feature = "std-shim")]
pub type HostKernel = Kernel<HostPlatform>;
