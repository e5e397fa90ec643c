//! Platform abstraction: the collaborators the scheduler depends on but
//! does not implement.
//!
//! The core never touches hardware. Context switching, thread-page
//! allocation, the timer chip, and the halt instruction all funnel through
//! this trait; a port implements it once and the rest of the crate follows.

use alloc::boxed::Box;

/// Services a port must supply.
pub trait Platform: Send + Sync + Sized + 'static {
    /// Saved flow of control for one thread.
    type Context: Send + Sync;

    /// A zeroed, thread-sized page backing one thread's stack.
    type Page: Send;

    /// Allocate a zeroed page, or `None` when memory is exhausted.
    fn alloc_page(&self) -> Option<Self::Page>;

    /// Return a page to the allocator.
    fn free_page(&self, page: Self::Page);

    /// Capture the calling flow of control as a context. Used once, for the
    /// thread that brings the kernel up.
    fn bootstrap_context(&self) -> Self::Context;

    /// Create a suspended context that runs `entry` the first time it is
    /// switched to. `None` if the platform cannot back another thread.
    fn new_context(&self, entry: Box<dyn FnOnce() + Send>) -> Option<Self::Context>;

    /// Suspend `prev` and resume `next`. Returns when `prev` is next
    /// scheduled; never returns if it never is.
    fn switch(&self, prev: &Self::Context, next: &Self::Context);

    /// Install the periodic tick handler, `freq` interrupts per second.
    fn register_tick_source(&self, freq: u32, handler: Box<dyn Fn() + Send + Sync>);

    /// Halt until the next timer interrupt. Called only by the idle thread.
    fn wait_for_interrupt(&self);
}

#[cfg(feature = "std-shim")]
pub mod host;

#[cfg(feature = "std-shim")]
pub use host::HostPlatform;
