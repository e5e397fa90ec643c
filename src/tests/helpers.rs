//! Shared scaffolding for the scheduler suites.

use crate::kernel::{Config, Kernel};
use crate::platform::HostPlatform;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use std::sync::Mutex;

pub(crate) type TestKernel = Arc<Kernel<HostPlatform>>;

/// A kernel with the static-priority scheduler and a 100 Hz timer.
pub(crate) fn boot() -> TestKernel {
    Kernel::start(HostPlatform::new(), Config::default())
}

/// A kernel with MLFQS enabled.
pub(crate) fn boot_mlfqs() -> TestKernel {
    Kernel::start(HostPlatform::new(), Config { mlfqs: true, timer_freq: 100 })
}

/// A kernel whose page pool holds only `pages` pages.
pub(crate) fn boot_with_pages(pages: usize) -> TestKernel {
    Kernel::start(HostPlatform::with_page_budget(pages), Config::default())
}

/// Order-of-events journal shared between test threads. Only one simulated
/// thread runs at a time, so entries record true scheduling order.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
