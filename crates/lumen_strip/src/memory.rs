//! In-Memory Strip
//!
//! Stand-in sink for tests and headless runs. Staged pixels are copied into a
//! shared buffer on `show`, which a [`MemoryStripHandle`] can inspect from
//! another thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StripError;
use crate::traits::{Rgb, StripSink};

/// Strip that renders into memory
pub struct MemoryStrip {
    staged: Vec<Rgb>,
    shared: Arc<Shared>,
    begun: bool,
}

struct Shared {
    shown: Mutex<Vec<Rgb>>,
    show_count: AtomicU64,
    fail_shows: AtomicBool,
}

/// Cloneable view of a [`MemoryStrip`]'s latched output
#[derive(Clone)]
pub struct MemoryStripHandle {
    shared: Arc<Shared>,
}

impl MemoryStrip {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            staged: vec![Rgb::BLACK; pixel_count],
            shared: Arc::new(Shared {
                shown: Mutex::new(vec![Rgb::BLACK; pixel_count]),
                show_count: AtomicU64::new(0),
                fail_shows: AtomicBool::new(false),
            }),
            begun: false,
        }
    }

    /// Get a handle for inspecting the output
    pub fn handle(&self) -> MemoryStripHandle {
        MemoryStripHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MemoryStripHandle {
    /// Pixels as of the last successful `show`
    pub fn pixels(&self) -> Vec<Rgb> {
        self.shared.shown.lock().clone()
    }

    /// Number of successful `show` calls
    pub fn show_count(&self) -> u64 {
        self.shared.show_count.load(Ordering::Acquire)
    }

    /// Make subsequent `show` calls fail (simulates a bus fault)
    pub fn set_fail_shows(&self, fail: bool) {
        self.shared.fail_shows.store(fail, Ordering::Release);
    }
}

impl StripSink for MemoryStrip {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn begin(&mut self) -> Result<(), StripError> {
        if !self.begun {
            debug!("Memory strip ready with {} pixels", self.staged.len());
            self.begun = true;
        }
        Ok(())
    }

    fn pixel_count(&self) -> usize {
        self.staged.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(px) = self.staged.get_mut(index) {
            *px = color;
        }
    }

    fn show(&mut self) -> Result<(), StripError> {
        if self.shared.fail_shows.load(Ordering::Acquire) {
            return Err(StripError::ShowFailed("simulated bus fault".into()));
        }
        self.shared.shown.lock().copy_from_slice(&self.staged);
        self.shared.show_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
