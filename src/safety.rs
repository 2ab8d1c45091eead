// Emergency stop plumbing
//
// Any subsystem that can be brought to a safe state exposes a `Stoppable`
// handle. The emergency-stop path (a held stop button, a stop command on the
// bus, Ctrl-C) walks the registry and stops every handle it finds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

/// Something that can be told to stop from any thread
pub trait Stoppable: Send + Sync {
    fn name(&self) -> &str;

    /// Request a stop. Must not block and must be safe to call at any time.
    fn stop(&self);
}

/// Latched stop request shared between the control loop and everyone else
///
/// `stop()` only sets a flag; the owner of the control loop consumes it with
/// `take()` right before writing actuators, so the zero output lands on the
/// very next write.
#[derive(Debug, Clone)]
pub struct StopHandle {
    name: Arc<str>,
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Consume a pending request, returns true if one was pending
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

impl Stoppable for StopHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) {
        self.requested.store(true, Ordering::Release);
    }
}

/// Every registered stoppable subsystem
#[derive(Default)]
pub struct SafetyRegistry {
    handles: Vec<Box<dyn Stoppable>>,
}

impl SafetyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: impl Stoppable + 'static) {
        info!("Registered stoppable subsystem: {}", handle.name());
        self.handles.push(Box::new(handle));
    }

    /// Stop every registered subsystem, returns how many were stopped
    pub fn stop_all(&self) -> usize {
        if self.handles.is_empty() {
            warn!("Emergency stop requested but nothing is registered");
        }
        for handle in &self.handles {
            handle.stop();
        }
        info!("Emergency stop sent to {} subsystem(s)", self.handles.len());
        self.handles.len()
    }
}
