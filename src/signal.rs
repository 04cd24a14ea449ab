use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Polled "shutdown requested" flag.
///
/// Clones share the flag. [`ShutdownWatcher::install`] wires it to Ctrl+C and
/// console close; the acquisition loop checks it once at the start of each tick.
#[derive(Debug, Clone, Default)]
pub struct ShutdownWatcher {
    flag: Arc<AtomicBool>,
}

impl ShutdownWatcher {
    /// A watcher not connected to any OS signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// A watcher set by the process interrupt handler.
    pub fn install() -> Result<Self> {
        let watcher = Self::new();
        let flag = watcher.flag.clone();
        ctrlc::set_handler(move || {
            log::info!("Interrupt received, stopping after the current tick");
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(watcher)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let watcher = ShutdownWatcher::new();
        let other = watcher.clone();
        assert!(!watcher.is_requested());
        other.request();
        assert!(watcher.is_requested());
    }
}
