//! Cleanup of supervised processes on abrupt process exit
//!
//! Supervisors register their child pid and temp directory on start and
//! deregister on close. If the test process is interrupted with Ctrl-C while
//! entries remain, the handler kills the children and removes the directories.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Exit status used after an interrupt-triggered cleanup.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEntry {
    pub pid: Option<u32>,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ExitRegistry {
    entries: DashMap<Uuid, ExitEntry>,
    handler_installed: AtomicBool,
}

impl ExitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ExitRegistry {
        static REGISTRY: OnceLock<ExitRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ExitRegistry::new)
    }

    pub fn register(&self, pid: Option<u32>, temp_dir: Option<PathBuf>) -> Uuid {
        let id = Uuid::new_v4();
        debug!(%id, ?pid, "Registered exit cleanup");
        self.entries.insert(id, ExitEntry { pid, temp_dir });
        id
    }

    pub fn deregister(&self, id: &Uuid) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            debug!(%id, "Deregistered exit cleanup");
        }
        removed
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Kill every registered process and delete its directory.
    /// Returns the number of entries cleaned up.
    pub fn cleanup_all(&self) -> usize {
        let ids: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut cleaned = 0;
        for id in ids {
            let Some((_, entry)) = self.entries.remove(&id) else {
                continue;
            };
            if let Some(pid) = entry.pid {
                if kill_process(pid) {
                    info!(pid, "Killed supervised process on exit");
                }
            }
            if let Some(dir) = &entry.temp_dir {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %dir.display(), "Failed to delete temp directory on exit: {}", e);
                    }
                }
            }
            cleaned += 1;
        }
        cleaned
    }

    /// Spawn the Ctrl-C listener. Only the first call per registry installs it,
    /// and only from inside a tokio runtime.
    pub fn install_signal_handler(&'static self) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No tokio runtime, exit handler not installed");
            return;
        }
        if self.handler_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cleaning up supervised processes");
                let cleaned = self.cleanup_all();
                info!(cleaned, "Exit cleanup finished");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        });
        debug!("Exit handler installed");
    }

    pub fn is_handler_installed(&self) -> bool {
        self.handler_installed.load(Ordering::SeqCst)
    }
}

/// Send a kill signal to `pid`. False if no such process exists.
pub fn kill_process(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system.process(pid).map(|p| p.kill()).unwrap_or(false)
}

pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_process(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_and_deregister() {
        let registry = ExitRegistry::new();
        let id = registry.register(None, None);
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cleanup_removes_directories() {
        let registry = ExitRegistry::new();
        let dir = tempdir().unwrap().into_path();
        std::fs::write(dir.join("hoverfly"), "bin").unwrap();

        registry.register(None, Some(dir.clone()));
        registry.register(None, Some(dir.join("already-gone")));
        assert_eq!(registry.cleanup_all(), 2);
        assert!(!dir.exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_handler_needs_runtime() {
        static REGISTRY: OnceLock<ExitRegistry> = OnceLock::new();
        let registry = REGISTRY.get_or_init(ExitRegistry::new);
        registry.install_signal_handler();
        assert!(!registry.is_handler_installed());
    }
}
