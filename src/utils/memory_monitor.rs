use std::sync::Mutex;
use std::time::SystemTime;

use sysinfo::{Pid, System};
use tracing::debug;

/// A single best-effort reading of process memory against the configured ceiling.
#[derive(Debug, Clone, Copy)]
pub struct MemorySnapshot {
    pub used_mb: f64,
    pub percent_of_ceiling: f64,
    /// False when the OS query failed and the reading is the conservative fallback.
    pub measured: bool,
    pub timestamp: SystemTime,
}

impl MemorySnapshot {
    pub fn new(used_mb: f64, ceiling_mb: f64) -> Self {
        Self {
            used_mb,
            percent_of_ceiling: percent_of(used_mb, ceiling_mb),
            measured: true,
            timestamp: SystemTime::now(),
        }
    }

    /// Reading used when the process size cannot be determined: reported at the ceiling.
    pub fn unknown(ceiling_mb: f64) -> Self {
        Self {
            used_mb: ceiling_mb,
            percent_of_ceiling: 100.0,
            measured: false,
            timestamp: SystemTime::now(),
        }
    }
}

fn percent_of(used_mb: f64, ceiling_mb: f64) -> f64 {
    if ceiling_mb <= 0.0 {
        return 100.0;
    }
    used_mb / ceiling_mb * 100.0
}

/// Decision oracle consulted at pipeline checkpoints.
///
/// Implementations never fail; a reading that cannot be taken must come back
/// as [`MemorySnapshot::unknown`].
pub trait MemoryMonitor: Send + Sync {
    fn snapshot(&self) -> MemorySnapshot;

    fn ceiling_mb(&self) -> f64;

    fn is_near_ceiling(&self, snapshot: &MemorySnapshot, headroom_mb: f64) -> bool {
        snapshot.used_mb >= self.ceiling_mb() - headroom_mb
    }
}

/// Samples the resident set size of the current process.
pub struct ProcessMemoryMonitor {
    ceiling_mb: f64,
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryMonitor {
    pub fn new(ceiling_mb: f64) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                debug!(target: "memory_monitor", error = err, "current pid unavailable; readings will be conservative");
                None
            }
        };
        Self {
            ceiling_mb,
            pid,
            system: Mutex::new(System::new()),
        }
    }

    fn rss_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

impl MemoryMonitor for ProcessMemoryMonitor {
    fn snapshot(&self) -> MemorySnapshot {
        match self.rss_bytes() {
            Some(bytes) => MemorySnapshot::new(bytes as f64 / 1024.0 / 1024.0, self.ceiling_mb),
            None => {
                debug!(target: "memory_monitor", "rss sampling failed; reporting ceiling");
                MemorySnapshot::unknown(self.ceiling_mb)
            }
        }
    }

    fn ceiling_mb(&self) -> f64 {
        self.ceiling_mb
    }
}
