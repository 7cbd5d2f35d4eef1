//! Process memory sampling for the prune consultant.

use sysinfo::{get_current_pid, Pid, System};

/// A point-in-time memory reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    /// Resident set size of this process, in bytes.
    pub resident: u64,
    /// Total system memory, in bytes.
    pub total: u64,
}

impl MemoryUsage {
    /// Resident set as a percentage of total system memory.
    pub fn percent_used(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.resident as f64 / self.total as f64 * 100.0
    }
}

/// Source of memory readings. Tests install a stub to simulate pressure.
pub trait MemoryReader: Send {
    fn memory(&mut self) -> MemoryUsage;
}

/// Reads the current process's RSS and the machine's total memory.
pub struct MemoryAnalyzer {
    system: System,
    pid: Option<Pid>,
}

impl MemoryAnalyzer {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: get_current_pid().ok(),
        }
    }
}

impl Default for MemoryAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader for MemoryAnalyzer {
    fn memory(&mut self) -> MemoryUsage {
        self.system.refresh_memory();
        let total = self.system.total_memory();

        let mut resident = 0;
        if let Some(pid) = self.pid {
            if self.system.refresh_process(pid) {
                if let Some(process) = self.system.process(pid) {
                    resident = process.memory();
                }
            }
        }

        MemoryUsage { resident, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_used_handles_zero_total() {
        let usage = MemoryUsage {
            resident: 100,
            total: 0,
        };
        assert_eq!(usage.percent_used(), 0.0);
    }

    #[test]
    fn percent_used_is_a_percentage() {
        let usage = MemoryUsage {
            resident: 1,
            total: 4,
        };
        assert_eq!(usage.percent_used(), 25.0);
    }

    #[test]
    fn analyzer_reports_nonzero_totals() {
        let mut analyzer = MemoryAnalyzer::new();
        let usage = analyzer.memory();
        assert!(usage.total > 0);
        assert!(usage.resident > 0);
    }
}
