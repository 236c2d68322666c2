//! Process and system memory readings from `/proc`.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::memory_monitor::{MemoryProbe, MemorySample};

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
/// # Memory Info Error
pub enum MemoryInfoError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Field {0} missing from {1}")]
    MissingField(&'static str, String),
}

/// The memory lines of `/proc/self/status`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcStatus {
    pub vm_rss: u64,
    pub vm_hwm: u64,
    pub vm_size: u64,
}

/// The lines of `/proc/meminfo` the probe needs, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_available: u64,
}

/// Reads a `Key:   1234 kB` line, returning bytes.
fn field_kb(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        let value = rest.split_whitespace().next()?.parse::<u64>().ok()?;
        Some(value * KB)
    })
}

pub fn parse_status(content: &str) -> Result<ProcStatus, MemoryInfoError> {
    let require = |key: &'static str| {
        field_kb(content, key).ok_or_else(|| MemoryInfoError::MissingField(key, "status".to_string()))
    };
    Ok(ProcStatus {
        vm_rss: require("VmRSS")?,
        // Some kernels omit the high-water mark for kernel threads.
        vm_hwm: field_kb(content, "VmHWM").unwrap_or(0),
        vm_size: require("VmSize")?,
    })
}

pub fn parse_meminfo(content: &str) -> Result<MemInfo, MemoryInfoError> {
    let mem_total = field_kb(content, "MemTotal")
        .ok_or_else(|| MemoryInfoError::MissingField("MemTotal", "meminfo".to_string()))?;
    // Pre-3.14 kernels have no MemAvailable; MemFree is the closest reading.
    let mem_available = field_kb(content, "MemAvailable")
        .or_else(|| field_kb(content, "MemFree"))
        .ok_or_else(|| MemoryInfoError::MissingField("MemAvailable", "meminfo".to_string()))?;
    Ok(MemInfo {
        mem_total,
        mem_available,
    })
}

/// [`MemoryProbe`] backed by procfs.
///
/// The "heap" is the process resident set measured against the configured
/// budget, or against physical memory when no budget is set.
pub struct ProcessMemoryProbe {
    status_path: PathBuf,
    meminfo_path: PathBuf,
    heap_budget: Option<u64>,
    low_memory_threshold: u64,
}

impl ProcessMemoryProbe {
    pub fn new(heap_budget_mb: Option<u64>, low_memory_threshold_mb: u64) -> Self {
        Self::with_paths("/proc/self/status", "/proc/meminfo", heap_budget_mb, low_memory_threshold_mb)
    }

    pub fn with_paths(
        status_path: impl AsRef<Path>,
        meminfo_path: impl AsRef<Path>,
        heap_budget_mb: Option<u64>,
        low_memory_threshold_mb: u64,
    ) -> Self {
        Self {
            status_path: status_path.as_ref().to_path_buf(),
            meminfo_path: meminfo_path.as_ref().to_path_buf(),
            heap_budget: heap_budget_mb.map(|mb| mb * MB),
            low_memory_threshold: low_memory_threshold_mb * MB,
        }
    }

    pub fn read(&self) -> Result<MemorySample, MemoryInfoError> {
        let status = parse_status(&fs::read_to_string(&self.status_path)?)?;
        let meminfo = parse_meminfo(&fs::read_to_string(&self.meminfo_path)?)?;
        Ok(MemorySample {
            heap_used: status.vm_rss,
            heap_total: status.vm_size,
            heap_max: self.heap_budget.unwrap_or(meminfo.mem_total),
            resident: status.vm_rss,
            os_low_memory: meminfo.mem_available < self.low_memory_threshold,
            os_threshold: self.low_memory_threshold,
            os_available: meminfo.mem_available,
        })
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> MemorySample {
        match self.read() {
            Ok(sample) => sample,
            Err(err) => {
                log::debug!("Memory probe unavailable: {}", err);
                MemorySample {
                    os_threshold: self.low_memory_threshold,
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STATUS: &str = "Name:\tscene_host\nVmPeak:\t  300000 kB\nVmSize:\t  200000 kB\nVmHWM:\t   60000 kB\nVmRSS:\t   50000 kB\nThreads:\t4\n";
    const MEMINFO: &str = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:     100000 kB\n";

    #[test]
    fn test_parse_status() {
        let status = parse_status(STATUS).unwrap();
        assert_eq!(status.vm_rss, 50_000 * 1024);
        assert_eq!(status.vm_hwm, 60_000 * 1024);
        assert_eq!(status.vm_size, 200_000 * 1024);
        assert!(matches!(
            parse_status("Name:\tx\n"),
            Err(MemoryInfoError::MissingField("VmRSS", _))
        ));
    }

    #[test]
    fn test_parse_meminfo_falls_back_to_memfree() {
        let info = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(info.mem_available, 100_000 * 1024);
        let old_kernel = parse_meminfo("MemTotal: 1000 kB\nMemFree: 200 kB\n").unwrap();
        assert_eq!(old_kernel.mem_available, 200 * 1024);
    }

    #[test]
    fn test_probe_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status");
        let meminfo_path = dir.path().join("meminfo");
        fs::File::create(&status_path).unwrap().write_all(STATUS.as_bytes()).unwrap();
        fs::File::create(&meminfo_path).unwrap().write_all(MEMINFO.as_bytes()).unwrap();

        let probe = ProcessMemoryProbe::with_paths(&status_path, &meminfo_path, Some(100), 256);
        let sample = probe.sample();
        assert_eq!(sample.heap_used, 50_000 * 1024);
        assert_eq!(sample.heap_max, 100 * MB);
        assert!(sample.os_low_memory);

        let unbudgeted = ProcessMemoryProbe::with_paths(&status_path, &meminfo_path, None, 10);
        let sample = unbudgeted.sample();
        assert_eq!(sample.heap_max, 16_000_000 * 1024);
        assert!(!sample.os_low_memory);
    }

    #[test]
    fn test_missing_files_yield_empty_sample() {
        let probe = ProcessMemoryProbe::with_paths("/nonexistent/status", "/nonexistent/meminfo", None, 256);
        let sample = probe.sample();
        assert_eq!(sample.heap_max, 0);
        assert_eq!(sample.heap_used_ratio(), 0.0);
    }
}
