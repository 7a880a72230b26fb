// Resource probe for the readiness advertisement.
//
// Capacity is sampled once at startup and treated as fixed for the process
// lifetime. The advertisement is informational, so the probe never fails:
// anything it cannot determine degrades to zero (or a placeholder hostname).

use std::path::Path;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

/// Point-in-time capacity of this host, as advertised to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub hostname: String,
    pub cpus: usize,
    pub memory_avail: u64,
    pub memory_total: u64,
    pub disk_avail: u64,
    pub disk_total: u64,
}

/// Sample host capacity. Disk figures describe the filesystem holding `dir`.
pub fn probe(dir: &Path) -> ResourceSnapshot {
    let system = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );

    let (disk_avail, disk_total) = disk_space(dir);

    ResourceSnapshot {
        hostname: hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string()),
        cpus: system.cpus().len(),
        memory_avail: system.available_memory(),
        memory_total: system.total_memory(),
        disk_avail,
        disk_total,
    }
}

/// Available/total space of the mounted filesystem holding `dir`.
fn disk_space(dir: &Path) -> (u64, u64) {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    best_mount(
        &dir,
        disks
            .iter()
            .map(|d| (d.mount_point(), d.available_space(), d.total_space())),
    )
    .unwrap_or((0, 0))
}

/// Pick the mount with the longest mount-point prefix of `dir`.
fn best_mount<'a>(
    dir: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64, u64)>,
) -> Option<(u64, u64)> {
    mounts
        .filter(|(mount, _, _)| dir.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.as_os_str().len())
        .map(|(_, avail, total)| (avail, total))
}
