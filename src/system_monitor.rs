use std::path::{Path, PathBuf};
use std::time::Duration;

use metrics::gauge;
use sysinfo::{Disks, System};
use tokio::time;

use crate::registry::ActiveJobRegistry;

/// Picks the disk whose mount point is the longest prefix of `path`.
fn disk_for<'a>(disks: &'a Disks, path: &Path) -> Option<&'a sysinfo::Disk> {
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
}

/// Publishes host gauges every five seconds, plus the free space left where
/// workspaces are created and the active job count.
pub fn start_system_monitor(workspace_root: PathBuf, registry: ActiveJobRegistry) {
    tokio::spawn(async move {
        let mut system = System::new_all();
        let mut disks = Disks::new_with_refreshed_list();
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            system.refresh_memory();
            system.refresh_cpu_all();
            disks.refresh(true);

            gauge!("system_memory_used_bytes").set(system.used_memory() as f64);
            gauge!("system_memory_total_bytes").set(system.total_memory() as f64);
            gauge!("system_cpu_usage_percent").set(system.global_cpu_usage() as f64);

            if let Some(disk) = disk_for(&disks, &workspace_root) {
                gauge!("workspace_disk_free_bytes").set(disk.available_space() as f64);
                gauge!("workspace_disk_total_bytes").set(disk.total_space() as f64);
                if disk.available_space() < 256 * 1024 * 1024 {
                    tracing::warn!(
                        free_bytes = disk.available_space(),
                        "workspace disk is almost full"
                    );
                }
            }

            gauge!("active_jobs").set(registry.len() as f64);
        }
    });
}
