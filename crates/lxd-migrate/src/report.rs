//! Human-readable summaries of an installation.

use std::fmt::Write as _;

use crate::daemon::{Inventory, ServerInfo};

/// Renders the summary shown before and after a migration.
#[must_use]
pub fn render(info: &ServerInfo, inventory: &Inventory) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "LXD version: {}", info.version());
    if let Some(pid) = info.environment.server_pid {
        let _ = writeln!(report, "LXD PID: {pid}");
    }
    let _ = writeln!(report, "Resources:");
    let _ = writeln!(report, "  Containers: {}", inventory.containers.len());
    let _ = writeln!(report, "  Images: {}", inventory.images.len());
    let _ = writeln!(report, "  Profiles: {}", inventory.profiles.len());
    let _ = writeln!(report, "  Storage pools: {}", inventory.storage_pools.len());
    if inventory.storage_pools.is_empty() && !info.environment.storage.is_empty() {
        let _ = writeln!(report, "    backend: {}", info.environment.storage);
    }
    for pool in &inventory.storage_pools {
        let _ = writeln!(report, "    {} ({})", pool.name, pool.driver);
    }
    match &inventory.networks {
        Some(_) => {
            let managed: Vec<_> = inventory.managed_networks().collect();
            let _ = writeln!(report, "  Networks: {}", managed.len());
            for network in managed {
                let _ = writeln!(report, "    {} ({})", network.name, network.kind);
            }
        }
        None => {
            let _ = writeln!(report, "  Networks: legacy bridge");
        }
    }
    report
}
