//! System info collected and attached to every heartbeat (C7, §4.7): a
//! small hardware/OS survey built on `sysinfo`.

use serde_json::json;
use sysinfo::System;

pub fn collect() -> serde_json::Value {
    let mut system = System::new_all();
    system.refresh_all();

    let hostname = sysinfo::System::host_name().unwrap_or_default();
    let os_version = sysinfo::System::long_os_version().unwrap_or_default();
    let kernel_version = sysinfo::System::kernel_version().unwrap_or_default();

    json!({
        "hostname": hostname,
        "platform": std::env::consts::OS,
        "platform_version": os_version,
        "kernel_version": kernel_version,
        "architecture": std::env::consts::ARCH,
        "cpu_count": system.cpus().len(),
        "memory_total": system.total_memory(),
        "memory_available": system.available_memory(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_reports_nonzero_cpu_count() {
        let info = collect();
        assert!(info["cpu_count"].as_u64().unwrap() >= 1);
        assert_eq!(info["architecture"], std::env::consts::ARCH);
    }
}
