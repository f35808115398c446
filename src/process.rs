//! Description of the instrumented process sent to the sink at startup

use std::env;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use uuid::Uuid;

use crate::time::DualTime;

/// Environment variable linking child processes to the process that spawned
/// them. Launchers set it on the child command, see [`ProcessInfo::child_env`].
pub const PARENT_PROCESS_VAR: &str = "BLOCKSCOPE_PARENT_PROCESS";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub process_id: String,
    pub parent_process_id: Option<String>,
    pub exe: String,
    pub username: String,
    pub computer: String,
    pub distro: String,
    pub cpu_brand: String,
    pub start_time: String,
    pub start_ticks: i64,
}

impl ProcessInfo {
    /// Gather host details for a newly started dispatch. The process
    /// environment is only read.
    pub fn collect(process_id: String, start: DualTime) -> Self {
        let parent_process_id = env::var(PARENT_PROCESS_VAR)
            .ok()
            .filter(|parent| !parent.is_empty() && *parent != process_id);

        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()),
        );
        let cpu_brand = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            process_id,
            parent_process_id,
            exe: env::current_exe()
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_default(),
            username: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            computer: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            distro: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
            cpu_brand,
            start_time: start.to_rfc3339(),
            start_ticks: start.ticks,
        }
    }

    pub fn new_process_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Variable to set on a child command so it reports this process as its
    /// parent, e.g. `command.env(key, value)`.
    pub fn child_env(&self) -> (&'static str, &str) {
        (PARENT_PROCESS_VAR, &self.process_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_leaves_environment_untouched() {
        let before = env::var(PARENT_PROCESS_VAR).ok();
        let process_id = ProcessInfo::new_process_id();
        let start = DualTime::now();
        let info = ProcessInfo::collect(process_id.clone(), start);

        assert_eq!(env::var(PARENT_PROCESS_VAR).ok(), before);
        assert_eq!(info.child_env(), (PARENT_PROCESS_VAR, process_id.as_str()));

        assert_eq!(info.process_id, process_id);
        assert_eq!(info.start_ticks, start.ticks);
        assert_ne!(info.parent_process_id.as_deref(), Some(process_id.as_str()));
        assert!(!info.cpu_brand.is_empty());
    }
}
