use axum::Json;
use axum::extract::State;
use chrono::Utc;

use terminal_types::api::{HealthResponse, ProcessStatus, SystemStatus};

use crate::state::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "online".into(),
        timestamp: Utc::now(),
    })
}

/// Dashboard gauges. The percentages and process list are fixed display
/// values; only the uptime is real.
pub async fn system_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let process = |name: &str, status: &str| ProcessStatus {
        name: name.into(),
        status: status.into(),
    };
    Json(SystemStatus {
        cpu_usage: 42,
        memory_usage: 67,
        storage_usage: 23,
        network_usage: 85,
        uptime: format_uptime(state.started_at.elapsed().as_secs()),
        active_processes: vec![
            process("system_core.exe", "RUNNING"),
            process("security_monitor.exe", "RUNNING"),
            process("network_scan.exe", "SCANNING"),
            process("update_service.exe", "STANDBY"),
        ],
    })
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let minutes = secs % 3_600 / 60;
    format!("{}d {}h {}m", days, hours, minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_reads_like_a_clock() {
        assert_eq!(format_uptime(0), "0d 0h 0m");
        assert_eq!(format_uptime(45 * 86_400 + 12 * 3_600 + 36 * 60 + 59), "45d 12h 36m");
    }
}
