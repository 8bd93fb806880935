//! Tool Tier Classifier
//!
//! Maps every tool name to one of four risk tiers. The table is fixed at
//! compile time and unknown names resolve to [`Tier::Forbidden`] so that a
//! reasoning engine inventing a tool name can never execute anything.
//!
//! The agentic loop consults this on every individual tool call; a single
//! turn may mix tiers.

use serde::{Deserialize, Serialize};

/// Risk tier governing how a tool call is handled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Executes without ceremony
    Auto,
    /// Executes, but the invocation is logged at info level
    AutoLogged,
    /// Suspends the loop until a human approves
    Confirm,
    /// Never executes; reported back to the engine as a failure
    Forbidden,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Auto => write!(f, "auto"),
            Tier::AutoLogged => write!(f, "auto_logged"),
            Tier::Confirm => write!(f, "confirm"),
            Tier::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Classify a tool name into its risk tier.
///
/// Total function: every input returns a tier, unrecognized names are
/// `Forbidden`. Pure, no I/O, O(1).
pub fn tier(tool_name: &str) -> Tier {
    match tool_name {
        // Read-only queries
        "cluster_status" | "node_status" | "vm_list" | "vm_status" | "storage_status"
        | "camera_snapshot" | "camera_events" | "presence_status" | "sensor_read"
        | "reminder_list" | "media_status" | "file_read" | "file_list" | "datetime" => Tier::Auto,

        // Low-risk actuation, logged
        "vm_start" | "container_start" | "light_set" | "thermostat_set" | "scene_activate"
        | "media_play" | "media_pause" | "voice_announce" | "reminder_create"
        | "reminder_cancel" => Tier::AutoLogged,

        // Disruptive or destructive, requires human approval
        "vm_stop" | "vm_restart" | "container_stop" | "container_restart" | "node_reboot"
        | "service_restart" | "file_write" | "file_delete" | "door_unlock"
        | "camera_recording_delete" => Tier::Confirm,

        // Never allowed from the reasoning loop
        "node_shutdown" | "cluster_shutdown" | "firewall_disable" | "backup_delete"
        | "user_delete" => Tier::Forbidden,

        // Fail closed
        _ => Tier::Forbidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tiers() {
        assert_eq!(tier("cluster_status"), Tier::Auto);
        assert_eq!(tier("vm_start"), Tier::AutoLogged);
        assert_eq!(tier("vm_stop"), Tier::Confirm);
        assert_eq!(tier("node_shutdown"), Tier::Forbidden);
    }

    #[test]
    fn test_unknown_is_forbidden() {
        assert_eq!(tier("rm_rf_slash"), Tier::Forbidden);
        assert_eq!(tier(""), Tier::Forbidden);
        assert_eq!(tier("Cluster_Status"), Tier::Forbidden); // case-sensitive, fail closed
    }

    #[test]
    fn test_idempotent() {
        assert_eq!(tier("vm_restart"), tier("vm_restart"));
        assert_eq!(tier("made_up"), tier("made_up"));
    }
}
